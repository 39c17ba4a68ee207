// League ladder operations: registration, result recording, rearrangement
// and full recalculation.
//
// Every operation holds its league's lock, commits one changeset and then
// announces `LadderUpdated`.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{ConfigError, Conflict, CoreError, CoreResult};
use crate::events::{CoreEvent, EventBus};
use crate::locks::{LockRegistry, LockScope};
use crate::metrics::{time_operation, LADDER_REARRANGEMENTS_TOTAL};
use crate::model::{LadderEntry, League, LeagueId, LeagueMatch, MultiplayerGame, ParticipantId};
use crate::rating::current_ratings;
use crate::rating::positions::{game_events, match_events, rearrange, replay};
use crate::store::{Changeset, Store};

pub struct LadderService<S: Store> {
    store: Arc<S>,
    locks: LockRegistry,
    events: EventBus,
}

impl<S: Store> Clone for LadderService<S> {
    fn clone(&self) -> Self {
        LadderService {
            store: Arc::clone(&self.store),
            locks: self.locks.clone(),
            events: self.events.clone(),
        }
    }
}

impl<S: Store> LadderService<S> {
    pub fn new(store: Arc<S>, locks: LockRegistry, events: EventBus) -> Self {
        LadderService {
            store,
            locks,
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    async fn require_league(&self, league_id: LeagueId) -> CoreResult<League> {
        self.store
            .league(league_id)
            .await?
            .ok_or_else(|| CoreError::not_found("league", league_id))
    }

    // ── Setup ────────────────────────────────────────────────────────

    pub async fn create_league(&self, league: League) -> CoreResult<League> {
        league.strategy.validate()?;
        let _guard = self.locks.acquire(LockScope::League, league.id).await;
        if self.store.league(league.id).await?.is_some() {
            return Err(Conflict::AlreadyRecorded(format!("league {}", league.id)).into());
        }
        self.store
            .commit(Changeset {
                leagues: vec![league.clone()],
                ..Default::default()
            })
            .await?;
        tracing::info!(league_id = league.id, name = %league.name, "league created");
        Ok(league)
    }

    /// Add a player to the ladder, or update the names of one already on it.
    pub async fn register_player(
        &self,
        league_id: LeagueId,
        participant: ParticipantId,
        first_name: &str,
        last_name: &str,
    ) -> CoreResult<LadderEntry> {
        if participant.is_bye() {
            return Err(ConfigError::ReservedParticipant(participant.0).into());
        }
        let _guard = self.locks.acquire(LockScope::League, league_id).await;
        let league = self.require_league(league_id).await?;

        let mut entries = self.store.ladder(league_id).await?;
        match entries.iter_mut().find(|e| e.participant == participant) {
            Some(entry) => {
                entry.first_name = first_name.to_string();
                entry.last_name = last_name.to_string();
            }
            None => entries.push(LadderEntry::new(
                league_id,
                participant,
                first_name,
                last_name,
                league.base_rating,
            )),
        }

        let ladder = self
            .rearranged(&league, &entries, Changeset::default())
            .await?;
        let entry = ladder
            .iter()
            .find(|e| e.participant == participant)
            .cloned()
            .ok_or_else(|| CoreError::not_found("ladder entry", participant.0))?;
        self.store
            .commit(Changeset {
                ladder,
                ..Default::default()
            })
            .await?;
        self.announce(league_id, "registration");
        Ok(entry)
    }

    // ── Results ──────────────────────────────────────────────────────

    pub async fn record_match(&self, record: LeagueMatch) -> CoreResult<Vec<LadderEntry>> {
        let league_id = record.league_id;
        self.record_matches(league_id, vec![record]).await
    }

    /// Rate a batch of pairwise results in the given order and rearrange once.
    pub async fn record_matches(
        &self,
        league_id: LeagueId,
        records: Vec<LeagueMatch>,
    ) -> CoreResult<Vec<LadderEntry>> {
        let _timer = time_operation("record_matches");
        let _guard = self.locks.acquire(LockScope::League, league_id).await;
        let league = self.require_league(league_id).await?;
        let changes = self.plan_matches(&league, records).await?;
        let ladder = changes.ladder.clone();
        self.store.commit(changes).await?;
        self.announce(league_id, "match");
        Ok(ladder)
    }

    /// Validate and rate pairwise results without committing. The caller
    /// must hold the league lock.
    pub(crate) async fn plan_matches(
        &self,
        league: &League,
        records: Vec<LeagueMatch>,
    ) -> CoreResult<Changeset> {
        let rules = league
            .strategy
            .rules()
            .ok_or(ConfigError::StrategyMismatch(league.id))?;

        let entries = self.store.ladder(league.id).await?;
        let registered: HashSet<ParticipantId> = entries.iter().map(|e| e.participant).collect();
        let mut keys: HashSet<_> = self
            .store
            .league_matches(league.id)
            .await?
            .into_iter()
            .map(|m| m.key)
            .collect();

        let log = self.store.rating_log(league.id).await?;
        let mut ratings = current_ratings(league.base_rating, &log);
        let mut rating_events = Vec::new();
        let mut accepted = Vec::with_capacity(records.len());

        for mut record in records {
            record.league_id = league.id;
            if record.player1 == record.player2 {
                return Err(Conflict::SameParticipant.into());
            }
            if record.frames1 == record.frames2 {
                return Err(Conflict::TieScore(record.frames1).into());
            }
            for player in [record.player1, record.player2] {
                if !registered.contains(&player) {
                    return Err(CoreError::not_found("ladder entry", player.0));
                }
            }
            if !keys.insert(record.key) {
                return Err(Conflict::AlreadyRecorded(record.key.to_string()).into());
            }

            let events = match_events(rules, &record, &ratings, league.base_rating)?;
            for event in &events {
                *ratings
                    .entry(event.participant)
                    .or_insert(league.base_rating) += event.delta;
            }
            tracing::debug!(
                league_id = league.id,
                key = %record.key,
                winner = %record.winner(),
                "rated league match"
            );
            rating_events.extend(events);
            accepted.push(record);
        }

        let pending = Changeset {
            league_matches: accepted,
            rating_events,
            ..Default::default()
        };
        let ladder = self.rearranged(league, &entries, pending.clone()).await?;
        Ok(Changeset {
            ladder,
            ..pending
        })
    }

    /// Apply a killer-pool game's pre-computed points.
    pub async fn apply_multiplayer_result(
        &self,
        game: MultiplayerGame,
    ) -> CoreResult<Vec<LadderEntry>> {
        let _timer = time_operation("apply_multiplayer_result");
        let league_id = game.league_id;
        let _guard = self.locks.acquire(LockScope::League, league_id).await;
        let league = self.require_league(league_id).await?;
        if league.strategy.rules().is_some() {
            return Err(ConfigError::StrategyMismatch(league_id).into());
        }

        let entries = self.store.ladder(league_id).await?;
        let players = game
            .participants
            .iter()
            .chain(game.scores.iter().map(|s| &s.participant));
        for player in players {
            if !entries.iter().any(|e| e.participant == *player) {
                return Err(CoreError::not_found("ladder entry", player.0));
            }
        }
        if self
            .store
            .games(league_id)
            .await?
            .iter()
            .any(|g| g.id == game.id)
        {
            return Err(Conflict::AlreadyRecorded(format!("game {}", game.id)).into());
        }

        let pending = Changeset {
            rating_events: game_events(&game),
            games: vec![game],
            ..Default::default()
        };
        let ladder = self.rearranged(&league, &entries, pending.clone()).await?;
        self.store
            .commit(Changeset {
                ladder: ladder.clone(),
                ..pending
            })
            .await?;
        self.announce(league_id, "game");
        Ok(ladder)
    }

    // ── Ladder maintenance ───────────────────────────────────────────

    /// Recompute counters and positions from the stored logs.
    pub async fn rearrange_ladder(&self, league_id: LeagueId) -> CoreResult<Vec<LadderEntry>> {
        let _guard = self.locks.acquire(LockScope::League, league_id).await;
        let league = self.require_league(league_id).await?;
        let entries = self.store.ladder(league_id).await?;
        let ladder = self
            .rearranged(&league, &entries, Changeset::default())
            .await?;
        self.store
            .commit(Changeset {
                ladder: ladder.clone(),
                ..Default::default()
            })
            .await?;
        self.announce(league_id, "rearrange");
        Ok(ladder)
    }

    /// Rebuild the rating log from the full result history with the current
    /// rules, then rearrange.
    pub async fn recalculate_ladder(&self, league_id: LeagueId) -> CoreResult<Vec<LadderEntry>> {
        let _timer = time_operation("recalculate_ladder");
        let _guard = self.locks.acquire(LockScope::League, league_id).await;
        let league = self.require_league(league_id).await?;
        let matches = self.store.league_matches(league_id).await?;
        let games = self.store.games(league_id).await?;
        let log = replay(&league, &matches, &games)?;

        let entries = self.store.ladder(league_id).await?;
        let ladder = rearrange(&entries, league.base_rating, &log, &matches, &games);
        tracing::info!(
            league_id,
            matches = matches.len(),
            games = games.len(),
            events = log.len(),
            "recalculated ladder"
        );
        self.store
            .commit(Changeset {
                ladder: ladder.clone(),
                cleared_logs: vec![league_id],
                rating_events: log,
                ..Default::default()
            })
            .await?;
        self.announce(league_id, "recalculate");
        Ok(ladder)
    }

    pub async fn ladder(&self, league_id: LeagueId) -> CoreResult<Vec<LadderEntry>> {
        self.require_league(league_id).await?;
        self.store.ladder(league_id).await
    }

    /// The ladder as it will look once `pending` is committed.
    async fn rearranged(
        &self,
        league: &League,
        entries: &[LadderEntry],
        pending: Changeset,
    ) -> CoreResult<Vec<LadderEntry>> {
        let mut log = self.store.rating_log(league.id).await?;
        log.extend(pending.rating_events);
        let mut matches = self.store.league_matches(league.id).await?;
        matches.extend(pending.league_matches);
        let mut games = self.store.games(league.id).await?;
        games.extend(pending.games);
        Ok(rearrange(
            entries,
            league.base_rating,
            &log,
            &matches,
            &games,
        ))
    }

    pub(crate) fn announce(&self, league_id: LeagueId, trigger: &str) {
        LADDER_REARRANGEMENTS_TOTAL
            .with_label_values(&[trigger])
            .inc();
        self.events.publish(CoreEvent::LadderUpdated { league_id });
    }
}
