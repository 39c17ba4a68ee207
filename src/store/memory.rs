// In-memory store. Commits are staged on a copy of the state and swapped in
// only when every write applied.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{Conflict, CoreError, CoreResult};
use crate::model::{
    LadderEntry, League, LeagueId, LeagueMatch, MultiplayerGame, ParticipantId, RatingEvent,
    Stage, StageId, StageStructure, Tournament, TournamentId,
};

use super::{Changeset, Store};

#[derive(Debug, Clone, Default)]
struct State {
    tournaments: BTreeMap<TournamentId, Tournament>,
    stages: BTreeMap<StageId, Stage>,
    structures: HashMap<StageId, StageStructure>,
    leagues: BTreeMap<LeagueId, League>,
    ladder: BTreeMap<(LeagueId, ParticipantId), LadderEntry>,
    league_matches: Vec<LeagueMatch>,
    games: Vec<MultiplayerGame>,
    rating_log: Vec<RatingEvent>,
}

impl State {
    fn apply(&mut self, changes: Changeset) -> CoreResult<()> {
        for tournament in changes.tournaments {
            self.tournaments.insert(tournament.id, tournament);
        }
        for stage in changes.stages {
            self.stages.insert(stage.id, stage);
        }
        for stage_id in changes.removed_stages {
            self.stages.remove(&stage_id);
            self.structures.remove(&stage_id);
        }
        for structure in changes.structures {
            self.structures.insert(structure.stage_id, structure);
        }
        for (stage_id, m) in changes.matches {
            let structure = self
                .structures
                .get_mut(&stage_id)
                .ok_or_else(|| CoreError::not_found("stage structure", stage_id))?;
            let len = structure.matches.len();
            match structure.matches.get_mut(m.id.index()) {
                Some(slot) => *slot = m,
                None if m.id.index() == len => structure.matches.push(m),
                None => return Err(CoreError::not_found("match", i64::from(m.id.0))),
            }
        }
        for league in changes.leagues {
            self.leagues.insert(league.id, league);
        }
        for entry in changes.ladder {
            self.ladder
                .insert((entry.league_id, entry.participant), entry);
        }
        for record in changes.league_matches {
            if self
                .league_matches
                .iter()
                .any(|m| m.league_id == record.league_id && m.key == record.key)
            {
                return Err(Conflict::AlreadyRecorded(record.key.to_string()).into());
            }
            self.league_matches.push(record);
        }
        for game in changes.games {
            if self
                .games
                .iter()
                .any(|g| g.league_id == game.league_id && g.id == game.id)
            {
                return Err(Conflict::AlreadyRecorded(format!("game {}", game.id)).into());
            }
            self.games.push(game);
        }
        for league_id in changes.cleared_logs {
            self.rating_log.retain(|e| e.league_id != league_id);
        }
        self.rating_log.extend(changes.rating_events);
        Ok(())
    }
}

/// Thread-safe in-memory `Store`, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn tournament(&self, id: TournamentId) -> CoreResult<Option<Tournament>> {
        Ok(self.inner.lock().unwrap().tournaments.get(&id).cloned())
    }

    async fn stage(&self, id: StageId) -> CoreResult<Option<Stage>> {
        Ok(self.inner.lock().unwrap().stages.get(&id).cloned())
    }

    async fn stages(&self, tournament_id: TournamentId) -> CoreResult<Vec<Stage>> {
        let state = self.inner.lock().unwrap();
        let mut stages: Vec<Stage> = state
            .stages
            .values()
            .filter(|s| s.tournament_id == tournament_id)
            .cloned()
            .collect();
        stages.sort_by_key(|s| (s.order, s.id));
        Ok(stages)
    }

    async fn structure(&self, stage_id: StageId) -> CoreResult<StageStructure> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .structures
            .get(&stage_id)
            .cloned()
            .unwrap_or_else(|| StageStructure::empty(stage_id)))
    }

    async fn league(&self, id: LeagueId) -> CoreResult<Option<League>> {
        Ok(self.inner.lock().unwrap().leagues.get(&id).cloned())
    }

    async fn ladder(&self, league_id: LeagueId) -> CoreResult<Vec<LadderEntry>> {
        let state = self.inner.lock().unwrap();
        let mut entries: Vec<LadderEntry> = state
            .ladder
            .values()
            .filter(|e| e.league_id == league_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.position, e.participant));
        Ok(entries)
    }

    async fn league_matches(&self, league_id: LeagueId) -> CoreResult<Vec<LeagueMatch>> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .league_matches
            .iter()
            .filter(|m| m.league_id == league_id)
            .cloned()
            .collect())
    }

    async fn games(&self, league_id: LeagueId) -> CoreResult<Vec<MultiplayerGame>> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .games
            .iter()
            .filter(|g| g.league_id == league_id)
            .cloned()
            .collect())
    }

    async fn rating_log(&self, league_id: LeagueId) -> CoreResult<Vec<RatingEvent>> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .rating_log
            .iter()
            .filter(|e| e.league_id == league_id)
            .cloned()
            .collect())
    }

    async fn commit(&self, changes: Changeset) -> CoreResult<()> {
        let mut state = self.inner.lock().unwrap();
        let mut staged = state.clone();
        staged.apply(changes)?;
        *state = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bracket::single;
    use crate::model::{Match, MatchId, MatchKey, MatchStatus, Participant, Placement, StageKind};
    use crate::store::MatchQuery;
    use chrono::Utc;

    fn record(key: i64) -> LeagueMatch {
        LeagueMatch {
            league_id: 1,
            key: MatchKey::OneOff { id: key },
            player1: ParticipantId(1),
            player2: ParticipantId(2),
            frames1: 3,
            frames2: 1,
            played_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_commit_and_load() {
        let store = MemoryStore::new();
        store
            .commit(Changeset {
                tournaments: vec![Tournament::new(1, "Spring Open")],
                stages: vec![
                    Stage::new(11, 1, 2, StageKind::SingleElimination),
                    Stage::new(10, 1, 1, StageKind::RoundRobin),
                ],
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(store.tournament(1).await.unwrap().unwrap().name, "Spring Open");
        let stages = store.stages(1).await.unwrap();
        assert_eq!(stages.iter().map(|s| s.id).collect::<Vec<_>>(), vec![10, 11]);
        assert!(store.structure(10).await.unwrap().is_empty());
        assert!(store
            .matches(&MatchQuery::stage(10))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_nothing_behind() {
        let store = MemoryStore::new();
        store
            .commit(Changeset {
                league_matches: vec![record(1)],
                ..Default::default()
            })
            .await
            .unwrap();

        let err = store
            .commit(Changeset {
                tournaments: vec![Tournament::new(5, "Ghost")],
                league_matches: vec![record(2), record(1)],
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.conflict().is_some());
        assert!(store.tournament(5).await.unwrap().is_none());
        assert_eq!(store.league_matches(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cleared_log_is_replaced() {
        let store = MemoryStore::new();
        let event = RatingEvent {
            league_id: 1,
            participant: ParticipantId(1),
            delta: 5,
            source: crate::model::RatingSource::Game { id: 1 },
        };
        store
            .commit(Changeset {
                rating_events: vec![event.clone(), event.clone()],
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .commit(Changeset {
                cleared_logs: vec![1],
                rating_events: vec![event],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(store.rating_log(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_match_upsert_replaces_or_appends() {
        let store = MemoryStore::new();
        let entrants: Vec<Participant> = (1..=4)
            .map(|i| Participant {
                id: ParticipantId(i),
                seed: i as u32,
                rating_snapshot: None,
            })
            .collect();
        let mut structure = StageStructure::empty(3);
        structure.participants = entrants.clone();
        single::build(&mut structure, &entrants, false, "Main");
        let count = structure.matches.len();
        store
            .commit(Changeset {
                structures: vec![structure.clone()],
                ..Default::default()
            })
            .await
            .unwrap();

        let mut first = structure.matches[0].clone();
        first.status = MatchStatus::InProgress;
        let appended = Match::new(
            MatchId(count as u32),
            None,
            1,
            Placement::Group {
                group: 0,
                round_index: None,
            },
        );
        store
            .commit(Changeset {
                matches: vec![(3, first.clone()), (3, appended.clone())],
                ..Default::default()
            })
            .await
            .unwrap();
        let loaded = store.structure(3).await.unwrap();
        assert_eq!(loaded.matches.len(), count + 1);
        assert_eq!(loaded.matches[0], first);
        assert_eq!(loaded.matches[count], appended);

        let mut gap = appended;
        gap.id = MatchId(count as u32 + 5);
        let err = store
            .commit(Changeset {
                matches: vec![(3, gap)],
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
        assert_eq!(store.structure(3).await.unwrap(), loaded);
    }
}
