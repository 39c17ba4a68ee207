// Tournament operations: setup, bracket and group generation, the match
// lifecycle and cross-stage advancement.
//
// Mutations of a stage hold that stage's lock from load to commit and write a
// single changeset. Events are published only after the commit succeeded.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;

use crate::bracket::round_robin::{build_groups, validate_layout};
use crate::bracket::{build_elimination, BracketOptions};
use crate::error::{ConfigError, Conflict, CoreError, CoreResult};
use crate::events::{CoreEvent, EventBus};
use crate::ladder::LadderService;
use crate::locks::{LockRegistry, LockScope};
use crate::metrics::{time_operation, BRACKETS_GENERATED_TOTAL, STAGES_RUNNING};
use crate::model::{
    EliminationKind, GroupId, LeagueId, LeagueMatch, Match, MatchId, MatchKey, MatchStatus,
    Participant, ParticipantId, Score, Stage, StageId, StageKind, StageSettings, StageStatus,
    StageStructure, Tournament, TournamentId, TournamentStatus,
};
use crate::progression::Progression;
use crate::seeding::{seed_participants, Entrant, MIN_PARTICIPANTS};
use crate::standings::{group_standings, qualifiers, stage_outcome, StageOutcome, StandingRow};
use crate::store::{Changeset, MatchQuery, Store};

/// Follow-up work produced by a match change, applied after the commit.
#[derive(Default)]
struct Advancement {
    events: Vec<CoreEvent>,
    ladders: Vec<LeagueId>,
    started: i64,
    finished: i64,
    /// Locks on other stages and leagues written by the same commit.
    guards: Vec<OwnedMutexGuard<()>>,
}

pub struct TournamentService<S: Store> {
    store: Arc<S>,
    locks: LockRegistry,
    events: EventBus,
    ladder: LadderService<S>,
}

impl<S: Store> TournamentService<S> {
    pub fn new(store: Arc<S>, events: EventBus) -> Self {
        let locks = LockRegistry::new();
        let ladder = LadderService::new(Arc::clone(&store), locks.clone(), events.clone());
        TournamentService {
            store,
            locks,
            events,
            ladder,
        }
    }

    /// League operations sharing this service's store, locks and events.
    pub fn ladder(&self) -> &LadderService<S> {
        &self.ladder
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    async fn require_tournament(&self, id: TournamentId) -> CoreResult<Tournament> {
        self.store
            .tournament(id)
            .await?
            .ok_or_else(|| CoreError::not_found("tournament", id))
    }

    async fn require_stage(&self, id: StageId) -> CoreResult<Stage> {
        self.store
            .stage(id)
            .await?
            .ok_or_else(|| CoreError::not_found("stage", id))
    }

    // ── Setup ────────────────────────────────────────────────────────

    pub async fn create_tournament(&self, mut tournament: Tournament) -> CoreResult<Tournament> {
        if self.store.tournament(tournament.id).await?.is_some() {
            return Err(Conflict::AlreadyRecorded(format!("tournament {}", tournament.id)).into());
        }
        if let Some(league_id) = tournament.league_id {
            let league = self
                .store
                .league(league_id)
                .await?
                .ok_or_else(|| CoreError::not_found("league", league_id))?;
            if league.strategy.rules().is_none() {
                return Err(ConfigError::StrategyMismatch(league_id).into());
            }
        }
        tournament.status = TournamentStatus::Pending;
        self.store
            .commit(Changeset {
                tournaments: vec![tournament.clone()],
                ..Default::default()
            })
            .await?;
        tracing::info!(tournament_id = tournament.id, name = %tournament.name, "tournament created");
        Ok(tournament)
    }

    pub async fn create_stage(&self, mut stage: Stage) -> CoreResult<Stage> {
        validate_settings(&stage.settings)?;
        let _guard = self.locks.acquire(LockScope::Stage, stage.id).await;
        self.require_tournament(stage.tournament_id).await?;
        if self.store.stage(stage.id).await?.is_some() {
            return Err(Conflict::AlreadyRecorded(format!("stage {}", stage.id)).into());
        }
        stage.status = StageStatus::Created;
        self.store
            .commit(Changeset {
                stages: vec![stage.clone()],
                ..Default::default()
            })
            .await?;
        tracing::info!(
            stage_id = stage.id,
            tournament_id = stage.tournament_id,
            kind = %stage.kind,
            "stage created"
        );
        Ok(stage)
    }

    /// Change a stage's settings. The kind is fixed once matches exist.
    pub async fn update_stage(
        &self,
        stage_id: StageId,
        kind: StageKind,
        settings: StageSettings,
    ) -> CoreResult<Stage> {
        validate_settings(&settings)?;
        let _guard = self.locks.acquire(LockScope::Stage, stage_id).await;
        let mut stage = self.require_stage(stage_id).await?;
        if kind != stage.kind && !self.store.structure(stage_id).await?.is_empty() {
            return Err(Conflict::StageKindLocked.into());
        }
        stage.kind = kind;
        stage.settings = settings;
        self.store
            .commit(Changeset {
                stages: vec![stage.clone()],
                ..Default::default()
            })
            .await?;
        Ok(stage)
    }

    /// Delete a stage that has no started match.
    pub async fn delete_stage(&self, stage_id: StageId) -> CoreResult<()> {
        let _guard = self.locks.acquire(LockScope::Stage, stage_id).await;
        let stage = self.require_stage(stage_id).await?;
        if self.store.structure(stage_id).await?.has_started() {
            return Err(Conflict::StageStarted(stage_id).into());
        }
        self.store
            .commit(Changeset {
                removed_stages: vec![stage_id],
                ..Default::default()
            })
            .await?;
        if stage.status == StageStatus::Running {
            STAGES_RUNNING.dec();
        }
        tracing::info!(stage_id, "stage deleted");
        Ok(())
    }

    // ── Generation ───────────────────────────────────────────────────

    /// Seed the entrants and (re)build an elimination stage's bracket.
    pub async fn generate_bracket(
        &self,
        stage_id: StageId,
        entrants: &[Entrant],
        options: BracketOptions,
    ) -> CoreResult<StageStructure> {
        let _timer = time_operation("generate_bracket");
        let _guard = self.locks.acquire(LockScope::Stage, stage_id).await;
        let stage = self.require_stage(stage_id).await?;
        if stage.kind.elimination().is_none() {
            return Err(ConfigError::UnsupportedFormat {
                kind: stage.kind,
                operation: "bracket generation",
            }
            .into());
        }
        self.ensure_not_started(stage_id).await?;
        let participants = seed_participants(entrants, options.seeding, &mut options.rng())?;
        let structure = layout(&stage, participants, None)?;
        self.install(stage, structure).await
    }

    /// Seed the entrants into `group_count` round-robin groups.
    pub async fn generate_groups(
        &self,
        stage_id: StageId,
        entrants: &[Entrant],
        group_count: usize,
        options: BracketOptions,
    ) -> CoreResult<StageStructure> {
        let _timer = time_operation("generate_groups");
        let _guard = self.locks.acquire(LockScope::Stage, stage_id).await;
        let stage = self.require_stage(stage_id).await?;
        if !stage.kind.uses_groups() {
            return Err(ConfigError::UnsupportedFormat {
                kind: stage.kind,
                operation: "group generation",
            }
            .into());
        }
        self.ensure_not_started(stage_id).await?;
        let participants = seed_participants(entrants, options.seeding, &mut options.rng())?;
        let structure = layout(&stage, participants, Some(group_count))?;
        self.install(stage, structure).await
    }

    /// Re-seed the stage's current participants and rebuild it.
    pub async fn reseed_stage(
        &self,
        stage_id: StageId,
        options: BracketOptions,
    ) -> CoreResult<StageStructure> {
        let _timer = time_operation("reseed_stage");
        let _guard = self.locks.acquire(LockScope::Stage, stage_id).await;
        let stage = self.require_stage(stage_id).await?;
        let current = self.store.structure(stage_id).await?;
        if current.participants.is_empty() {
            return Err(Conflict::NothingToSeed(stage_id).into());
        }
        if current.has_started() {
            return Err(Conflict::StageStarted(stage_id).into());
        }
        let entrants: Vec<Entrant> = current
            .participants
            .iter()
            .map(|p| Entrant {
                id: p.id,
                rating: p.rating_snapshot,
                seed: Some(p.seed),
            })
            .collect();
        let participants = seed_participants(&entrants, options.seeding, &mut options.rng())?;
        let group_count = stage.kind.uses_groups().then_some(current.groups.len());
        let structure = layout(&stage, participants, group_count)?;
        self.install(stage, structure).await
    }

    async fn ensure_not_started(&self, stage_id: StageId) -> CoreResult<()> {
        if self.store.structure(stage_id).await?.has_started() {
            return Err(Conflict::StageStarted(stage_id).into());
        }
        Ok(())
    }

    /// Swap a freshly generated structure in and mark the stage running.
    async fn install(
        &self,
        mut stage: Stage,
        structure: StageStructure,
    ) -> CoreResult<StageStructure> {
        let newly_running = stage.status != StageStatus::Running;
        stage.status = StageStatus::Running;

        let mut changes = Changeset {
            stages: vec![stage.clone()],
            structures: vec![structure.clone()],
            ..Default::default()
        };
        let mut tournament = self.require_tournament(stage.tournament_id).await?;
        if tournament.status == TournamentStatus::Pending {
            tournament.status = TournamentStatus::Running;
            changes.tournaments.push(tournament);
        }
        self.store.commit(changes).await?;

        if newly_running {
            STAGES_RUNNING.inc();
        }
        BRACKETS_GENERATED_TOTAL
            .with_label_values(&[stage.kind.to_str_name()])
            .inc();
        tracing::info!(
            stage_id = stage.id,
            kind = %stage.kind,
            participants = structure.participants.len(),
            groups = structure.groups.len(),
            matches = structure.matches.len(),
            "stage generated"
        );
        Ok(structure)
    }

    // ── Match lifecycle ──────────────────────────────────────────────

    pub async fn start_match(&self, stage_id: StageId, match_id: MatchId) -> CoreResult<Match> {
        self.with_match(stage_id, match_id, "start_match", move |p, _| {
            p.start(match_id)
        })
        .await
    }

    pub async fn report_score(
        &self,
        stage_id: StageId,
        match_id: MatchId,
        score: Score,
    ) -> CoreResult<Match> {
        self.with_match(stage_id, match_id, "report_score", move |p, settings| {
            p.report_score(match_id, score, settings.races_to)
        })
        .await
    }

    pub async fn confirm_result(
        &self,
        stage_id: StageId,
        match_id: MatchId,
        participant: ParticipantId,
    ) -> CoreResult<Match> {
        self.with_match(stage_id, match_id, "confirm_result", move |p, _| {
            p.confirm(match_id, participant).map(|_| ())
        })
        .await
    }

    /// Enter or correct a final score.
    pub async fn enter_result(
        &self,
        stage_id: StageId,
        match_id: MatchId,
        score: Score,
    ) -> CoreResult<Match> {
        self.with_match(stage_id, match_id, "enter_result", move |p, settings| {
            p.enter_result(match_id, score, settings.races_to)
        })
        .await
    }

    pub async fn forfeit_match(
        &self,
        stage_id: StageId,
        match_id: MatchId,
        absent: ParticipantId,
    ) -> CoreResult<Match> {
        self.with_match(stage_id, match_id, "forfeit_match", move |p, _| {
            p.forfeit(match_id, absent)
        })
        .await
    }

    pub async fn cancel_match(
        &self,
        stage_id: StageId,
        match_id: MatchId,
        reason: &str,
    ) -> CoreResult<Match> {
        let reason = reason.to_string();
        self.with_match(stage_id, match_id, "cancel_match", move |p, _| {
            p.cancel(match_id, &reason)
        })
        .await
    }

    pub async fn reschedule_match(
        &self,
        stage_id: StageId,
        match_id: MatchId,
        at: Option<DateTime<Utc>>,
        table: Option<String>,
    ) -> CoreResult<Match> {
        self.with_match(stage_id, match_id, "reschedule_match", move |p, _| {
            p.reschedule(match_id, at, table)
        })
        .await
    }

    async fn with_match<F>(
        &self,
        stage_id: StageId,
        match_id: MatchId,
        operation: &'static str,
        apply: F,
    ) -> CoreResult<Match>
    where
        F: FnOnce(&mut Progression<'_>, &StageSettings) -> CoreResult<()> + Send,
    {
        let _timer = time_operation(operation);
        let _guard = self.locks.acquire(LockScope::Stage, stage_id).await;
        let stage = self.require_stage(stage_id).await?;
        // A completed stage has already fed the next stage and the league.
        if stage.status == StageStatus::Completed {
            return Err(Conflict::StageCompleted(stage_id).into());
        }
        let mut structure = self.store.structure(stage_id).await?;

        let target = structure.require(match_id)?;
        if stage.kind == StageKind::GroupThenPlayoff
            && target.group().is_some()
            && !structure.brackets.is_empty()
        {
            return Err(Conflict::GroupsLocked.into());
        }

        let touched = {
            let mut progression = Progression::new(&mut structure);
            apply(&mut progression, &stage.settings)?;
            progression.into_touched()
        };
        let mut changes = Changeset {
            matches: touched
                .iter()
                .filter_map(|&id| structure.get(id))
                .map(|m| (stage_id, m.clone()))
                .collect(),
            ..Default::default()
        };

        let advancement = self.advance(stage, &mut structure, &mut changes).await?;
        self.store.commit(changes).await?;
        drop(advancement.guards);

        STAGES_RUNNING.add(advancement.started - advancement.finished);
        for league_id in advancement.ladders {
            self.ladder.announce(league_id, "tournament");
        }
        for event in advancement.events {
            self.events.publish(event);
        }
        structure.require(match_id).cloned()
    }

    // ── Advancement ──────────────────────────────────────────────────

    async fn advance(
        &self,
        stage: Stage,
        structure: &mut StageStructure,
        changes: &mut Changeset,
    ) -> CoreResult<Advancement> {
        let mut out = Advancement::default();
        match stage_outcome(structure, stage.kind) {
            StageOutcome::InProgress => {}
            StageOutcome::GroupsComplete => {
                let qualified = qualifiers(structure);
                if qualified.len() < MIN_PARTICIPANTS {
                    tracing::warn!(
                        stage_id = stage.id,
                        qualifiers = qualified.len(),
                        "not enough qualifiers for a playoff"
                    );
                    return Ok(out);
                }
                let seeded = seed_in_order(structure, &qualified);
                build_elimination(
                    structure,
                    stage.settings.playoff,
                    &seeded,
                    stage.settings.third_place,
                    "Playoff",
                );
                Progression::new(structure).settle_byes();
                // The whole structure replaces the per-match writes.
                changes.matches.clear();
                changes.structures.push(structure.clone());

                BRACKETS_GENERATED_TOTAL
                    .with_label_values(&[playoff_format(stage.settings.playoff)])
                    .inc();
                tracing::info!(
                    stage_id = stage.id,
                    qualifiers = qualified.len(),
                    "group phase complete, playoff generated"
                );
                out.events.push(CoreEvent::StageAdvanced {
                    tournament_id: stage.tournament_id,
                    stage_id: stage.id,
                    qualifiers: qualified,
                });
            }
            StageOutcome::Completed { champion } => {
                self.complete_stage(stage, structure, champion, changes, &mut out)
                    .await?;
            }
        }
        Ok(out)
    }

    async fn complete_stage(
        &self,
        mut stage: Stage,
        structure: &StageStructure,
        champion: Option<ParticipantId>,
        changes: &mut Changeset,
        out: &mut Advancement,
    ) -> CoreResult<()> {
        stage.status = StageStatus::Completed;
        changes.stages.push(stage.clone());
        out.finished += 1;
        tracing::info!(stage_id = stage.id, champion = ?champion, "stage completed");

        let stages = self.store.stages(stage.tournament_id).await?;
        match stages.iter().find(|s| s.order > stage.order) {
            Some(next) => {
                if stage.kind == StageKind::RoundRobin && next.kind.elimination().is_some() {
                    self.promote(&stage, structure, next.clone(), changes, out)
                        .await?;
                }
            }
            None => {
                self.complete_tournament(&stage, structure, &stages, champion, changes, out)
                    .await?;
            }
        }
        Ok(())
    }

    /// Seed a finished round robin's qualifiers into the following, still
    /// empty elimination stage.
    async fn promote(
        &self,
        stage: &Stage,
        structure: &StageStructure,
        mut next: Stage,
        changes: &mut Changeset,
        out: &mut Advancement,
    ) -> CoreResult<()> {
        out.guards
            .push(self.locks.acquire(LockScope::Stage, next.id).await);
        if !self.store.structure(next.id).await?.is_empty() {
            tracing::debug!(stage_id = next.id, "next stage already generated");
            return Ok(());
        }
        let qualified = qualifiers(structure);
        if qualified.len() < MIN_PARTICIPANTS {
            tracing::warn!(
                stage_id = stage.id,
                qualifiers = qualified.len(),
                "not enough qualifiers to promote"
            );
            return Ok(());
        }

        let seeded = seed_in_order(structure, &qualified);
        let promoted = layout(&next, seeded, None)?;
        next.status = StageStatus::Running;
        changes.stages.push(next.clone());
        changes.structures.push(promoted);
        out.started += 1;

        BRACKETS_GENERATED_TOTAL
            .with_label_values(&[next.kind.to_str_name()])
            .inc();
        tracing::info!(
            from_stage = stage.id,
            to_stage = next.id,
            qualifiers = qualified.len(),
            "qualifiers promoted"
        );
        out.events.push(CoreEvent::StageAdvanced {
            tournament_id: stage.tournament_id,
            stage_id: next.id,
            qualifiers: qualified,
        });
        Ok(())
    }

    async fn complete_tournament(
        &self,
        stage: &Stage,
        structure: &StageStructure,
        stages: &[Stage],
        champion: Option<ParticipantId>,
        changes: &mut Changeset,
        out: &mut Advancement,
    ) -> CoreResult<()> {
        let mut tournament = self.require_tournament(stage.tournament_id).await?;
        if tournament.status == TournamentStatus::Completed {
            return Ok(());
        }
        tournament.status = TournamentStatus::Completed;
        changes.tournaments.push(tournament.clone());
        tracing::info!(tournament_id = tournament.id, champion = ?champion, "tournament completed");
        out.events.push(CoreEvent::TournamentCompleted {
            tournament_id: tournament.id,
            champion,
        });

        let Some(league_id) = tournament.league_id else {
            return Ok(());
        };
        out.guards
            .push(self.locks.acquire(LockScope::League, league_id).await);
        let league = self
            .store
            .league(league_id)
            .await?
            .ok_or_else(|| CoreError::not_found("league", league_id))?;
        if league.strategy.rules().is_none() {
            tracing::warn!(league_id, "league is not tiered, results not rated");
            return Ok(());
        }

        let registered: HashSet<ParticipantId> = self
            .store
            .ladder(league_id)
            .await?
            .into_iter()
            .map(|e| e.participant)
            .collect();
        let known: HashSet<MatchKey> = self
            .store
            .league_matches(league_id)
            .await?
            .into_iter()
            .map(|m| m.key)
            .collect();

        let now = Utc::now();
        let mut records = Vec::new();
        for s in stages {
            let loaded;
            let source = if s.id == stage.id {
                structure
            } else {
                loaded = self.store.structure(s.id).await?;
                &loaded
            };
            records.extend(
                league_records(league_id, s.id, source, now)
                    .into_iter()
                    .filter(|r| {
                        registered.contains(&r.player1)
                            && registered.contains(&r.player2)
                            && !known.contains(&r.key)
                    }),
            );
        }
        if records.is_empty() {
            return Ok(());
        }
        records.sort_by(|a, b| a.played_at.cmp(&b.played_at).then(a.key.cmp(&b.key)));
        tracing::info!(
            tournament_id = tournament.id,
            league_id,
            matches = records.len(),
            "feeding tournament results into league"
        );
        changes.merge(self.ladder.plan_matches(&league, records).await?);
        out.ladders.push(league_id);
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub async fn structure(&self, stage_id: StageId) -> CoreResult<StageStructure> {
        self.require_stage(stage_id).await?;
        self.store.structure(stage_id).await
    }

    pub async fn matches(&self, query: &MatchQuery) -> CoreResult<Vec<Match>> {
        self.require_stage(query.stage_id).await?;
        self.store.matches(query).await
    }

    pub async fn group_standings(
        &self,
        stage_id: StageId,
        group: GroupId,
    ) -> CoreResult<Vec<StandingRow>> {
        let structure = self.structure(stage_id).await?;
        if !structure.groups.iter().any(|g| g.id == group) {
            return Err(CoreError::not_found("group", i64::from(group)));
        }
        Ok(group_standings(&structure, group))
    }
}

fn validate_settings(settings: &StageSettings) -> CoreResult<()> {
    if settings.races_to == 0 {
        return Err(ConfigError::RaceTarget.into());
    }
    let size = settings.group_size;
    if size.min < 2 || size.min > size.max {
        return Err(ConfigError::GroupLayout(format!(
            "group size bounds {}..{} are invalid",
            size.min, size.max
        ))
        .into());
    }
    if settings.advance_per_group == 0 {
        return Err(ConfigError::GroupLayout("at least one participant must advance".into()).into());
    }
    if settings.tables == Some(0) {
        return Err(ConfigError::GroupLayout("at least one table is required".into()).into());
    }
    Ok(())
}

/// Build a stage's structure from seeded participants. BYE walkovers are
/// settled before it is returned.
fn layout(
    stage: &Stage,
    participants: Vec<Participant>,
    group_count: Option<usize>,
) -> CoreResult<StageStructure> {
    let mut structure = StageStructure::empty(stage.id);
    let settings = &stage.settings;
    match (stage.kind.elimination(), group_count) {
        (Some(kind), _) => {
            build_elimination(
                &mut structure,
                kind,
                &participants,
                settings.third_place,
                "Main",
            );
        }
        (None, Some(group_count)) => {
            let advance = (stage.kind == StageKind::GroupThenPlayoff)
                .then_some(settings.advance_per_group);
            validate_layout(participants.len(), group_count, settings.group_size, advance)?;
            build_groups(
                &mut structure,
                &participants,
                group_count,
                settings.advance_per_group,
                settings.tables,
            );
        }
        (None, None) => {
            return Err(ConfigError::GroupLayout("a group count is required".into()).into());
        }
    }
    structure.participants = participants;
    Progression::new(&mut structure).settle_byes();
    Ok(structure)
}

/// Seeds 1..N in the given order, keeping each participant's rating snapshot.
fn seed_in_order(structure: &StageStructure, order: &[ParticipantId]) -> Vec<Participant> {
    order
        .iter()
        .enumerate()
        .map(|(i, &id)| Participant {
            id,
            seed: i as u32 + 1,
            rating_snapshot: structure
                .participants
                .iter()
                .find(|p| p.id == id)
                .and_then(|p| p.rating_snapshot),
        })
        .collect()
}

fn playoff_format(kind: EliminationKind) -> &'static str {
    match kind {
        EliminationKind::Single => StageKind::SingleElimination.to_str_name(),
        EliminationKind::Double => StageKind::DoubleElimination.to_str_name(),
    }
}

/// Played results of a stage as league matches. BYE walkovers, forfeits and
/// cancelled matches are not rated.
fn league_records(
    league_id: LeagueId,
    stage_id: StageId,
    structure: &StageStructure,
    now: DateTime<Utc>,
) -> Vec<LeagueMatch> {
    structure
        .matches
        .iter()
        .filter(|m| m.status == MatchStatus::Completed && !m.has_bye())
        .filter_map(|m| {
            Some(LeagueMatch {
                league_id,
                key: MatchKey::Stage {
                    stage_id,
                    match_id: m.id,
                },
                player1: m.player1?,
                player2: m.player2?,
                frames1: m.score.player1,
                frames2: m.score.player2,
                played_at: m.completed_at.unwrap_or(now),
            })
        })
        .collect()
}
