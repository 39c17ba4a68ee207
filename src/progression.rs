// Match lifecycle and result propagation.
//
// pending -> ready -> in_progress -> verification -> completed, with
// cancelled reachable from any unsettled state and walkover only before play
// (BYE or forfeit). A decided match writes its winner and loser into the
// first empty slot of the linked matches; editing a decided match first
// reverts everything that was propagated from it.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::error::{Conflict, CoreResult};
use crate::metrics::{MATCHES_SETTLED_TOTAL, PROPAGATION_SKIPPED_TOTAL, RESULT_REVERTS_TOTAL};
use crate::model::{
    BracketId, BracketSide, Match, MatchId, MatchStatus, ParticipantId, Placement, Schedule,
    Score, StageStructure,
};

const RESET_NOT_REQUIRED: &str = "grand final won from the upper bracket";

/// Reject scores that overshoot the race, or where both sides reached it.
pub fn check_race(score: Score, races_to: u32) -> CoreResult<()> {
    if races_to == 0 {
        return Ok(());
    }
    if score.high() > races_to {
        return Err(Conflict::ScoreAboveRace {
            score: score.high(),
            races_to,
        }
        .into());
    }
    if score.player1 == races_to && score.player2 == races_to {
        return Err(Conflict::TieScore(races_to).into());
    }
    Ok(())
}

/// Applies lifecycle operations to one stage and records every match touched.
pub struct Progression<'a> {
    structure: &'a mut StageStructure,
    touched: BTreeSet<MatchId>,
    now: DateTime<Utc>,
}

impl<'a> Progression<'a> {
    pub fn new(structure: &'a mut StageStructure) -> Self {
        Self::at(structure, Utc::now())
    }

    /// Use a fixed clock for completion timestamps.
    pub fn at(structure: &'a mut StageStructure, now: DateTime<Utc>) -> Self {
        Progression {
            structure,
            touched: BTreeSet::new(),
            now,
        }
    }

    pub fn structure(&self) -> &StageStructure {
        self.structure
    }

    /// Ids of every match changed so far, in arena order.
    pub fn into_touched(self) -> Vec<MatchId> {
        self.touched.into_iter().collect()
    }

    fn require_mut(&mut self, id: MatchId) -> CoreResult<&mut Match> {
        let stage_id = self.structure.stage_id;
        self.structure.get_mut(id).ok_or_else(|| {
            tracing::debug!(stage_id, match_id = id.0, "match lookup failed");
            crate::error::CoreError::not_found("match", i64::from(id.0))
        })
    }

    // ── Operations ───────────────────────────────────────────────────

    /// Resolve every filled match that holds a BYE. Run after generation.
    pub fn settle_byes(&mut self) {
        let pending: Vec<MatchId> = self
            .structure
            .matches
            .iter()
            .filter(|m| awaits_bye_walkover(m))
            .map(|m| m.id)
            .collect();
        for id in pending {
            self.walkover_bye(id);
        }
    }

    pub fn start(&mut self, id: MatchId) -> CoreResult<()> {
        let m = self.require_mut(id)?;
        match m.status {
            MatchStatus::Pending | MatchStatus::Ready => {}
            status => {
                return Err(Conflict::InvalidStatus {
                    action: "started",
                    status,
                }
                .into())
            }
        }
        if !m.is_filled() {
            return Err(Conflict::EmptySlot { action: "started" }.into());
        }
        if m.has_bye() {
            return Err(Conflict::ByeMatch { action: "started" }.into());
        }
        m.status = MatchStatus::InProgress;
        self.touched.insert(id);
        Ok(())
    }

    /// Record a live score. Reaching the race target moves the match to
    /// verification until both sides confirm.
    pub fn report_score(&mut self, id: MatchId, score: Score, races_to: u32) -> CoreResult<()> {
        check_race(score, races_to)?;
        let m = self.require_mut(id)?;
        match m.status {
            MatchStatus::InProgress | MatchStatus::Verification => {}
            status => {
                return Err(Conflict::InvalidStatus {
                    action: "scored",
                    status,
                }
                .into())
            }
        }
        m.score = score;
        m.confirmations = Default::default();
        m.status = if races_to > 0 && score.high() >= races_to {
            MatchStatus::Verification
        } else {
            MatchStatus::InProgress
        };
        self.touched.insert(id);
        Ok(())
    }

    /// One side accepts the reported score. Returns true once both have and
    /// the match is completed.
    pub fn confirm(&mut self, id: MatchId, participant: ParticipantId) -> CoreResult<bool> {
        let m = self.require_mut(id)?;
        if m.status != MatchStatus::Verification {
            return Err(Conflict::InvalidStatus {
                action: "confirmed",
                status: m.status,
            }
            .into());
        }
        if m.player1 == Some(participant) {
            m.confirmations.player1 = true;
        } else if m.player2 == Some(participant) {
            m.confirmations.player2 = true;
        } else {
            return Err(Conflict::NotInMatch(participant.0).into());
        }
        let agreed = m.confirmations.player1 && m.confirmations.player2;
        let score = m.score;
        if agreed && score.is_tie() {
            return Err(Conflict::TieScore(score.player1).into());
        }
        self.touched.insert(id);
        if agreed {
            self.complete(id, score);
        }
        Ok(agreed)
    }

    /// Authoritative final score. A decided match is reverted and replayed.
    pub fn enter_result(&mut self, id: MatchId, score: Score, races_to: u32) -> CoreResult<()> {
        check_race(score, races_to)?;
        if score.is_tie() {
            return Err(Conflict::TieScore(score.player1).into());
        }
        let m = self.require_mut(id)?;
        if !m.is_filled() {
            return Err(Conflict::EmptySlot {
                action: "completed",
            }
            .into());
        }
        if m.has_bye() {
            return Err(Conflict::ByeMatch {
                action: "completed",
            }
            .into());
        }
        match m.status {
            MatchStatus::Cancelled => {
                return Err(Conflict::InvalidStatus {
                    action: "completed",
                    status: MatchStatus::Cancelled,
                }
                .into())
            }
            MatchStatus::Completed | MatchStatus::Walkover => self.revert(id),
            _ => {}
        }
        self.complete(id, score);
        Ok(())
    }

    /// Award the match to the side that did not show up.
    pub fn forfeit(&mut self, id: MatchId, absent: ParticipantId) -> CoreResult<()> {
        let now = self.now;
        let m = self.require_mut(id)?;
        match m.status {
            MatchStatus::Pending | MatchStatus::Ready => {}
            status => {
                return Err(Conflict::InvalidStatus {
                    action: "forfeited",
                    status,
                }
                .into())
            }
        }
        if !m.is_filled() {
            return Err(Conflict::EmptySlot {
                action: "forfeited",
            }
            .into());
        }
        if m.has_bye() {
            return Err(Conflict::ByeMatch {
                action: "forfeited",
            }
            .into());
        }
        let winner = if m.player1 == Some(absent) {
            m.player2
        } else if m.player2 == Some(absent) {
            m.player1
        } else {
            return Err(Conflict::NotInMatch(absent.0).into());
        };
        m.winner = winner;
        m.score = Score::default();
        m.status = MatchStatus::Walkover;
        m.completed_at = Some(now);
        self.touched.insert(id);
        MATCHES_SETTLED_TOTAL
            .with_label_values(&[MatchStatus::Walkover.to_str_name()])
            .inc();
        self.propagate(id);
        Ok(())
    }

    pub fn cancel(&mut self, id: MatchId, reason: &str) -> CoreResult<()> {
        let m = self.require_mut(id)?;
        if m.status.is_settled() {
            return Err(Conflict::InvalidStatus {
                action: "cancelled",
                status: m.status,
            }
            .into());
        }
        m.status = MatchStatus::Cancelled;
        m.cancel_reason = Some(reason.to_string());
        self.touched.insert(id);
        MATCHES_SETTLED_TOTAL
            .with_label_values(&[MatchStatus::Cancelled.to_str_name()])
            .inc();
        Ok(())
    }

    pub fn reschedule(
        &mut self,
        id: MatchId,
        at: Option<DateTime<Utc>>,
        table: Option<String>,
    ) -> CoreResult<()> {
        let m = self.require_mut(id)?;
        if m.status.is_settled() {
            return Err(Conflict::InvalidStatus {
                action: "rescheduled",
                status: m.status,
            }
            .into());
        }
        m.schedule = Schedule { at, table };
        self.touched.insert(id);
        Ok(())
    }

    // ── Propagation ──────────────────────────────────────────────────

    fn complete(&mut self, id: MatchId, score: Score) {
        let Some(m) = self.structure.get_mut(id) else {
            return;
        };
        m.winner = if score.player1 > score.player2 {
            m.player1
        } else {
            m.player2
        };
        m.score = score;
        m.status = MatchStatus::Completed;
        m.completed_at = Some(self.now);
        self.touched.insert(id);
        MATCHES_SETTLED_TOTAL
            .with_label_values(&[MatchStatus::Completed.to_str_name()])
            .inc();
        self.propagate(id);
    }

    fn walkover_bye(&mut self, id: MatchId) {
        let Some(m) = self.structure.get_mut(id) else {
            return;
        };
        if !awaits_bye_walkover(m) {
            return;
        }
        m.winner = match m.player1 {
            Some(p) if !p.is_bye() => Some(p),
            _ => m.player2,
        };
        m.score = Score::default();
        m.status = MatchStatus::Walkover;
        m.completed_at = Some(self.now);
        self.touched.insert(id);
        self.propagate(id);
    }

    fn propagate(&mut self, id: MatchId) {
        let Some(m) = self.structure.get(id) else {
            return;
        };
        let (Some(winner), loser) = (m.winner, m.loser()) else {
            return;
        };
        match m.placement {
            Placement::Group { .. } => {}
            Placement::Bracket {
                bracket,
                side: BracketSide::GrandFinal,
                ..
            } => self.resolve_grand_final(bracket, winner, loser),
            Placement::Bracket {
                next_winner,
                next_loser,
                ..
            } => {
                if let Some(target) = next_winner {
                    self.place(target, winner, id);
                }
                if let (Some(target), Some(loser)) = (next_loser, loser) {
                    self.place(target, loser, id);
                }
            }
        }
    }

    /// Write `participant` into the first empty slot of `target`.
    fn place(&mut self, target: MatchId, participant: ParticipantId, source: MatchId) {
        let stage_id = self.structure.stage_id;
        let Some(t) = self.structure.get_mut(target) else {
            tracing::warn!(
                stage_id,
                source = source.0,
                target = target.0,
                "propagation target not found, skipped"
            );
            PROPAGATION_SKIPPED_TOTAL.inc();
            return;
        };
        if !participant.is_bye() && t.contains(participant) {
            return;
        }
        if t.player1.is_none() {
            t.player1 = Some(participant);
        } else if t.player2.is_none() {
            t.player2 = Some(participant);
        } else {
            tracing::warn!(
                stage_id,
                source = source.0,
                target = target.0,
                participant = participant.0,
                "propagation target already full, skipped"
            );
            PROPAGATION_SKIPPED_TOTAL.inc();
            return;
        }
        if t.is_filled() && t.status == MatchStatus::Pending {
            t.status = MatchStatus::Ready;
        }
        let walkover = awaits_bye_walkover(t);
        self.touched.insert(target);
        if walkover {
            self.walkover_bye(target);
        }
    }

    fn resolve_grand_final(
        &mut self,
        bracket: BracketId,
        winner: ParticipantId,
        loser: Option<ParticipantId>,
    ) {
        let Some(info) = self.structure.brackets.get(bracket as usize) else {
            tracing::warn!(stage_id = self.structure.stage_id, bracket, "bracket not found");
            PROPAGATION_SKIPPED_TOTAL.inc();
            return;
        };
        let (upper_final, reset) = (info.final_match, info.reset);
        let upper_champion = self.structure.get(upper_final).and_then(|m| m.winner);
        let Some(reset) = reset else {
            return;
        };
        let Some(r) = self.structure.get_mut(reset) else {
            PROPAGATION_SKIPPED_TOTAL.inc();
            return;
        };

        if upper_champion == Some(winner) {
            r.status = MatchStatus::Cancelled;
            r.cancel_reason = Some(RESET_NOT_REQUIRED.to_string());
        } else {
            if let Placement::Bracket { side, .. } = &mut r.placement {
                *side = BracketSide::Reset { active: true };
            }
            r.player1 = loser;
            r.player2 = Some(winner);
            r.status = MatchStatus::Ready;
        }
        self.touched.insert(reset);
    }

    // ── Revert ───────────────────────────────────────────────────────

    /// Undo a decided match and everything propagated from it.
    fn revert(&mut self, id: MatchId) {
        let Some(m) = self.structure.get(id) else {
            return;
        };
        let Some(winner) = m.winner else {
            return;
        };
        let loser = m.loser();
        match m.placement {
            Placement::Group { .. } => {}
            Placement::Bracket {
                bracket,
                side: BracketSide::GrandFinal,
                ..
            } => self.retract_reset(bracket),
            Placement::Bracket {
                next_winner,
                next_loser,
                ..
            } => {
                if let Some(target) = next_winner {
                    self.retract(target, winner);
                }
                if let (Some(target), Some(loser)) = (next_loser, loser) {
                    self.retract(target, loser);
                }
            }
        }

        if let Some(m) = self.structure.get_mut(id) {
            m.winner = None;
            m.score = Score::default();
            m.confirmations = Default::default();
            m.completed_at = None;
            m.status = if m.is_filled() {
                MatchStatus::Ready
            } else {
                MatchStatus::Pending
            };
        }
        self.touched.insert(id);
        RESULT_REVERTS_TOTAL.inc();
    }

    /// Remove a propagated participant from `target`, reverting it first if
    /// it was already decided.
    fn retract(&mut self, target: MatchId, participant: ParticipantId) {
        let decided = match self.structure.get(target) {
            Some(t) if t.contains(participant) => t.status.is_decided(),
            _ => return,
        };
        if decided {
            self.revert(target);
        }
        if let Some(t) = self.structure.get_mut(target) {
            if t.player1 == Some(participant) {
                t.player1 = None;
            } else if t.player2 == Some(participant) {
                t.player2 = None;
            }
            clear_result(t);
        }
        self.touched.insert(target);
    }

    fn retract_reset(&mut self, bracket: BracketId) {
        let Some(reset) = self
            .structure
            .brackets
            .get(bracket as usize)
            .and_then(|b| b.reset)
        else {
            return;
        };
        if self
            .structure
            .get(reset)
            .is_some_and(|r| r.status.is_decided())
        {
            self.revert(reset);
        }
        if let Some(r) = self.structure.get_mut(reset) {
            r.player1 = None;
            r.player2 = None;
            clear_result(r);
            if let Placement::Bracket { side, .. } = &mut r.placement {
                *side = BracketSide::Reset { active: false };
            }
        }
        self.touched.insert(reset);
    }
}

fn awaits_bye_walkover(m: &Match) -> bool {
    m.is_filled()
        && m.has_bye()
        && matches!(m.status, MatchStatus::Pending | MatchStatus::Ready)
}

fn clear_result(m: &mut Match) {
    m.status = MatchStatus::Pending;
    m.winner = None;
    m.score = Score::default();
    m.confirmations = Default::default();
    m.cancel_reason = None;
    m.completed_at = None;
}
