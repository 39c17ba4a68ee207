// Group standings, completion checks and playoff qualifiers.
//
// Standings are folded from decided matches every time, never kept as running
// totals.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::model::{
    BracketId, EliminationKind, GroupId, Match, ParticipantId, StageKind, StageStructure,
};

pub const POINTS_PER_WIN: u32 = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandingRow {
    pub participant: ParticipantId,
    pub position: u32,
    pub played: u32,
    pub won: u32,
    pub lost: u32,
    pub frames_won: u32,
    pub frames_lost: u32,
    pub points: u32,
}

impl StandingRow {
    pub fn frame_diff(&self) -> i64 {
        i64::from(self.frames_won) - i64::from(self.frames_lost)
    }
}

/// Build sorted standings for `participants` (listed in seed order) from the
/// given matches.
///
/// Order: points, wins, wins among the tied block only (the head-to-head
/// result for a pair), frame differential, frames won, then seed order.
///
/// For a block of three or more the mini-table counts wins against the whole
/// block, not pairwise results: in a cycle every member has one block win, so
/// frame differential decides even between two players who met directly.
pub fn compute_standings<'a>(
    participants: &[ParticipantId],
    matches: impl IntoIterator<Item = &'a Match>,
) -> Vec<StandingRow> {
    let decided: Vec<&Match> = matches
        .into_iter()
        .filter(|m| m.status.is_decided() && !m.has_bye())
        .collect();

    let mut rows: Vec<(usize, StandingRow)> = participants
        .iter()
        .enumerate()
        .map(|(order, &participant)| {
            (
                order,
                StandingRow {
                    participant,
                    ..Default::default()
                },
            )
        })
        .collect();

    for m in &decided {
        let (Some(p1), Some(p2), Some(winner)) = (m.player1, m.player2, m.winner) else {
            continue;
        };
        for (_, row) in rows.iter_mut() {
            let (frames_for, frames_against) = if row.participant == p1 {
                (m.score.player1, m.score.player2)
            } else if row.participant == p2 {
                (m.score.player2, m.score.player1)
            } else {
                continue;
            };
            row.played += 1;
            row.frames_won += frames_for;
            row.frames_lost += frames_against;
            if row.participant == winner {
                row.won += 1;
                row.points += POINTS_PER_WIN;
            } else {
                row.lost += 1;
            }
        }
    }

    rows.sort_by(|(ao, a), (bo, b)| {
        b.points
            .cmp(&a.points)
            .then(b.won.cmp(&a.won))
            .then(ao.cmp(bo))
    });

    // Break ties inside each block of equal points and wins.
    let mut start = 0;
    while start < rows.len() {
        let key = (rows[start].1.points, rows[start].1.won);
        let mut end = start + 1;
        while end < rows.len() && (rows[end].1.points, rows[end].1.won) == key {
            end += 1;
        }
        if end - start > 1 {
            let block: HashSet<ParticipantId> =
                rows[start..end].iter().map(|(_, r)| r.participant).collect();
            let head_to_head = |p: ParticipantId| {
                decided
                    .iter()
                    .filter(|m| m.winner == Some(p))
                    .filter(|m| m.loser().is_some_and(|l| block.contains(&l)))
                    .count()
            };
            rows[start..end].sort_by(|(ao, a), (bo, b)| {
                head_to_head(b.participant)
                    .cmp(&head_to_head(a.participant))
                    .then(b.frame_diff().cmp(&a.frame_diff()))
                    .then(b.frames_won.cmp(&a.frames_won))
                    .then(ao.cmp(bo))
            });
        }
        start = end;
    }

    rows.into_iter()
        .enumerate()
        .map(|(i, (_, mut row))| {
            row.position = i as u32 + 1;
            row
        })
        .collect()
}

pub fn group_standings(structure: &StageStructure, group: GroupId) -> Vec<StandingRow> {
    let Some(info) = structure.groups.iter().find(|g| g.id == group) else {
        return Vec::new();
    };
    compute_standings(&info.participants, structure.group_matches(group))
}

/// Every match of the group is completed, walked over or cancelled.
pub fn group_complete(structure: &StageStructure, group: GroupId) -> bool {
    let mut matches = structure.group_matches(group).peekable();
    matches.peek().is_some() && matches.all(|m| m.status.is_settled())
}

pub fn groups_complete(structure: &StageStructure) -> bool {
    !structure.groups.is_empty()
        && structure
            .groups
            .iter()
            .all(|g| group_complete(structure, g.id))
}

/// Group qualifiers ordered rank-major: every group winner by group order,
/// then every runner-up, and so on.
pub fn qualifiers(structure: &StageStructure) -> Vec<ParticipantId> {
    let tables: Vec<(u32, Vec<StandingRow>)> = structure
        .groups
        .iter()
        .map(|g| (g.advance_count, group_standings(structure, g.id)))
        .collect();
    let deepest = tables.iter().map(|(n, _)| *n).max().unwrap_or(0);

    let mut out = Vec::new();
    for rank in 0..deepest as usize {
        for (advance, rows) in &tables {
            if rank < *advance as usize {
                if let Some(row) = rows.get(rank) {
                    out.push(row.participant);
                }
            }
        }
    }
    out
}

/// The winner of a finished elimination bracket.
///
/// Single elimination finishes with its final (and third-place match, if
/// any). Double elimination finishes when the grand final is won from the
/// upper bracket, or when the reset is decided.
pub fn bracket_champion(structure: &StageStructure, bracket: BracketId) -> Option<ParticipantId> {
    let info = structure.brackets.get(bracket as usize)?;
    match info.kind {
        EliminationKind::Single => {
            let final_match = structure.get(info.final_match)?;
            let third_done = info
                .third_place
                .and_then(|id| structure.get(id))
                .map_or(true, |m| m.status.is_settled());
            if final_match.status.is_decided() && third_done {
                final_match.winner
            } else {
                None
            }
        }
        EliminationKind::Double => {
            let grand_final = structure.get(info.grand_final?)?;
            if !grand_final.status.is_decided() {
                return None;
            }
            let upper_champion = structure.get(info.final_match)?.winner;
            if grand_final.winner == upper_champion {
                return grand_final.winner;
            }
            let reset = structure.get(info.reset?)?;
            if reset.status.is_decided() {
                reset.winner
            } else {
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    InProgress,
    /// Group phase of a group-then-playoff stage is over; the playoff is due.
    GroupsComplete,
    Completed { champion: Option<ParticipantId> },
}

pub fn stage_outcome(structure: &StageStructure, kind: StageKind) -> StageOutcome {
    if structure.is_empty() {
        return StageOutcome::InProgress;
    }
    match kind {
        StageKind::SingleElimination | StageKind::DoubleElimination => {
            match structure
                .brackets
                .first()
                .and_then(|b| bracket_champion(structure, b.id))
            {
                Some(champion) => StageOutcome::Completed {
                    champion: Some(champion),
                },
                None => StageOutcome::InProgress,
            }
        }
        StageKind::RoundRobin => {
            if !groups_complete(structure) {
                return StageOutcome::InProgress;
            }
            let champion = if structure.groups.len() == 1 {
                group_standings(structure, structure.groups[0].id)
                    .first()
                    .map(|r| r.participant)
            } else {
                None
            };
            StageOutcome::Completed { champion }
        }
        StageKind::GroupThenPlayoff => match structure.brackets.first() {
            None if groups_complete(structure) => StageOutcome::GroupsComplete,
            None => StageOutcome::InProgress,
            Some(b) => match bracket_champion(structure, b.id) {
                Some(champion) => StageOutcome::Completed {
                    champion: Some(champion),
                },
                None => StageOutcome::InProgress,
            },
        },
    }
}
