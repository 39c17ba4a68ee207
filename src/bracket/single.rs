// Single elimination: log2(capacity) rounds plus an optional third-place match.

use crate::model::{Bracket, BracketId, BracketSide, EliminationKind, Participant, StageStructure};
use crate::seeding::slot_layout;

use super::{bracket_placement, build_winner_rounds, link_loser};

/// Build a single-elimination bracket into `structure`.
///
/// The third-place match is fed by the semifinals' loser links and needs at
/// least four slots; it is skipped for two-slot brackets.
pub fn build(
    structure: &mut StageStructure,
    participants: &[Participant],
    third_place: bool,
    name: &str,
) -> BracketId {
    let slots = slot_layout(participants);
    let bracket = structure.brackets.len() as BracketId;
    let rounds = build_winner_rounds(structure, bracket, &slots);
    let total = rounds.len();
    let final_match = rounds[total - 1][0];

    let third = if third_place && total >= 2 {
        let id = structure.push_match(
            Some(total as u32),
            2,
            bracket_placement(bracket, BracketSide::Consolation),
        );
        for &semi in &rounds[total - 2] {
            link_loser(structure, semi, id);
        }
        Some(id)
    } else {
        None
    };

    structure.brackets.push(Bracket {
        id: bracket,
        name: name.to_string(),
        kind: EliminationKind::Single,
        total_rounds: total as u32,
        lower_rounds: 0,
        players_count: slots.len() as u32,
        final_match,
        third_place: third,
        grand_final: None,
        reset: None,
    });

    tracing::debug!(
        stage_id = structure.stage_id,
        bracket,
        slots = slots.len(),
        rounds = total,
        "built single elimination bracket"
    );
    bracket
}
