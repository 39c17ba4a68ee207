// Double elimination: upper bracket, lower bracket, grand final and a
// conditional grand-final reset.
//
// With `k` upper rounds the lower bracket has `2(k-1)` rounds. Odd lower
// rounds are internal (round 1 pairs the upper round-1 losers), even lower
// rounds are drop rounds: lower round `2(r-1)` takes the losers of upper
// round `r`, and has exactly as many matches as that upper round.

use crate::model::{
    Bracket, BracketId, BracketSide, EliminationKind, MatchId, Participant, StageStructure,
};
use crate::seeding::slot_layout;

use super::{bracket_placement, build_winner_rounds, link_loser, link_winner};

/// Matches in lower round `round` (1-based) of a bracket with `capacity` slots.
pub fn lower_round_size(capacity: usize, round: usize) -> usize {
    capacity >> ((round + 1) / 2 + 1)
}

/// Lower-bracket target of the loser of upper match `index` (0-based) in
/// upper round `upper_round`, as (lower round, index), both 1-based round and
/// 0-based index. Drop rounds fed by even upper rounds are reversed so
/// players from the same upper half do not meet again straight away.
pub fn loser_destination(capacity: usize, upper_round: usize, index: usize) -> (usize, usize) {
    if upper_round == 1 {
        return (1, index / 2);
    }
    let lower_round = 2 * (upper_round - 1);
    let size = lower_round_size(capacity, lower_round);
    let slot = if upper_round % 2 == 0 {
        size - 1 - index
    } else {
        index
    };
    (lower_round, slot)
}

/// Build a double-elimination bracket into `structure`.
pub fn build(structure: &mut StageStructure, participants: &[Participant], name: &str) -> BracketId {
    let slots = slot_layout(participants);
    let capacity = slots.len();
    let bracket = structure.brackets.len() as BracketId;

    let upper = build_winner_rounds(structure, bracket, &slots);
    let upper_rounds = upper.len();
    let lower_total = 2 * (upper_rounds - 1);

    let lower: Vec<Vec<MatchId>> = (1..=lower_total)
        .map(|round| {
            (0..lower_round_size(capacity, round))
                .map(|i| {
                    structure.push_match(
                        Some(round as u32),
                        i as u32 + 1,
                        bracket_placement(bracket, BracketSide::Lower),
                    )
                })
                .collect()
        })
        .collect();

    let grand_final = structure.push_match(
        Some(upper_rounds as u32 + 1),
        1,
        bracket_placement(bracket, BracketSide::GrandFinal),
    );
    let reset = structure.push_match(
        Some(upper_rounds as u32 + 2),
        1,
        bracket_placement(bracket, BracketSide::Reset { active: false }),
    );

    for (r, round) in upper.iter().enumerate() {
        for (i, &id) in round.iter().enumerate() {
            let target = if lower_total == 0 {
                grand_final
            } else {
                let (lower_round, slot) = loser_destination(capacity, r + 1, i);
                lower[lower_round - 1][slot]
            };
            link_loser(structure, id, target);
        }
    }

    for (l, round) in lower.iter().enumerate() {
        let lower_round = l + 1;
        for (i, &id) in round.iter().enumerate() {
            let target = if lower_round == lower_total {
                grand_final
            } else if lower_round % 2 == 1 {
                lower[l + 1][i]
            } else {
                lower[l + 1][i / 2]
            };
            link_winner(structure, id, target);
        }
    }

    let upper_final = upper[upper_rounds - 1][0];
    link_winner(structure, upper_final, grand_final);

    structure.brackets.push(Bracket {
        id: bracket,
        name: name.to_string(),
        kind: EliminationKind::Double,
        total_rounds: upper_rounds as u32,
        lower_rounds: lower_total as u32,
        players_count: capacity as u32,
        final_match: upper_final,
        third_place: None,
        grand_final: Some(grand_final),
        reset: Some(reset),
    });

    tracing::debug!(
        stage_id = structure.stage_id,
        bracket,
        slots = capacity,
        upper_rounds,
        lower_rounds = lower_total,
        "built double elimination bracket"
    );
    bracket
}
