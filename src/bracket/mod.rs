// Bracket generators.
//
// Each generator writes matches into a stage's arena and wires the progression
// links. Round-1 BYE walkovers are settled afterwards by `progression`, so the
// generators themselves never resolve results.

pub mod double;
pub mod round_robin;
pub mod single;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::model::{
    BracketId, BracketSide, EliminationKind, MatchId, MatchStatus, Participant, ParticipantId,
    Placement, StageStructure,
};
use crate::seeding::SeedingMethod;

/// Options for bracket (and group) generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketOptions {
    pub seeding: SeedingMethod,
    /// Fixes the shuffle for random seeding; entropy is used when absent.
    pub shuffle_seed: Option<u64>,
}

impl BracketOptions {
    pub fn new(seeding: SeedingMethod) -> Self {
        BracketOptions {
            seeding,
            shuffle_seed: None,
        }
    }

    pub fn rng(&self) -> StdRng {
        match self.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

impl Default for BracketOptions {
    fn default() -> Self {
        BracketOptions::new(SeedingMethod::Rating)
    }
}

/// Build an elimination bracket of the given kind into `structure`.
pub fn build_elimination(
    structure: &mut StageStructure,
    kind: EliminationKind,
    participants: &[Participant],
    third_place: bool,
    name: &str,
) -> BracketId {
    match kind {
        EliminationKind::Single => single::build(structure, participants, third_place, name),
        EliminationKind::Double => double::build(structure, participants, name),
    }
}

/// Number of rounds needed to reduce `capacity` slots to one winner.
pub fn rounds_for(capacity: usize) -> u32 {
    capacity.trailing_zeros()
}

/// Create the winners' rounds shared by both elimination formats.
///
/// Round 1 pairs slots `(2i, 2i+1)`; match `i` of every round feeds match
/// `i / 2` of the next. Returns the match ids of each round in order.
pub(crate) fn build_winner_rounds(
    structure: &mut StageStructure,
    bracket: BracketId,
    slots: &[ParticipantId],
) -> Vec<Vec<MatchId>> {
    let capacity = slots.len();
    let total = rounds_for(capacity);

    let mut rounds: Vec<Vec<MatchId>> = Vec::with_capacity(total as usize);
    for round in 1..=total {
        let count = capacity >> round;
        let ids = (0..count)
            .map(|i| {
                structure.push_match(
                    Some(round),
                    i as u32 + 1,
                    bracket_placement(bracket, BracketSide::Upper),
                )
            })
            .collect();
        rounds.push(ids);
    }

    if let Some(first) = rounds.first() {
        for (i, &id) in first.iter().enumerate() {
            if let Some(m) = structure.get_mut(id) {
                m.player1 = Some(slots[2 * i]);
                m.player2 = Some(slots[2 * i + 1]);
                m.status = MatchStatus::Ready;
            }
        }
    }

    for pair in rounds.windows(2) {
        for (i, &id) in pair[0].iter().enumerate() {
            link_winner(structure, id, pair[1][i / 2]);
        }
    }

    rounds
}

pub(crate) fn bracket_placement(bracket: BracketId, side: BracketSide) -> Placement {
    Placement::Bracket {
        bracket,
        side,
        next_winner: None,
        next_loser: None,
    }
}

pub(crate) fn link_winner(structure: &mut StageStructure, from: MatchId, to: MatchId) {
    if let Some(m) = structure.get_mut(from) {
        if let Placement::Bracket { next_winner, .. } = &mut m.placement {
            *next_winner = Some(to);
        }
    }
}

pub(crate) fn link_loser(structure: &mut StageStructure, from: MatchId, to: MatchId) {
    if let Some(m) = structure.get_mut(from) {
        if let Placement::Bracket { next_loser, .. } = &mut m.placement {
            *next_loser = Some(to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounds_for_capacity() {
        assert_eq!(rounds_for(2), 1);
        assert_eq!(rounds_for(8), 3);
        assert_eq!(rounds_for(256), 8);
    }

    #[test]
    fn test_seeded_options_give_same_rng_stream() {
        use rand::Rng;
        let options = BracketOptions {
            seeding: SeedingMethod::Random,
            shuffle_seed: Some(9),
        };
        let a: u64 = options.rng().gen();
        let b: u64 = options.rng().gen();
        assert_eq!(a, b);
    }

    #[test]
    fn test_winner_rounds_link_halves() {
        let mut structure = StageStructure::empty(1);
        let slots: Vec<ParticipantId> = (1..=8).map(ParticipantId).collect();
        let rounds = build_winner_rounds(&mut structure, 0, &slots);
        assert_eq!(rounds.iter().map(Vec::len).collect::<Vec<_>>(), vec![4, 2, 1]);

        let first = structure.get(rounds[0][3]).unwrap();
        assert_eq!(first.player1, Some(ParticipantId(7)));
        assert_eq!(first.player2, Some(ParticipantId(8)));
        assert_eq!(first.status, MatchStatus::Ready);
        match first.placement {
            Placement::Bracket { next_winner, .. } => assert_eq!(next_winner, Some(rounds[1][1])),
            _ => panic!("expected bracket placement"),
        }
    }
}
