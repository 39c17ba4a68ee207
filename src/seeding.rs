// Seeding: order entrants, assign seeds 1..N and lay them out into bracket
// slots with evenly spread BYEs.

use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, CoreResult};
use crate::model::{Participant, ParticipantId};

pub const MIN_PARTICIPANTS: usize = 2;
pub const MAX_PARTICIPANTS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedingMethod {
    Random,
    Rating,
    Manual,
}

impl SeedingMethod {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "random" => Some(Self::Random),
            "rating" => Some(Self::Rating),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// A participant as handed in by the registration layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entrant {
    pub id: ParticipantId,
    /// Current ladder rating; unrated entrants seed last.
    pub rating: Option<i32>,
    /// Requested seed for manual seeding.
    pub seed: Option<u32>,
}

impl Entrant {
    pub fn new(id: i64) -> Self {
        Entrant {
            id: ParticipantId(id),
            rating: None,
            seed: None,
        }
    }

    pub fn rated(id: i64, rating: i32) -> Self {
        Entrant {
            rating: Some(rating),
            ..Entrant::new(id)
        }
    }

    pub fn seeded(id: i64, seed: u32) -> Self {
        Entrant {
            seed: Some(seed),
            ..Entrant::new(id)
        }
    }
}

/// Reject entrant lists no bracket can be built from.
pub fn validate_entrants(entrants: &[Entrant]) -> CoreResult<()> {
    if entrants.len() < MIN_PARTICIPANTS || entrants.len() > MAX_PARTICIPANTS {
        return Err(ConfigError::ParticipantCount {
            min: MIN_PARTICIPANTS,
            max: MAX_PARTICIPANTS,
            actual: entrants.len(),
        }
        .into());
    }
    let mut seen = HashSet::new();
    for entrant in entrants {
        if entrant.id.is_bye() {
            return Err(ConfigError::ReservedParticipant(entrant.id.0).into());
        }
        if !seen.insert(entrant.id) {
            return Err(ConfigError::DuplicateParticipant(entrant.id.0).into());
        }
    }
    Ok(())
}

/// Order entrants by the given method and assign seeds 1..N.
pub fn seed_participants<R: Rng + ?Sized>(
    entrants: &[Entrant],
    method: SeedingMethod,
    rng: &mut R,
) -> CoreResult<Vec<Participant>> {
    validate_entrants(entrants)?;

    let mut ordered: Vec<&Entrant> = entrants.iter().collect();
    match method {
        SeedingMethod::Random => ordered.shuffle(rng),
        SeedingMethod::Rating => {
            // Stable: equal ratings keep their input order.
            ordered.sort_by_key(|e| std::cmp::Reverse(e.rating.unwrap_or(i32::MIN)));
        }
        SeedingMethod::Manual => {
            let mut seeds = HashSet::new();
            for entrant in &ordered {
                match entrant.seed {
                    Some(seed) if seeds.insert(seed) => {}
                    _ => return Err(ConfigError::ManualSeeds.into()),
                }
            }
            ordered.sort_by_key(|e| e.seed);
        }
    }

    Ok(ordered
        .into_iter()
        .enumerate()
        .map(|(i, e)| Participant {
            id: e.id,
            seed: i as u32 + 1,
            rating_snapshot: e.rating,
        })
        .collect())
}

/// Next power of two that holds `n` participants.
pub fn bracket_capacity(n: usize) -> usize {
    n.max(MIN_PARTICIPANTS).next_power_of_two()
}

/// Slot indices that receive a BYE: `round(i * capacity / (byes + 1)) - 1`.
///
/// Integer rounding, half away from zero. Consecutive positions are at least
/// two apart, so no round-1 pair ever holds two BYEs.
pub fn bye_positions(capacity: usize, byes: usize) -> Vec<usize> {
    let divisor = byes + 1;
    (1..=byes)
        .map(|i| (2 * i * capacity + divisor) / (2 * divisor) - 1)
        .collect()
}

/// Expand seeded participants into `capacity` slots with BYEs placed.
///
/// Seeds 1..=byes take the slot paired with each BYE position in order; the
/// remaining seeds fill the other slots left to right.
pub fn slot_layout(participants: &[Participant]) -> Vec<ParticipantId> {
    let capacity = bracket_capacity(participants.len());
    let byes = bye_positions(capacity, capacity - participants.len());
    let mut ordered: Vec<&Participant> = participants.iter().collect();
    ordered.sort_by_key(|p| p.seed);
    let mut next = ordered.into_iter().map(|p| p.id);

    let mut slots = vec![None; capacity];
    for &bye in &byes {
        slots[bye] = Some(ParticipantId::BYE);
        slots[bye ^ 1] = next.next();
    }
    slots
        .into_iter()
        .map(|slot| slot.or_else(|| next.next()).unwrap_or(ParticipantId::BYE))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn entrants(n: i64) -> Vec<Entrant> {
        (1..=n).map(Entrant::new).collect()
    }

    #[test]
    fn test_capacity_is_next_power_of_two() {
        assert_eq!(bracket_capacity(2), 2);
        assert_eq!(bracket_capacity(3), 4);
        assert_eq!(bracket_capacity(5), 8);
        assert_eq!(bracket_capacity(8), 8);
        assert_eq!(bracket_capacity(129), 256);
    }

    #[test]
    fn test_bye_positions_for_five_of_eight() {
        // round(8/4)-1, round(16/4)-1, round(24/4)-1
        assert_eq!(bye_positions(8, 3), vec![1, 3, 5]);
    }

    #[test]
    fn test_bye_positions_round_half_up() {
        // 6 of 8: 8/3 = 2.67 -> 3, 16/3 = 5.33 -> 5
        assert_eq!(bye_positions(8, 2), vec![2, 4]);
        // 3 of 4: 4/2 = 2
        assert_eq!(bye_positions(4, 1), vec![1]);
    }

    #[test]
    fn test_byes_never_share_a_pair() {
        for n in MIN_PARTICIPANTS..=MAX_PARTICIPANTS {
            let capacity = bracket_capacity(n);
            let positions = bye_positions(capacity, capacity - n);
            assert_eq!(positions.len(), capacity - n);
            for pair in positions.windows(2) {
                assert!(pair[1] >= pair[0] + 2, "n={n} positions={positions:?}");
            }
            assert!(positions.iter().all(|p| *p < capacity));
        }
    }

    fn seeded(n: i64) -> Vec<Participant> {
        let list: Vec<Entrant> = (1..=n).map(|i| Entrant::seeded(i, i as u32)).collect();
        seed_participants(&list, SeedingMethod::Manual, &mut StdRng::seed_from_u64(1)).unwrap()
    }

    /// Seeds drawn against a BYE, in slot order.
    fn bye_seeds(slots: &[ParticipantId]) -> Vec<i64> {
        slots
            .chunks(2)
            .filter_map(|pair| match (pair[0], pair[1]) {
                (a, b) if a.is_bye() => Some(b.0),
                (a, b) if b.is_bye() => Some(a.0),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_manual_seeding_needs_seeds() {
        let mut rng = StdRng::seed_from_u64(1);
        let seeded = seed_participants(&entrants(5), SeedingMethod::Manual, &mut rng);
        assert!(seeded.is_err());
    }

    #[test]
    fn test_slot_layout_gives_byes_to_top_seeds() {
        let ids = |n| -> Vec<i64> { slot_layout(&seeded(n)).iter().map(|p| p.0).collect() };
        assert_eq!(ids(5), vec![1, -1, 2, -1, 3, -1, 4, 5]);
        // Seeds 1 and 2 sit out round 1 instead of meeting there.
        assert_eq!(ids(6), vec![3, 4, -1, 1, -1, 2, 5, 6]);
        assert_eq!(ids(7), vec![2, 3, 1, -1, 4, 5, 6, 7]);
        assert_eq!(ids(3), vec![1, -1, 2, 3]);
        assert_eq!(ids(8), (1..=8).collect::<Vec<i64>>());
    }

    #[test]
    fn test_every_top_seed_draws_a_bye() {
        for n in 3..=MAX_PARTICIPANTS {
            let slots = slot_layout(&seeded(n as i64));
            let byes = bracket_capacity(n) - n;
            let mut got = bye_seeds(&slots);
            got.sort();
            let want: Vec<i64> = (1..=byes as i64).collect();
            assert_eq!(got, want, "n={n}");

            let mut placed: Vec<i64> = slots
                .iter()
                .filter(|p| !p.is_bye())
                .map(|p| p.0)
                .collect();
            placed.sort();
            assert_eq!(placed, (1..=n as i64).collect::<Vec<i64>>(), "n={n}");
        }
    }

    #[test]
    fn test_rating_seeding_is_stable_and_unrated_last() {
        let list = vec![
            Entrant::new(1),
            Entrant::rated(2, 1000),
            Entrant::rated(3, 1200),
            Entrant::rated(4, 1000),
        ];
        let mut rng = StdRng::seed_from_u64(7);
        let seeded = seed_participants(&list, SeedingMethod::Rating, &mut rng).unwrap();
        let order: Vec<i64> = seeded.iter().map(|p| p.id.0).collect();
        assert_eq!(order, vec![3, 2, 4, 1]);
        let seeds: Vec<u32> = seeded.iter().map(|p| p.seed).collect();
        assert_eq!(seeds, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_random_seeding_is_reproducible_with_seed() {
        let list = entrants(16);
        let a = seed_participants(&list, SeedingMethod::Random, &mut StdRng::seed_from_u64(42))
            .unwrap();
        let b = seed_participants(&list, SeedingMethod::Random, &mut StdRng::seed_from_u64(42))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_manual_seeding_renumbers() {
        let list = vec![
            Entrant::seeded(10, 40),
            Entrant::seeded(11, 5),
            Entrant::seeded(12, 17),
        ];
        let mut rng = StdRng::seed_from_u64(0);
        let seeded = seed_participants(&list, SeedingMethod::Manual, &mut rng).unwrap();
        let order: Vec<(i64, u32)> = seeded.iter().map(|p| (p.id.0, p.seed)).collect();
        assert_eq!(order, vec![(11, 1), (12, 2), (10, 3)]);
    }

    #[test]
    fn test_participant_count_bounds() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(seed_participants(&entrants(1), SeedingMethod::Random, &mut rng).is_err());
        assert!(seed_participants(&entrants(257), SeedingMethod::Random, &mut rng).is_err());
        assert!(seed_participants(&entrants(256), SeedingMethod::Random, &mut rng).is_ok());
    }

    #[test]
    fn test_rejects_duplicates_and_reserved_ids() {
        let dup = vec![Entrant::new(1), Entrant::new(1)];
        assert!(validate_entrants(&dup).is_err());
        let reserved = vec![Entrant::new(1), Entrant::new(-1)];
        assert!(validate_entrants(&reserved).is_err());
    }
}
