// Round robin and groups: all-play-all pairings, serpentine group assignment
// and a circle-method scheduler that packs matches onto a number of tables.

use std::collections::HashSet;

use crate::error::{ConfigError, CoreResult};
use crate::model::{
    Group, GroupId, GroupSize, MatchStatus, Participant, ParticipantId, Placement, StageStructure,
};

/// Generate round-robin pairings (all vs all) for `k` members, by index.
///
/// Every member plays every other member exactly once: k(k-1)/2 pairs.
pub fn pairings(k: usize) -> Vec<(usize, usize)> {
    let mut pairs = Vec::with_capacity(k * k.saturating_sub(1) / 2);
    for i in 0..k {
        for j in (i + 1)..k {
            pairs.push((i, j));
        }
    }
    pairs
}

/// Distribute participants (taken in seed order) over `group_count` groups,
/// reversing direction at each end: A B C C B A A B C ...
pub fn snake_groups(participants: &[Participant], group_count: usize) -> Vec<Vec<Participant>> {
    let mut groups = vec![Vec::new(); group_count.max(1)];
    let group_count = groups.len();
    let mut ordered: Vec<&Participant> = participants.iter().collect();
    ordered.sort_by_key(|p| p.seed);

    for (i, participant) in ordered.into_iter().enumerate() {
        let pos = i % (2 * group_count);
        let group = if pos < group_count {
            pos
        } else {
            2 * group_count - 1 - pos
        };
        groups[group].push(participant.clone());
    }
    groups
}

/// Circle-method rounds for `n` members.
///
/// The last index stays fixed while the others rotate. With an odd count a
/// dummy member takes the fixed position and whoever meets it sits out.
pub fn circle_rounds(n: usize) -> Vec<Vec<(usize, usize)>> {
    if n < 2 {
        return Vec::new();
    }
    let m = n + n % 2;
    let fixed = m - 1;
    let ring = m - 1;

    (0..ring)
        .map(|r| {
            let mut round = Vec::with_capacity(m / 2);
            if fixed < n {
                round.push((r.min(fixed), r.max(fixed)));
            }
            for k in 1..m / 2 {
                let a = (r + k) % ring;
                let b = (r + ring - k) % ring;
                round.push((a.min(b), a.max(b)));
            }
            round
        })
        .collect()
}

/// Pack the circle order into rounds of at most `tables` matches in which
/// nobody plays twice. Each returned round is one time slot.
pub fn table_schedule(n: usize, tables: usize) -> Vec<Vec<(usize, usize)>> {
    let tables = tables.max(1);
    let mut remaining: Vec<(usize, usize)> = circle_rounds(n).into_iter().flatten().collect();
    let mut slots = Vec::new();

    while !remaining.is_empty() {
        let mut busy = HashSet::new();
        let mut slot = Vec::new();
        remaining.retain(|&(a, b)| {
            if slot.len() < tables && !busy.contains(&a) && !busy.contains(&b) {
                busy.insert(a);
                busy.insert(b);
                slot.push((a, b));
                false
            } else {
                true
            }
        });
        slots.push(slot);
    }
    slots
}

/// Letter names for the first 26 groups, numbered names after that.
pub fn group_name(index: usize) -> String {
    if index < 26 {
        char::from(b'A' + index as u8).to_string()
    } else {
        format!("G{}", index + 1)
    }
}

/// Check a group layout before anything is generated.
///
/// `advance` is the per-group qualifier count when the groups feed a playoff.
pub fn validate_layout(
    participants: usize,
    group_count: usize,
    size: GroupSize,
    advance: Option<u32>,
) -> CoreResult<()> {
    if group_count == 0 {
        return Err(ConfigError::GroupLayout("at least one group is required".into()).into());
    }
    let smallest = participants / group_count;
    let largest = participants.div_ceil(group_count);
    let min = size.min.max(2) as usize;
    if smallest < min {
        return Err(ConfigError::GroupLayout(format!(
            "{participants} participants in {group_count} groups leaves a group of {smallest}, minimum is {min}"
        ))
        .into());
    }
    if largest > size.max as usize {
        return Err(ConfigError::GroupLayout(format!(
            "{participants} participants in {group_count} groups needs a group of {largest}, maximum is {}",
            size.max
        ))
        .into());
    }
    if let Some(advance) = advance {
        if advance == 0 || advance as usize >= smallest {
            return Err(ConfigError::GroupLayout(format!(
                "advancing {advance} per group needs groups larger than {advance}"
            ))
            .into());
        }
    }
    Ok(())
}

/// Create groups and their round-robin matches in `structure`.
///
/// With `tables` set, matches carry a `round_index` from `table_schedule`;
/// otherwise they are listed in plain pairing order without rounds.
pub fn build_groups(
    structure: &mut StageStructure,
    participants: &[Participant],
    group_count: usize,
    advance_count: u32,
    tables: Option<u32>,
) -> Vec<GroupId> {
    let mut created = Vec::new();
    for (index, members) in snake_groups(participants, group_count).into_iter().enumerate() {
        let id = structure.groups.len() as GroupId;
        let ids: Vec<ParticipantId> = members.iter().map(|p| p.id).collect();

        let schedule: Vec<(Option<u32>, (usize, usize))> = match tables {
            Some(tables) => table_schedule(ids.len(), tables as usize)
                .into_iter()
                .enumerate()
                .flat_map(|(slot, pairs)| {
                    pairs.into_iter().map(move |pair| (Some(slot as u32 + 1), pair))
                })
                .collect(),
            None => pairings(ids.len()).into_iter().map(|pair| (None, pair)).collect(),
        };

        for (number, (round_index, (a, b))) in schedule.into_iter().enumerate() {
            let match_id = structure.push_match(
                None,
                number as u32 + 1,
                Placement::Group {
                    group: id,
                    round_index,
                },
            );
            if let Some(m) = structure.get_mut(match_id) {
                m.player1 = Some(ids[a]);
                m.player2 = Some(ids[b]);
                m.status = MatchStatus::Ready;
            }
        }

        structure.groups.push(Group {
            id,
            name: group_name(index),
            participants: ids,
            advance_count,
        });
        created.push(id);
    }

    tracing::debug!(
        stage_id = structure.stage_id,
        groups = created.len(),
        matches = structure.matches.len(),
        "built round robin groups"
    );
    created
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participants(n: i64) -> Vec<Participant> {
        (1..=n)
            .map(|i| Participant {
                id: ParticipantId(i),
                seed: i as u32,
                rating_snapshot: None,
            })
            .collect()
    }

    fn normalized(pairs: impl IntoIterator<Item = (usize, usize)>) -> HashSet<(usize, usize)> {
        pairs.into_iter().collect()
    }

    #[test]
    fn test_pairing_count() {
        for k in 2..=12 {
            let pairs = pairings(k);
            assert_eq!(pairs.len(), k * (k - 1) / 2);
            assert_eq!(normalized(pairs).len(), k * (k - 1) / 2, "duplicate pairing for k={k}");
        }
    }

    #[test]
    fn test_snake_distribution() {
        let groups = snake_groups(&participants(8), 3);
        let seeds: Vec<Vec<u32>> = groups
            .iter()
            .map(|g| g.iter().map(|p| p.seed).collect())
            .collect();
        assert_eq!(seeds, vec![vec![1, 6, 7], vec![2, 5, 8], vec![3, 4]]);
    }

    #[test]
    fn test_circle_rounds_cover_every_pair_once() {
        for n in 2..=11 {
            let rounds = circle_rounds(n);
            let all: Vec<(usize, usize)> = rounds.iter().flatten().copied().collect();
            assert_eq!(all.len(), n * (n - 1) / 2, "n={n}");
            assert_eq!(normalized(all.clone()), normalized(pairings(n)), "n={n}");
            for round in &rounds {
                let mut seen = HashSet::new();
                for (a, b) in round {
                    assert!(seen.insert(*a) && seen.insert(*b), "n={n} double booking");
                }
            }
        }
    }

    #[test]
    fn test_odd_count_sits_one_out_per_round() {
        let rounds = circle_rounds(5);
        assert_eq!(rounds.len(), 5);
        assert!(rounds.iter().all(|r| r.len() == 2));
    }

    #[test]
    fn test_table_schedule_respects_table_count() {
        let slots = table_schedule(6, 2);
        assert!(slots.iter().all(|s| s.len() <= 2 && !s.is_empty()));
        let all: Vec<(usize, usize)> = slots.into_iter().flatten().collect();
        assert_eq!(normalized(all), normalized(pairings(6)));
    }

    #[test]
    fn test_build_groups_creates_ready_matches() {
        let mut structure = StageStructure::empty(3);
        let ids = build_groups(&mut structure, &participants(7), 2, 2, None);
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(structure.groups[0].name, "A");
        // A takes seeds 1, 4, 5; B takes 2, 3, 6, 7
        assert_eq!(structure.groups[0].participants.len(), 3);
        assert_eq!(structure.groups[1].participants.len(), 4);
        // 3 + 6 matches
        assert_eq!(structure.matches.len(), 9);
        assert!(structure
            .matches
            .iter()
            .all(|m| m.status == MatchStatus::Ready && m.round.is_none()));
    }

    #[test]
    fn test_build_groups_with_tables_sets_round_index() {
        let mut structure = StageStructure::empty(3);
        build_groups(&mut structure, &participants(4), 1, 1, Some(2));
        let indices: Vec<Option<u32>> = structure
            .matches
            .iter()
            .map(|m| match m.placement {
                Placement::Group { round_index, .. } => round_index,
                _ => None,
            })
            .collect();
        assert!(indices.iter().all(Option::is_some));
        assert_eq!(indices.len(), 6);
    }

    #[test]
    fn test_layout_validation() {
        let size = GroupSize { min: 3, max: 6 };
        assert!(validate_layout(12, 3, size, Some(2)).is_ok());
        assert!(validate_layout(12, 5, size, None).is_err());
        assert!(validate_layout(20, 3, size, None).is_err());
        assert!(validate_layout(12, 3, size, Some(4)).is_err());
        assert!(validate_layout(12, 0, size, None).is_err());
    }

    #[test]
    fn test_group_names() {
        assert_eq!(group_name(0), "A");
        assert_eq!(group_name(25), "Z");
        assert_eq!(group_name(26), "G27");
    }
}
