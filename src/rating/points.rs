// Killer-pool point accumulation.

use crate::model::{MultiplayerGame, ParticipantId};

/// Placement points: 1st of n scores n, last scores 1.
pub fn placement_points(placement: u32, players: u32) -> i32 {
    players as i32 - placement as i32 + 1
}

/// Rating change of every player in a game. Players without an entry in the
/// score list change by zero.
pub fn game_deltas(game: &MultiplayerGame) -> Vec<(ParticipantId, i32)> {
    let mut out: Vec<(ParticipantId, i32)> = Vec::new();
    let players = game
        .participants
        .iter()
        .copied()
        .chain(game.scores.iter().map(|s| s.participant));
    for participant in players {
        if out.iter().any(|(p, _)| *p == participant) {
            continue;
        }
        let points = game
            .scores
            .iter()
            .filter(|s| s.participant == participant)
            .map(|s| s.points)
            .sum();
        out.push((participant, points));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GameScore;
    use chrono::Utc;

    #[test]
    fn test_placement_points() {
        assert_eq!(placement_points(1, 5), 5);
        assert_eq!(placement_points(5, 5), 1);
        assert_eq!(placement_points(3, 5), 3);
    }

    #[test]
    fn test_missing_players_change_by_zero() {
        let game = MultiplayerGame {
            id: 1,
            league_id: 1,
            played_at: Utc::now(),
            participants: vec![ParticipantId(1), ParticipantId(2), ParticipantId(3)],
            scores: vec![
                GameScore {
                    participant: ParticipantId(1),
                    points: 4,
                },
                GameScore {
                    participant: ParticipantId(3),
                    points: -2,
                },
            ],
        };
        assert_eq!(
            game_deltas(&game),
            vec![
                (ParticipantId(1), 4),
                (ParticipantId(2), 0),
                (ParticipantId(3), -2)
            ]
        );
    }

    #[test]
    fn test_scored_players_not_listed_are_included() {
        let game = MultiplayerGame {
            id: 2,
            league_id: 1,
            played_at: Utc::now(),
            participants: vec![ParticipantId(1)],
            scores: vec![GameScore {
                participant: ParticipantId(7),
                points: 3,
            }],
        };
        assert_eq!(
            game_deltas(&game),
            vec![(ParticipantId(1), 0), (ParticipantId(7), 3)]
        );
    }
}
