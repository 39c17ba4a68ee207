// Ladder rearrangement and rating-log replay.
//
// Ratings and counters are always rebuilt from the logs, so running a
// rearrangement twice without new results yields the same ladder.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::{ConfigError, CoreResult};
use crate::model::{
    LadderEntry, League, LeagueMatch, MultiplayerGame, ParticipantId, RatingEvent, RatingSource,
};

use super::points::game_deltas;
use super::{current_ratings, RuleTable};

/// Ladder order: rating, wins, frame difference, frames won, matches played
/// (all descending), then last name, first name and id ascending.
pub fn ladder_cmp(a: &LadderEntry, b: &LadderEntry) -> Ordering {
    b.rating
        .cmp(&a.rating)
        .then(b.wins.cmp(&a.wins))
        .then(b.frame_diff.cmp(&a.frame_diff))
        .then(b.frames_won.cmp(&a.frames_won))
        .then(b.matches_played.cmp(&a.matches_played))
        .then_with(|| a.last_name.cmp(&b.last_name))
        .then_with(|| a.first_name.cmp(&b.first_name))
        .then(a.participant.cmp(&b.participant))
}

/// Recompute ratings and counters for every ladder entry and reassign
/// positions 1..n.
pub fn rearrange(
    entries: &[LadderEntry],
    base_rating: i32,
    log: &[RatingEvent],
    matches: &[LeagueMatch],
    games: &[MultiplayerGame],
) -> Vec<LadderEntry> {
    let ratings = current_ratings(base_rating, log);

    let mut ladder: Vec<LadderEntry> = entries
        .iter()
        .map(|entry| {
            let mut row = entry.clone();
            row.rating = ratings
                .get(&entry.participant)
                .copied()
                .unwrap_or(base_rating);
            row.wins = 0;
            row.frame_diff = 0;
            row.frames_won = 0;
            row.matches_played = 0;
            row
        })
        .collect();

    let index: HashMap<ParticipantId, usize> = ladder
        .iter()
        .enumerate()
        .map(|(i, e)| (e.participant, i))
        .collect();

    for record in matches {
        for participant in [record.player1, record.player2] {
            let (Some(&i), Some((won, lost))) =
                (index.get(&participant), record.frames_for(participant))
            else {
                continue;
            };
            let row = &mut ladder[i];
            row.matches_played += 1;
            row.frames_won += won;
            row.frame_diff += i64::from(won) - i64::from(lost);
            if record.winner() == participant {
                row.wins += 1;
            }
        }
    }

    for game in games {
        for (participant, _) in game_deltas(game) {
            if let Some(&i) = index.get(&participant) {
                ladder[i].matches_played += 1;
            }
        }
    }

    ladder.sort_by(ladder_cmp);
    for (i, row) in ladder.iter_mut().enumerate() {
        row.position = i as u32 + 1;
    }
    ladder
}

/// Rating events for one pairwise result at the given current ratings.
pub fn match_events(
    rules: &RuleTable,
    record: &LeagueMatch,
    ratings: &HashMap<ParticipantId, i32>,
    base_rating: i32,
) -> CoreResult<Vec<RatingEvent>> {
    let winner = record.winner();
    let loser = record.loser();
    let rating_of = |p: ParticipantId| ratings.get(&p).copied().unwrap_or(base_rating);
    let change = rules.calculate(rating_of(winner), rating_of(loser))?;
    let source = RatingSource::Match { key: record.key };
    Ok(vec![
        RatingEvent {
            league_id: record.league_id,
            participant: winner,
            delta: change.winner_delta,
            source,
        },
        RatingEvent {
            league_id: record.league_id,
            participant: loser,
            delta: change.loser_delta,
            source,
        },
    ])
}

/// Rating events for one multiplayer game.
pub fn game_events(game: &MultiplayerGame) -> Vec<RatingEvent> {
    game_deltas(game)
        .into_iter()
        .map(|(participant, delta)| RatingEvent {
            league_id: game.league_id,
            participant,
            delta,
            source: RatingSource::Game { id: game.id },
        })
        .collect()
}

/// Rebuild a league's whole rating log from its results in play order
/// (time, then matches before games, then key).
pub fn replay(
    league: &League,
    matches: &[LeagueMatch],
    games: &[MultiplayerGame],
) -> CoreResult<Vec<RatingEvent>> {
    let rules = league.strategy.rules();
    if rules.is_none() && !matches.is_empty() {
        return Err(ConfigError::StrategyMismatch(league.id).into());
    }

    let mut matches: Vec<&LeagueMatch> = matches.iter().collect();
    matches.sort_by(|a, b| a.played_at.cmp(&b.played_at).then(a.key.cmp(&b.key)));
    let mut games: Vec<&MultiplayerGame> = games.iter().collect();
    games.sort_by(|a, b| a.played_at.cmp(&b.played_at).then(a.id.cmp(&b.id)));

    let mut log: Vec<RatingEvent> = Vec::new();
    let mut ratings: HashMap<ParticipantId, i32> = HashMap::new();
    let (mut mi, mut gi) = (0, 0);

    while mi < matches.len() || gi < games.len() {
        let take_match = match (matches.get(mi), games.get(gi)) {
            (Some(m), Some(g)) => m.played_at <= g.played_at,
            (Some(_), None) => true,
            _ => false,
        };
        let events = if take_match {
            let record = matches[mi];
            mi += 1;
            match rules {
                Some(rules) => match_events(rules, record, &ratings, league.base_rating)?,
                None => Vec::new(),
            }
        } else {
            let game = games[gi];
            gi += 1;
            game_events(game)
        };
        for event in &events {
            *ratings
                .entry(event.participant)
                .or_insert(league.base_rating) += event.delta;
        }
        log.extend(events);
    }
    Ok(log)
}
