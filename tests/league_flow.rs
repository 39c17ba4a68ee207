// Integration tests for league ladders: one-off results and completed
// tournaments feeding their results into a tiered league.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use cue_tournaments::bracket::BracketOptions;
use cue_tournaments::config::parse_rule_table;
use cue_tournaments::model::{
    LadderEntry, League, LeagueMatch, Match, MatchKey, MatchStatus, ParticipantId, RatingSource,
    Score, Stage, StageKind, Tournament,
};
use cue_tournaments::rating::{RatingStrategy, RuleTable};
use cue_tournaments::seeding::{Entrant, SeedingMethod};
use cue_tournaments::{
    ConfigError, Conflict, CoreError, CoreEvent, EventBus, MatchQuery, MemoryStore, Store,
    TournamentService,
};

type Service = TournamentService<MemoryStore>;

fn setup() -> (Arc<MemoryStore>, Service) {
    let store = Arc::new(MemoryStore::new());
    let svc = TournamentService::new(store.clone(), EventBus::default());
    (store, svc)
}

fn p(id: i64) -> ParticipantId {
    ParticipantId(id)
}

fn league(id: i64, strategy: RatingStrategy) -> League {
    League {
        id,
        name: "Winter Ladder".into(),
        base_rating: 1000,
        strategy,
    }
}

fn tiered() -> RatingStrategy {
    RatingStrategy::Tiered {
        rules: RuleTable::standard(),
    }
}

async fn register(svc: &Service, league_id: i64, players: &[(i64, &str)]) {
    for &(id, name) in players {
        svc.ladder()
            .register_player(league_id, p(id), name, "Player")
            .await
            .unwrap();
    }
}

fn favourite_wins(m: &Match) -> Score {
    match (m.player1, m.player2) {
        (Some(a), Some(b)) if a < b => Score::new(3, 1),
        _ => Score::new(1, 3),
    }
}

async fn play_all(svc: &Service, stage_id: i64) {
    loop {
        let ready = svc
            .matches(&MatchQuery::stage(stage_id).status(MatchStatus::Ready))
            .await
            .unwrap();
        let Some(m) = ready.first() else {
            return;
        };
        svc.enter_result(stage_id, m.id, favourite_wins(m))
            .await
            .unwrap();
    }
}

async fn rated_tournament(svc: &Service, entrants: i64) {
    let mut tournament = Tournament::new(1, "Club Open");
    tournament.league_id = Some(1);
    svc.create_tournament(tournament).await.unwrap();
    svc.create_stage(Stage::new(10, 1, 1, StageKind::SingleElimination))
        .await
        .unwrap();
    let entrants: Vec<Entrant> = (1..=entrants).map(|i| Entrant::seeded(i, i as u32)).collect();
    svc.generate_bracket(10, &entrants, BracketOptions::new(SeedingMethod::Manual))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_completed_tournament_feeds_league() {
    let (store, svc) = setup();
    svc.ladder().create_league(league(1, tiered())).await.unwrap();
    register(&svc, 1, &[(1, "Ann"), (2, "Bea"), (3, "Cal"), (4, "Dan")]).await;
    rated_tournament(&svc, 4).await;
    let mut rx = svc.events().subscribe();

    play_all(&svc, 10).await;

    // 1 beats 2, 3 beats 4, 1 beats 3; equal ratings give 25 each way.
    let ladder = svc.ladder().ladder(1).await.unwrap();
    let rows: Vec<(i64, u32, i32, u32)> = ladder
        .iter()
        .map(|e| (e.participant.0, e.position, e.rating, e.matches_played))
        .collect();
    assert_eq!(
        rows,
        vec![(1, 1, 1050, 2), (3, 2, 1000, 2), (2, 3, 975, 1), (4, 4, 975, 1)]
    );

    let recorded = store.league_matches(1).await.unwrap();
    assert_eq!(recorded.len(), 3);
    assert!(recorded
        .iter()
        .all(|m| matches!(m.key, MatchKey::Stage { stage_id: 10, .. })));
    assert_eq!(store.rating_log(1).await.unwrap().len(), 6);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(events.contains(&CoreEvent::LadderUpdated { league_id: 1 }));
    assert!(events.contains(&CoreEvent::TournamentCompleted {
        tournament_id: 1,
        champion: Some(p(1)),
    }));
}

#[tokio::test]
async fn test_bye_walkovers_and_unregistered_players_are_not_rated() {
    let (store, svc) = setup();
    svc.ladder().create_league(league(1, tiered())).await.unwrap();
    // 3 is not on the ladder.
    register(&svc, 1, &[(1, "Ann"), (2, "Bea")]).await;
    rated_tournament(&svc, 3).await;

    play_all(&svc, 10).await;

    // Slots 1, BYE, 2, 3: only the final between 1 and 2 counts.
    let recorded = store.league_matches(1).await.unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].player1, p(1));
    assert_eq!(recorded[0].player2, p(2));
    let log = store.rating_log(1).await.unwrap();
    assert_eq!(log.len(), 2);
    assert!(log
        .iter()
        .all(|e| matches!(e.source, RatingSource::Match { .. })));
}

#[tokio::test]
async fn test_results_are_final_once_the_tournament_fed_the_league() {
    let (store, svc) = setup();
    svc.ladder().create_league(league(1, tiered())).await.unwrap();
    register(&svc, 1, &[(1, "Ann"), (2, "Bea"), (3, "Cal"), (4, "Dan")]).await;
    rated_tournament(&svc, 4).await;
    play_all(&svc, 10).await;

    let structure = svc.structure(10).await.unwrap();
    let final_id = structure.brackets[0].final_match;
    let ladder_before = svc.ladder().ladder(1).await.unwrap();
    let recorded_before = store.league_matches(1).await.unwrap();

    // Flipping the final would crown 3 while the ladder already rated 1.
    let err = svc
        .enter_result(10, final_id, Score::new(1, 3))
        .await
        .unwrap_err();
    assert_eq!(err.conflict(), Some(&Conflict::StageCompleted(10)));
    let err = svc.forfeit_match(10, final_id, p(1)).await.unwrap_err();
    assert_eq!(err.conflict(), Some(&Conflict::StageCompleted(10)));

    assert_eq!(svc.structure(10).await.unwrap(), structure);
    assert_eq!(structure.get(final_id).unwrap().winner, Some(p(1)));
    assert_eq!(store.league_matches(1).await.unwrap(), recorded_before);
    assert_eq!(store.rating_log(1).await.unwrap().len(), 6);
    assert_eq!(svc.ladder().ladder(1).await.unwrap(), ladder_before);
    assert_eq!(ladder_before[0].participant, p(1));
    assert_eq!(ladder_before[0].rating, 1050);
}

#[tokio::test]
async fn test_rated_tournament_needs_tiered_league() {
    let (_store, svc) = setup();
    svc.ladder()
        .create_league(league(2, RatingStrategy::KillerPool))
        .await
        .unwrap();
    let mut tournament = Tournament::new(1, "Killer Night");
    tournament.league_id = Some(2);
    let err = svc.create_tournament(tournament).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::Config(ConfigError::StrategyMismatch(2))
    ));
}

#[tokio::test]
async fn test_upset_uses_weak_winner_bucket() {
    let (_store, svc) = setup();
    svc.ladder().create_league(league(1, tiered())).await.unwrap();
    register(&svc, 1, &[(1, "Ann"), (2, "Bea"), (3, "Cal")]).await;
    let at = Utc.with_ymd_and_hms(2024, 11, 7, 19, 30, 0).unwrap();
    let record = |id: i64, p1: i64, p2: i64, f1: u32, f2: u32| LeagueMatch {
        league_id: 1,
        key: MatchKey::OneOff { id },
        player1: p(p1),
        player2: p(p2),
        frames1: f1,
        frames2: f2,
        played_at: at + Duration::minutes(id),
    };

    // 1 beats 2 (even), then 3 (25 apart): 1050 against 975.
    svc.ladder()
        .record_matches(1, vec![record(1, 1, 2, 3, 0), record(2, 1, 3, 3, 1)])
        .await
        .unwrap();
    let before = svc.ladder().ladder(1).await.unwrap();
    let rating = |id: i64, rows: &[LadderEntry]| {
        rows.iter().find(|e| e.participant == p(id)).unwrap().rating
    };
    assert_eq!(rating(1, &before), 1050);
    assert_eq!(rating(2, &before), 975);

    // 75 apart: the weaker side wins and takes the 51-100 weak delta.
    let after = svc.ladder().record_match(record(3, 2, 1, 3, 2)).await.unwrap();
    assert_eq!(rating(2, &after), 975 + 30);
    assert_eq!(rating(1, &after), 1050 - 30);
}

#[tokio::test]
async fn test_rule_table_from_config_rates_league() {
    let raw = r#"{
        "winners": [
            {"min": 0, "max": 100, "strong_delta": 10, "weak_delta": 10},
            {"min": 101, "max": null, "strong_delta": 5, "weak_delta": 20}
        ],
        "losers": [
            {"min": 0, "max": 100, "strong_delta": 8, "weak_delta": 8},
            {"min": 101, "max": null, "strong_delta": 4, "weak_delta": 16}
        ]
    }"#;
    let rules = parse_rule_table(raw).unwrap();

    let (_store, svc) = setup();
    svc.ladder()
        .create_league(league(1, RatingStrategy::Tiered { rules }))
        .await
        .unwrap();
    register(&svc, 1, &[(1, "Ann"), (2, "Bea")]).await;
    let ladder = svc
        .ladder()
        .record_match(LeagueMatch {
            league_id: 1,
            key: MatchKey::OneOff { id: 1 },
            player1: p(1),
            player2: p(2),
            frames1: 4,
            frames2: 2,
            played_at: Utc::now(),
        })
        .await
        .unwrap();
    assert_eq!(ladder[0].rating, 1010);
    assert_eq!(ladder[1].rating, 992);
}
