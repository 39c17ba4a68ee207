// Integration tests for tournament flows driven through TournamentService:
// generation, result entry, propagation and cross-stage advancement.

use std::sync::Arc;

use cue_tournaments::bracket::BracketOptions;
use cue_tournaments::model::{
    BracketSide, Match, MatchId, MatchStatus, ParticipantId, Score, Stage, StageKind, StageStatus,
    Tournament, TournamentStatus,
};
use cue_tournaments::seeding::Entrant;
use cue_tournaments::{Conflict, CoreEvent, EventBus, MatchQuery, MemoryStore, Store};
use cue_tournaments::TournamentService;
use tokio::sync::broadcast;

type Service = TournamentService<MemoryStore>;

fn setup() -> (Arc<MemoryStore>, Service) {
    let store = Arc::new(MemoryStore::new());
    let svc = TournamentService::new(store.clone(), EventBus::default());
    (store, svc)
}

/// Lower ids are rated higher, so they take the lower seeds.
fn entrants(n: i64) -> Vec<Entrant> {
    (1..=n).map(|i| Entrant::rated(i, 2000 - i as i32)).collect()
}

fn p(id: i64) -> ParticipantId {
    ParticipantId(id)
}

/// Race-to-3 result won by the lower id.
fn favourite_wins(m: &Match) -> Score {
    match (m.player1, m.player2) {
        (Some(a), Some(b)) if a < b => Score::new(3, 1),
        _ => Score::new(1, 3),
    }
}

fn underdog_wins(m: &Match) -> Score {
    let s = favourite_wins(m);
    Score::new(s.player2, s.player1)
}

/// Enter results for ready matches accepted by `only` until none is left.
async fn play(
    svc: &Service,
    stage_id: i64,
    only: impl Fn(&Match) -> bool,
    score: impl Fn(&Match) -> Score,
) -> usize {
    let mut played = 0;
    loop {
        let ready = svc
            .matches(&MatchQuery::stage(stage_id).status(MatchStatus::Ready))
            .await
            .unwrap();
        let Some(m) = ready.into_iter().find(|m| only(m)) else {
            return played;
        };
        svc.enter_result(stage_id, m.id, score(&m)).await.unwrap();
        played += 1;
    }
}

async fn play_all(svc: &Service, stage_id: i64) -> usize {
    play(svc, stage_id, |_| true, favourite_wins).await
}

fn drain(rx: &mut broadcast::Receiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

async fn create(svc: &Service, stages: &[(i64, StageKind)]) {
    svc.create_tournament(Tournament::new(1, "Club Open"))
        .await
        .unwrap();
    for (order, &(id, kind)) in stages.iter().enumerate() {
        svc.create_stage(Stage::new(id, 1, order as u32 + 1, kind))
            .await
            .unwrap();
    }
}

// ── Elimination ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_five_entrants_single_elimination() {
    let (store, svc) = setup();
    create(&svc, &[(10, StageKind::SingleElimination)]).await;
    let mut rx = svc.events().subscribe();

    svc.generate_bracket(10, &entrants(5), BracketOptions::default())
        .await
        .unwrap();

    let first = svc
        .matches(&MatchQuery::stage(10).round(1))
        .await
        .unwrap();
    assert_eq!(first.len(), 4);
    assert_eq!(
        first
            .iter()
            .filter(|m| m.status == MatchStatus::Walkover)
            .count(),
        3
    );
    let semis = svc
        .matches(&MatchQuery::stage(10).round(2))
        .await
        .unwrap();
    assert_eq!(semis.len(), 2);
    assert!(semis.iter().all(|m| m.player1.is_some()));

    // One real first-round match, two semifinals and the final.
    assert_eq!(play_all(&svc, 10).await, 4);

    assert_eq!(
        drain(&mut rx),
        vec![CoreEvent::TournamentCompleted {
            tournament_id: 1,
            champion: Some(p(1)),
        }]
    );
    let tournament = store.tournament(1).await.unwrap().unwrap();
    assert_eq!(tournament.status, TournamentStatus::Completed);
    let stage = store.stage(10).await.unwrap().unwrap();
    assert_eq!(stage.status, StageStatus::Completed);
}

#[tokio::test]
async fn test_double_elimination_plays_reset() {
    let (_store, svc) = setup();
    create(&svc, &[(10, StageKind::DoubleElimination)]).await;
    let mut rx = svc.events().subscribe();
    svc.generate_bracket(10, &entrants(4), BracketOptions::default())
        .await
        .unwrap();

    // The lower-bracket finalist takes the grand final, forcing the reset.
    let played = play(
        &svc,
        10,
        |_| true,
        |m| match m.side() {
            Some(BracketSide::GrandFinal) => underdog_wins(m),
            _ => favourite_wins(m),
        },
    )
    .await;
    assert_eq!(played, 7);

    let structure = svc.structure(10).await.unwrap();
    let reset = structure
        .get(structure.brackets[0].reset.unwrap())
        .unwrap();
    assert_eq!(reset.side(), Some(BracketSide::Reset { active: true }));
    assert_eq!(reset.status, MatchStatus::Completed);
    assert_eq!(reset.winner, Some(p(1)));
    assert_eq!(
        drain(&mut rx),
        vec![CoreEvent::TournamentCompleted {
            tournament_id: 1,
            champion: Some(p(1)),
        }]
    );
}

#[tokio::test]
async fn test_edit_moves_downstream_participant() {
    let (_store, svc) = setup();
    create(&svc, &[(10, StageKind::SingleElimination)]).await;
    svc.generate_bracket(10, &entrants(4), BracketOptions::default())
        .await
        .unwrap();

    svc.enter_result(10, MatchId(0), Score::new(3, 0))
        .await
        .unwrap();
    svc.enter_result(10, MatchId(1), Score::new(3, 0))
        .await
        .unwrap();
    let final_id = svc.structure(10).await.unwrap().brackets[0].final_match;
    let before = svc.structure(10).await.unwrap().get(final_id).unwrap().clone();
    assert!(before.contains(p(1)));

    // Correct the first semifinal: the other side won.
    let edited = svc
        .enter_result(10, MatchId(0), Score::new(1, 3))
        .await
        .unwrap();
    assert_eq!(edited.winner, Some(p(2)));

    let structure = svc.structure(10).await.unwrap();
    let after = structure.get(final_id).unwrap();
    assert!(after.contains(p(2)));
    assert!(!after.contains(p(1)));
    let citing_one = structure
        .matches
        .iter()
        .filter(|m| m.id != MatchId(0) && m.contains(p(1)))
        .count();
    assert_eq!(citing_one, 0);
}

#[tokio::test]
async fn test_score_confirmation_by_both_players() {
    let (_store, svc) = setup();
    create(&svc, &[(10, StageKind::SingleElimination)]).await;
    svc.generate_bracket(10, &entrants(4), BracketOptions::default())
        .await
        .unwrap();

    svc.start_match(10, MatchId(0)).await.unwrap();
    let reported = svc
        .report_score(10, MatchId(0), Score::new(3, 2))
        .await
        .unwrap();
    assert_eq!(reported.status, MatchStatus::Verification);

    let once = svc.confirm_result(10, MatchId(0), p(1)).await.unwrap();
    assert_eq!(once.status, MatchStatus::Verification);
    let twice = svc.confirm_result(10, MatchId(0), p(2)).await.unwrap();
    assert_eq!(twice.status, MatchStatus::Completed);
    assert_eq!(twice.winner, Some(p(1)));
}

#[tokio::test]
async fn test_forfeit_propagates_present_player() {
    let (_store, svc) = setup();
    create(&svc, &[(10, StageKind::SingleElimination)]).await;
    svc.generate_bracket(10, &entrants(4), BracketOptions::default())
        .await
        .unwrap();

    let m = svc.forfeit_match(10, MatchId(1), p(3)).await.unwrap();
    assert_eq!(m.status, MatchStatus::Walkover);
    assert_eq!(m.winner, Some(p(4)));

    let structure = svc.structure(10).await.unwrap();
    let final_match = structure
        .get(structure.brackets[0].final_match)
        .unwrap();
    assert!(final_match.contains(p(4)));
}

#[tokio::test]
async fn test_concurrent_results_on_one_stage() {
    let (_store, svc) = setup();
    create(&svc, &[(10, StageKind::SingleElimination)]).await;
    svc.generate_bracket(10, &entrants(4), BracketOptions::default())
        .await
        .unwrap();
    let svc = Arc::new(svc);

    let tasks: Vec<_> = [MatchId(0), MatchId(1)]
        .into_iter()
        .map(|id| {
            let svc = svc.clone();
            tokio::spawn(async move { svc.enter_result(10, id, Score::new(3, 1)).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let structure = svc.structure(10).await.unwrap();
    let final_match = structure
        .get(structure.brackets[0].final_match)
        .unwrap();
    assert!(final_match.contains(p(1)) && final_match.contains(p(3)));
    assert_eq!(final_match.status, MatchStatus::Ready);
}

// ── Groups ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_group_phase_generates_playoff() {
    let (_store, svc) = setup();
    create(&svc, &[(10, StageKind::GroupThenPlayoff)]).await;
    let mut rx = svc.events().subscribe();
    let structure = svc
        .generate_groups(10, &entrants(8), 2, BracketOptions::default())
        .await
        .unwrap();
    // Two groups of four: six matches each.
    assert_eq!(structure.groups.len(), 2);
    assert_eq!(structure.matches.len(), 12);

    let group_matches = play(&svc, 10, |m| m.group().is_some(), favourite_wins).await;
    assert_eq!(group_matches, 12);

    let events = drain(&mut rx);
    let [CoreEvent::StageAdvanced {
        stage_id,
        qualifiers,
        ..
    }] = events.as_slice()
    else {
        panic!("expected one stage advancement, got {events:?}");
    };
    assert_eq!(*stage_id, 10);
    assert_eq!(&qualifiers[..2], &[p(1), p(2)]);
    let mut sorted = qualifiers.clone();
    sorted.sort();
    assert_eq!(sorted, vec![p(1), p(2), p(3), p(4)]);

    // Group results are frozen once the playoff exists.
    let err = svc
        .enter_result(10, MatchId(0), Score::new(0, 3))
        .await
        .unwrap_err();
    assert_eq!(err.conflict(), Some(&Conflict::GroupsLocked));

    let standings = svc.group_standings(10, 0).await.unwrap();
    assert_eq!(standings[0].participant, p(1));
    assert_eq!(standings[0].points, 9);

    assert_eq!(play_all(&svc, 10).await, 3);
    assert_eq!(
        drain(&mut rx),
        vec![CoreEvent::TournamentCompleted {
            tournament_id: 1,
            champion: Some(p(1)),
        }]
    );
}

#[tokio::test]
async fn test_round_robin_promotes_into_next_stage() {
    let (store, svc) = setup();
    create(
        &svc,
        &[(10, StageKind::RoundRobin), (11, StageKind::SingleElimination)],
    )
    .await;
    let mut rx = svc.events().subscribe();
    svc.generate_groups(10, &entrants(4), 1, BracketOptions::default())
        .await
        .unwrap();

    assert_eq!(play_all(&svc, 10).await, 6);
    assert_eq!(
        drain(&mut rx),
        vec![CoreEvent::StageAdvanced {
            tournament_id: 1,
            stage_id: 11,
            qualifiers: vec![p(1), p(2)],
        }]
    );
    assert_eq!(
        store.stage(10).await.unwrap().unwrap().status,
        StageStatus::Completed
    );
    assert_eq!(
        store.stage(11).await.unwrap().unwrap().status,
        StageStatus::Running
    );

    let final_match = svc.structure(11).await.unwrap().matches[0].clone();
    assert!(final_match.contains(p(1)) && final_match.contains(p(2)));
    assert_eq!(final_match.status, MatchStatus::Ready);

    assert_eq!(play_all(&svc, 11).await, 1);
    assert_eq!(
        drain(&mut rx),
        vec![CoreEvent::TournamentCompleted {
            tournament_id: 1,
            champion: Some(p(1)),
        }]
    );
}

#[tokio::test]
async fn test_group_layout_must_fit_bounds() {
    let (_store, svc) = setup();
    create(&svc, &[(10, StageKind::GroupThenPlayoff)]).await;
    // Four groups of two cannot advance two per group.
    let err = svc
        .generate_groups(10, &entrants(8), 4, BracketOptions::default())
        .await
        .unwrap_err();
    assert!(!err.to_string().is_empty());
    assert!(svc.structure(10).await.unwrap().is_empty());
}
