//! End-to-end match recording against every store backend

use proptest::prelude::*;
use rating_ladder::amqp::handlers::{process_delivery, MessageHandler, Settlement};
use rating_ladder::amqp::publisher::MockEventPublisher;
use rating_ladder::error::{MatchSide, RecordMatchError, ValidationError};
use rating_ladder::ladder::MatchRecorder;
use rating_ladder::metrics::MetricsCollector;
use rating_ladder::service::LadderMessageHandler;
use rating_ladder::storage::MatchStore;
use rating_ladder::types::{MatchReport, PlayerId};
use std::sync::Arc;

use crate::fixtures::{
    all_stores_with, memory_store_with, replay_ratings, FailurePoint, FaultyMatchStore,
    UnreachablePublisher,
};

fn report(p1: i64, p2: i64, winner: i64) -> MatchReport {
    MatchReport::new(PlayerId::new(p1), PlayerId::new(p2), PlayerId::new(winner))
}

/// Every player still at the initial state and no match stored
async fn assert_untouched(store: &dyn MatchStore, backend: &str) {
    for player in store.list_players().await.unwrap() {
        assert_eq!(player.rating, 1500, "{}: {}", backend, player.username);
        assert_eq!(player.matches_played, 0, "{}: {}", backend, player.username);
        assert_eq!(player.wins, 0, "{}: {}", backend, player.username);
        assert!(player.last_match_at.is_none());
    }
    assert!(store.recent_matches(100).await.unwrap().is_empty(), "{}", backend);
    assert!(store.ranking(100).await.unwrap().is_empty(), "{}", backend);
}

#[tokio::test]
async fn test_complete_match_lifecycle() {
    for (backend, store) in all_stores_with(&["alice", "bob"]).await {
        let recorder = MatchRecorder::new(store.clone());

        let record = recorder.record_match(&report(1, 2, 1)).await.unwrap();
        assert_eq!(
            (record.player1_rating_after, record.player2_rating_after),
            (1516, 1484),
            "{}",
            backend
        );
        assert_eq!(record.winner.username, "alice");

        let alice = store.get_player(PlayerId::new(1)).await.unwrap().unwrap();
        let bob = store.get_player(PlayerId::new(2)).await.unwrap().unwrap();
        assert_eq!((alice.rating, alice.matches_played, alice.wins), (1516, 1, 1));
        assert_eq!((bob.rating, bob.matches_played, bob.wins), (1484, 1, 0));
        assert!(alice.last_match_at.is_some());

        let stored = store.get_match(record.id).await.unwrap().unwrap();
        assert_eq!(stored.id, record.id);
        assert_eq!(stored.player2.username, "bob");
        assert_eq!(stored.player1_rating_after, 1516);

        let ranking = store.ranking(10).await.unwrap();
        let names: Vec<&str> = ranking.iter().map(|p| p.username.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"], "{}", backend);

        println!("✅ {} backend recorded the full match lifecycle", backend);
    }
}

#[tokio::test]
async fn test_refused_reports_touch_nothing() {
    for (backend, store) in all_stores_with(&["alice", "bob", "carol"]).await {
        let recorder = MatchRecorder::new(store.clone());

        let cases = [
            (MatchReport::default(), ValidationError::MissingParameters),
            (report(2, 2, 2), ValidationError::SelfMatch),
            (report(1, 2, 3), ValidationError::WinnerNotParticipant),
        ];
        for (bad_report, expected) in cases {
            match recorder.record_match(&bad_report).await {
                Err(RecordMatchError::Validation(found)) => assert_eq!(found, expected),
                other => panic!("{}: expected {:?}, got {:?}", backend, expected, other),
            }
        }

        let err = recorder.record_match(&report(1, 999, 999)).await.unwrap_err();
        assert!(matches!(
            err,
            RecordMatchError::PlayerNotFound {
                side: MatchSide::Player2,
                ..
            }
        ));

        let err = recorder.record_match(&report(998, 999, 998)).await.unwrap_err();
        assert!(matches!(
            err,
            RecordMatchError::PlayerNotFound {
                side: MatchSide::Player1,
                ..
            }
        ));

        assert_untouched(store.as_ref(), backend).await;
    }
}

#[tokio::test]
async fn test_injected_failures_roll_back_everything() {
    let failure_points = [
        FailurePoint::Begin,
        FailurePoint::InsertMatch,
        FailurePoint::UpdatePlayer(1),
        FailurePoint::UpdatePlayer(2),
        FailurePoint::Commit,
    ];

    for fail_at in failure_points {
        for (backend, store) in all_stores_with(&["alice", "bob"]).await {
            let faulty = Arc::new(FaultyMatchStore::new(store.clone(), fail_at));
            let recorder = MatchRecorder::new(faulty.clone());

            let err = recorder.record_match(&report(1, 2, 2)).await.unwrap_err();
            assert!(
                matches!(err, RecordMatchError::Persistence(_)),
                "{} at {:?}: {}",
                backend,
                fail_at,
                err
            );
            assert!(err.is_retryable());

            let expected_rollbacks = match fail_at {
                FailurePoint::InsertMatch | FailurePoint::UpdatePlayer(_) => 1,
                FailurePoint::Begin | FailurePoint::Commit => 0,
            };
            assert_eq!(faulty.rollbacks(), expected_rollbacks, "{:?}", fail_at);

            assert_untouched(store.as_ref(), backend).await;

            // The same report succeeds once storage recovers
            let record = MatchRecorder::new(store.clone())
                .record_match(&report(1, 2, 2))
                .await
                .unwrap();
            assert_eq!(record.player2_rating_after, 1516);
            assert_eq!(store.recent_matches(10).await.unwrap().len(), 1);
        }
    }
}

#[tokio::test]
async fn test_history_replays_to_current_ratings() {
    let sequence = [
        (1, 2, 1),
        (2, 3, 3),
        (3, 1, 3),
        (1, 2, 2),
        (4, 1, 4),
        (2, 4, 2),
        (3, 4, 3),
    ];

    for (backend, store) in all_stores_with(&["alice", "bob", "carol", "dave"]).await {
        let recorder = MatchRecorder::new(store.clone());
        for (p1, p2, winner) in sequence {
            recorder.record_match(&report(p1, p2, winner)).await.unwrap();
        }

        let history = store.recent_matches(100).await.unwrap();
        assert_eq!(history.len(), sequence.len());
        assert!(history.windows(2).all(|pair| pair[0].id > pair[1].id));

        let replayed = replay_ratings(&history);
        for player in store.list_players().await.unwrap() {
            assert_eq!(replayed[&player.id], player.rating, "{}", backend);

            let played = store.matches_for_player(player.id, 100).await.unwrap();
            let wins = played.iter().filter(|m| m.winner_id == player.id).count();
            assert_eq!(played.len(), player.matches_played as usize);
            assert_eq!(wins, player.wins as usize);
        }
    }
}

#[tokio::test]
async fn test_delivery_settlement_end_to_end() {
    let store = memory_store_with(&["alice", "bob"]).await;
    let metrics = Arc::new(MetricsCollector::new().unwrap());
    let publisher = Arc::new(MockEventPublisher::new());
    let handler = LadderMessageHandler::new(
        MatchRecorder::with_metrics(store.clone(), metrics.clone()),
        publisher.clone(),
        metrics,
    );

    let body = br#"{"player1_id":1,"player2_id":2,"winner_id":2}"#;
    assert_eq!(process_delivery(&handler, body, false).await, Settlement::Ack);
    assert_eq!(publisher.recorded_events().len(), 1);

    // Refused reports are acknowledged and announced
    let body = br#"{"player1_id":1,"player2_id":1,"winner_id":1}"#;
    assert_eq!(process_delivery(&handler, body, false).await, Settlement::Ack);
    assert_eq!(publisher.rejected_events()[0].kind, "validation");

    let body = br#"{"player1_id":1}"#;
    assert_eq!(process_delivery(&handler, body, true).await, Settlement::Ack);
    assert_eq!(publisher.rejected_events()[1].reason, "validation failed: missing parameters");

    // A negative id is an unknown player, not a missing one
    let body = br#"{"player1_id":1,"player2_id":-5,"winner_id":1}"#;
    assert_eq!(process_delivery(&handler, body, false).await, Settlement::Ack);
    assert_eq!(publisher.rejected_events()[2].kind, "not_found");

    assert_eq!(process_delivery(&handler, b"\x00\x01", false).await, Settlement::Reject);

    let bob = store.get_player(PlayerId::new(2)).await.unwrap().unwrap();
    assert_eq!(bob.matches_played, 1);
}

#[tokio::test]
async fn test_persistence_failure_is_requeued_once() {
    let store = memory_store_with(&["alice", "bob"]).await;
    let faulty = Arc::new(FaultyMatchStore::new(store.clone(), FailurePoint::Commit));
    let metrics = Arc::new(MetricsCollector::new().unwrap());
    let publisher = Arc::new(MockEventPublisher::new());
    let handler = LadderMessageHandler::new(
        MatchRecorder::with_metrics(faulty, metrics.clone()),
        publisher.clone(),
        metrics,
    );

    let body = br#"{"player1_id":1,"player2_id":2,"winner_id":1}"#;
    assert_eq!(process_delivery(&handler, body, false).await, Settlement::Requeue);
    assert_eq!(process_delivery(&handler, body, true).await, Settlement::Reject);

    // Nothing to announce while the outcome is undecided
    assert!(publisher.recorded_events().is_empty());
    assert!(publisher.rejected_events().is_empty());
    assert!(store.recent_matches(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_broker_does_not_undo_commit() {
    let store = memory_store_with(&["alice", "bob"]).await;
    let metrics = Arc::new(MetricsCollector::new().unwrap());
    let publisher = Arc::new(UnreachablePublisher::new());
    let handler = LadderMessageHandler::new(
        MatchRecorder::with_metrics(store.clone(), metrics.clone()),
        publisher.clone(),
        metrics.clone(),
    );

    let record = handler.handle_match_report(report(1, 2, 1)).await.unwrap();

    assert_eq!(publisher.attempts(), 1);
    assert_eq!(store.get_match(record.id).await.unwrap().unwrap().id, record.id);
    assert_eq!(
        metrics
            .service()
            .amqp_errors_total
            .with_label_values(&["publish"])
            .get(),
        1
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_random_histories_stay_consistent(
        games in prop::collection::vec((1i64..=4, 1i64..=4, any::<bool>()), 1..40)
    ) {
        tokio_test::block_on(async {
            let store = memory_store_with(&["a", "b", "c", "d"]).await;
            let recorder = MatchRecorder::new(store.clone());

            let mut committed = 0;
            for (p1, p2, first_wins) in games {
                let winner = if first_wins { p1 } else { p2 };
                match recorder.record_match(&report(p1, p2, winner)).await {
                    Ok(_) => committed += 1,
                    Err(RecordMatchError::Validation(ValidationError::SelfMatch)) => {
                        assert_eq!(p1, p2);
                    }
                    Err(other) => panic!("unexpected error: {}", other),
                }
            }

            let history = store.recent_matches(100).await.unwrap();
            assert_eq!(history.len(), committed);

            let replayed = replay_ratings(&history);
            let players = store.list_players().await.unwrap();
            let total_played: u32 = players.iter().map(|p| p.matches_played).sum();
            let total_wins: u32 = players.iter().map(|p| p.wins).sum();
            assert_eq!(total_played as usize, 2 * committed);
            assert_eq!(total_wins as usize, committed);

            for player in players {
                let expected = replayed.get(&player.id).copied().unwrap_or(1500);
                assert_eq!(player.rating, expected);
            }
        });
    }
}
