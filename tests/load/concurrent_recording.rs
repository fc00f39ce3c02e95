//! Concurrency tests for match recording
//!
//! Many reports touching the same players are recorded at once; every one
//! must commit, and the final ratings must be exactly what a serial replay
//! of the committed history produces.

use futures::future::join_all;
use rating_ladder::ladder::MatchRecorder;
use rating_ladder::storage::{MatchStore, SqliteMatchStore};
use rating_ladder::types::{MatchReport, PlayerId};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::fixtures::{memory_store_with, replay_ratings};

const OPPONENTS: i64 = 24;

fn names(count: i64) -> Vec<String> {
    (1..=count).map(|i| format!("player_{:02}", i)).collect()
}

async fn seed(store: &dyn MatchStore, count: i64) {
    for name in names(count) {
        store.create_player(&name).await.unwrap();
    }
}

/// Player 1 plays every other player concurrently, winning every other game
async fn hub_and_spokes(store: Arc<dyn MatchStore>) {
    let recorder = MatchRecorder::new(store.clone());
    let hub = PlayerId::new(1);

    let start = Instant::now();
    let tasks = (2..=OPPONENTS + 1).map(|opponent| {
        let recorder = recorder.clone();
        tokio::spawn(async move {
            let opponent = PlayerId::new(opponent);
            let winner = if opponent.get() % 2 == 0 { hub } else { opponent };
            recorder
                .record_match(&MatchReport::new(hub, opponent, winner))
                .await
        })
    });

    let results = join_all(tasks).await;
    let elapsed = start.elapsed();

    for result in &results {
        assert!(result.as_ref().unwrap().is_ok(), "{:?}", result);
    }

    let hub_player = store.get_player(hub).await.unwrap().unwrap();
    assert_eq!(hub_player.matches_played, OPPONENTS as u32);
    assert_eq!(hub_player.wins, (OPPONENTS / 2) as u32);

    let history = store.recent_matches(1000).await.unwrap();
    assert_eq!(history.len(), OPPONENTS as usize);

    let replayed = replay_ratings(&history);
    for player in store.list_players().await.unwrap() {
        assert_eq!(replayed[&player.id], player.rating, "{}", player.username);
    }

    println!(
        "✅ {} concurrent matches against one player recorded in {:?}",
        OPPONENTS, elapsed
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_player_in_memory() {
    let names = names(OPPONENTS + 1);
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    let store = memory_store_with(&names).await;

    hub_and_spokes(store).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_player_in_sqlite_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteMatchStore::open_path(&dir.path().join("ladder.db"), 4)
        .await
        .unwrap();
    seed(&store, OPPONENTS + 1).await;

    hub_and_spokes(Arc::new(store)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_pairs_stay_consistent() {
    const PLAYERS: i64 = 6;
    const ROUNDS: usize = 60;

    let names = names(PLAYERS);
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    let store = memory_store_with(&names).await;
    let recorder = MatchRecorder::new(store.clone());

    // Deterministic pairings that overlap heavily
    let reports: Vec<MatchReport> = (0..ROUNDS)
        .map(|round| {
            let p1 = (round as i64 % PLAYERS) + 1;
            let p2 = ((round as i64 * 5 + 1) % PLAYERS) + 1;
            let p2 = if p2 == p1 { p1 % PLAYERS + 1 } else { p2 };
            let winner = if round % 3 == 0 { p2 } else { p1 };
            MatchReport::new(PlayerId::new(p1), PlayerId::new(p2), PlayerId::new(winner))
        })
        .collect();

    let tasks = reports.into_iter().map(|report| {
        let recorder = recorder.clone();
        tokio::spawn(async move { recorder.record_match(&report).await })
    });

    let outcomes = tokio::time::timeout(Duration::from_secs(30), join_all(tasks))
        .await
        .expect("concurrent recording deadlocked");
    assert!(outcomes.iter().all(|o| matches!(o, Ok(Ok(_)))));

    let history = store.recent_matches(1000).await.unwrap();
    assert_eq!(history.len(), ROUNDS);

    let replayed = replay_ratings(&history);
    let players = store.list_players().await.unwrap();
    let total_played: u32 = players.iter().map(|p| p.matches_played).sum();
    assert_eq!(total_played as usize, 2 * ROUNDS);

    for player in players {
        assert_eq!(replayed[&player.id], player.rating, "{}", player.username);
    }
}
