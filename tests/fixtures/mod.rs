//! Test fixtures and fault-injecting implementations for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rating_ladder::amqp::publisher::EventPublisher;
use rating_ladder::error::{LadderError, Result, StorageError};
use rating_ladder::storage::{
    InMemoryMatchStore, MatchStore, NewMatch, PlayerSnapshot, SqliteMatchStore, StagedMatch,
    StorageResult, UnitOfWork,
};
use rating_ladder::types::{
    MatchId, MatchRecord, MatchRecorded, MatchRejected, Player, PlayerId, Rating,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// In-memory store with the given players registered in order (ids 1..=n)
pub async fn memory_store_with(names: &[&str]) -> Arc<InMemoryMatchStore> {
    let store = Arc::new(InMemoryMatchStore::new());
    for name in names {
        store.create_player(name).await.unwrap();
    }
    store
}

/// In-memory SQLite store with the given players registered in order (ids 1..=n)
pub async fn sqlite_store_with(names: &[&str]) -> Arc<SqliteMatchStore> {
    let store = Arc::new(SqliteMatchStore::memory().await.unwrap());
    for name in names {
        store.create_player(name).await.unwrap();
    }
    store
}

/// Both backends, seeded with the same players
pub async fn all_stores_with(names: &[&str]) -> Vec<(&'static str, Arc<dyn MatchStore>)> {
    vec![
        ("memory", memory_store_with(names).await as Arc<dyn MatchStore>),
        ("sqlite", sqlite_store_with(names).await as Arc<dyn MatchStore>),
    ]
}

/// Step of a unit of work at which an injected failure fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    Begin,
    InsertMatch,
    /// The n-th player update of the unit, starting at 1
    UpdatePlayer(usize),
    Commit,
}

/// Store wrapper that fails one step of every unit of work
pub struct FaultyMatchStore {
    inner: Arc<dyn MatchStore>,
    fail_at: FailurePoint,
    rollbacks: Arc<AtomicUsize>,
}

impl FaultyMatchStore {
    pub fn new(inner: Arc<dyn MatchStore>, fail_at: FailurePoint) -> Self {
        Self {
            inner,
            fail_at,
            rollbacks: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Explicit rollbacks requested by the caller so far
    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

fn injected(step: &str) -> StorageError {
    StorageError::Backend {
        message: format!("injected failure at {}", step),
    }
}

#[async_trait]
impl MatchStore for FaultyMatchStore {
    async fn begin(&self, participants: [PlayerId; 2]) -> StorageResult<Box<dyn UnitOfWork>> {
        if self.fail_at == FailurePoint::Begin {
            return Err(injected("begin"));
        }
        Ok(Box::new(FaultyUnitOfWork {
            inner: self.inner.begin(participants).await?,
            fail_at: self.fail_at,
            updates: 0,
            rollbacks: self.rollbacks.clone(),
        }))
    }

    async fn create_player(&self, username: &str) -> StorageResult<Player> {
        self.inner.create_player(username).await
    }

    async fn get_player(&self, player_id: PlayerId) -> StorageResult<Option<Player>> {
        self.inner.get_player(player_id).await
    }

    async fn list_players(&self) -> StorageResult<Vec<Player>> {
        self.inner.list_players().await
    }

    async fn ranking(&self, limit: usize) -> StorageResult<Vec<Player>> {
        self.inner.ranking(limit).await
    }

    async fn recent_matches(&self, limit: usize) -> StorageResult<Vec<MatchRecord>> {
        self.inner.recent_matches(limit).await
    }

    async fn matches_for_player(
        &self,
        player_id: PlayerId,
        limit: usize,
    ) -> StorageResult<Vec<MatchRecord>> {
        self.inner.matches_for_player(player_id, limit).await
    }

    async fn get_match(&self, match_id: MatchId) -> StorageResult<Option<MatchRecord>> {
        self.inner.get_match(match_id).await
    }

    async fn player_count(&self) -> StorageResult<usize> {
        self.inner.player_count().await
    }
}

struct FaultyUnitOfWork {
    inner: Box<dyn UnitOfWork>,
    fail_at: FailurePoint,
    updates: usize,
    rollbacks: Arc<AtomicUsize>,
}

#[async_trait]
impl UnitOfWork for FaultyUnitOfWork {
    async fn get_player(&mut self, player_id: PlayerId) -> StorageResult<Option<PlayerSnapshot>> {
        self.inner.get_player(player_id).await
    }

    async fn insert_match(&mut self, new_match: &NewMatch) -> StorageResult<StagedMatch> {
        if self.fail_at == FailurePoint::InsertMatch {
            return Err(injected("insert_match"));
        }
        self.inner.insert_match(new_match).await
    }

    async fn update_player_after_match(
        &mut self,
        player_id: PlayerId,
        new_rating: Rating,
        is_winner: bool,
        played_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.updates += 1;
        if self.fail_at == FailurePoint::UpdatePlayer(self.updates) {
            return Err(injected("update_player_after_match"));
        }
        self.inner
            .update_player_after_match(player_id, new_rating, is_winner, played_at)
            .await
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        if self.fail_at == FailurePoint::Commit {
            // Dropping the inner unit discards its staged writes
            return Err(injected("commit"));
        }
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.inner.rollback().await
    }
}

/// Event publisher whose every publish fails
#[derive(Debug, Default)]
pub struct UnreachablePublisher {
    attempts: AtomicUsize,
}

impl UnreachablePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventPublisher for UnreachablePublisher {
    async fn publish_match_recorded(&self, _event: MatchRecorded) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(LadderError::AmqpConnectionFailed {
            message: "broker unreachable".to_string(),
        }
        .into())
    }

    async fn publish_match_rejected(&self, _event: MatchRejected) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(LadderError::AmqpConnectionFailed {
            message: "broker unreachable".to_string(),
        }
        .into())
    }
}

/// Replay a match history in id order from initial ratings, returning the
/// final rating of every player that appears in it
pub fn replay_ratings(history: &[MatchRecord]) -> std::collections::BTreeMap<PlayerId, Rating> {
    let mut ordered: Vec<&MatchRecord> = history.iter().collect();
    ordered.sort_by_key(|record| record.id);

    let mut ratings = std::collections::BTreeMap::new();
    for record in ordered {
        let r1 = *ratings
            .entry(record.player1_id)
            .or_insert(rating_ladder::rating::INITIAL_RATING);
        let r2 = *ratings
            .entry(record.player2_id)
            .or_insert(rating_ladder::rating::INITIAL_RATING);

        assert_eq!(record.player1_rating_before, r1, "match {} before", record.id);
        assert_eq!(record.player2_rating_before, r2, "match {} before", record.id);

        let (new1, new2) = rating_ladder::rating::compute_new_ratings(
            r1,
            r2,
            record.winner_id == record.player1_id,
        );
        assert_eq!(record.player1_rating_after, new1, "match {} after", record.id);
        assert_eq!(record.player2_rating_after, new2, "match {} after", record.id);

        ratings.insert(record.player1_id, new1);
        ratings.insert(record.player2_id, new2);
    }
    ratings
}
