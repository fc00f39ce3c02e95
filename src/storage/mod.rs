//! Persistence interface for players and matches
//!
//! The match recorder never writes rows directly: it opens a [`UnitOfWork`]
//! covering both participants, stages one match insert and two player
//! updates through it, and then commits or rolls back the whole unit.
//! Dropping a unit of work without committing discards everything it staged.

pub mod memory;
pub mod sqlite;

use crate::error::StorageError;
use crate::types::{MatchId, MatchRecord, Player, PlayerId, Rating};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

// Re-export commonly used types
pub use memory::InMemoryMatchStore;
pub use sqlite::SqliteMatchStore;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Participant state as read inside a unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub username: String,
    pub rating: Rating,
}

/// Match row staged for insertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMatch {
    pub player1_id: PlayerId,
    pub player2_id: PlayerId,
    pub winner_id: PlayerId,
    pub player1_rating_before: Rating,
    pub player1_rating_after: Rating,
    pub player2_rating_before: Rating,
    pub player2_rating_after: Rating,
}

/// Identity and creation time assigned to a staged match
///
/// Ids increase with `created_at` across the whole store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedMatch {
    pub id: MatchId,
    pub created_at: DateTime<Utc>,
}

/// One isolated, all-or-nothing set of writes
#[async_trait]
pub trait UnitOfWork: Send {
    /// Read a participant's current state, including writes staged in this unit
    async fn get_player(&mut self, player_id: PlayerId) -> StorageResult<Option<PlayerSnapshot>>;

    /// Stage a match row, stamping its id and creation time together
    async fn insert_match(&mut self, new_match: &NewMatch) -> StorageResult<StagedMatch>;

    /// Stage a player's post-match aggregates: new rating, one more match,
    /// one more win if `is_winner`, and `played_at` as the last match time
    async fn update_player_after_match(
        &mut self,
        player_id: PlayerId,
        new_rating: Rating,
        is_winner: bool,
        played_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Make every staged write visible at once
    async fn commit(self: Box<Self>) -> StorageResult<()>;

    /// Discard every staged write
    async fn rollback(self: Box<Self>) -> StorageResult<()>;
}

/// Store of players and their match history
///
/// Read operations observe committed state only.
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Open a unit of work that serializes against any other unit touching
    /// either participant
    async fn begin(&self, participants: [PlayerId; 2]) -> StorageResult<Box<dyn UnitOfWork>>;

    /// Register a new player with the initial rating
    async fn create_player(&self, username: &str) -> StorageResult<Player>;

    /// Get a single player
    async fn get_player(&self, player_id: PlayerId) -> StorageResult<Option<Player>>;

    /// All players, highest rating first
    async fn list_players(&self) -> StorageResult<Vec<Player>>;

    /// Players with at least one match, highest rating first
    async fn ranking(&self, limit: usize) -> StorageResult<Vec<Player>>;

    /// Most recent matches, newest first
    async fn recent_matches(&self, limit: usize) -> StorageResult<Vec<MatchRecord>>;

    /// Most recent matches involving one player, newest first
    async fn matches_for_player(
        &self,
        player_id: PlayerId,
        limit: usize,
    ) -> StorageResult<Vec<MatchRecord>>;

    /// Get a single match
    async fn get_match(&self, match_id: MatchId) -> StorageResult<Option<MatchRecord>>;

    /// Total number of registered players
    async fn player_count(&self) -> StorageResult<usize>;
}

/// Participants of a unit of work in lock order, without duplicates
pub(crate) fn lock_order(participants: [PlayerId; 2]) -> Vec<PlayerId> {
    let mut ids = participants.to_vec();
    ids.sort();
    ids.dedup();
    ids
}
