//! Common types used throughout the rating ladder service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer skill estimate. Signed: ratings are never clamped.
pub type Rating = i64;

/// Unique identifier for players, assigned by the store at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(i64);

impl PlayerId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for PlayerId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Unique identifier for matches, increasing in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(i64);

impl MatchId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MatchId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A registered player and their aggregate statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub username: String,
    pub rating: Rating,
    pub matches_played: u32,
    pub wins: u32,
    pub last_match_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Id and username pair used to denormalize match responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRef {
    pub id: PlayerId,
    pub username: String,
}

/// A committed match, hydrated with participant usernames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: MatchId,
    pub player1_id: PlayerId,
    pub player2_id: PlayerId,
    pub winner_id: PlayerId,
    pub player1_rating_before: Rating,
    pub player1_rating_after: Rating,
    pub player2_rating_before: Rating,
    pub player2_rating_after: Rating,
    pub created_at: DateTime<Utc>,
    pub player1: PlayerRef,
    pub player2: PlayerRef,
    pub winner: PlayerRef,
}

impl MatchRecord {
    /// Rating change applied to player 1
    pub fn player1_delta(&self) -> Rating {
        self.player1_rating_after - self.player1_rating_before
    }

    /// Rating change applied to player 2
    pub fn player2_delta(&self) -> Rating {
        self.player2_rating_after - self.player2_rating_before
    }

    /// Whether the given player took part in this match
    pub fn involves(&self, player_id: PlayerId) -> bool {
        self.player1_id == player_id || self.player2_id == player_id
    }

    /// Rating the given player ended this match with
    pub fn rating_after_for(&self, player_id: PlayerId) -> Option<Rating> {
        if self.player1_id == player_id {
            Some(self.player1_rating_after)
        } else if self.player2_id == player_id {
            Some(self.player2_rating_after)
        } else {
            None
        }
    }
}

/// An as-yet unvalidated match outcome submitted by a caller
///
/// Every field is optional because reports arrive from untrusted transports;
/// the recorder rejects incomplete reports before touching the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchReport {
    #[serde(default)]
    pub player1_id: Option<PlayerId>,
    #[serde(default)]
    pub player2_id: Option<PlayerId>,
    #[serde(default)]
    pub winner_id: Option<PlayerId>,
}

impl MatchReport {
    pub fn new(player1_id: PlayerId, player2_id: PlayerId, winner_id: PlayerId) -> Self {
        Self {
            player1_id: Some(player1_id),
            player2_id: Some(player2_id),
            winner_id: Some(winner_id),
        }
    }
}

/// AMQP Message Types
/// Event emitted after a match has been committed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecorded {
    pub match_record: MatchRecord,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a report is permanently refused
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRejected {
    pub report: MatchReport,
    /// Failure class: validation, not_found or persistence
    pub kind: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Union type for all AMQP messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AmqpMessage {
    MatchReport(MatchReport),
    MatchRecorded(MatchRecorded),
    MatchRejected(MatchRejected),
}
