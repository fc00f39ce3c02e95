//! Error types for the rating ladder service
//!
//! Service plumbing uses anyhow for consistent error handling, while the
//! match-recording core reports a closed, typed taxonomy so callers can map
//! each failure onto their own transport (HTTP status, AMQP ack/nack, CLI exit).

use crate::types::PlayerId;
use std::fmt;

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Service-level error types
#[derive(Debug, thiserror::Error)]
pub enum LadderError {
    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Invalid match report: {reason}")]
    InvalidMatchReport { reason: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

/// Which side of a match report an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSide {
    Player1,
    Player2,
}

impl fmt::Display for MatchSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchSide::Player1 => write!(f, "player 1"),
            MatchSide::Player2 => write!(f, "player 2"),
        }
    }
}

/// Malformed or self-contradictory match report, detected before any lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing parameters")]
    MissingParameters,

    #[error("self-match")]
    SelfMatch,

    #[error("winner not a participant")]
    WinnerNotParticipant,
}

/// Failures raised by a persistence backend
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("username already taken: {username}")]
    DuplicateUsername { username: String },

    #[error("username cannot be empty")]
    EmptyUsername,

    #[error("player {player_id} is not part of this unit of work")]
    UnknownPlayer { player_id: PlayerId },

    #[error("failed to acquire {what} lock")]
    LockPoisoned { what: &'static str },

    #[error("storage failure: {message}")]
    Backend { message: String },
}

/// Every way `record_match` can fail
///
/// Validation and not-found failures perform no mutation at all. A
/// persistence failure is reported only after the unit of work has been
/// rolled back, so the whole call may be retried.
#[derive(Debug, thiserror::Error)]
pub enum RecordMatchError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("{side} not found: {player_id}")]
    PlayerNotFound { side: MatchSide, player_id: PlayerId },

    #[error("persistence failed: {0}")]
    Persistence(#[from] StorageError),
}

impl RecordMatchError {
    /// Short label used for metrics and event payloads
    pub fn kind(&self) -> &'static str {
        match self {
            RecordMatchError::Validation(_) => "validation",
            RecordMatchError::PlayerNotFound { .. } => "not_found",
            RecordMatchError::Persistence(_) => "persistence",
        }
    }

    /// Whether resubmitting the identical report can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, RecordMatchError::Persistence(_))
    }
}
