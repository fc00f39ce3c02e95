//! Rating Ladder - match recording and Elo ratings for head-to-head play
//!
//! This crate records two-player match results atomically, updates both
//! players' Elo ratings in the same transaction, and exposes the ladder
//! through an AMQP intake, a health/metrics server and an operator CLI.

pub mod amqp;
pub mod config;
pub mod error;
pub mod ladder;
pub mod metrics;
pub mod rating;
pub mod service;
pub mod storage;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{LadderError, RecordMatchError, Result, StorageError, ValidationError};
pub use types::*;

// Re-export key components
pub use amqp::publisher::EventPublisher;
pub use ladder::MatchRecorder;
pub use storage::{InMemoryMatchStore, MatchStore, SqliteMatchStore, UnitOfWork};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
