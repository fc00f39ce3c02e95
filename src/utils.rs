//! Utility functions for the rating ladder service

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new correlation id for outbound events
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Normalize a username for storage, returning None if nothing is left
pub fn normalize_username(username: &str) -> Option<String> {
    let trimmed = username.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
