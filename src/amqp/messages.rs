//! AMQP message definitions and serialization

use crate::error::{LadderError, Result};
use crate::types::*;
use crate::utils::{current_timestamp, generate_correlation_id};

/// Durable queue carrying incoming match reports
pub const MATCH_REPORT_QUEUE: &str = "ladder.match_reports";

/// Topic exchange for match outcome events
pub const MATCH_EVENTS_EXCHANGE: &str = "ladder.match_events";

/// Routing keys
pub const MATCH_REPORT_ROUTING_KEY: &str = "match.report";
pub const MATCH_RECORDED_ROUTING_KEY: &str = "match.recorded";
pub const MATCH_REJECTED_ROUTING_KEY: &str = "match.rejected";

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    /// Create a new message envelope
    pub fn new(payload: T, routing_key: impl Into<String>) -> Self {
        Self {
            payload,
            correlation_id: generate_correlation_id(),
            timestamp: current_timestamp(),
            routing_key: routing_key.into(),
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            LadderError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            LadderError::InvalidMatchReport {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Message serialization utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Serialize a match report to bytes
    pub fn serialize_match_report(report: &MatchReport) -> Result<Vec<u8>> {
        Self::serialize_message(report)
    }

    /// Deserialize a match report from bytes
    ///
    /// Any JSON object is accepted; absent ids are left for the recorder to
    /// reject so that the rejection is reported like any other.
    pub fn deserialize_match_report(bytes: &[u8]) -> Result<MatchReport> {
        serde_json::from_slice(bytes).map_err(|e| {
            LadderError::InvalidMatchReport {
                reason: format!("Failed to deserialize match report: {}", e),
            }
            .into()
        })
    }

    /// Serialize any AMQP message to bytes
    pub fn serialize_message<T: serde::Serialize>(message: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| {
            LadderError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Get routing key for a message type
    pub fn get_routing_key(message: &AmqpMessage) -> &'static str {
        match message {
            AmqpMessage::MatchReport(_) => MATCH_REPORT_ROUTING_KEY,
            AmqpMessage::MatchRecorded(_) => MATCH_RECORDED_ROUTING_KEY,
            AmqpMessage::MatchRejected(_) => MATCH_REJECTED_ROUTING_KEY,
        }
    }
}
