//! AMQP event publisher for outbound match events

use crate::amqp::messages::{
    MessageEnvelope, MATCH_EVENTS_EXCHANGE, MATCH_RECORDED_ROUTING_KEY,
    MATCH_REJECTED_ROUTING_KEY,
};
use crate::error::{LadderError, Result};
use crate::types::*;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Trait for publishing match events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a MatchRecorded event
    async fn publish_match_recorded(&self, event: MatchRecorded) -> Result<()>;

    /// Publish a MatchRejected event
    async fn publish_match_rejected(&self, event: MatchRejected) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange_name: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange_name: MATCH_EVENTS_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
}

impl AmqpEventPublisher {
    /// Create a new event publisher and declare its exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self { channel, config };
        publisher.setup_exchange().await?;
        Ok(publisher)
    }

    /// Declare the durable topic exchange for match events
    async fn setup_exchange(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(&self.config.exchange_name, "topic")
            .durable(true)
            .finish();
        self.channel
            .exchange_declare(args)
            .await
            .map_err(|e| LadderError::AmqpConnectionFailed {
                message: format!("Failed to declare match events exchange: {}", e),
            })?;

        info!(
            "Declared match events exchange: {}",
            self.config.exchange_name
        );
        Ok(())
    }

    /// Publish with retry logic
    async fn publish_with_retry<T>(&self, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(envelope).await {
                Ok(()) => {
                    debug!(
                        "Published message {} to exchange {} with key {}",
                        envelope.correlation_id, self.config.exchange_name, envelope.routing_key
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    /// Single publish attempt
    async fn try_publish<T>(&self, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.config.exchange_name, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_correlation_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json")
            .with_persistence(true);

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| LadderError::AmqpConnectionFailed {
                message: format!("Failed to publish message: {}", e),
            })?;

        Ok(())
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_match_recorded(&self, event: MatchRecorded) -> Result<()> {
        let envelope = MessageEnvelope::new(event, MATCH_RECORDED_ROUTING_KEY);
        self.publish_with_retry(&envelope).await
    }

    async fn publish_match_rejected(&self, event: MatchRejected) -> Result<()> {
        let envelope = MessageEnvelope::new(event, MATCH_REJECTED_ROUTING_KEY);
        self.publish_with_retry(&envelope).await
    }
}

/// Mock event publisher for testing
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    recorded: std::sync::Mutex<Vec<MatchRecorded>>,
    rejected: std::sync::Mutex<Vec<MatchRejected>>,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// MatchRecorded events published so far
    pub fn recorded_events(&self) -> Vec<MatchRecorded> {
        self.recorded
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// MatchRejected events published so far
    pub fn rejected_events(&self) -> Vec<MatchRejected> {
        self.rejected
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish_match_recorded(&self, event: MatchRecorded) -> Result<()> {
        if let Ok(mut events) = self.recorded.lock() {
            events.push(event);
        }
        Ok(())
    }

    async fn publish_match_rejected(&self, event: MatchRejected) -> Result<()> {
        if let Ok(mut events) = self.rejected.lock() {
            events.push(event);
        }
        Ok(())
    }
}
