//! AMQP consumer for match reports
//!
//! Deliveries are settled only after the recorder has reached a terminal
//! state for them, so a report is never acknowledged before its commit
//! outcome is known.

use crate::amqp::messages::MessageUtils;
use crate::error::{LadderError, RecordMatchError, Result};
use crate::types::{MatchRecord, MatchReport};
use amqprs::{
    channel::{
        BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, BasicNackArguments,
        BasicQosArguments, Channel,
    },
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Unacknowledged deliveries the broker may push to one consumer
const PREFETCH_COUNT: u16 = 16;

/// Trait defining the interface for handling AMQP messages
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one decoded match report
    async fn handle_match_report(
        &self,
        report: MatchReport,
    ) -> std::result::Result<MatchRecord, RecordMatchError>;

    /// Handle a delivery that could not be decoded
    async fn handle_error(&self, error: LadderError, message_data: &[u8]);
}

/// How a delivery is settled with the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Done with, successfully or permanently refused
    Ack,
    /// Put back on the queue for another attempt
    Requeue,
    /// Dropped from the queue, dead-lettered if the queue is so configured
    Reject,
}

impl Settlement {
    /// Settlement for a recorder outcome
    ///
    /// Persistence failures are retried once through the broker; a second
    /// failure of the same delivery is rejected.
    pub fn for_outcome(
        outcome: &std::result::Result<MatchRecord, RecordMatchError>,
        redelivered: bool,
    ) -> Self {
        match outcome {
            Ok(_) => Settlement::Ack,
            Err(e) if e.is_retryable() => {
                if redelivered {
                    Settlement::Reject
                } else {
                    Settlement::Requeue
                }
            }
            Err(_) => Settlement::Ack,
        }
    }
}

/// Decode and handle one delivery body
pub async fn process_delivery(
    handler: &dyn MessageHandler,
    content: &[u8],
    redelivered: bool,
) -> Settlement {
    let report = match MessageUtils::deserialize_match_report(content) {
        Ok(report) => report,
        Err(e) => {
            warn!("Undecodable match report: {}", e);
            handler
                .handle_error(
                    LadderError::InvalidMatchReport {
                        reason: e.to_string(),
                    },
                    content,
                )
                .await;
            return Settlement::Reject;
        }
    };

    debug!(report = ?report, "Match report decoded");
    let outcome = handler.handle_match_report(report).await;
    Settlement::for_outcome(&outcome, redelivered)
}

/// Consumer for match report messages
pub struct MatchReportConsumer {
    handler: Arc<dyn MessageHandler>,
    channel: Channel,
    consumer_tag: String,
}

impl MatchReportConsumer {
    /// Create a new match report consumer
    pub fn new(handler: Arc<dyn MessageHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("match-report-consumer-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            channel,
            consumer_tag,
        }
    }

    /// Start consuming messages from the queue
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        self.channel
            .basic_qos(BasicQosArguments::new(0, PREFETCH_COUNT, false))
            .await
            .map_err(|e| LadderError::AmqpConnectionFailed {
                message: format!("Failed to set prefetch: {}", e),
            })?;

        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);

        self.channel
            .basic_consume(ReportConsumer::new(self.handler.clone()), args)
            .await
            .map_err(|e| LadderError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming match reports from queue: {}", queue_name);
        Ok(())
    }

    /// Stop consuming messages
    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel
            .basic_cancel(args)
            .await
            .map_err(|e| LadderError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            })?;

        info!("Stopped consuming match reports");
        Ok(())
    }
}

/// Internal consumer implementation
struct ReportConsumer {
    handler: Arc<dyn MessageHandler>,
}

impl ReportConsumer {
    fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl AsyncConsumer for ReportConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        let redelivered = deliver.redelivered();

        debug!(
            "AMQP message received - delivery_tag: {}, redelivered: {}, size: {} bytes",
            delivery_tag,
            redelivered,
            content.len()
        );

        let start_time = Instant::now();
        let settlement = process_delivery(self.handler.as_ref(), &content, redelivered).await;

        let settled = match settlement {
            Settlement::Ack => channel
                .basic_ack(BasicAckArguments::new(delivery_tag, false))
                .await,
            Settlement::Requeue => channel
                .basic_nack(BasicNackArguments::new(delivery_tag, false, true))
                .await,
            Settlement::Reject => channel
                .basic_nack(BasicNackArguments::new(delivery_tag, false, false))
                .await,
        };

        match settled {
            Ok(()) => info!(
                "Message settled - delivery_tag: {}, settlement: {:?}, processing_time: {:.2}ms",
                delivery_tag,
                settlement,
                start_time.elapsed().as_secs_f64() * 1000.0
            ),
            // The broker redelivers unsettled messages once the channel closes
            Err(e) => error!(
                "Failed to settle message - delivery_tag: {}, settlement: {:?}, error: {}",
                delivery_tag, settlement, e
            ),
        }
    }
}

/// Mock message handler for testing
pub struct MockMessageHandler {
    pub received_reports: Arc<tokio::sync::Mutex<Vec<MatchReport>>>,
    pub errors: Arc<tokio::sync::Mutex<Vec<String>>>,
    outcome: fn(&MatchReport) -> std::result::Result<MatchRecord, RecordMatchError>,
}

impl MockMessageHandler {
    /// Handler that answers every report with `outcome`
    pub fn new(outcome: fn(&MatchReport) -> std::result::Result<MatchRecord, RecordMatchError>) -> Self {
        Self {
            received_reports: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            errors: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            outcome,
        }
    }
}

#[async_trait]
impl MessageHandler for MockMessageHandler {
    async fn handle_match_report(
        &self,
        report: MatchReport,
    ) -> std::result::Result<MatchRecord, RecordMatchError> {
        let outcome = (self.outcome)(&report);
        self.received_reports.lock().await.push(report);
        outcome
    }

    async fn handle_error(&self, error: LadderError, _message_data: &[u8]) {
        self.errors.lock().await.push(error.to_string());
    }
}
