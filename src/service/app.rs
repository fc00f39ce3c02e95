//! Main application state and service coordination
//!
//! This module contains the production AppState that wires the match store,
//! the recorder, AMQP intake and the metrics/health endpoints together.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::handlers::{MatchReportConsumer, MessageHandler};
use crate::amqp::publisher::{AmqpEventPublisher, EventPublisher, PublisherConfig};
use crate::config::AppConfig;
use crate::error::{LadderError, RecordMatchError};
use crate::ladder::MatchRecorder;
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector, MetricsService};
use crate::service::health::HealthCheck;
use crate::storage::{MatchStore, SqliteMatchStore};
use crate::types::{MatchRecord, MatchRecorded, MatchRejected, MatchReport};
use crate::utils::current_timestamp;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Interval of the health metrics refresh task
const HEALTH_METRICS_INTERVAL: Duration = Duration::from_secs(15);

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },
}

/// Message handler that records reports and announces the outcome
pub struct LadderMessageHandler {
    recorder: MatchRecorder,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<MetricsCollector>,
}

impl LadderMessageHandler {
    pub fn new(
        recorder: MatchRecorder,
        publisher: Arc<dyn EventPublisher>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            recorder,
            publisher,
            metrics,
        }
    }
}

#[async_trait]
impl MessageHandler for LadderMessageHandler {
    async fn handle_match_report(
        &self,
        report: MatchReport,
    ) -> Result<MatchRecord, RecordMatchError> {
        let start_time = Instant::now();
        let outcome = self.recorder.record_match(&report).await;
        self.metrics
            .record_amqp_operation("consume", outcome.is_ok(), start_time.elapsed());

        // The commit outcome is final at this point; a failed announcement
        // must not turn into a redelivery
        let published = match &outcome {
            Ok(record) => Some(
                self.publisher
                    .publish_match_recorded(MatchRecorded {
                        match_record: record.clone(),
                        timestamp: current_timestamp(),
                    })
                    .await,
            ),
            Err(e) if !e.is_retryable() => Some(
                self.publisher
                    .publish_match_rejected(MatchRejected {
                        report: report.clone(),
                        kind: e.kind().to_string(),
                        reason: e.to_string(),
                        timestamp: current_timestamp(),
                    })
                    .await,
            ),
            // Redelivered or rejected by the consumer; nothing to announce yet
            Err(_) => None,
        };

        if let Some(result) = published {
            self.metrics
                .record_amqp_operation("publish", result.is_ok(), start_time.elapsed());
            if let Err(e) = result {
                error!("Failed to publish match outcome event: {}", e);
            }
        }

        debug!(
            "Match report handled in {:.2}ms",
            start_time.elapsed().as_secs_f64() * 1000.0
        );
        outcome
    }

    async fn handle_error(&self, error: LadderError, message_data: &[u8]) {
        self.metrics
            .record_amqp_operation("decode", false, Duration::ZERO);
        error!(
            "Dropping undecodable delivery - error: '{}', message_size: {} bytes",
            error,
            message_data.len()
        );

        if !message_data.is_empty() {
            let preview_len = std::cmp::min(100, message_data.len());
            let preview = String::from_utf8_lossy(&message_data[..preview_len]);
            error!("Message preview: {:?}", preview);
        }
    }
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Persistent players and matches
    store: Arc<dyn MatchStore>,

    /// The single writer of players and matches
    recorder: MatchRecorder,

    /// Prometheus metrics
    metrics_collector: Arc<MetricsCollector>,

    /// AMQP connection, absent when the service runs without a broker
    amqp_connection: Option<Arc<AmqpConnection>>,

    /// Health and metrics endpoints, present while started
    metrics_service: Mutex<Option<Arc<MetricsService>>>,

    /// AMQP consumer for match reports
    report_consumer: Mutex<Option<MatchReportConsumer>>,

    /// Background task handles
    background_tasks: Mutex<Vec<JoinHandle<()>>>,

    /// Service status
    is_running: Arc<RwLock<bool>>,

    started_at: Instant,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing rating ladder service");
        info!(
            "Configuration: service={}, database={}, amqp_url={}",
            config.service.name, config.database.url, config.amqp.url
        );

        let store = Self::initialize_store(&config).await?;
        let amqp_connection = Self::initialize_amqp(&config).await?;

        let mut state = Self::with_store(config, store)?;
        state.amqp_connection = Some(amqp_connection);
        Ok(state)
    }

    /// Build the application around an existing store, without AMQP
    pub fn with_store(config: AppConfig, store: Arc<dyn MatchStore>) -> Result<Self, ServiceError> {
        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );
        let recorder = MatchRecorder::with_metrics(store.clone(), metrics_collector.clone());

        Ok(Self {
            config,
            store,
            recorder,
            metrics_collector,
            amqp_connection: None,
            metrics_service: Mutex::new(None),
            report_consumer: Mutex::new(None),
            background_tasks: Mutex::new(Vec::new()),
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        })
    }

    /// Start the health endpoints, AMQP consumption and background tasks
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting rating ladder service");

        // Mark as running
        *self.is_running.write().await = true;

        // Start metrics service first
        self.start_metrics_service().await?;

        // Start AMQP message consumption
        if self.amqp_connection.is_some() {
            self.start_amqp_consumption().await?;
        } else {
            warn!("No AMQP connection configured - match report intake disabled");
        }

        // Start background tasks
        self.start_background_tasks().await;

        info!("✅ Rating ladder service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of rating ladder service");

        // Mark as not running
        *self.is_running.write().await = false;

        // Stop intake first so nothing new starts recording
        if let Some(consumer) = self.report_consumer.lock().await.take() {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            } else {
                info!("✅ AMQP message consumption stopped");
            }
        }

        self.stop_background_tasks().await;

        if let Some(metrics_service) = self.metrics_service.lock().await.take() {
            info!("Stopping metrics service...");
            if let Err(e) = metrics_service.stop().await {
                warn!("Failed to stop metrics service: {}", e);
            } else {
                info!("✅ Metrics service stopped");
            }
        }

        match self.store.player_count().await {
            Ok(players) => info!(
                "Final statistics: {} players, {} matches recorded this run",
                players,
                self.metrics_collector.ladder().matches_recorded_total.get()
            ),
            Err(e) => warn!("Failed to read final statistics: {}", e),
        }

        info!("✅ Rating ladder service shutdown completed");
        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    #[cfg(test)]
    pub(crate) async fn mark_running(&self, running: bool) {
        *self.is_running.write().await = running;
    }

    /// Get the match store
    pub fn store(&self) -> Arc<dyn MatchStore> {
        self.store.clone()
    }

    /// Get the match recorder
    pub fn recorder(&self) -> &MatchRecorder {
        &self.recorder
    }

    /// Get the metrics collector
    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    /// Get AMQP connection for health checks
    pub fn amqp_connection(&self) -> Option<Arc<AmqpConnection>> {
        self.amqp_connection.clone()
    }

    /// Time since the state was built
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Open the configured SQLite store
    async fn initialize_store(config: &AppConfig) -> Result<Arc<dyn MatchStore>, ServiceError> {
        info!("Opening match store: {}", config.database.url);

        let store = SqliteMatchStore::open(&config.database.url, config.database.max_connections)
            .await
            .map_err(|e| ServiceError::Storage {
                message: format!("Failed to open match store: {}", e),
            })?;

        Ok(Arc::new(store))
    }

    /// Initialize AMQP connection with retry logic
    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let mut amqp_config =
            AmqpConfig::from_url(&config.amqp.url).map_err(|e| ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?;
        amqp_config.max_retries = config.amqp.max_retry_attempts;
        amqp_config.retry_delay_ms = config.amqp.retry_delay_ms;
        amqp_config.connection_timeout_ms = config.amqp_connection_timeout().as_millis() as u64;

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    /// Start metrics and health endpoints
    async fn start_metrics_service(self: &Arc<Self>) -> Result<(), ServiceError> {
        let port = self.config.service.health_port;
        info!("Starting metrics and health endpoints on port {}", port);

        let health_config = HealthServerConfig {
            port,
            host: "0.0.0.0".to_string(),
        };
        let health_server = Arc::new(
            HealthServer::new(health_config, self.metrics_collector.clone())
                .with_app_state(self.clone()),
        );
        let metrics_service = Arc::new(MetricsService::new(
            self.metrics_collector.clone(),
            health_server,
        ));

        let server = metrics_service.clone();
        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("Metrics service failed: {}", e);
            } else {
                info!("Metrics service task completed");
            }
        });

        *self.metrics_service.lock().await = Some(metrics_service);
        self.background_tasks.lock().await.push(metrics_handle);

        info!("✅ Metrics service started on port {}", port);
        Ok(())
    }

    /// Start AMQP message consumption
    async fn start_amqp_consumption(&self) -> Result<(), ServiceError> {
        let Some(connection) = &self.amqp_connection else {
            return Ok(());
        };
        let queue_name = &self.config.amqp.queue_name;

        info!("Opening AMQP channels...");
        let consumer_channel =
            connection
                .open_channel()
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to open consumer channel: {}", e),
                })?;
        let publisher_channel =
            connection
                .open_channel()
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to open publisher channel: {}", e),
                })?;

        // Declare the queue to ensure it exists
        let queue_declare_args = amqprs::channel::QueueDeclareArguments::new(queue_name)
            .durable(true)
            .auto_delete(false)
            .finish();
        consumer_channel
            .queue_declare(queue_declare_args)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to declare queue {}: {}", queue_name, e),
            })?;
        info!("Queue '{}' declared successfully", queue_name);

        let publisher_config = PublisherConfig {
            exchange_name: self.config.amqp.exchange_name.clone(),
            max_retries: self.config.amqp.max_retry_attempts,
            retry_delay_ms: self.config.amqp.retry_delay_ms,
        };
        let publisher = AmqpEventPublisher::new(publisher_channel, publisher_config)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to set up event publisher: {}", e),
            })?;

        let message_handler = Arc::new(LadderMessageHandler::new(
            self.recorder.clone(),
            Arc::new(publisher),
            self.metrics_collector.clone(),
        ));

        let consumer = MatchReportConsumer::new(message_handler, consumer_channel);
        consumer
            .start_consuming(queue_name)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming messages: {}", e),
            })?;

        *self.report_consumer.lock().await = Some(consumer);

        info!(
            "AMQP message consumption started successfully on queue: '{}'",
            queue_name
        );
        Ok(())
    }

    /// Start background maintenance tasks
    async fn start_background_tasks(self: &Arc<Self>) {
        info!(
            "Starting health metrics task ({}s interval)...",
            HEALTH_METRICS_INTERVAL.as_secs()
        );

        // Weak, so the task does not keep the state alive after shutdown
        let state = Arc::downgrade(self);
        let is_running = self.is_running.clone();

        let health_metrics_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEALTH_METRICS_INTERVAL);
            info!("Health metrics task started");

            while *is_running.read().await {
                interval.tick().await;

                let Some(state) = state.upgrade() else {
                    break;
                };
                refresh_health_metrics(&state).await;
            }

            info!("Health metrics task stopped");
        });

        self.background_tasks.lock().await.push(health_metrics_task);
    }

    /// Stop all background tasks
    async fn stop_background_tasks(&self) {
        let tasks: Vec<JoinHandle<()>> = self.background_tasks.lock().await.drain(..).collect();
        let task_count = tasks.len();
        if task_count == 0 {
            info!("No background tasks to stop");
            return;
        }

        info!("Stopping {} background tasks...", task_count);
        for (i, task) in tasks.into_iter().enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
        }

        info!("✅ All {} background tasks stopped", task_count);
    }
}

/// Push current health and store statistics into the metrics registry
pub async fn refresh_health_metrics(state: &Arc<AppState>) {
    let metrics = state.metrics_collector();
    metrics
        .service()
        .uptime_seconds
        .set(state.uptime().as_secs() as i64);

    match HealthCheck::check(state.clone()).await {
        Ok(health) => {
            metrics.update_health_status(health.status.as_gauge());
            for check in &health.checks {
                metrics.update_component_health(&check.name, check.status.is_healthy());
            }
            metrics.update_player_count(health.stats.players_registered);
            debug!("Updated health metrics - status: {}", health.status);
        }
        Err(e) => warn!("Health check for metrics failed: {}", e),
    }
}
