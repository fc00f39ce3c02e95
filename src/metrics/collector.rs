//! Metrics collection using Prometheus
//!
//! Counters and histograms for the rating ladder service: match outcomes,
//! rating movement, AMQP traffic and component health.

use crate::types::MatchRecord;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::Duration;

/// Main metrics collector for the ladder service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Match recording metrics
    ladder_metrics: LadderMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Total AMQP messages processed
    pub amqp_messages_total: IntCounterVec,

    /// AMQP message processing errors
    pub amqp_errors_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Match recording metrics
#[derive(Clone)]
pub struct LadderMetrics {
    /// Matches committed
    pub matches_recorded_total: IntCounter,

    /// Refused or rolled back submissions by failure class
    pub match_failures_total: IntCounterVec,

    /// Applied rating change per side and outcome
    pub rating_delta: HistogramVec,

    /// Registered players
    pub players_registered: IntGauge,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// End-to-end duration of a record_match call
    pub record_match_duration: HistogramVec,

    /// AMQP operation durations
    pub amqp_operation_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let ladder_metrics = LadderMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            ladder_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get service metrics
    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    /// Get match recording metrics
    pub fn ladder(&self) -> &LadderMetrics {
        &self.ladder_metrics
    }

    /// Get performance metrics
    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Record a committed match
    pub fn record_match_recorded(&self, record: &MatchRecord, duration: Duration) {
        self.ladder_metrics.matches_recorded_total.inc();

        for (player_id, delta) in [
            (record.player1_id, record.player1_delta()),
            (record.player2_id, record.player2_delta()),
        ] {
            let outcome = if player_id == record.winner_id {
                "win"
            } else {
                "loss"
            };
            self.ladder_metrics
                .rating_delta
                .with_label_values(&[outcome])
                .observe(delta as f64);
        }

        self.performance_metrics
            .record_match_duration
            .with_label_values(&["committed"])
            .observe(duration.as_secs_f64());
    }

    /// Record a submission that did not commit
    pub fn record_match_failure(&self, kind: &str, duration: Duration) {
        self.ladder_metrics
            .match_failures_total
            .with_label_values(&[kind])
            .inc();

        self.performance_metrics
            .record_match_duration
            .with_label_values(&[kind])
            .observe(duration.as_secs_f64());
    }

    /// Update the registered player gauge
    pub fn update_player_count(&self, count: usize) {
        self.ladder_metrics.players_registered.set(count as i64);
    }

    /// Record AMQP operation
    pub fn record_amqp_operation(&self, operation: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[operation])
                .inc();
        }

        self.performance_metrics
            .amqp_operation_duration
            .with_label_values(&[operation, status])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("rating_ladder_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "rating_ladder_amqp_messages_total",
                "Total AMQP messages processed",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("rating_ladder_amqp_errors_total", "Total AMQP errors"),
            &["operation"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "rating_ladder_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("rating_ladder_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            amqp_errors_total,
            health_status,
            component_health,
        })
    }
}

impl LadderMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let matches_recorded_total = IntCounter::new(
            "rating_ladder_matches_recorded_total",
            "Total matches committed",
        )?;
        registry.register(Box::new(matches_recorded_total.clone()))?;

        let match_failures_total = IntCounterVec::new(
            Opts::new(
                "rating_ladder_match_failures_total",
                "Match submissions that did not commit",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(match_failures_total.clone()))?;

        let rating_delta = HistogramVec::new(
            HistogramOpts::new("rating_ladder_rating_delta", "Applied rating change")
                .buckets(vec![
                    -32.0, -24.0, -16.0, -8.0, -1.0, 0.0, 1.0, 8.0, 16.0, 24.0, 32.0,
                ]),
            &["outcome"],
        )?;
        registry.register(Box::new(rating_delta.clone()))?;

        let players_registered = IntGauge::new(
            "rating_ladder_players_registered",
            "Number of registered players",
        )?;
        registry.register(Box::new(players_registered.clone()))?;

        Ok(Self {
            matches_recorded_total,
            match_failures_total,
            rating_delta,
            players_registered,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let record_match_duration = HistogramVec::new(
            HistogramOpts::new(
                "rating_ladder_record_match_duration_seconds",
                "Match recording time",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["result"],
        )?;
        registry.register(Box::new(record_match_duration.clone()))?;

        let amqp_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "rating_ladder_amqp_operation_duration_seconds",
                "AMQP operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_operation_duration.clone()))?;

        Ok(Self {
            record_match_duration,
            amqp_operation_duration,
        })
    }
}
