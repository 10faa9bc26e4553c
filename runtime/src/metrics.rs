//! Prometheus metrics for the booking ledger.
//!
//! Recorders are zero-sized structs with associated functions so call sites
//! read as `AdmissionMetrics::record_admitted(elapsed)`. Nothing is recorded
//! anywhere until a recorder is installed, normally by [`MetricsServer`].
//!
//! # Example
//!
//! ```rust,no_run
//! use booking_ledger_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Prometheus exporter serving `/metrics` over HTTP.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a server that will listen on `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and spawn the HTTP listener.
    ///
    /// Must be called from within a tokio runtime. If another recorder is
    /// already installed (several servers in one test binary), the call logs
    /// a warning and succeeds without a handle.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] if the exporter cannot be built.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }

        tokio::spawn(async move {
            // ExporterError implements neither Debug nor Display
            if exporter.await.is_err() {
                tracing::error!("Metrics exporter stopped");
            }
        });

        tracing::info!(addr = %self.addr, "Metrics server started");
        self.handle = Some(handle);
        Ok(())
    }

    /// Handle of the installed recorder, if this server installed it
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Admission
    describe_counter!(
        "booking_admissions_total",
        "Booking requests by outcome (admitted, conflict, rejected, replayed)"
    );
    describe_histogram!(
        "booking_admission_duration_seconds",
        "Time from request to persisted reservation or rejection"
    );
    describe_gauge!(
        "booking_admission_locks_active",
        "Business/date keys with an admission in flight"
    );

    // Lifecycle
    describe_counter!(
        "booking_transitions_total",
        "Applied status transitions by source and target status"
    );
    describe_counter!(
        "booking_transitions_rejected_total",
        "Rejected status transitions by error kind"
    );
    describe_counter!(
        "booking_transition_races_total",
        "Transitions re-decided after a concurrent status change"
    );
    describe_counter!(
        "booking_deletions_total",
        "Reservations removed by their customer"
    );

    // Store
    describe_histogram!(
        "booking_store_query_duration_seconds",
        "Reservation store round-trip time by operation"
    );
    describe_counter!(
        "booking_store_errors_total",
        "Reservation store backend failures by operation"
    );

    // Effects
    describe_counter!("effects_executed_total", "Total number of effects executed");
    describe_counter!("effects_failed_total", "Effects that reported a delivery failure");
    describe_counter!("effects_dropped_total", "Effects dropped after shutdown");
    describe_histogram!(
        "effect_execution_duration_seconds",
        "Time taken to execute effects"
    );

    // Retry
    describe_counter!("retry_attempts_total", "Total number of retry attempts");
    describe_counter!("retry_successes_total", "Operations that succeeded after retrying");
    describe_counter!("retry_exhausted_total", "Operations that exhausted their retries");
}

/// Admission (conflict resolver) metrics recorder.
pub struct AdmissionMetrics;

impl AdmissionMetrics {
    /// A request was admitted and persisted.
    pub fn record_admitted(duration: Duration) {
        counter!("booking_admissions_total", "outcome" => "admitted").increment(1);
        histogram!("booking_admission_duration_seconds").record(duration.as_secs_f64());
    }

    /// A request lost to an overlapping reservation.
    pub fn record_conflict(duration: Duration) {
        counter!("booking_admissions_total", "outcome" => "conflict").increment(1);
        histogram!("booking_admission_duration_seconds").record(duration.as_secs_f64());
    }

    /// A request was refused for any other reason.
    pub fn record_rejected(kind: &'static str) {
        counter!("booking_admissions_total", "outcome" => "rejected", "kind" => kind).increment(1);
    }

    /// A retried request matched an existing reservation by idempotency key.
    pub fn record_replayed() {
        counter!("booking_admissions_total", "outcome" => "replayed").increment(1);
    }

    /// Keys currently locked or awaited.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_active_locks(count: usize) {
        gauge!("booking_admission_locks_active").set(count as f64);
    }
}

/// Lifecycle manager metrics recorder.
pub struct LifecycleMetrics;

impl LifecycleMetrics {
    /// A transition was applied.
    pub fn record_transition(from: &'static str, to: &'static str) {
        counter!("booking_transitions_total", "from" => from, "to" => to).increment(1);
    }

    /// A transition was refused.
    pub fn record_rejected(kind: &'static str) {
        counter!("booking_transitions_rejected_total", "kind" => kind).increment(1);
    }

    /// The stored status changed between decision and write.
    pub fn record_race() {
        counter!("booking_transition_races_total").increment(1);
    }

    /// A reservation was deleted.
    pub fn record_deletion() {
        counter!("booking_deletions_total").increment(1);
    }
}

/// Reservation store metrics recorder.
pub struct StoreMetrics;

impl StoreMetrics {
    /// One store round trip.
    pub fn record_query(operation: &'static str, duration: Duration) {
        histogram!("booking_store_query_duration_seconds", "operation" => operation)
            .record(duration.as_secs_f64());
    }

    /// A backend failure.
    pub fn record_error(operation: &'static str) {
        counter!("booking_store_errors_total", "operation" => operation).increment(1);
    }
}

/// Effect metrics recorder.
pub struct EffectMetrics;

impl EffectMetrics {
    /// Record an effect execution.
    pub fn record_execution(duration: Duration) {
        counter!("effects_executed_total").increment(1);
        histogram!("effect_execution_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record an effect whose work failed.
    pub fn record_failure(kind: &'static str) {
        counter!("effects_failed_total", "kind" => kind).increment(1);
    }

    /// Record an effect dropped after shutdown.
    pub fn record_dropped() {
        counter!("effects_dropped_total").increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt(operation: &'static str) {
        counter!("retry_attempts_total", "operation" => operation).increment(1);
    }

    /// Record a success after at least one retry.
    pub fn record_success(operation: &'static str) {
        counter!("retry_successes_total", "operation" => operation).increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted(operation: &'static str) {
        counter!("retry_exhausted_total", "operation" => operation).increment(1);
    }
}
