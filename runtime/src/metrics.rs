//! Business metrics for the booking core.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `tutoring_bookings_total{outcome}` - booking attempts by outcome
//!   (`created`, `conflict`, `insufficient_funds`, `not_found`, ...)
//! - `tutoring_refunds_total{percent}` - cancellations by refund percent
//! - `tutoring_refund_credits_total` - credits returned to students
//! - `tutoring_ledger_postings_total{type}` - ledger transactions by type
//! - `tutoring_session_transitions_total{transition,trigger}` - lifecycle flips
//! - `tutoring_scheduler_sweep_failures_total{sweep}` - per-session sweep failures
//! - `tutoring_notifications_total{outcome}` - notification deliveries
//!
//! ## Histograms
//! - `tutoring_booking_duration_seconds` - booking transaction latency
//! - `tutoring_scheduler_sweep_duration_seconds{sweep}` - sweep latency

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;
use tutoring_core::Error;

/// Errors from installing the exporter.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to configure the exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// A recorder is already installed or the install failed
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Install the Prometheus recorder and describe every business metric.
///
/// The returned handle renders the scrape body; serving it is up to the
/// caller.
///
/// # Errors
///
/// Returns [`MetricsError`] if the recorder cannot be built or installed.
pub fn install_prometheus() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    register_business_metrics();
    Ok(handle)
}

/// Describe all business metrics. Call once at startup.
pub fn register_business_metrics() {
    describe_counter!(
        "tutoring_bookings_total",
        "Booking attempts by outcome (created, conflict, insufficient_funds, ...)"
    );
    describe_histogram!(
        "tutoring_booking_duration_seconds",
        "Time taken by the booking transaction"
    );
    describe_counter!(
        "tutoring_refunds_total",
        "Cancellations by refund percent"
    );
    describe_counter!(
        "tutoring_refund_credits_total",
        "Credits returned from escrow to students"
    );
    describe_counter!(
        "tutoring_ledger_postings_total",
        "Ledger transactions posted, by transaction type"
    );
    describe_counter!(
        "tutoring_session_transitions_total",
        "Session lifecycle transitions by transition and trigger"
    );
    describe_counter!(
        "tutoring_scheduler_sweep_failures_total",
        "Sessions a scheduler sweep failed to transition"
    );
    describe_histogram!(
        "tutoring_scheduler_sweep_duration_seconds",
        "Time taken by one scheduler sweep"
    );
    describe_counter!(
        "tutoring_notifications_total",
        "Notification deliveries by outcome (sent, failed)"
    );

    tracing::info!("Business metrics registered");
}

// ============================================================================
// Recording helpers
// ============================================================================

/// Record a successful booking.
pub fn record_booking_created(elapsed: Duration) {
    metrics::counter!("tutoring_bookings_total", "outcome" => "created").increment(1);
    metrics::histogram!("tutoring_booking_duration_seconds").record(elapsed.as_secs_f64());
}

/// Record a rejected booking, labelled by error kind.
pub fn record_booking_rejected(error: &Error) {
    metrics::counter!("tutoring_bookings_total", "outcome" => error.code()).increment(1);
}

/// Record a cancellation refund.
pub fn record_refund(percent: u8, amount: i64) {
    metrics::counter!("tutoring_refunds_total", "percent" => percent.to_string()).increment(1);
    metrics::counter!("tutoring_refund_credits_total")
        .increment(u64::try_from(amount).unwrap_or_default());
}

/// Record a posted ledger transaction.
pub fn record_posting(transaction_type: &'static str) {
    metrics::counter!("tutoring_ledger_postings_total", "type" => transaction_type).increment(1);
}

/// Record an applied session transition.
pub fn record_transition(transition: &'static str, trigger: &'static str) {
    metrics::counter!(
        "tutoring_session_transitions_total",
        "transition" => transition,
        "trigger" => trigger
    )
    .increment(1);
}

/// Record one session a sweep could not transition.
pub fn record_sweep_failure(sweep: &'static str) {
    metrics::counter!("tutoring_scheduler_sweep_failures_total", "sweep" => sweep).increment(1);
}

/// Record the latency of one sweep.
pub fn record_sweep_duration(sweep: &'static str, elapsed: Duration) {
    metrics::histogram!("tutoring_scheduler_sweep_duration_seconds", "sweep" => sweep)
        .record(elapsed.as_secs_f64());
}

/// Record a notification delivery outcome.
pub fn record_notification(outcome: &'static str) {
    metrics::counter!("tutoring_notifications_total", "outcome" => outcome).increment(1);
}
