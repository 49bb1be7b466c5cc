//! Chat service metrics.
//!
//! All metrics follow Prometheus naming conventions:
//! - `chat_` prefix
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! Labels are bounded. No identity, token or address ever appears in a label:
//! - `outcome`: `success`, `error`
//! - `decision`: `allowed`, `rejected`
//! - `event`: `started`, `closed`, `failed`

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return the handle used by `/metrics`.
///
/// # Errors
///
/// Returns an error if a global recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Tokens
// ============================================================================

/// Metric: `chat_token_issued_total{outcome}`
pub fn record_token_issued(outcome: &'static str) {
    counter!("chat_token_issued_total", "outcome" => outcome).increment(1);
}

/// Metric: `chat_token_verifications_total{outcome}`
pub fn record_token_verification(outcome: &'static str) {
    counter!("chat_token_verifications_total", "outcome" => outcome).increment(1);
}

// ============================================================================
// Admission
// ============================================================================

/// Metric: `chat_admission_decisions_total{decision}`
pub fn record_admission_decision(decision: &'static str) {
    counter!("chat_admission_decisions_total", "decision" => decision).increment(1);
}

/// Number of rate-limit keys currently tracked.
///
/// Metric: `chat_admission_tracked_keys`
pub fn set_admission_tracked_keys(count: usize) {
    // Realistic key counts are far below 2^53
    #[allow(clippy::cast_precision_loss)]
    gauge!("chat_admission_tracked_keys").set(count as f64);
}

// ============================================================================
// Connections and delivery
// ============================================================================

/// Metric: `chat_connections_active`
pub fn set_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("chat_connections_active").set(count as f64);
}

/// Record the outcome of one fan-out.
///
/// Metrics: `chat_fanout_deliveries_total`, `chat_fanout_failures_total`
pub fn record_fanout(delivered: usize, failed: usize) {
    counter!("chat_fanout_deliveries_total").increment(delivered as u64);
    if failed > 0 {
        counter!("chat_fanout_failures_total").increment(failed as u64);
    }
}

/// Metric: `chat_messages_persisted_total`
pub fn record_message_persisted() {
    counter!("chat_messages_persisted_total").increment(1);
}

/// Metric: `chat_stream_sessions_total{event}`
pub fn record_session_event(event: &'static str) {
    counter!("chat_stream_sessions_total", "event" => event).increment(1);
}
