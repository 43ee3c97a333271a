//! Prometheus metrics for redemption, dispatch and reconciliation.
//!
//! Metrics are always recorded through the `metrics` facade; installing the
//! Prometheus recorder is optional and done once by the host process.
//!
//! # Example
//!
//! ```rust,no_run
//! use teamseat_engine::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! let body = server.render();
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder holder.
///
/// The surrounding web layer serves [`MetricsServer::render`] on its metrics route.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server for `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed. A recorder that is
    /// already installed (e.g. by another test) is not an error.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "teamseat_redemptions_total",
        "Redemption attempts by outcome"
    );
    describe_counter!(
        "teamseat_code_claims_total",
        "Code claim attempts by outcome"
    );
    describe_counter!(
        "teamseat_seat_reservations_total",
        "Seat reservation attempts by outcome"
    );
    describe_histogram!(
        "teamseat_dispatch_duration_seconds",
        "Time taken by the external invite call, retries included"
    );
    describe_counter!(
        "teamseat_dispatch_total",
        "External invite outcomes"
    );
    describe_counter!(
        "teamseat_dispatch_retries_total",
        "Retries of invites that were never sent"
    );
    describe_counter!(
        "teamseat_reconcile_teams_total",
        "Team reconciliations by outcome"
    );
    describe_counter!(
        "teamseat_reconcile_transitions_total",
        "Invite records resolved by reconciliation"
    );
    describe_counter!(
        "teamseat_reconcile_drift_total",
        "Reconciliations that corrected cached Team counts"
    );
    describe_gauge!(
        "teamseat_unauthorized_members",
        "Members not invited through the engine, per Team"
    );
}

/// Redemption metrics recorder.
pub struct RedemptionMetrics;

impl RedemptionMetrics {
    /// Record the final outcome of one redemption.
    pub fn record_outcome(outcome: &'static str) {
        counter!("teamseat_redemptions_total", "outcome" => outcome).increment(1);
    }

    /// Record a code claim outcome.
    pub fn record_claim(outcome: &'static str) {
        counter!("teamseat_code_claims_total", "outcome" => outcome).increment(1);
    }

    /// Record a seat reservation outcome.
    pub fn record_reservation(outcome: &'static str) {
        counter!("teamseat_seat_reservations_total", "outcome" => outcome).increment(1);
    }
}

/// Dispatch metrics recorder.
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record one classified dispatch.
    pub fn record(outcome: &'static str, duration: Duration) {
        counter!("teamseat_dispatch_total", "outcome" => outcome).increment(1);
        histogram!("teamseat_dispatch_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a retry of an unsent request.
    pub fn record_retry() {
        counter!("teamseat_dispatch_retries_total").increment(1);
    }
}

/// Reconciliation metrics recorder.
pub struct ReconcileMetrics;

impl ReconcileMetrics {
    /// Record one Team reconciliation.
    pub fn record_team(outcome: &'static str) {
        counter!("teamseat_reconcile_teams_total", "outcome" => outcome).increment(1);
    }

    /// Record record transitions.
    pub fn record_transitions(kind: &'static str, count: usize) {
        counter!("teamseat_reconcile_transitions_total", "kind" => kind).increment(count as u64);
    }

    /// Record a correction of cached counts.
    pub fn record_drift() {
        counter!("teamseat_reconcile_drift_total").increment(1);
    }

    /// Record the number of unauthorized members found on a Team.
    #[allow(clippy::cast_precision_loss)] // Member counts are far below 2^52
    pub fn record_unauthorized(team_id: i64, count: usize) {
        gauge!("teamseat_unauthorized_members", "team_id" => team_id.to_string()).set(count as f64);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(server.render().is_none());
    }

    #[tokio::test]
    async fn test_metrics_server_render() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        RedemptionMetrics::record_outcome("committed");
        DispatchMetrics::record("success", Duration::from_millis(40));

        // Another test may have installed the recorder first; metrics are still recorded
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("teamseat_redemptions_total"));
            assert!(rendered.contains("teamseat_dispatch_total"));
        }
    }
}
