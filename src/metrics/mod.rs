//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Submissions and their terminal outcomes
//! - Failure categories
//! - Fee estimation fallbacks
//! - Submit-to-terminal latency

use crate::error::{CoreError, CoreResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    Encoder, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{error, info};

lazy_static! {
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "credit_tx_transactions_submitted_total",
        "Total transactions submitted",
        &["method"]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "credit_tx_transactions_confirmed_total",
        "Total transactions confirmed successfully",
        &["method"]
    ).unwrap();

    pub static ref TX_REVERTED: CounterVec = register_counter_vec!(
        "credit_tx_transactions_reverted_total",
        "Total transactions included with a failed status",
        &["method"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "credit_tx_transactions_failed_total",
        "Total executions that failed, by category",
        &["method", "kind"]
    ).unwrap();

    pub static ref TX_LATENCY: HistogramVec = register_histogram_vec!(
        "credit_tx_transaction_latency_seconds",
        "Time from submission to terminal state",
        &["method"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    pub static ref FEE_ESTIMATE_DEFAULTED: Counter = register_counter!(
        "credit_tx_fee_estimate_defaulted_total",
        "Total fee estimates that fell back to the conservative default"
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> CoreResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| CoreError::Metrics(format!("Failed to bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| CoreError::Metrics(e.to_string()))
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Text exposition of every registered metric
pub fn render() -> CoreResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| CoreError::Metrics(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| CoreError::Metrics(e.to_string()))
}

// Helper functions to record metrics

pub fn record_tx_submitted(method: &str) {
    TX_SUBMITTED.with_label_values(&[method]).inc();
}

pub fn record_tx_confirmed(method: &str) {
    TX_CONFIRMED.with_label_values(&[method]).inc();
}

pub fn record_tx_reverted(method: &str) {
    TX_REVERTED.with_label_values(&[method]).inc();
}

pub fn record_tx_failed(method: &str, kind: &str) {
    TX_FAILED.with_label_values(&[method, kind]).inc();
}

pub fn record_tx_latency(method: &str, latency_secs: f64) {
    TX_LATENCY.with_label_values(&[method]).observe(latency_secs);
}

pub fn record_fee_estimate_defaulted() {
    FEE_ESTIMATE_DEFAULTED.inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_metrics() {
        record_tx_failed("evaluateCreditScore", "timeout");
        record_fee_estimate_defaulted();

        let text = render().unwrap();
        assert!(text.contains("credit_tx_transactions_failed_total"));
        assert!(text.contains("credit_tx_fee_estimate_defaulted_total"));
    }
}
