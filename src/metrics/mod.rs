//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Publication attempts and failures
//! - Current fee bid per sender
//! - Confirmations and publish timeouts
//! - Mempool clearing retries

use crate::error::{TxMgrError, TxMgrResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    pub static ref TX_ATTEMPTS_PUBLISHED: CounterVec = register_counter_vec!(
        "txmgr_attempts_published_total",
        "Total publication attempts accepted by the L1 node",
        &["name"]
    ).unwrap();

    pub static ref TX_PUBLISH_FAILURES: CounterVec = register_counter_vec!(
        "txmgr_publish_failures_total",
        "Total publication attempts that failed before broadcast",
        &["name"]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "txmgr_confirmed_total",
        "Total transactions confirmed",
        &["name"]
    ).unwrap();

    pub static ref TX_PUBLISH_TIMEOUTS: CounterVec = register_counter_vec!(
        "txmgr_publish_timeouts_total",
        "Total sends that exhausted the fee ladder",
        &["name"]
    ).unwrap();

    pub static ref CURRENT_BID: GaugeVec = register_gauge_vec!(
        "txmgr_current_bid_gwei",
        "Fee of the latest publication attempt in gwei",
        &["name"]
    ).unwrap();

    pub static ref CLEAR_RETRIES: CounterVec = register_counter_vec!(
        "txmgr_clear_pending_retries_total",
        "Total mempool clearing runs that found an already confirmed nonce",
        &["name"]
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

    pub async fn run(&self) -> TxMgrResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| TxMgrError::Internal(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| TxMgrError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    gather().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Render all registered metrics in the text exposition format
pub fn gather() -> TxMgrResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TxMgrError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TxMgrError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_attempt_published(name: &str) {
    TX_ATTEMPTS_PUBLISHED.with_label_values(&[name]).inc();
}

pub fn record_publish_failure(name: &str) {
    TX_PUBLISH_FAILURES.with_label_values(&[name]).inc();
}

pub fn record_confirmation(name: &str) {
    TX_CONFIRMED.with_label_values(&[name]).inc();
}

pub fn record_publish_timeout(name: &str) {
    TX_PUBLISH_TIMEOUTS.with_label_values(&[name]).inc();
}

pub fn record_bid(name: &str, bid_gwei: f64) {
    CURRENT_BID.with_label_values(&[name]).set(bid_gwei);
}

pub fn record_clear_retry(name: &str) {
    CLEAR_RETRIES.with_label_values(&[name]).inc();
}
