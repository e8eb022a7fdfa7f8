//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Deposit submission and fee gating
//! - Backend sync outcomes and session refreshes
//! - Reward actions

use crate::backend::SyncOutcome;
use crate::error::{RelayerError, RelayerResult};

use axum::{http::StatusCode, routing::get, Router};
use ethers::types::U256;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "relayer_deposits_submitted_total",
        "Total deposit transactions accepted by the network",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_SUBMIT_FAILED: CounterVec = register_counter_vec!(
        "relayer_deposit_submission_failures_total",
        "Total failed submission attempts",
        &["chain_id"]
    ).unwrap();

    // Fee metrics
    pub static ref GAS_PRICE_GWEI: GaugeVec = register_gauge_vec!(
        "relayer_gas_price_gwei",
        "Last observed gas price",
        &["chain_id"]
    ).unwrap();

    pub static ref FEE_WAITS: CounterVec = register_counter_vec!(
        "relayer_fee_gate_waits_total",
        "Polls where the fee exceeded the threshold",
        &["chain_id"]
    ).unwrap();

    // Backend metrics
    pub static ref SYNC_OUTCOMES: CounterVec = register_counter_vec!(
        "relayer_sync_outcomes_total",
        "Backend reconciliation outcomes",
        &["outcome"]
    ).unwrap();

    pub static ref TOKEN_REFRESHES: CounterVec = register_counter_vec!(
        "relayer_token_refreshes_total",
        "Session refresh attempts by result",
        &["result"]
    ).unwrap();

    pub static ref REWARD_ACTIONS: CounterVec = register_counter_vec!(
        "relayer_reward_actions_total",
        "Reward actions executed by kind and result",
        &["kind", "result"]
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

    pub async fn run(&self) -> RelayerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayerError::Config(format!("Cannot bind metrics port: {}", e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| RelayerError::Config(format!("Metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_tx_submitted(chain_id: u64) {
    TX_SUBMITTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_submission_failure(chain_id: u64) {
    TX_SUBMIT_FAILED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_gas_price(chain_id: u64, gas_price: U256) {
    GAS_PRICE_GWEI
        .with_label_values(&[&chain_id.to_string()])
        .set(gas_price.low_u128() as f64 / 1e9);
}

pub fn record_fee_wait(chain_id: u64) {
    FEE_WAITS
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_sync_outcome(outcome: SyncOutcome) {
    SYNC_OUTCOMES.with_label_values(&[outcome.as_str()]).inc();
}

pub fn record_token_refresh(succeeded: bool) {
    let result = if succeeded { "success" } else { "failure" };
    TOKEN_REFRESHES.with_label_values(&[result]).inc();
}

pub fn record_reward_action(kind: &str, succeeded: bool) {
    let result = if succeeded { "success" } else { "failure" };
    REWARD_ACTIONS.with_label_values(&[kind, result]).inc();
}
