use crate::{
    models::HealthStatus,
    services::{CacheService, ChainReader},
};
use axum::{extract::State, Json};
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct HealthState {
    pub cache: Arc<CacheService>,
    pub chain: Option<Arc<dyn ChainReader>>,
    pub observer_subscriptions: Arc<AtomicUsize>,
    pub started_at: Instant,
}

pub async fn health_check(State(state): State<HealthState>) -> Json<HealthStatus> {
    let redis_ok = state.cache.ping().await;
    let chain_ok = match &state.chain {
        Some(chain) => Some(chain.block_number().await.is_ok()),
        None => None,
    };

    // Without an RPC endpoint the service still answers polls; it just can't verify.
    let status = match chain_ok {
        Some(false) => "degraded",
        _ => "healthy",
    };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        redis: redis_ok,
        chain_rpc: chain_ok,
        observer_subscriptions: state.observer_subscriptions.load(Ordering::Relaxed),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        timestamp: Utc::now(),
    })
}
