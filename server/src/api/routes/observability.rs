//! Self-observability endpoint: per flow ingestion counters

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;

use super::scrape::encode;
use crate::api::types::ApiError;
use crate::core::constants::SCRAPE_TIMEOUT_SECS;
use crate::domain::catalog::Gatherer;
use crate::domain::ingest::FlowStats;

pub fn routes(stats: Arc<FlowStats>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .with_state(stats)
}

pub async fn metrics(State(stats): State<Arc<FlowStats>>) -> Result<Response, ApiError> {
    encode(Duration::from_secs(SCRAPE_TIMEOUT_SECS), move || stats.gather()).await
}
