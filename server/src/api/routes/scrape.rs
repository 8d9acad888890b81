//! Prometheus scrape endpoints over the metric catalog
//!
//! - `GET /metrics` - the whole catalog
//! - `GET /probe/{label}?target=<value>` - series with `label == value`
//! - `GET /group/{label}?target=<value>` - as probe, gated on the grouping's
//!   `minMetrics` readiness threshold

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, TEXT_FORMAT, TextEncoder};
use serde::Deserialize;

use crate::api::types::ApiError;
use crate::core::constants::SCRAPE_TIMEOUT_SECS;
use crate::domain::catalog::{FilteringGatherer, GatherError, Gatherer};

#[derive(Clone)]
pub struct ScrapeState {
    gatherer: Arc<dyn Gatherer>,
    groupings: Arc<BTreeMap<String, usize>>,
    timeout: Duration,
}

impl ScrapeState {
    pub fn new(gatherer: Arc<dyn Gatherer>, groupings: BTreeMap<String, usize>) -> Self {
        Self {
            gatherer,
            groupings: Arc::new(groupings),
            timeout: Duration::from_secs(SCRAPE_TIMEOUT_SECS),
        }
    }

    #[cfg(test)]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct TargetQuery {
    pub target: Option<String>,
}

pub fn routes(state: ScrapeState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/probe/{label}", get(probe))
        .route("/group/{label}", get(group))
        .with_state(state)
}

pub async fn metrics(State(state): State<ScrapeState>) -> Result<Response, ApiError> {
    let gatherer = Arc::clone(&state.gatherer);
    encode(state.timeout, move || gatherer.gather()).await
}

pub async fn probe(
    State(state): State<ScrapeState>,
    Path(label): Path<String>,
    Query(query): Query<TargetQuery>,
) -> Result<Response, ApiError> {
    let target = require_target(query)?;
    let gatherer = FilteringGatherer::new(Arc::clone(&state.gatherer), label, target);
    encode(state.timeout, move || gatherer.gather()).await
}

pub async fn group(
    State(state): State<ScrapeState>,
    Path(label): Path<String>,
    Query(query): Query<TargetQuery>,
) -> Result<Response, ApiError> {
    let min_metrics = state.groupings.get(&label).copied().ok_or_else(|| {
        ApiError::not_found(
            "GROUPING_NOT_FOUND",
            format!("No grouping configured for label '{}'", label),
        )
    })?;
    let target = require_target(query)?;
    let gatherer = FilteringGatherer::new(Arc::clone(&state.gatherer), label, target)
        .with_min_count(min_metrics);
    encode(state.timeout, move || gatherer.gather()).await
}

fn require_target(query: TargetQuery) -> Result<String, ApiError> {
    query.target.filter(|t| !t.is_empty()).ok_or_else(|| {
        ApiError::bad_request("MISSING_TARGET", "Query parameter 'target' is required")
    })
}

/// Gather and text-encode off the async runtime, abandoning the request
/// after `timeout`. Ingestion is never affected by an abandoned scrape.
pub(crate) async fn encode<F>(timeout: Duration, gather: F) -> Result<Response, ApiError>
where
    F: FnOnce() -> Result<Vec<MetricFamily>, GatherError> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(move || {
        let families = gather()?;
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .map_err(ApiError::from_encode)?;
        Ok::<_, ApiError>(buffer)
    });

    let body = match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result?,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Scrape task failed");
            return Err(ApiError::internal("Scrape task failed"));
        }
        Err(_) => {
            tracing::warn!(timeout = ?timeout, "Scrape timed out");
            return Err(ApiError::internal(format!(
                "Scrape did not complete within {:?}",
                timeout
            )));
        }
    };

    Ok(([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response())
}
