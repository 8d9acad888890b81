//! Readiness and liveness endpoints
//!
//! Both answer 200 as long as the process serves HTTP, independent of how
//! far ingestion has progressed.

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

fn ok() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

pub async fn ready() -> impl IntoResponse {
    ok()
}

pub async fn healthy() -> impl IntoResponse {
    ok()
}
