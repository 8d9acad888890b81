//! HTTP server initialization
//!
//! Two listeners share one shutdown signal: the scrape server for the
//! bridged catalog and the observability server for the bridge's own
//! ingestion counters.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use super::middleware;
use super::routes::scrape::{self, ScrapeState};
use super::routes::{health, observability};
use crate::core::config::ServerConfig;
use crate::core::shutdown::ShutdownService;
use crate::domain::ingest::FlowStats;

pub struct ApiServer {
    config: ServerConfig,
    scrape: ScrapeState,
    stats: Arc<FlowStats>,
}

impl ApiServer {
    pub fn new(config: ServerConfig, scrape: ScrapeState, stats: Arc<FlowStats>) -> Self {
        Self {
            config,
            scrape,
            stats,
        }
    }

    /// Build the scrape server router
    pub fn scrape_router(state: ScrapeState) -> Router {
        scrape::routes(state)
            .route("/ready", get(health::ready))
            .route("/healthy", get(health::healthy))
            .fallback(middleware::handle_404)
            .layer(CompressionLayer::new())
            .layer(TraceLayer::new_for_http())
    }

    /// Build the self-observability server router
    pub fn observability_router(stats: Arc<FlowStats>) -> Router {
        observability::routes(stats)
            .fallback(middleware::handle_404)
            .layer(TraceLayer::new_for_http())
    }

    /// Serve both listeners until shutdown is triggered
    pub async fn start(self, shutdown: ShutdownService) -> Result<()> {
        let host: IpAddr = self.config.host.parse().with_context(|| {
            format!("Invalid server host: {}", self.config.host)
        })?;
        let scrape_addr = SocketAddr::new(host, self.config.port);
        let observability_addr = SocketAddr::new(host, self.config.observability_port);

        let scrape_listener = TcpListener::bind(scrape_addr)
            .await
            .with_context(|| format!("Failed to bind scrape server on {}", scrape_addr))?;
        let observability_listener = TcpListener::bind(observability_addr)
            .await
            .with_context(|| {
                format!(
                    "Failed to bind observability server on {}",
                    observability_addr
                )
            })?;

        tracing::debug!(
            scrape = %scrape_addr,
            observability = %observability_addr,
            "HTTP servers listening"
        );

        let scrape = axum::serve(scrape_listener, Self::scrape_router(self.scrape))
            .with_graceful_shutdown(shutdown.wait());
        let observability = axum::serve(
            observability_listener,
            Self::observability_router(self.stats),
        )
        .with_graceful_shutdown(shutdown.wait());

        let result = tokio::try_join!(
            async { scrape.await.context("Scrape server error") },
            async { observability.await.context("Observability server error") },
        );
        if result.is_err() {
            // Take the other listener down with the failed one
            shutdown.trigger();
        }
        result.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::MetricCatalog;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::collections::BTreeMap;
    use tower::ServiceExt;

    fn scrape_router() -> Router {
        let state = ScrapeState::new(Arc::new(MetricCatalog::new()), BTreeMap::new());
        ApiServer::scrape_router(state)
    }

    async fn status(router: Router, uri: &str) -> StatusCode {
        router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_ready_and_healthy() {
        assert_eq!(status(scrape_router(), "/ready").await, StatusCode::OK);
        assert_eq!(status(scrape_router(), "/healthy").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_empty_catalog_scrape() {
        assert_eq!(status(scrape_router(), "/metrics").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        assert_eq!(status(scrape_router(), "/nope").await, StatusCode::NOT_FOUND);
        let stats = Arc::new(FlowStats::new().unwrap());
        assert_eq!(
            status(ApiServer::observability_router(stats), "/ready").await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_start_fails_on_invalid_host() {
        let stats = Arc::new(FlowStats::new().unwrap());
        let server = ApiServer::new(
            ServerConfig {
                host: "not-an-address".to_string(),
                port: 1,
                observability_port: 2,
            },
            ScrapeState::new(Arc::new(MetricCatalog::new()), BTreeMap::new()),
            stats,
        );
        let err = server.start(ShutdownService::new()).await.unwrap_err();
        assert!(err.to_string().contains("Invalid server host"));
    }
}
