//! Per flow ingestion loop
//!
//! `Connecting -> Streaming -> Terminated`. A computation started without
//! a stop time should run forever, so the loop ending is always a failure:
//! either the upstream error, or an unknown reason when there is none.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use thiserror::Error;

use crate::data::signalflow::{
    DataPoint, ExecuteRequest, SignalFlowClient, StreamError, TimeSeriesMetadata,
};
use crate::domain::catalog::{CatalogError, MetricCatalog, MetricIdentity};
use crate::domain::flow::{DEFAULT_STREAM, Flow, RoutingError};
use crate::domain::template::{RenderContext, RenderError};

use super::stats::FlowStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Connecting,
    Streaming,
    Terminated,
}

/// Why a flow stopped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("error connecting to SignalFx realm {realm}: {source}")]
    Connect {
        realm: String,
        #[source]
        source: StreamError,
    },

    #[error("SignalFlow program is invalid: {0}")]
    Rejected(#[source] StreamError),

    #[error("stream failed: {0}")]
    Stream(#[source] StreamError),

    #[error("flow failed for an unknown reason")]
    UnknownReason,
}

/// Why a single data point was dropped
#[derive(Error, Debug)]
pub enum PointError {
    #[error("no metadata for time series '{0}'")]
    MissingMetadata(String),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Runs one flow against the shared catalog
pub struct FlowSupervisor {
    flow: Arc<Flow>,
    client: Arc<dyn SignalFlowClient>,
    catalog: Arc<MetricCatalog>,
    stats: Arc<FlowStats>,
    state: RwLock<FlowState>,
}

impl FlowSupervisor {
    pub fn new(
        flow: Arc<Flow>,
        client: Arc<dyn SignalFlowClient>,
        catalog: Arc<MetricCatalog>,
        stats: Arc<FlowStats>,
    ) -> Self {
        stats.init_flow(&flow);
        Self {
            flow,
            client,
            catalog,
            stats,
            state: RwLock::new(FlowState::Connecting),
        }
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    pub fn state(&self) -> FlowState {
        *self.state.read()
    }

    fn set_state(&self, state: FlowState) {
        tracing::debug!(flow = %self.flow.name(), state = ?state, "Flow state changed");
        *self.state.write() = state;
    }

    /// Run the flow until it terminates. Never returns success.
    pub async fn run(&self) -> FlowError {
        self.set_state(FlowState::Connecting);

        let credentials = self.flow.credentials().clone();
        let realm = credentials.realm.clone();
        let start = self
            .flow
            .historical_data()
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .and_then(|d| Utc::now().checked_sub_signed(d));

        tracing::info!(
            flow = %self.flow.name(),
            client = self.client.name(),
            endpoint = %credentials.stream_url(),
            start = ?start,
            "Starting SignalFlow computation"
        );

        let request = ExecuteRequest {
            flow: self.flow.name().to_string(),
            program: self.flow.query().to_string(),
            credentials,
            start,
        };

        let mut computation = match self.client.execute(request).await {
            Ok(computation) => computation,
            Err(e) => {
                self.set_state(FlowState::Terminated);
                return match e {
                    StreamError::InvalidProgram(_) => FlowError::Rejected(e),
                    _ => FlowError::Connect { realm, source: e },
                };
            }
        };

        self.set_state(FlowState::Streaming);

        while let Some(batch) = computation.next_batch().await {
            for point in &batch.points {
                self.ingest_point(computation.metadata(&point.tsid), point);
            }
        }

        self.set_state(FlowState::Terminated);
        match computation.take_error() {
            Some(e) => FlowError::Stream(e),
            None => FlowError::UnknownReason,
        }
    }

    /// Route, render and record one data point. Failures are counted and
    /// logged, never propagated.
    pub fn ingest_point(&self, metadata: Option<&TimeSeriesMetadata>, point: &DataPoint) {
        let flow = self.flow.name();
        let stream = metadata
            .and_then(|m| m.stream_label())
            .unwrap_or(DEFAULT_STREAM);

        self.stats.record_received(flow, stream);

        if let Err(e) = self.map_point(metadata, stream, point) {
            self.stats.record_failed(flow, stream);
            tracing::debug!(
                flow = %flow,
                stream = %stream,
                tsid = %point.tsid,
                error = %e,
                "Dropped data point"
            );
        }
    }

    fn map_point(
        &self,
        metadata: Option<&TimeSeriesMetadata>,
        stream: &str,
        point: &DataPoint,
    ) -> Result<(), PointError> {
        let metadata = metadata.ok_or_else(|| PointError::MissingMetadata(point.tsid.clone()))?;
        let template = self.flow.for_stream(stream)?;

        let ctx = RenderContext::new(
            &metadata.originating_metric,
            metadata.custom_properties.clone(),
        );
        let rendered = template.render(&ctx)?;

        let identity = MetricIdentity::new(rendered.name, template.kind());
        self.catalog.record(
            &identity,
            template.label_names(),
            &rendered.label_values,
            point.value,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::signalflow::{DataBatch, MemoryClient, StreamMessage};
    use crate::domain::catalog::Gatherer;
    use crate::domain::flow::{MetricKind, MetricTemplate};
    use std::collections::BTreeMap;

    const QUERY: &str = "data('catchpoint.counterrequests').publish()";

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn flow() -> Arc<Flow> {
        let template = MetricTemplate::compile(
            Some("{{ .SignalFxLabels.prometheus_name }}"),
            MetricKind::Gauge,
            None,
            &labels(&[("instance", "{{ .SignalFxLabels.cp_testname }}")]),
        )
        .unwrap();
        Arc::new(
            Flow::new(
                "catchpoint",
                QUERY,
                Default::default(),
                None,
                vec![template],
            )
            .unwrap(),
        )
    }

    fn supervisor(client: Arc<dyn SignalFlowClient>) -> (FlowSupervisor, Arc<MetricCatalog>, Arc<FlowStats>) {
        let catalog = Arc::new(MetricCatalog::new());
        let stats = Arc::new(FlowStats::new().unwrap());
        let sup = FlowSupervisor::new(flow(), client, catalog.clone(), stats.clone());
        (sup, catalog, stats)
    }

    fn metadata(stream: Option<&str>, custom: &[(&str, &str)]) -> TimeSeriesMetadata {
        let mut internal = BTreeMap::new();
        if let Some(stream) = stream {
            internal.insert("sf_streamLabel".to_string(), serde_json::json!(stream));
        }
        TimeSeriesMetadata {
            originating_metric: "catchpoint.counterrequests".to_string(),
            custom_properties: labels(custom),
            internal_properties: internal,
        }
    }

    fn point(tsid: &str, value: f64) -> DataPoint {
        DataPoint {
            tsid: tsid.to_string(),
            value,
        }
    }

    #[test]
    fn test_point_is_bridged() {
        let (sup, catalog, stats) = supervisor(Arc::new(MemoryClient::new()));
        let meta = metadata(None, &[("prometheus_name", "requests"), ("cp_testname", "home")]);
        sup.ingest_point(Some(&meta), &point("A", 4.0));

        assert_eq!(stats.received("catchpoint", "default"), 1);
        assert_eq!(stats.failed("catchpoint", "default"), 0);
        let families = catalog.gather().unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].get_name(), "requests");
        assert_eq!(families[0].get_metric()[0].get_gauge().get_value(), 4.0);
    }

    #[test]
    fn test_routing_miss_counts_failure_and_skips_catalog() {
        let (sup, catalog, stats) = supervisor(Arc::new(MemoryClient::new()));
        let meta = metadata(
            Some("latency"),
            &[("prometheus_name", "requests"), ("cp_testname", "home")],
        );
        sup.ingest_point(Some(&meta), &point("A", 1.0));

        assert_eq!(stats.received("catchpoint", "latency"), 1);
        assert_eq!(stats.failed("catchpoint", "latency"), 1);
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_render_failure_counts_failure() {
        let (sup, catalog, stats) = supervisor(Arc::new(MemoryClient::new()));
        let meta = metadata(None, &[("prometheus_name", "requests")]);
        sup.ingest_point(Some(&meta), &point("A", 1.0));

        assert_eq!(stats.failed("catchpoint", "default"), 1);
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_catalog_conflict_counts_failure_and_keeps_family() {
        let (sup, catalog, stats) = supervisor(Arc::new(MemoryClient::new()));
        catalog
            .record(
                &MetricIdentity::new("requests", MetricKind::Counter),
                &["instance".to_string()],
                &["home".to_string()],
                3.0,
            )
            .unwrap();

        let meta = metadata(None, &[("prometheus_name", "requests"), ("cp_testname", "home")]);
        sup.ingest_point(Some(&meta), &point("A", 9.0));

        assert_eq!(stats.received("catchpoint", "default"), 1);
        assert_eq!(stats.failed("catchpoint", "default"), 1);
        let families = catalog.gather().unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].get_name(), "requests");
        assert_eq!(families[0].get_metric()[0].get_counter().get_value(), 3.0);
    }

    #[test]
    fn test_missing_metadata_counts_under_default() {
        let (sup, catalog, stats) = supervisor(Arc::new(MemoryClient::new()));
        sup.ingest_point(None, &point("unknown", 1.0));

        assert_eq!(stats.received("catchpoint", "default"), 1);
        assert_eq!(stats.failed("catchpoint", "default"), 1);
        assert!(catalog.is_empty());
    }

    #[tokio::test]
    async fn test_stream_end_is_unknown_reason() {
        let client = Arc::new(MemoryClient::new());
        client.register(
            QUERY,
            vec![
                StreamMessage::Metadata {
                    tsid: "A".to_string(),
                    metadata: metadata(
                        None,
                        &[("prometheus_name", "requests"), ("cp_testname", "home")],
                    ),
                },
                StreamMessage::Data(DataBatch {
                    logical_timestamp_ms: 1,
                    points: vec![point("A", 2.0)],
                }),
            ],
        );
        let (sup, catalog, stats) = supervisor(client);

        let err = sup.run().await;
        assert_eq!(err, FlowError::UnknownReason);
        assert_eq!(err.to_string(), "flow failed for an unknown reason");
        assert_eq!(sup.state(), FlowState::Terminated);
        assert_eq!(catalog.len(), 1);
        assert_eq!(stats.received("catchpoint", "default"), 1);
    }

    #[tokio::test]
    async fn test_upstream_error_terminates_flow() {
        let client = Arc::new(MemoryClient::new());
        client.register(
            QUERY,
            vec![StreamMessage::Error {
                message: "computation stopped".to_string(),
            }],
        );
        let (sup, _, _) = supervisor(client);

        assert_eq!(
            sup.run().await,
            FlowError::Stream(StreamError::Upstream("computation stopped".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unregistered_program_is_rejected() {
        let (sup, _, _) = supervisor(Arc::new(MemoryClient::new()));
        assert!(matches!(sup.run().await, FlowError::Rejected(_)));
        assert_eq!(sup.flow().name(), "catchpoint");
    }
}
