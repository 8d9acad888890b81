//! Per flow and stream ingestion counters
//!
//! Kept on a registry of their own so the bridged catalog only ever
//! contains bridged metrics.

use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, IntCounterVec, Opts, Registry};

use crate::core::constants::{METRIC_FLOW_FAILED, METRIC_FLOW_LAST_RECEIVED, METRIC_FLOW_RECEIVED};
use crate::domain::catalog::{GatherError, Gatherer};
use crate::domain::flow::Flow;

const LABELS: &[&str] = &["flow", "stream"];

pub struct FlowStats {
    registry: Registry,
    received: IntCounterVec,
    failed: IntCounterVec,
    last_received: GaugeVec,
}

impl FlowStats {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let received = IntCounterVec::new(
            Opts::new(METRIC_FLOW_RECEIVED, "Data points received per flow and stream"),
            LABELS,
        )?;
        let failed = IntCounterVec::new(
            Opts::new(
                METRIC_FLOW_FAILED,
                "Data points dropped per flow and stream (routing, rendering or catalog failure)",
            ),
            LABELS,
        )?;
        let last_received = GaugeVec::new(
            Opts::new(
                METRIC_FLOW_LAST_RECEIVED,
                "Unix time of the last data point received per flow and stream",
            ),
            LABELS,
        )?;

        registry.register(Box::new(received.clone()))?;
        registry.register(Box::new(failed.clone()))?;
        registry.register(Box::new(last_received.clone()))?;

        Ok(Self {
            registry,
            received,
            failed,
            last_received,
        })
    }

    /// Create one zeroed row per declared stream of the flow
    pub fn init_flow(&self, flow: &Flow) {
        for stream in flow.streams() {
            let labels = [flow.name(), stream];
            self.received.with_label_values(&labels);
            self.failed.with_label_values(&labels);
            self.last_received.with_label_values(&labels);
        }
    }

    /// Count a received data point and stamp its arrival time
    pub fn record_received(&self, flow: &str, stream: &str) {
        let labels = [flow, stream];
        self.received.with_label_values(&labels).inc();
        let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        self.last_received.with_label_values(&labels).set(now);
    }

    pub fn record_failed(&self, flow: &str, stream: &str) {
        self.failed.with_label_values(&[flow, stream]).inc();
    }

    #[cfg(test)]
    pub fn received(&self, flow: &str, stream: &str) -> u64 {
        self.received.with_label_values(&[flow, stream]).get()
    }

    #[cfg(test)]
    pub fn failed(&self, flow: &str, stream: &str) -> u64 {
        self.failed.with_label_values(&[flow, stream]).get()
    }
}

impl Gatherer for FlowStats {
    fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
        Ok(self.registry.gather())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::signalflow::Credentials;
    use crate::domain::flow::{MetricKind, MetricTemplate};
    use std::collections::BTreeMap;

    fn flow() -> Flow {
        let templates = ["default", "errors"]
            .iter()
            .map(|s| {
                MetricTemplate::compile(None, MetricKind::Gauge, Some(s), &BTreeMap::new()).unwrap()
            })
            .collect();
        Flow::new("f", "q", Credentials::default(), None, templates).unwrap()
    }

    #[test]
    fn test_init_creates_rows_per_stream() {
        let stats = FlowStats::new().unwrap();
        stats.init_flow(&flow());

        let families = stats.gather().unwrap();
        assert_eq!(families.len(), 3);
        for family in &families {
            assert_eq!(family.get_metric().len(), 2, "{}", family.get_name());
        }
    }

    #[test]
    fn test_counts() {
        let stats = FlowStats::new().unwrap();
        stats.record_received("f", "default");
        stats.record_received("f", "default");
        stats.record_failed("f", "default");

        assert_eq!(stats.received("f", "default"), 2);
        assert_eq!(stats.failed("f", "default"), 1);
        assert_eq!(stats.failed("f", "other"), 0);

        let families = stats.gather().unwrap();
        let last = families
            .iter()
            .find(|f| f.get_name() == METRIC_FLOW_LAST_RECEIVED)
            .unwrap();
        assert!(last.get_metric()[0].get_gauge().get_value() > 1_600_000_000.0);
    }
}
