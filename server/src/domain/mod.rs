//! Domain logic of the metric bridge
//!
//! - `template` - metric name and label templates
//! - `flow` - flows and the per-stream routing table
//! - `catalog` - the dynamic metric catalog and scrape-time filtering
//! - `ingest` - per flow supervision feeding the catalog

pub mod catalog;
pub mod flow;
pub mod ingest;
pub mod template;

pub use catalog::{FilteringGatherer, Gatherer, MetricCatalog};
pub use flow::{Flow, MetricKind, MetricTemplate};
pub use ingest::{FlowCoordinator, FlowStats};
