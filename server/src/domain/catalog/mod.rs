//! Dynamic metric catalog
//!
//! Output metrics are created lazily from rendered identities and live for
//! the rest of the process. The catalog guarantees:
//!
//! - at most one family is registered per metric name, however many
//!   writers race to create it
//! - a name keeps the kind it was first created with
//! - a name keeps the label names it was first created with
//!
//! Reads go through the [`Gatherer`] trait, implemented by the catalog and
//! by [`FilteringGatherer`].

mod error;
mod filter;

pub use error::{CatalogError, GatherError};
pub use filter::FilteringGatherer;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use prometheus::proto::MetricFamily;
use prometheus::{Counter, CounterVec, Gauge, GaugeVec, Opts, Registry};

use crate::domain::flow::MetricKind;

const FAMILY_HELP: &str = "Metric bridged from SignalFx SignalFlow";

/// Produces a snapshot of metric families for exposition
pub trait Gatherer: Send + Sync {
    fn gather(&self) -> Result<Vec<MetricFamily>, GatherError>;
}

impl<G: Gatherer + ?Sized> Gatherer for Arc<G> {
    fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
        (**self).gather()
    }
}

impl<G: Gatherer + ?Sized> Gatherer for &G {
    fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
        (**self).gather()
    }
}

/// Rendered metric name plus kind
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricIdentity {
    pub name: String,
    pub kind: MetricKind,
}

impl MetricIdentity {
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[derive(Clone)]
enum Family {
    Gauge(GaugeVec),
    Counter(CounterVec),
}

struct CatalogEntry {
    kind: MetricKind,
    label_names: Vec<String>,
    family: Family,
}

/// Handle to one registered family
#[derive(Clone)]
pub struct SeriesFamily {
    name: String,
    family: Family,
}

impl SeriesFamily {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MetricKind {
        match self.family {
            Family::Gauge(_) => MetricKind::Gauge,
            Family::Counter(_) => MetricKind::Counter,
        }
    }

    /// Series for one set of label values, created on first use
    pub fn series(&self, label_values: &[String]) -> Result<Series, CatalogError> {
        let values: Vec<&str> = label_values.iter().map(String::as_str).collect();
        let invalid = |e: prometheus::Error| CatalogError::InvalidMetric {
            name: self.name.clone(),
            reason: e.to_string(),
        };
        match &self.family {
            Family::Gauge(vec) => vec
                .get_metric_with_label_values(&values)
                .map(Series::Gauge)
                .map_err(invalid),
            Family::Counter(vec) => vec
                .get_metric_with_label_values(&values)
                .map(Series::Counter)
                .map_err(invalid),
        }
    }
}

/// One labelled series
#[derive(Clone)]
pub enum Series {
    Gauge(Gauge),
    Counter(Counter),
}

impl Series {
    /// Set a gauge, or add to a counter
    pub fn record(&self, value: f64) -> Result<(), CatalogError> {
        match self {
            Series::Gauge(gauge) => gauge.set(value),
            Series::Counter(counter) => {
                if value < 0.0 || value.is_nan() {
                    return Err(CatalogError::InvalidIncrement(value));
                }
                counter.inc_by(value);
            }
        }
        Ok(())
    }
}

/// The shared catalog of bridged metrics
pub struct MetricCatalog {
    registry: Registry,
    families: RwLock<HashMap<String, CatalogEntry>>,
}

impl Default for MetricCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricCatalog {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            families: RwLock::new(HashMap::new()),
        }
    }

    /// Number of registered families
    pub fn len(&self) -> usize {
        self.families.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up the family for `identity`, registering it on first use.
    ///
    /// `label_names` must be in canonical order; the list given at creation
    /// is authoritative for the life of the process.
    pub fn get_or_create(
        &self,
        identity: &MetricIdentity,
        label_names: &[String],
    ) -> Result<SeriesFamily, CatalogError> {
        {
            let families = self.families.read();
            if let Some(entry) = families.get(&identity.name) {
                return Self::check_entry(identity, label_names, entry);
            }
        }

        let mut families = self.families.write();
        // Double-check after acquiring write lock
        if let Some(entry) = families.get(&identity.name) {
            return Self::check_entry(identity, label_names, entry);
        }

        let family = self.register(identity, label_names)?;
        tracing::debug!(
            name = %identity.name,
            kind = %identity.kind,
            labels = ?label_names,
            "Registered metric family"
        );
        families.insert(
            identity.name.clone(),
            CatalogEntry {
                kind: identity.kind,
                label_names: label_names.to_vec(),
                family: family.clone(),
            },
        );

        Ok(SeriesFamily {
            name: identity.name.clone(),
            family,
        })
    }

    /// Resolve the series for one data point and record its value
    pub fn record(
        &self,
        identity: &MetricIdentity,
        label_names: &[String],
        label_values: &[String],
        value: f64,
    ) -> Result<(), CatalogError> {
        self.get_or_create(identity, label_names)?
            .series(label_values)?
            .record(value)
    }

    fn check_entry(
        identity: &MetricIdentity,
        label_names: &[String],
        entry: &CatalogEntry,
    ) -> Result<SeriesFamily, CatalogError> {
        if entry.kind != identity.kind {
            return Err(CatalogError::KindConflict {
                name: identity.name.clone(),
                existing: entry.kind,
                requested: identity.kind,
            });
        }
        if entry.label_names != label_names {
            return Err(CatalogError::LabelConflict {
                name: identity.name.clone(),
                existing: entry.label_names.clone(),
                requested: label_names.to_vec(),
            });
        }
        Ok(SeriesFamily {
            name: identity.name.clone(),
            family: entry.family.clone(),
        })
    }

    fn register(
        &self,
        identity: &MetricIdentity,
        label_names: &[String],
    ) -> Result<Family, CatalogError> {
        let names: Vec<&str> = label_names.iter().map(String::as_str).collect();
        let opts = Opts::new(identity.name.clone(), FAMILY_HELP);
        let invalid = |e: prometheus::Error| CatalogError::InvalidMetric {
            name: identity.name.clone(),
            reason: e.to_string(),
        };

        let family = match identity.kind {
            MetricKind::Gauge => Family::Gauge(GaugeVec::new(opts, &names).map_err(invalid)?),
            MetricKind::Counter => {
                Family::Counter(CounterVec::new(opts, &names).map_err(invalid)?)
            }
        };

        let collector: Box<dyn prometheus::core::Collector> = match &family {
            Family::Gauge(vec) => Box::new(vec.clone()),
            Family::Counter(vec) => Box::new(vec.clone()),
        };
        self.registry
            .register(collector)
            .map_err(|e| CatalogError::Registration {
                name: identity.name.clone(),
                reason: e.to_string(),
            })?;

        Ok(family)
    }
}

impl Gatherer for MetricCatalog {
    fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
        Ok(self.registry.gather())
    }
}
