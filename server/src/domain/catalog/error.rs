use thiserror::Error;

use crate::domain::flow::MetricKind;

/// Per data point catalog failure. Never fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("metric '{name}' is already registered as {existing}, not {requested}")]
    KindConflict {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },

    #[error("metric '{name}' is already registered with labels {existing:?}, not {requested:?}")]
    LabelConflict {
        name: String,
        existing: Vec<String>,
        requested: Vec<String>,
    },

    #[error("invalid metric '{name}': {reason}")]
    InvalidMetric { name: String, reason: String },

    #[error("counter increment must be a non-negative number, got {0}")]
    InvalidIncrement(f64),

    #[error("failed to register metric '{name}': {reason}")]
    Registration { name: String, reason: String },
}

/// Scrape-time gather failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatherError {
    #[error("not enough metrics in group: found {found}, need at least {min}")]
    NotReady { min: usize, found: usize },
}
