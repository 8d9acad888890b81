//! Scrape-time filtering over a gatherer

use prometheus::proto::MetricFamily;

use super::{GatherError, Gatherer};

/// Projects a source snapshot down to the series carrying `label == value`.
///
/// With a minimum count set, the whole gather fails with
/// [`GatherError::NotReady`] until enough series match.
pub struct FilteringGatherer<G> {
    source: G,
    label: String,
    value: String,
    min_count: Option<usize>,
}

impl<G: Gatherer> FilteringGatherer<G> {
    pub fn new(source: G, label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            source,
            label: label.into(),
            value: value.into(),
            min_count: None,
        }
    }

    pub fn with_min_count(mut self, min_count: usize) -> Self {
        self.min_count = Some(min_count);
        self
    }

    fn matches(&self, metric: &prometheus::proto::Metric) -> bool {
        metric
            .get_label()
            .iter()
            .any(|l| l.get_name() == self.label && l.get_value() == self.value)
    }
}

impl<G: Gatherer> Gatherer for FilteringGatherer<G> {
    fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
        let mut matched = 0usize;
        let mut filtered = Vec::new();

        for mut family in self.source.gather()? {
            let metrics: Vec<_> = family
                .take_metric()
                .into_vec()
                .into_iter()
                .filter(|m| self.matches(m))
                .collect();
            if metrics.is_empty() {
                continue;
            }
            matched += metrics.len();
            family.set_metric(metrics.into());
            filtered.push(family);
        }

        if let Some(min) = self.min_count
            && matched < min
        {
            return Err(GatherError::NotReady {
                min,
                found: matched,
            });
        }

        Ok(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::{MetricCatalog, MetricIdentity};
    use crate::domain::flow::MetricKind;

    fn labels(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn catalog_with(points: &[(&str, MetricKind, &str, f64)]) -> MetricCatalog {
        let catalog = MetricCatalog::new();
        for (name, kind, value_label, value) in points {
            catalog
                .record(
                    &MetricIdentity::new(*name, *kind),
                    &labels(&["label"]),
                    &labels(&[value_label]),
                    *value,
                )
                .unwrap();
        }
        catalog
    }

    fn series_count(families: &[MetricFamily]) -> usize {
        families.iter().map(|f| f.get_metric().len()).sum()
    }

    #[test]
    fn test_filter_keeps_matching_series_only() {
        let catalog = MetricCatalog::new();
        let id = MetricIdentity::new("up", MetricKind::Gauge);
        let names = labels(&["instance"]);
        catalog.record(&id, &names, &labels(&["x"]), 1.0).unwrap();
        catalog.record(&id, &names, &labels(&["y"]), 1.0).unwrap();

        let families = FilteringGatherer::new(&catalog, "instance", "x")
            .gather()
            .unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(series_count(&families), 1);
        let label = &families[0].get_metric()[0].get_label()[0];
        assert_eq!(label.get_value(), "x");
    }

    #[test]
    fn test_empty_families_are_dropped() {
        let catalog = catalog_with(&[
            ("a", MetricKind::Gauge, "x", 1.0),
            ("b", MetricKind::Gauge, "y", 1.0),
        ]);
        let families = FilteringGatherer::new(&catalog, "label", "x")
            .gather()
            .unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].get_name(), "a");

        let families = FilteringGatherer::new(&catalog, "label", "z")
            .gather()
            .unwrap();
        assert!(families.is_empty());
    }

    #[test]
    fn test_min_count_not_met() {
        let catalog = catalog_with(&[
            ("some_gauge", MetricKind::Gauge, "value", 0.0),
            ("some_counter", MetricKind::Counter, "other_value", 1.0),
        ]);
        let err = FilteringGatherer::new(&catalog, "label", "value")
            .with_min_count(2)
            .gather()
            .unwrap_err();
        assert_eq!(err, GatherError::NotReady { min: 2, found: 1 });
    }

    #[test]
    fn test_min_count_across_families() {
        let catalog = catalog_with(&[
            ("some_gauge", MetricKind::Gauge, "x", 0.0),
            ("some_counter", MetricKind::Counter, "x", 1.0),
        ]);

        let families = FilteringGatherer::new(&catalog, "label", "x")
            .with_min_count(2)
            .gather()
            .unwrap();
        assert_eq!(families.len(), 2);
        assert_eq!(series_count(&families), 2);

        let err = FilteringGatherer::new(&catalog, "label", "x")
            .with_min_count(3)
            .gather()
            .unwrap_err();
        assert_eq!(err, GatherError::NotReady { min: 3, found: 2 });
    }

    #[test]
    fn test_zero_min_count_always_ready() {
        let catalog = MetricCatalog::new();
        let families = FilteringGatherer::new(&catalog, "label", "x")
            .with_min_count(0)
            .gather()
            .unwrap();
        assert!(families.is_empty());
    }
}
