//! Flows and their per-stream routing table
//!
//! A flow is one streaming query plus the metric templates its data points
//! are mapped through. Each template claims a stream tag; the routing table
//! resolves an incoming point's tag to exactly one template.

mod error;

pub use error::{ConfigError, RoutingError};

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::data::signalflow::Credentials;
use crate::domain::template::{DEFAULT_NAME_TEMPLATE, RenderContext, RenderError, Template};

/// Stream tag used when a template or a data point does not name one
pub const DEFAULT_STREAM: &str = "default";

/// Output metric type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Counter => write!(f, "counter"),
        }
    }
}

/// Name and label values rendered for one data point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMetric {
    pub name: String,
    /// Values in the order of [`MetricTemplate::label_names`]
    pub label_values: Vec<String>,
}

/// A compiled metric template
#[derive(Debug, Clone)]
pub struct MetricTemplate {
    name: Template,
    labels: BTreeMap<String, Template>,
    label_names: Vec<String>,
    stream: String,
    kind: MetricKind,
}

impl MetricTemplate {
    /// Compile a metric template.
    ///
    /// An empty name falls back to the upstream metric name and an empty
    /// stream to [`DEFAULT_STREAM`].
    pub fn compile(
        name: Option<&str>,
        kind: MetricKind,
        stream: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let name_source = name
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_NAME_TEMPLATE);
        let name = Template::compile(name_source).map_err(|source| ConfigError::Template {
            field: "name".to_string(),
            source,
        })?;

        let mut compiled = BTreeMap::new();
        for (label, source) in labels {
            if !is_valid_label_name(label) {
                return Err(ConfigError::InvalidLabelName(label.clone()));
            }
            let template = Template::compile(source).map_err(|source| ConfigError::Template {
                field: format!("labels.{}", label),
                source,
            })?;
            compiled.insert(label.clone(), template);
        }

        let stream = stream
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_STREAM)
            .to_string();

        Ok(Self {
            name,
            label_names: compiled.keys().cloned().collect(),
            labels: compiled,
            stream,
            kind,
        })
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Label names in canonical (sorted) order
    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    pub fn name_template(&self) -> &Template {
        &self.name
    }

    /// Render the metric name and every label value
    pub fn render(&self, ctx: &RenderContext) -> Result<RenderedMetric, RenderError> {
        let name = self.name.render(ctx)?;
        let label_values = self
            .labels
            .values()
            .map(|template| template.render(ctx))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RenderedMetric { name, label_values })
    }
}

/// A validated flow with an immutable routing table
#[derive(Debug, Clone)]
pub struct Flow {
    name: String,
    query: String,
    credentials: Credentials,
    historical_data: Option<Duration>,
    routes: BTreeMap<String, MetricTemplate>,
}

impl Flow {
    pub fn new(
        name: &str,
        query: &str,
        credentials: Credentials,
        historical_data: Option<Duration>,
        templates: Vec<MetricTemplate>,
    ) -> Result<Self, ConfigError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::EmptyFlowName);
        }
        if query.trim().is_empty() {
            return Err(ConfigError::EmptyQuery(name.to_string()));
        }
        if templates.is_empty() {
            return Err(ConfigError::NoTemplates(name.to_string()));
        }

        let mut routes = BTreeMap::new();
        for template in templates {
            if routes.contains_key(template.stream()) {
                let flow = name.to_string();
                return Err(if template.stream() == DEFAULT_STREAM {
                    ConfigError::DuplicateDefaultStream { flow }
                } else {
                    ConfigError::DuplicateStream {
                        flow,
                        stream: template.stream().to_string(),
                    }
                });
            }
            routes.insert(template.stream().to_string(), template);
        }

        Ok(Self {
            name: name.to_string(),
            query: query.to_string(),
            credentials,
            historical_data,
            routes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn historical_data(&self) -> Option<Duration> {
        self.historical_data
    }

    /// Declared stream tags, sorted
    pub fn streams(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn templates(&self) -> impl Iterator<Item = &MetricTemplate> {
        self.routes.values()
    }

    /// Resolve the template for a data point's stream tag
    pub fn for_stream(&self, stream: &str) -> Result<&MetricTemplate, RoutingError> {
        self.routes
            .get(stream)
            .ok_or_else(|| RoutingError::NotFound(stream.to_string()))
    }
}

/// Prometheus label name rule: `[a-zA-Z_][a-zA-Z0-9_]*`, `__` prefix reserved
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    let valid_first = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    valid_first
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with("__")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn gauge(stream: Option<&str>) -> MetricTemplate {
        MetricTemplate::compile(None, MetricKind::Gauge, stream, &BTreeMap::new()).unwrap()
    }

    fn flow(templates: Vec<MetricTemplate>) -> Result<Flow, ConfigError> {
        Flow::new(
            "catchpoint-data",
            "data('x').publish()",
            Credentials::default(),
            None,
            templates,
        )
    }

    #[test]
    fn test_stream_defaults() {
        assert_eq!(gauge(None).stream(), DEFAULT_STREAM);
        assert_eq!(gauge(Some("")).stream(), DEFAULT_STREAM);
        assert_eq!(gauge(Some("errors")).stream(), "errors");
    }

    #[test]
    fn test_two_default_streams_rejected() {
        let err = flow(vec![gauge(Some("")), gauge(None)]).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateDefaultStream { .. }));
    }

    #[test]
    fn test_duplicate_named_stream_rejected() {
        let err = flow(vec![gauge(Some("a")), gauge(Some("a"))]).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateStream { ref stream, .. } if stream == "a"));
    }

    #[test]
    fn test_routing() {
        let flow = flow(vec![gauge(None), gauge(Some("errors"))]).unwrap();
        assert_eq!(flow.for_stream("errors").unwrap().stream(), "errors");
        assert_eq!(flow.for_stream(DEFAULT_STREAM).unwrap().stream(), DEFAULT_STREAM);
        assert_eq!(
            flow.for_stream("latency").unwrap_err(),
            RoutingError::NotFound("latency".to_string())
        );
        assert_eq!(flow.streams().collect::<Vec<_>>(), vec!["default", "errors"]);
    }

    #[test]
    fn test_flow_requires_name_query_and_templates() {
        assert!(matches!(
            Flow::new(" ", "q", Credentials::default(), None, vec![gauge(None)]),
            Err(ConfigError::EmptyFlowName)
        ));
        assert!(matches!(
            Flow::new("f", "", Credentials::default(), None, vec![gauge(None)]),
            Err(ConfigError::EmptyQuery(_))
        ));
        assert!(matches!(flow(vec![]), Err(ConfigError::NoTemplates(_))));
    }

    #[test]
    fn test_render_uses_canonical_label_order() {
        let template = MetricTemplate::compile(
            Some("{{ .SignalFxLabels.prometheus_name }}"),
            MetricKind::Gauge,
            None,
            &labels(&[
                ("zone", "{{ .SignalFxLabels.zone }}"),
                ("instance", "{{ .SignalFxLabels.cp_testname }}"),
            ]),
        )
        .unwrap();
        assert_eq!(template.label_names(), ["instance", "zone"]);

        let ctx = RenderContext::new(
            "catchpoint.counterrequests",
            labels(&[
                ("prometheus_name", "requests"),
                ("cp_testname", "home"),
                ("zone", "eu"),
            ]),
        );
        let rendered = template.render(&ctx).unwrap();
        assert_eq!(rendered.name, "requests");
        assert_eq!(rendered.label_values, vec!["home", "eu"]);
    }

    #[test]
    fn test_compile_errors_name_the_field() {
        let err = MetricTemplate::compile(
            None,
            MetricKind::Counter,
            None,
            &labels(&[("host", "{{ .Bogus }}")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Template { ref field, .. } if field == "labels.host"));

        let err =
            MetricTemplate::compile(Some("{{ if }}"), MetricKind::Gauge, None, &BTreeMap::new())
                .unwrap_err();
        assert!(matches!(err, ConfigError::Template { ref field, .. } if field == "name"));
    }

    #[test]
    fn test_label_name_validation() {
        assert!(is_valid_label_name("instance"));
        assert!(is_valid_label_name("_private"));
        assert!(is_valid_label_name("a1_b2"));
        assert!(!is_valid_label_name(""));
        assert!(!is_valid_label_name("1abc"));
        assert!(!is_valid_label_name("with-dash"));
        assert!(!is_valid_label_name("__reserved"));

        let err = MetricTemplate::compile(
            None,
            MetricKind::Gauge,
            None,
            &labels(&[("bad-name", "x")]),
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::InvalidLabelName("bad-name".to_string()));
    }

    #[test]
    fn test_metric_kind_serde() {
        let kind: MetricKind = serde_json::from_str(r#""counter""#).unwrap();
        assert_eq!(kind, MetricKind::Counter);
        assert!(serde_json::from_str::<MetricKind>(r#""histogram""#).is_err());
        assert_eq!(MetricKind::Gauge.to_string(), "gauge");
    }
}
