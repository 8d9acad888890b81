use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::data::signalflow::Credentials;
use crate::domain::flow::{Flow, MetricKind, MetricTemplate, is_valid_label_name};
use crate::domain::ingest::{FlowFailurePolicy, RestartPolicy, Supervision};
use crate::utils::file::{DocumentFormat, expand_path};

use super::cli::CliConfig;
use super::constants::{
    DEFAULT_CONFIG_PATH, DEFAULT_HOST, DEFAULT_OBSERVABILITY_PORT, DEFAULT_PORT,
    DEFAULT_RESTART_BASE_DELAY_MS, DEFAULT_RESTART_MAX_ATTEMPTS, DEFAULT_RESTART_RESET_AFTER_SECS,
    DEFAULT_SFX_REALM,
};

// =============================================================================
// File Configuration Structs (YAML or JSON, camelCase keys)
// =============================================================================

/// SignalFx account section
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SfxFileConfig {
    pub realm: Option<String>,
    pub token: Option<String>,
    pub feed_dir: Option<PathBuf>,
}

/// Server configuration section
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub observability_port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartFileConfig {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    #[serde(default, with = "humantime_serde")]
    pub reset_after: Option<Duration>,
}

/// Flow supervision section
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisionFileConfig {
    pub on_flow_failure: Option<FlowFailurePolicy>,
    pub restart: Option<RestartFileConfig>,
}

/// One `prometheusMetricTemplates` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricTemplateFileConfig {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    pub stream: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// One `flows` entry. `realm`/`token` override the `sfx` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowFileConfig {
    pub name: String,
    pub query: String,
    #[serde(default, with = "humantime_serde")]
    pub historical_data: Option<Duration>,
    pub realm: Option<String>,
    pub token: Option<String>,
    #[serde(default)]
    pub prometheus_metric_templates: Vec<MetricTemplateFileConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupReadyConditionFileConfig {
    pub min_metrics: Option<usize>,
}

/// One `grouping` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupingFileConfig {
    pub label: String,
    pub group_ready_condition: Option<GroupReadyConditionFileConfig>,
}

/// File-based configuration document
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    pub sfx: Option<SfxFileConfig>,
    pub server: Option<ServerFileConfig>,
    pub supervision: Option<SupervisionFileConfig>,
    #[serde(default)]
    pub flows: Vec<FlowFileConfig>,
    #[serde(default)]
    pub grouping: Vec<GroupingFileConfig>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl FileConfig {
    /// Load configuration from a YAML or JSON file, picked by extension
    fn load_from_file(path: &Path) -> Result<Self> {
        let format = DocumentFormat::from_path(path);
        tracing::debug!(path = %path.display(), format = %format, "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::parse(&content, format)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::trace!(config = ?config, "Parsed config file");
        Ok(config)
    }

    fn parse(content: &str, format: DocumentFormat) -> Result<Self> {
        let config = match format {
            DocumentFormat::Yaml => serde_yaml::from_str(content)?,
            DocumentFormat::Json => serde_json::from_str(content)?,
        };
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }
}

// =============================================================================
// Resolved Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub observability_port: u16,
}

#[derive(Debug, Clone)]
pub struct SfxConfig {
    pub credentials: Credentials,
    /// Feed transport directory. Without it flows run against an empty
    /// in-memory client.
    pub feed_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub config_path: PathBuf,
    pub server: ServerConfig,
    pub sfx: SfxConfig,
    pub supervision: Supervision,
    pub flows: Vec<Arc<Flow>>,
    /// Grouping label to its `minMetrics` readiness threshold
    pub groupings: BTreeMap<String, usize>,
}

impl AppConfig {
    /// Load configuration with priority:
    /// 1. Defaults
    /// 2. Config document (`--config` or the default container path)
    /// 3. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading application configuration");
        tracing::trace!(cli = ?cli, "CLI config");

        let config_path = match cli.config {
            Some(ref path) => expand_path(&path.to_string_lossy()),
            None => PathBuf::from(DEFAULT_CONFIG_PATH),
        };
        if !config_path.exists() {
            anyhow::bail!("Config file not found: {}", config_path.display());
        }

        let file_config = FileConfig::load_from_file(&config_path)?;
        file_config.warn_unknown_fields();

        let config = Self::from_file_config(config_path, file_config, cli)?;
        config.validate()?;

        tracing::debug!(
            host = %config.server.host,
            port = config.server.port,
            observability_port = config.server.observability_port,
            flows = config.flows.len(),
            groupings = config.groupings.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Layer defaults, file config and CLI/env overrides, compiling every flow
    fn from_file_config(config_path: PathBuf, file: FileConfig, cli: &CliConfig) -> Result<Self> {
        let file_server = file.server.unwrap_or_default();
        let file_sfx = file.sfx.unwrap_or_default();
        let file_supervision = file.supervision.unwrap_or_default();
        let file_restart = file_supervision.restart.unwrap_or_default();

        let server = ServerConfig {
            host: cli
                .host
                .clone()
                .or(file_server.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: cli.port.or(file_server.port).unwrap_or(DEFAULT_PORT),
            observability_port: cli
                .observability_port
                .or(file_server.observability_port)
                .unwrap_or(DEFAULT_OBSERVABILITY_PORT),
        };

        let credentials = Credentials {
            realm: file_sfx
                .realm
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SFX_REALM.to_string()),
            token: file_sfx.token.unwrap_or_default(),
        };
        let sfx = SfxConfig {
            feed_dir: cli
                .feed_dir
                .clone()
                .or(file_sfx.feed_dir)
                .map(|p| expand_path(&p.to_string_lossy())),
            credentials,
        };

        let supervision = Supervision {
            on_flow_failure: cli
                .on_flow_failure
                .or(file_supervision.on_flow_failure)
                .unwrap_or_default(),
            restart: RestartPolicy {
                max_attempts: file_restart
                    .max_attempts
                    .unwrap_or(DEFAULT_RESTART_MAX_ATTEMPTS),
                base_delay_ms: file_restart
                    .base_delay_ms
                    .unwrap_or(DEFAULT_RESTART_BASE_DELAY_MS),
                reset_after: file_restart
                    .reset_after
                    .unwrap_or(Duration::from_secs(DEFAULT_RESTART_RESET_AFTER_SECS)),
            },
        };

        let flows = file
            .flows
            .into_iter()
            .enumerate()
            .map(|(i, f)| {
                build_flow(f, &sfx.credentials)
                    .map(Arc::new)
                    .with_context(|| format!("Configuration error: flows[{}]", i))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut groupings = BTreeMap::new();
        for grouping in file.grouping {
            let min_metrics = grouping
                .group_ready_condition
                .and_then(|c| c.min_metrics)
                .unwrap_or(0);
            if groupings.insert(grouping.label.clone(), min_metrics).is_some() {
                anyhow::bail!(
                    "Configuration error: grouping label '{}' is declared more than once",
                    grouping.label
                );
            }
        }

        Ok(Self {
            config_path,
            server,
            sfx,
            supervision,
            flows,
            groupings,
        })
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        // Server
        if self.server.host.trim().is_empty() {
            anyhow::bail!("Configuration error: server.host must not be empty");
        }
        if self.server.host.parse::<IpAddr>().is_err() {
            anyhow::bail!(
                "Configuration error: server.host must be an IP address, got '{}'",
                self.server.host
            );
        }
        if self.server.port == 0 {
            anyhow::bail!("Configuration error: server.port must be greater than 0");
        }
        if self.server.observability_port == 0 {
            anyhow::bail!("Configuration error: server.observabilityPort must be greater than 0");
        }
        if self.server.port == self.server.observability_port {
            anyhow::bail!(
                "Configuration error: server.port and server.observabilityPort cannot be the same ({})",
                self.server.port
            );
        }

        // Supervision
        if self.supervision.restart.max_attempts == 0 {
            anyhow::bail!(
                "Configuration error: supervision.restart.maxAttempts must be at least 1"
            );
        }

        // Flows
        let mut names = BTreeSet::new();
        for flow in &self.flows {
            if !names.insert(flow.name()) {
                anyhow::bail!(
                    "Configuration error: flow name '{}' is declared more than once",
                    flow.name()
                );
            }
        }

        // Names that never vary must agree on kind and labels across flows
        let mut fixed: BTreeMap<String, (&str, MetricKind, &[String])> = BTreeMap::new();
        for flow in &self.flows {
            for template in flow.templates() {
                let Some(name) = template.name_template().literal() else {
                    continue;
                };
                let current = (flow.name(), template.kind(), template.label_names());
                match fixed.get(&name) {
                    Some(&(other, kind, _)) if kind != current.1 => anyhow::bail!(
                        "Configuration error: metric '{}' is a {} in flow '{}' but a {} in flow '{}'",
                        name,
                        kind,
                        other,
                        current.1,
                        current.0
                    ),
                    Some(&(other, _, labels)) if labels != current.2 => anyhow::bail!(
                        "Configuration error: metric '{}' has labels [{}] in flow '{}' but [{}] in flow '{}'",
                        name,
                        labels.join(", "),
                        other,
                        current.2.join(", "),
                        current.0
                    ),
                    Some(_) => {}
                    None => {
                        fixed.insert(name, current);
                    }
                }
            }
        }

        // Groupings
        for label in self.groupings.keys() {
            if !is_valid_label_name(label) {
                anyhow::bail!(
                    "Configuration error: grouping label '{}' is not a valid label name",
                    label
                );
            }
        }

        if self.flows.is_empty() {
            tracing::warn!("No flows configured, only an empty catalog will be served");
        }

        Ok(())
    }
}

/// Compile one flow, inheriting credentials from the `sfx` section
fn build_flow(file: FlowFileConfig, defaults: &Credentials) -> Result<Flow> {
    let credentials = Credentials {
        realm: file
            .realm
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| defaults.realm.clone()),
        token: file.token.unwrap_or_else(|| defaults.token.clone()),
    };

    let templates = file
        .prometheus_metric_templates
        .iter()
        .map(|t| {
            MetricTemplate::compile(t.name.as_deref(), t.kind, t.stream.as_deref(), &t.labels)
                .with_context(|| format!("flow '{}'", file.name))
        })
        .collect::<Result<Vec<_>>>()?;

    let flow = Flow::new(
        &file.name,
        &file.query,
        credentials,
        file.historical_data,
        templates,
    )?;
    Ok(flow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const YAML: &str = r#"
sfx:
  token: secret
server:
  port: 9100
supervision:
  onFlowFailure: restart
  restart:
    maxAttempts: 3
    resetAfter: 1h
flows:
- name: catchpoint-data
  query: data('catchpoint.counterrequests').publish()
  historicalData: 99s
  prometheusMetricTemplates:
  - name: '{{ .SignalFxLabels.prometheus_name }}'
    type: gauge
    stream: default
    labels:
      instance: '{{ .SignalFxLabels.cp_testname }}'
  - type: counter
    stream: errors
grouping:
- label: instance
  groupReadyCondition:
    minMetrics: 2
"#;

    fn write_config(content: &str, suffix: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn cli_for(file: &NamedTempFile) -> CliConfig {
        CliConfig {
            config: Some(file.path().to_path_buf()),
            ..Default::default()
        }
    }

    fn parse_yaml(content: &str) -> Result<FileConfig> {
        FileConfig::parse(content, DocumentFormat::Yaml)
    }

    fn build(content: &str, cli: &CliConfig) -> Result<AppConfig> {
        let config =
            AppConfig::from_file_config(PathBuf::from("test.yml"), parse_yaml(content)?, cli)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_load_yaml_document() {
        let file = write_config(YAML, ".yml");
        let config = AppConfig::load(&cli_for(&file)).unwrap();

        assert_eq!(config.sfx.credentials.realm, "us1");
        assert_eq!(config.sfx.credentials.token, "secret");
        assert!(config.sfx.feed_dir.is_none());
        assert_eq!(config.server.host, DEFAULT_HOST);
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.observability_port, DEFAULT_OBSERVABILITY_PORT);
        assert_eq!(
            config.supervision.on_flow_failure,
            FlowFailurePolicy::Restart
        );
        assert_eq!(config.supervision.restart.max_attempts, 3);
        assert_eq!(
            config.supervision.restart.base_delay_ms,
            DEFAULT_RESTART_BASE_DELAY_MS
        );
        assert_eq!(
            config.supervision.restart.reset_after,
            Duration::from_secs(3600)
        );

        let flow = &config.flows[0];
        assert_eq!(flow.name(), "catchpoint-data");
        assert_eq!(flow.historical_data(), Some(Duration::from_secs(99)));
        assert_eq!(flow.streams().collect::<Vec<_>>(), vec!["default", "errors"]);
        assert_eq!(flow.for_stream("errors").unwrap().kind(), MetricKind::Counter);
        assert_eq!(config.groupings.get("instance"), Some(&2));
    }

    #[test]
    fn test_load_json_document() {
        let json = r#"{
            "sfx": {"realm": "eu0", "token": "t"},
            "flows": [{
                "name": "f",
                "query": "data('x').publish()",
                "prometheusMetricTemplates": [{"type": "counter"}]
            }]
        }"#;
        let file = write_config(json, ".json");
        let config = AppConfig::load(&cli_for(&file)).unwrap();

        assert_eq!(config.sfx.credentials.realm, "eu0");
        assert_eq!(config.flows[0].credentials().realm, "eu0");
        assert_eq!(config.flows[0].historical_data(), None);
        assert!(config.groupings.is_empty());
    }

    #[test]
    fn test_missing_config_file() {
        let cli = CliConfig {
            config: Some(PathBuf::from("/nonexistent/sfxbridge/config.yml")),
            ..Default::default()
        };
        let err = AppConfig::load(&cli).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_file_config_parse_empty() {
        let config = parse_yaml("{}").unwrap();
        assert!(config.sfx.is_none());
        assert!(config.flows.is_empty());
        assert!(config.grouping.is_empty());
    }

    #[test]
    fn test_file_config_parse_extra_fields() {
        let config = parse_yaml("server:\n  port: 1\nunknownField: 1\n").unwrap();
        if let serde_json::Value::Object(map) = &config.extra {
            assert!(map.contains_key("unknownField"));
        } else {
            panic!("extra should be an object");
        }
    }

    #[test]
    fn test_negative_min_metrics_rejected() {
        let doc = "grouping:\n- label: instance\n  groupReadyCondition:\n    minMetrics: -1\n";
        assert!(parse_yaml(doc).is_err());
    }

    #[test]
    fn test_unknown_metric_type_rejected() {
        let doc = "flows:\n- name: f\n  query: q\n  prometheusMetricTemplates:\n  - type: histogram\n";
        assert!(parse_yaml(doc).is_err());
    }

    #[test]
    fn test_flow_credentials_override() {
        let doc = r#"
sfx: {realm: us0, token: shared}
flows:
- name: f
  query: q
  realm: eu0
  prometheusMetricTemplates: [{type: gauge}]
- name: g
  query: q
  prometheusMetricTemplates: [{type: gauge}]
"#;
        let config = build(doc, &CliConfig::default()).unwrap();
        assert_eq!(config.flows[0].credentials().realm, "eu0");
        assert_eq!(config.flows[0].credentials().token, "shared");
        assert_eq!(config.flows[1].credentials().realm, "us0");
    }

    #[test]
    fn test_duplicate_default_stream_rejected() {
        let doc = "flows:\n- name: f\n  query: q\n  prometheusMetricTemplates:\n  - type: gauge\n  - type: counter\n";
        let err = build(doc, &CliConfig::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("default stream"), "{:#}", err);
    }

    #[test]
    fn test_bad_template_rejected() {
        let doc = "flows:\n- name: f\n  query: q\n  prometheusMetricTemplates:\n  - type: gauge\n    name: '{{ .Nope }}'\n";
        assert!(build(doc, &CliConfig::default()).is_err());
    }

    #[test]
    fn test_duplicate_flow_name_rejected() {
        let doc = r#"
flows:
- {name: f, query: q, prometheusMetricTemplates: [{type: gauge}]}
- {name: f, query: q, prometheusMetricTemplates: [{type: gauge}]}
"#;
        let err = build(doc, &CliConfig::default()).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_fixed_name_kind_conflict_rejected() {
        let doc = r#"
flows:
- {name: a, query: q, prometheusMetricTemplates: [{type: gauge, name: requests}]}
- {name: b, query: q, prometheusMetricTemplates: [{type: counter, name: requests}]}
"#;
        let err = build(doc, &CliConfig::default()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("'requests'"), "{}", message);
        assert!(message.contains("gauge") && message.contains("counter"));
    }

    #[test]
    fn test_fixed_name_label_conflict_rejected() {
        let doc = r#"
flows:
- name: a
  query: q
  prometheusMetricTemplates:
  - {type: gauge, name: requests, labels: {instance: x}}
  - {type: gauge, name: requests, stream: errors}
"#;
        let err = build(doc, &CliConfig::default()).unwrap_err();
        assert!(err.to_string().contains("labels"), "{}", err);
    }

    #[test]
    fn test_fixed_name_shared_when_compatible() {
        let doc = r#"
flows:
- {name: a, query: q, prometheusMetricTemplates: [{type: gauge, name: requests}]}
- {name: b, query: q, prometheusMetricTemplates: [{type: gauge, name: requests}]}
- {name: c, query: q, prometheusMetricTemplates: [{type: counter}]}
"#;
        assert_eq!(build(doc, &CliConfig::default()).unwrap().flows.len(), 3);
    }

    #[test]
    fn test_duplicate_grouping_rejected() {
        let doc = "grouping:\n- label: instance\n- label: instance\n";
        assert!(build(doc, &CliConfig::default()).is_err());
    }

    #[test]
    fn test_invalid_grouping_label_rejected() {
        let doc = "grouping:\n- label: 'not a label'\n";
        assert!(build(doc, &CliConfig::default()).is_err());
    }

    #[test]
    fn test_grouping_without_condition_has_no_threshold() {
        let config = build("grouping:\n- label: instance\n", &CliConfig::default()).unwrap();
        assert_eq!(config.groupings.get("instance"), Some(&0));
    }

    #[test]
    fn test_app_config_cli_override() {
        let cli = CliConfig {
            host: Some("127.0.0.1".to_string()),
            port: Some(9000),
            observability_port: Some(9001),
            feed_dir: Some(PathBuf::from("/var/run/sfx")),
            on_flow_failure: Some(FlowFailurePolicy::Shutdown),
            ..Default::default()
        };
        let doc = "server: {host: 10.0.0.1, port: 1, observabilityPort: 2}\nsupervision: {onFlowFailure: restart}\n";
        let config = build(doc, &cli).unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.observability_port, 9001);
        assert_eq!(config.sfx.feed_dir, Some(PathBuf::from("/var/run/sfx")));
        assert_eq!(
            config.supervision.on_flow_failure,
            FlowFailurePolicy::Shutdown
        );
    }

    #[test]
    fn test_app_config_validation_port_collision() {
        let err = build("server: {port: 9000, observabilityPort: 9000}\n", &CliConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("cannot be the same"));
    }

    #[test]
    fn test_app_config_validation_port_zero() {
        let err = build("server: {port: 0}\n", &CliConfig::default()).unwrap_err();
        assert!(err.to_string().contains("server.port must be greater than 0"));
    }

    #[test]
    fn test_app_config_validation_empty_host() {
        let cli = CliConfig {
            host: Some("  ".to_string()),
            ..Default::default()
        };
        let err = build("{}", &cli).unwrap_err();
        assert!(err.to_string().contains("server.host must not be empty"));

        let cli = CliConfig {
            host: Some("localhost".to_string()),
            ..Default::default()
        };
        let err = build("{}", &cli).unwrap_err();
        assert!(err.to_string().contains("must be an IP address"));
    }

    #[test]
    fn test_app_config_validation_zero_restart_attempts() {
        let doc = "supervision: {restart: {maxAttempts: 0}}\n";
        assert!(build(doc, &CliConfig::default()).is_err());
    }
}
