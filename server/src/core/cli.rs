use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::constants::{
    ENV_CONFIG, ENV_FEED_DIR, ENV_HOST, ENV_OBSERVABILITY_PORT, ENV_ON_FLOW_FAILURE, ENV_PORT,
};
use crate::domain::ingest::FlowFailurePolicy;

#[derive(Parser)]
#[command(name = "sfxbridge")]
#[command(version, about = "SignalFx SignalFlow to Prometheus metric bridge", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server host address
    #[arg(long, short = 'H', global = true, env = ENV_HOST)]
    pub host: Option<String>,

    /// Scrape server port
    #[arg(long, short = 'p', global = true, env = ENV_PORT)]
    pub port: Option<u16>,

    /// Self-observability server port
    #[arg(long, global = true, env = ENV_OBSERVABILITY_PORT)]
    pub observability_port: Option<u16>,

    /// Path to config file (YAML or JSON)
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Directory of per-flow JSON lines feeds (overrides sfx.feedDir)
    #[arg(long, global = true, env = ENV_FEED_DIR)]
    pub feed_dir: Option<PathBuf>,

    /// What to do when a flow terminates (keep-serving, shutdown, restart)
    #[arg(long, global = true, env = ENV_ON_FLOW_FAILURE, value_parser = parse_flow_failure_policy)]
    pub on_flow_failure: Option<FlowFailurePolicy>,
}

/// Parse flow failure policy from CLI/env string
fn parse_flow_failure_policy(s: &str) -> Result<FlowFailurePolicy, String> {
    match s.to_lowercase().replace(['-', '_'], "").as_str() {
        "keepserving" => Ok(FlowFailurePolicy::KeepServing),
        "shutdown" => Ok(FlowFailurePolicy::Shutdown),
        "restart" => Ok(FlowFailurePolicy::Restart),
        _ => Err(format!(
            "Invalid flow failure policy '{}'. Valid options: keep-serving, shutdown, restart",
            s
        )),
    }
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Start the bridge (default command)
    Serve,
    /// Load and validate the config file, print a summary and exit
    Validate,
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub observability_port: Option<u16>,
    pub config: Option<PathBuf>,
    pub feed_dir: Option<PathBuf>,
    pub on_flow_failure: Option<FlowFailurePolicy>,
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        host: cli.host,
        port: cli.port,
        observability_port: cli.observability_port,
        config: cli.config,
        feed_dir: cli.feed_dir,
        on_flow_failure: cli.on_flow_failure,
    };
    (config, cli.command)
}
