//! Core application

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::{ApiServer, ScrapeState};
use crate::core::banner;
use crate::core::cli::{self, CliConfig, Commands};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::data::signalflow::{FeedClient, MemoryClient, SignalFlowClient};
use crate::domain::catalog::MetricCatalog;
use crate::domain::ingest::{FlowCoordinator, FlowStats};

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub client: Arc<dyn SignalFlowClient>,
    pub catalog: Arc<MetricCatalog>,
    pub stats: Arc<FlowStats>,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        tracing::trace!(command = ?command, "Parsed command");

        match command {
            Some(Commands::Validate) => Self::validate(&cli_config),
            Some(Commands::Serve) | None => {
                let app = Self::init(&cli_config)?;
                Self::start_server(app).await
            }
        }
    }

    /// Load and validate the configuration, print a summary and exit
    fn validate(cli: &CliConfig) -> Result<()> {
        let config = AppConfig::load(cli)?;
        banner::print_summary(&config);
        Ok(())
    }

    fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        Self::from_config(config)
    }

    /// Wire the catalog, counters and streaming client for a loaded config
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let client: Arc<dyn SignalFlowClient> = match config.sfx.feed_dir {
            Some(ref dir) => Arc::new(FeedClient::new(dir)),
            None => {
                tracing::warn!(
                    "No sfx.feedDir configured, flows run against an empty in-memory client"
                );
                Arc::new(MemoryClient::new())
            }
        };

        let stats = FlowStats::new().context("Failed to create flow counters")?;

        Ok(Self {
            shutdown: ShutdownService::new(),
            config,
            client,
            catalog: Arc::new(MetricCatalog::new()),
            stats: Arc::new(stats),
        })
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    async fn start_server(app: Self) -> Result<()> {
        // Install signal handlers FIRST (before any blocking calls)
        app.shutdown.install_signal_handlers();

        app.start_flows().await;

        banner::print_banner(&app.config, app.client.name());

        let server = ApiServer::new(
            app.config.server.clone(),
            ScrapeState::new(app.catalog.clone(), app.config.groupings.clone()),
            app.stats.clone(),
        );
        let served = server.start(app.shutdown.clone()).await;
        app.shutdown.shutdown().await;
        served?;

        match app.shutdown.failure() {
            Some(reason) => anyhow::bail!("{}", reason),
            None => Ok(()),
        }
    }

    /// Spawn one supervised task per configured flow
    pub async fn start_flows(&self) {
        let coordinator = FlowCoordinator::new(
            Arc::clone(&self.client),
            Arc::clone(&self.catalog),
            Arc::clone(&self.stats),
            self.config.supervision,
        );
        coordinator.start(&self.config.flows, &self.shutdown).await;
        tracing::info!(
            flows = self.config.flows.len(),
            source = self.client.name(),
            "Flows started"
        );
    }
}
