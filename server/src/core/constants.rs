// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display)
pub const APP_NAME: &str = "SFx Bridge";

/// Application name in lowercase (for paths, identifiers and log targets)
pub const APP_NAME_LOWER: &str = "sfxbridge";

// =============================================================================
// Configuration Files
// =============================================================================

/// Default config document path (container layout)
pub const DEFAULT_CONFIG_PATH: &str = "/config/config.yml";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "SFXBRIDGE_CONFIG";

// =============================================================================
// Environment Variables - Server
// =============================================================================

/// Environment variable for server host
pub const ENV_HOST: &str = "SFXBRIDGE_HOST";

/// Environment variable for the scrape server port
pub const ENV_PORT: &str = "SFXBRIDGE_PORT";

/// Environment variable for the self-observability server port
pub const ENV_OBSERVABILITY_PORT: &str = "SFXBRIDGE_OBSERVABILITY_PORT";

/// Environment variable for the feed transport directory
pub const ENV_FEED_DIR: &str = "SFXBRIDGE_FEED_DIR";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "SFXBRIDGE_LOG";

// =============================================================================
// Server Defaults
// =============================================================================

/// Default server host
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default scrape server port
pub const DEFAULT_PORT: u16 = 1236;

/// Default self-observability server port
pub const DEFAULT_OBSERVABILITY_PORT: u16 = 1237;

/// Scrape requests are abandoned after this many seconds
pub const SCRAPE_TIMEOUT_SECS: u64 = 5;

// =============================================================================
// SignalFx
// =============================================================================

/// Default SignalFx realm
pub const DEFAULT_SFX_REALM: &str = "us1";

/// Internal time series property carrying the publish stream label
pub const SFX_STREAM_LABEL_PROPERTY: &str = "sf_streamLabel";

/// File extension of per-flow feed files
pub const FEED_FILE_EXTENSION: &str = "jsonl";

// =============================================================================
// Flow Supervision
// =============================================================================

/// Environment variable for the flow failure policy
pub const ENV_ON_FLOW_FAILURE: &str = "SFXBRIDGE_ON_FLOW_FAILURE";

/// Default number of restart attempts with the `restart` policy
pub const DEFAULT_RESTART_MAX_ATTEMPTS: u32 = 5;

/// Default base delay between restart attempts (doubles every attempt)
pub const DEFAULT_RESTART_BASE_DELAY_MS: u64 = 1000;

/// A run lasting at least this long resets the restart attempt budget
pub const DEFAULT_RESTART_RESET_AFTER_SECS: u64 = 600;

// =============================================================================
// Self-Observability Metrics
// =============================================================================

/// Data points received per flow and stream
pub const METRIC_FLOW_RECEIVED: &str = "sfxbridge_flow_metrics_received_total";

/// Data points dropped per flow and stream
pub const METRIC_FLOW_FAILED: &str = "sfxbridge_flow_metrics_failed_total";

/// Unix time of the last data point per flow and stream
pub const METRIC_FLOW_LAST_RECEIVED: &str = "sfxbridge_flow_last_received_seconds";

// =============================================================================
// Shutdown
// =============================================================================

/// Maximum time to wait for background tasks during shutdown
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;
