//! Settings file management

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON formatted logs
    #[serde(default)]
    pub log_json: bool,

    /// Also write rolling log files under the logs directory
    #[serde(default)]
    pub log_to_file: bool,

    /// Local operator server
    #[serde(default)]
    pub server: ServerSettings,

    /// Deployment status polling
    #[serde(default)]
    pub polling: PollingSettings,

    /// Provider endpoints and timeouts
    #[serde(default)]
    pub gateway: GatewaySettings,

    /// Content URL migration
    #[serde(default)]
    pub migration: MigrationSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            server: ServerSettings::default(),
            polling: PollingSettings::default(),
            gateway: GatewaySettings::default(),
            migration: MigrationSettings::default(),
        }
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8787
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Polling settings, all durations in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSettings {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_building_interval_ms")]
    pub building_interval_ms: u64,

    #[serde(default = "default_ready_interval_ms")]
    pub ready_interval_ms: u64,

    #[serde(default = "default_error_interval_ms")]
    pub error_interval_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_max_polling_time_ms")]
    pub max_polling_time_ms: u64,

    /// A persisted session older than this is abandoned on startup
    #[serde(default = "default_session_max_age_secs")]
    pub session_max_age_secs: u64,
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_building_interval_ms() -> u64 {
    2_000
}

fn default_ready_interval_ms() -> u64 {
    5_000
}

fn default_error_interval_ms() -> u64 {
    3_000
}

fn default_backoff_multiplier() -> f64 {
    1.5
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_max_polling_time_ms() -> u64 {
    300_000
}

fn default_session_max_age_secs() -> u64 {
    600
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            building_interval_ms: default_building_interval_ms(),
            ready_interval_ms: default_ready_interval_ms(),
            error_interval_ms: default_error_interval_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
            max_polling_time_ms: default_max_polling_time_ms(),
            session_max_age_secs: default_session_max_age_secs(),
        }
    }
}

/// Provider endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Deployment list endpoint, queried with `?projectId=`
    #[serde(default = "default_deployments_url")]
    pub deployments_url: String,

    /// Public status page endpoint
    #[serde(default = "default_status_url")]
    pub status_url: String,

    #[serde(default = "default_trigger_timeout_secs")]
    pub trigger_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// TTL for the cached service status and deployment list
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_deployments_url() -> String {
    "https://api.vercel.com/v6/deployments".to_string()
}

fn default_status_url() -> String {
    "https://vercel-status.com/api/v2/status.json".to_string()
}

fn default_trigger_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_cache_ttl_secs() -> u64 {
    30
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            deployments_url: default_deployments_url(),
            status_url: default_status_url(),
            trigger_timeout_secs: default_trigger_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Content migration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Records processed per invocation before a partial report is returned
    #[serde(default = "default_max_records_per_run")]
    pub max_records_per_run: usize,

    /// Also decode JSON-encoded values (objects and arrays)
    #[serde(default)]
    pub json_values: bool,
}

fn default_batch_size() -> usize {
    50
}

fn default_max_records_per_run() -> usize {
    1_000
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_records_per_run: default_max_records_per_run(),
            json_values: false,
        }
    }
}
