//! Error types for the bridge

use thiserror::Error;

/// Main error type for the bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Deploy error: {0}")]
    Deploy(#[from] DeployError),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors returned by the deployment provider gateway
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("provider responded with HTTP {code}")]
    HttpError { code: u16 },

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("no deployment data found")]
    NoData,

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return GatewayError::HttpError {
                code: status.as_u16(),
            };
        }
        if err.is_decode() {
            return GatewayError::InvalidResponse(err.to_string());
        }
        GatewayError::NetworkError(err.to_string())
    }
}

/// Errors surfaced by the deployment state machine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeployError {
    #[error("a deployment is already in progress")]
    AlreadyDeploying,

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("session storage failed: {0}")]
    Storage(String),
}

/// Errors surfaced by the content migrator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MigrationError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("datastore failure: {0}")]
    Store(String),

    #[error("no pending canonical URL update")]
    NoPendingUpdate,

    #[error("a migration is already running")]
    AlreadyRunning,
}
