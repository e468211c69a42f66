//! Deployment models

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;

/// Lifecycle state of a remote deployment as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeploymentState {
    Queued,
    Initializing,
    Building,
    Ready,
    Error,
    Canceled,
    /// Any state string the provider sends that we do not model
    Unknown(String),
}

impl DeploymentState {
    pub fn as_str(&self) -> &str {
        match self {
            DeploymentState::Queued => "QUEUED",
            DeploymentState::Initializing => "INITIALIZING",
            DeploymentState::Building => "BUILDING",
            DeploymentState::Ready => "READY",
            DeploymentState::Error => "ERROR",
            DeploymentState::Canceled => "CANCELED",
            DeploymentState::Unknown(raw) => raw.as_str(),
        }
    }

    /// Sub-states of "deploying": queued, initializing or building
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            DeploymentState::Queued | DeploymentState::Initializing | DeploymentState::Building
        )
    }

    /// Terminal states end a tracking session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentState::Ready | DeploymentState::Error | DeploymentState::Canceled
        )
    }

    /// Terminal states that count as a failed deployment
    pub fn is_failure(&self) -> bool {
        matches!(self, DeploymentState::Error | DeploymentState::Canceled)
    }

    /// Human readable status line
    pub fn label(&self) -> &'static str {
        match self {
            DeploymentState::Queued | DeploymentState::Initializing => "Deployment queued",
            DeploymentState::Building => "Building on Vercel",
            DeploymentState::Ready => "Deployment completed successfully",
            DeploymentState::Error => "Deployment failed",
            DeploymentState::Canceled => "Deployment canceled",
            DeploymentState::Unknown(_) => "Unknown deployment state",
        }
    }

    /// Status badge asset for this state
    pub fn badge_asset(&self) -> &'static str {
        match self {
            DeploymentState::Canceled => "vercel-none.svg",
            DeploymentState::Error => "vercel-failed.svg",
            DeploymentState::Ready => "vercel-ready.svg",
            DeploymentState::Building => "vercel-building.svg",
            _ => "vercel-pending.svg",
        }
    }
}

impl std::fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for DeploymentState {
    fn from(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "QUEUED" => DeploymentState::Queued,
            "INITIALIZING" => DeploymentState::Initializing,
            "BUILDING" => DeploymentState::Building,
            "READY" => DeploymentState::Ready,
            "ERROR" => DeploymentState::Error,
            "CANCELED" | "CANCELLED" => DeploymentState::Canceled,
            _ => DeploymentState::Unknown(s.to_string()),
        }
    }
}

impl serde::Serialize for DeploymentState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for DeploymentState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(DeploymentState::from(s.as_str()))
    }
}

/// Target environment of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Preview,
}

/// One remote build, read-only on our side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub id: String,
    pub state: DeploymentState,
    pub created_at: DateTime<Utc>,
    pub branch: String,
    pub commit_message: Option<String>,
    pub author: Option<String>,
    pub environment: Environment,
}

/// Deployment list envelope returned by the provider
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentListResponse {
    #[serde(default)]
    pub deployments: Vec<RawDeployment>,
}

/// Deployment as the provider serializes it
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDeployment {
    #[serde(alias = "id")]
    pub uid: String,

    #[serde(default)]
    pub state: Option<String>,

    #[serde(default)]
    pub ready_state: Option<String>,

    /// Milliseconds since the epoch
    #[serde(default)]
    pub created_at: Option<i64>,

    /// Milliseconds since the epoch (older API field)
    #[serde(default)]
    pub created: Option<i64>,

    #[serde(default)]
    pub target: Option<String>,

    #[serde(default)]
    pub meta: Option<RawDeploymentMeta>,

    #[serde(default)]
    pub creator: Option<RawCreator>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDeploymentMeta {
    #[serde(default)]
    pub github_commit_ref: Option<String>,

    #[serde(default)]
    pub github_commit_message: Option<String>,

    #[serde(default)]
    pub github_commit_author_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCreator {
    #[serde(default)]
    pub username: Option<String>,
}

impl TryFrom<RawDeployment> for DeploymentRecord {
    type Error = GatewayError;

    fn try_from(raw: RawDeployment) -> Result<Self, Self::Error> {
        let millis = raw.created_at.or(raw.created).ok_or_else(|| {
            GatewayError::InvalidResponse(format!("deployment {} has no creation time", raw.uid))
        })?;
        let created_at = Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
            GatewayError::InvalidResponse(format!("deployment {} has a bad timestamp", raw.uid))
        })?;

        let state = raw
            .state
            .or(raw.ready_state)
            .map(|s| DeploymentState::from(s.as_str()))
            .unwrap_or_else(|| DeploymentState::Unknown(String::new()));

        let meta = raw.meta.unwrap_or_default();
        let branch = meta
            .github_commit_ref
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| "main".to_string());
        let environment = match raw.target.as_deref() {
            Some("production") => Environment::Production,
            Some(_) => Environment::Preview,
            None if branch == "main" || branch == "master" => Environment::Production,
            None => Environment::Preview,
        };

        Ok(Self {
            id: raw.uid,
            state,
            created_at,
            branch,
            commit_message: meta.github_commit_message,
            author: raw
                .creator
                .and_then(|c| c.username)
                .or(meta.github_commit_author_name),
            environment,
        })
    }
}
