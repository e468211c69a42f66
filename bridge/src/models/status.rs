//! Provider service status models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health of a single provider subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubsystemHealth {
    Operational,
    Degraded,
    Outage,
    Unknown,
}

impl From<&str> for SubsystemHealth {
    fn from(s: &str) -> Self {
        let s = s.to_lowercase();
        if s == "operational" || s == "none" {
            SubsystemHealth::Operational
        } else if s.contains("degraded") || s == "minor" {
            SubsystemHealth::Degraded
        } else if s.contains("outage") || s == "major" || s == "critical" {
            SubsystemHealth::Outage
        } else {
            SubsystemHealth::Unknown
        }
    }
}

/// Snapshot of provider health, replaced wholesale on refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub api: SubsystemHealth,
    pub cdn: SubsystemHealth,
    pub deployments: SubsystemHealth,
    pub functions: SubsystemHealth,
    pub last_updated: DateTime<Utc>,
}

impl ServiceStatus {
    /// Fallback used whenever the status page cannot be read
    pub fn all_operational(now: DateTime<Utc>) -> Self {
        Self {
            api: SubsystemHealth::Operational,
            cdn: SubsystemHealth::Operational,
            deployments: SubsystemHealth::Operational,
            functions: SubsystemHealth::Operational,
            last_updated: now,
        }
    }

    pub fn is_all_operational(&self) -> bool {
        self.issues().is_empty()
    }

    /// Non-operational subsystems, e.g. `["CDN: outage"]`
    pub fn issues(&self) -> Vec<String> {
        [
            ("API", self.api),
            ("CDN", self.cdn),
            ("Deployments", self.deployments),
            ("Functions", self.functions),
        ]
        .into_iter()
        .filter(|(_, health)| *health != SubsystemHealth::Operational)
        .map(|(name, health)| {
            let health = serde_json::to_value(health)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            format!("{}: {}", name, health)
        })
        .collect()
    }
}

/// Body of the public status page
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusPageResponse {
    #[serde(default)]
    pub status: Option<StatusPageBody>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusPageBody {
    #[serde(default)]
    pub indicators: Option<Vec<StatusIndicator>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusIndicator {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
}

impl StatusPageResponse {
    /// Map indicators onto the four subsystems by substring match on the name.
    /// Unmatched indicators are ignored; missing indicators leave the subsystem operational.
    pub fn into_service_status(self, now: DateTime<Utc>) -> ServiceStatus {
        let mut status = ServiceStatus::all_operational(now);
        let indicators = self
            .status
            .and_then(|body| body.indicators)
            .unwrap_or_default();

        for indicator in indicators {
            let name = indicator.name.to_lowercase();
            let health = SubsystemHealth::from(indicator.status.as_str());
            if name.contains("api") {
                status.api = health;
            } else if name.contains("cdn") || name.contains("edge") {
                status.cdn = health;
            } else if name.contains("deployment") {
                status.deployments = health;
            } else if name.contains("function") {
                status.functions = health;
            }
        }

        status
    }
}
