//! Utility functions

use chrono::{DateTime, Utc};
use colored::Colorize;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::deploy::validate::{validate_api_key, validate_project_id, validate_webhook_url};
use crate::storage::layout::StorageLayout;
use crate::storage::secrets::{FileSecretStore, SecretKey, SecretStore};
use crate::storage::settings::Settings;
use crate::storage::site::SiteSettingsStore;

/// Version information for the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Wall clock used for deployment timestamps
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Backoff options for adaptive intervals
#[derive(Debug, Clone)]
pub struct BackoffOptions {
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self {
            multiplier: 1.5,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Scale `base` by `multiplier^attempt`, capped at `max_delay`.
///
/// No backoff is applied when `attempt` is zero, even if `base` itself exceeds the cap.
pub fn calc_exp_backoff(base: Duration, options: &BackoffOptions, attempt: u32) -> Duration {
    if attempt == 0 {
        return base;
    }
    let exponent = attempt.min(i32::MAX as u32) as i32;
    let delay_secs = base.as_secs_f64() * options.multiplier.powi(exponent);
    let capped_delay = delay_secs.min(options.max_delay.as_secs_f64());
    if !capped_delay.is_finite() || capped_delay < 0.0 {
        return options.max_delay;
    }
    Duration::from_secs_f64(capped_delay)
}

/// Strip trailing slashes from a URL
pub fn trim_url(url: &str) -> &str {
    url.trim_end_matches('/')
}

/// Check the on-disk configuration and print one line per check.
///
/// Returns `true` when every check passed.
pub async fn run_diagnostic(layout: &StorageLayout) -> bool {
    println!("{}", "vercelwp diagnostic".bold());
    println!("  base directory: {}", layout.base_dir.display());

    let mut ok = true;

    let settings = layout.settings_file();
    let settings_check = match settings.read_json_opt::<Settings>().await {
        Ok(Some(_)) => Ok("settings file is valid".to_string()),
        Ok(None) => Ok("no settings file, using defaults".to_string()),
        Err(e) => Err(format!("settings file unreadable: {}", e)),
    };
    ok &= report(settings_check);

    let secrets = FileSecretStore::new(layout.secrets_file());
    for key in [SecretKey::WebhookAddress, SecretKey::ApiKey, SecretKey::ProjectId] {
        let check = match secrets.get(key).await {
            Ok(value) => {
                let value = value.as_ref().map(|v| v.expose_secret()).unwrap_or("");
                let valid = match key {
                    SecretKey::WebhookAddress => validate_webhook_url(value).map(|_| ()),
                    SecretKey::ApiKey => validate_api_key(value),
                    SecretKey::ProjectId => validate_project_id(value),
                };
                valid
                    .map(|_| format!("{} is valid", key.as_str()))
                    .map_err(|e| format!("{}: {}", key.as_str(), e))
            }
            Err(e) => Err(format!("{}: {}", key.as_str(), e)),
        };
        ok &= report(check);
    }

    let site = SiteSettingsStore::new(layout.site_file());
    let site_check = match site.load().await {
        Ok(site) => match (site.production_url(), site.preview_url()) {
            (Some(production), _) => Ok(format!("production URL is {}", production)),
            (None, Some(preview)) => Ok(format!("preview URL is {} (no production URL)", preview)),
            (None, None) => Err("neither production nor preview URL is set".to_string()),
        },
        Err(e) => Err(format!("site settings unreadable: {}", e)),
    };
    ok &= report(site_check);

    ok
}

fn report(check: Result<String, String>) -> bool {
    match check {
        Ok(message) => {
            println!("  {} {}", "[ok]".green(), message);
            true
        }
        Err(message) => {
            println!("  {} {}", "[fail]".red(), message);
            false
        }
    }
}
