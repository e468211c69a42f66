//! Configuration validation for provider credentials

use url::Url;

use crate::errors::DeployError;

/// Hosts allowed to receive build-trigger requests, plus any subdomain
pub const ALLOWED_WEBHOOK_DOMAINS: [&str; 3] = ["api.vercel.com", "vercel.com", "vercel.app"];

const API_KEY_LEN: std::ops::RangeInclusive<usize> = 20..=200;
const PROJECT_ID_LEN: std::ops::RangeInclusive<usize> = 5..=100;

/// Validate a build-trigger URL: HTTPS and an allow-listed host.
///
/// The error message never echoes the URL since its path is a credential.
pub fn validate_webhook_url(raw: &str) -> Result<Url, DeployError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DeployError::NotConfigured("webhook URL".to_string()));
    }

    let url = Url::parse(raw)
        .map_err(|_| DeployError::InvalidConfiguration("webhook URL is not a valid URL".to_string()))?;

    if url.scheme() != "https" {
        return Err(DeployError::InvalidConfiguration(
            "webhook URL must use HTTPS".to_string(),
        ));
    }

    let host = url
        .host_str()
        .map(|h| h.to_ascii_lowercase())
        .ok_or_else(|| DeployError::InvalidConfiguration("webhook URL has no host".to_string()))?;

    if !is_allowed_host(&host) {
        return Err(DeployError::InvalidConfiguration(format!(
            "webhook host {} is not an allowed provider domain",
            host
        )));
    }

    Ok(url)
}

fn is_allowed_host(host: &str) -> bool {
    ALLOWED_WEBHOOK_DOMAINS.iter().any(|domain| {
        host == *domain
            || host
                .strip_suffix(domain)
                .is_some_and(|prefix| prefix.ends_with('.') && prefix.len() > 1)
    })
}

/// Validate a provider API key: 20 to 200 of `[A-Za-z0-9_-]`
pub fn validate_api_key(key: &str) -> Result<(), DeployError> {
    validate_token("API key", key, API_KEY_LEN)
}

/// Validate a provider project id: 5 to 100 of `[A-Za-z0-9_-]`
pub fn validate_project_id(id: &str) -> Result<(), DeployError> {
    validate_token("project id", id, PROJECT_ID_LEN)
}

fn validate_token(
    what: &str,
    value: &str,
    len: std::ops::RangeInclusive<usize>,
) -> Result<(), DeployError> {
    if value.is_empty() {
        return Err(DeployError::NotConfigured(what.to_string()));
    }
    if !len.contains(&value.len()) {
        return Err(DeployError::InvalidConfiguration(format!(
            "{} must be between {} and {} characters",
            what,
            len.start(),
            len.end()
        )));
    }
    if !value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(DeployError::InvalidConfiguration(format!(
            "{} may only contain letters, digits, '_' and '-'",
            what
        )));
    }
    Ok(())
}
