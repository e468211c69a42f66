//! Mapping between the authoring origin and the published origins

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::storage::site::SiteSettings;

/// Cache-buster query parameter appended to preview links
pub const PREVIEW_PARAM: &str = "wp_preview";

/// Language of a piece of content on a multilingual site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentLanguage {
    pub code: String,
    pub primary: String,
}

impl ContentLanguage {
    pub fn new(code: impl Into<String>, primary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            primary: primary.into(),
        }
    }

    fn needs_prefix(&self) -> bool {
        !self.code.is_empty()
            && !self.primary.is_empty()
            && !self.code.eq_ignore_ascii_case(&self.primary)
    }
}

/// Resolve absolute and root-relative links alike
fn parse_loose(url: &str) -> Option<Url> {
    match Url::parse(url) {
        Ok(parsed) => Some(parsed),
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse("http://localhost/")
            .ok()?
            .join(url)
            .ok(),
        Err(_) => None,
    }
}

/// Path and query of `url`, path always rooted
fn path_and_query(url: &Url) -> String {
    let mut out = url.path().to_string();
    if !out.starts_with('/') {
        out.insert(0, '/');
    }
    if let Some(query) = url.query() {
        out.push('?');
        out.push_str(query);
    }
    out
}

/// Graft the path and query of an authoring URL onto the preview origin.
///
/// Returns the input unchanged when no preview URL is configured.
pub fn map_to_preview(url: &str, settings: &SiteSettings, now: DateTime<Utc>) -> String {
    let Some(preview) = settings.preview_url() else {
        return url.to_string();
    };

    let tail = parse_loose(url)
        .map(|parsed| path_and_query(&parsed))
        .unwrap_or_else(|| "/".to_string());
    let separator = if tail.contains('?') { '&' } else { '?' };

    format!(
        "{}{}{}{}={}",
        preview,
        tail,
        separator,
        PREVIEW_PARAM,
        now.timestamp()
    )
}

/// Point a permalink at the production origin.
///
/// Content in a non-primary language gets a `/<lang>/` path prefix unless it
/// already has one. Permalinks outside the authoring origin are returned as is.
pub fn rewrite_permalink(
    permalink: &str,
    settings: &SiteSettings,
    language: Option<&ContentLanguage>,
) -> String {
    let (Some(production), Some(home)) = (settings.production_url(), settings.home_url()) else {
        return permalink.to_string();
    };
    if !permalink.contains(home) {
        return permalink.to_string();
    }

    let rewritten = permalink.replace(home, production);
    let Some(language) = language.filter(|l| l.needs_prefix()) else {
        return rewritten;
    };
    let Ok(mut url) = Url::parse(&rewritten) else {
        return rewritten;
    };

    let path = url.path().trim_start_matches('/').to_string();
    let code = language.code.to_ascii_lowercase();
    let lowered = path.to_ascii_lowercase();
    if lowered == code || lowered.starts_with(&format!("{}/", code)) {
        return rewritten;
    }

    let mut prefixed = format!("/{}/{}", language.code, path);
    while prefixed.contains("//") {
        prefixed = prefixed.replace("//", "/");
    }
    url.set_path(&prefixed);
    debug!("Permalink {} rewritten to {}", permalink, url);
    url.to_string()
}

/// Where a visitor of the authoring front end should be sent.
///
/// Targets the production origin, or the preview origin when no production
/// URL is set. `None` when no target is configured or `host` already is it.
pub fn frontend_redirect(host: &str, request_uri: &str, settings: &SiteSettings) -> Option<String> {
    let target = settings.production_url().or(settings.preview_url())?;
    let target_host = Url::parse(target).ok()?.host_str()?.to_ascii_lowercase();

    let current_host = host.split(':').next().unwrap_or(host).to_ascii_lowercase();
    if current_host == target_host {
        return None;
    }

    if request_uri.starts_with('/') {
        Some(format!("{}{}", target, request_uri))
    } else {
        Some(format!("{}/{}", target, request_uri))
    }
}
