//! HTTP client implementation

use std::time::Duration;

use reqwest::{header, Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use crate::errors::{BridgeError, GatewayError};

/// HTTP client for provider communication
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client with a default per-request timeout
    pub fn new(timeout: Duration) -> Result<Self, BridgeError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("vercelwp/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    /// Make a GET request and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        token: Option<&SecretString>,
        timeout: Option<Duration>,
    ) -> Result<T, GatewayError> {
        // Query strings may carry project ids; the path is enough for tracing
        debug!("GET {}", redact_query(url));

        let mut request = self.client.get(url);
        if let Some(token) = token {
            request = request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            );
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = Self::check_status("GET", request.send().await?).await?;
        Ok(response.json().await?)
    }

    /// Make a POST request without a body.
    ///
    /// Only the listed status codes count as success.
    pub async fn post_empty(
        &self,
        url: &str,
        timeout: Duration,
        accepted: &[u16],
    ) -> Result<u16, GatewayError> {
        debug!("POST {}", redact_query(url));

        let response = self
            .client
            .post(url)
            .header(header::CONTENT_LENGTH, 0)
            .timeout(timeout)
            .send()
            .await?;

        let code = response.status().as_u16();
        if !accepted.contains(&code) {
            let body = response.text().await.unwrap_or_default();
            error!("HTTP POST failed: {} - {}", code, truncate(&body, 200));
            return Err(GatewayError::HttpError { code });
        }

        Ok(code)
    }

    async fn check_status(method: &str, response: Response) -> Result<Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        error!("HTTP {} failed: {} - {}", method, status, truncate(&body, 200));
        Err(GatewayError::HttpError {
            code: status.as_u16(),
        })
    }
}

fn redact_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
