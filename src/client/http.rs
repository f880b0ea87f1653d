// Authenticated JSON fetch layer for Flow Monitor
//
// Every API call goes through `ApiClient`: bearer token from the cache, one
// retry on 401 with a fresh token, and bounded diagnostics on failure.

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::token::TokenCache;
use crate::config::types::FlowMonitorConfig;
use crate::error::{excerpt, FlowMonitorError, Result};

/// Configuration for HTTP requests
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Timeout for a single request
    pub request_timeout: Duration,
    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            user_agent: format!("flow-monitor/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl From<&FlowMonitorConfig> for ApiClientConfig {
    fn from(config: &FlowMonitorConfig) -> Self {
        Self {
            request_timeout: Duration::from_secs(config.request_timeout_seconds.max(1)),
            ..Default::default()
        }
    }
}

/// JSON-over-HTTPS client with bearer authentication
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    tokens: TokenCache,
}

impl ApiClient {
    /// Create a client with default settings
    pub fn new(tokens: TokenCache) -> Result<Self> {
        Self::with_config(tokens, ApiClientConfig::default())
    }

    /// Create a client with custom settings
    pub fn with_config(tokens: TokenCache, config: ApiClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent)
            .build()?;
        Ok(Self { http, tokens })
    }

    /// The token cache backing this client
    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    /// GET `url` with a bearer token and parse the JSON body.
    ///
    /// A 401 invalidates the token and retries once; a second 401 is an
    /// authentication failure.
    pub async fn fetch_json(&self, url: &str) -> Result<Value> {
        debug!("Fetching with token: {}", url);

        let token = self.tokens.get_token(false).await?;
        let response = self.send(url, Some(&token)).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return read_json(response).await;
        }

        debug!("401 received, refreshing token and retrying");
        self.tokens.invalidate(&token).await;
        let token = self.tokens.get_token(false).await?;
        let response = self.send(url, Some(&token)).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            warn!("Request still unauthorized after token refresh");
            return Err(FlowMonitorError::Auth(format!(
                "Request unauthorized after token refresh: {}",
                excerpt(&body)
            )));
        }
        read_json(response).await
    }

    /// GET `url` without credentials (pre-signed links) and parse the JSON body
    pub async fn fetch_json_unauthenticated(&self, url: &str) -> Result<Value> {
        debug!("Fetching without token: {}", url);

        let response = self.send(url, None).await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(FlowMonitorError::http(status.as_u16(), &body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn send(&self, url: &str, token: Option<&str>) -> Result<Response> {
        let mut request = self.http.get(url).header(ACCEPT, "application/json");
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        Ok(request.send().await?)
    }
}

async fn read_json(response: Response) -> Result<Value> {
    let status = response.status();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let body = response.text().await?;

    if !status.is_success() {
        error!("HTTP error {}: {}", status.as_u16(), excerpt(&body));
        return Err(FlowMonitorError::http(status.as_u16(), &body));
    }
    if !content_type.contains("application/json") {
        return Err(FlowMonitorError::Format(format!(
            "Non-JSON response. Got: {}",
            content_type
        )));
    }
    Ok(serde_json::from_str(&body)?)
}
