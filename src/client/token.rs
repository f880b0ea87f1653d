// Token acquisition and caching
//
// `TokenCache` owns the only shared mutable auth state: the cached token and
// the in-flight acquisition. Concurrent callers that find no usable token
// join the same acquisition instead of starting their own.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::auth::{authorize_url, parse_redirect};
use crate::config::types::{AccessToken, FlowMonitorConfig};
use crate::error::{FlowMonitorError, Result};

/// Tokens expiring within this many seconds are refreshed before use
pub const REFRESH_MARGIN_SECONDS: i64 = 300;

/// Source of bearer tokens
#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    /// Human-friendly identifier used in logs
    fn provider_name(&self) -> &'static str;

    /// Obtain a fresh token
    async fn acquire(&self) -> Result<AccessToken>;
}

/// Provider returning a pre-acquired token
pub struct StaticTokenProvider {
    token: String,
    validity_seconds: i64,
}

impl StaticTokenProvider {
    /// Token assumed valid for one hour from each acquisition
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            validity_seconds: 3600,
        }
    }

    pub fn with_validity(mut self, seconds: i64) -> Self {
        self.validity_seconds = seconds;
        self
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    fn provider_name(&self) -> &'static str {
        "static"
    }

    async fn acquire(&self) -> Result<AccessToken> {
        Ok(AccessToken::new(self.token.clone(), self.validity_seconds))
    }
}

/// Interactive implicit-grant sign-in driven from the terminal.
///
/// Reads the app registration from shared configuration on every
/// acquisition, so saved credentials apply to the next sign-in.
pub struct InteractiveTokenProvider {
    config: Arc<RwLock<FlowMonitorConfig>>,
}

impl InteractiveTokenProvider {
    pub fn new(config: Arc<RwLock<FlowMonitorConfig>>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TokenProvider for InteractiveTokenProvider {
    fn provider_name(&self) -> &'static str {
        "interactive"
    }

    async fn acquire(&self) -> Result<AccessToken> {
        let url = {
            let config = self.config.read().await;
            authorize_url(&config)?
        };

        info!("Launching interactive sign-in");
        if let Err(e) = open::that(url.as_str()) {
            warn!("Could not open a browser: {}", e);
        }
        eprintln!("Sign in at:\n  {}\n", url);
        eprintln!("Then paste the full URL you were redirected to and press Enter:");

        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        let read = stdin
            .read_line(&mut line)
            .await
            .map_err(|e| FlowMonitorError::Auth(format!("Failed to read redirect URL: {}", e)))?;
        if read == 0 || line.trim().is_empty() {
            return Err(FlowMonitorError::Auth("Sign-in cancelled".to_string()));
        }

        parse_redirect(&line)
    }
}

type PendingToken = Shared<BoxFuture<'static, Result<AccessToken>>>;

#[derive(Default)]
struct CacheState {
    cached: Option<AccessToken>,
    pending: Option<PendingToken>,
    /// Bumped by `clear`; acquisitions started earlier must not repopulate the cache
    generation: u64,
}

/// Single-flight token cache
#[derive(Clone)]
pub struct TokenCache {
    provider: Arc<dyn TokenProvider>,
    state: Arc<Mutex<CacheState>>,
    margin_seconds: i64,
}

impl TokenCache {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            state: Arc::new(Mutex::new(CacheState::default())),
            margin_seconds: REFRESH_MARGIN_SECONDS,
        }
    }

    /// Return a usable token, acquiring one if needed.
    ///
    /// With `force_refresh` the cached token is ignored, but an acquisition
    /// already in flight is still joined.
    pub async fn get_token(&self, force_refresh: bool) -> Result<String> {
        let pending = {
            let mut state = self.state.lock().await;

            if !force_refresh {
                if let Some(token) = &state.cached {
                    if !token.expires_within(self.margin_seconds) {
                        debug!("Using cached token");
                        return Ok(token.token.clone());
                    }
                }
            }

            match &state.pending {
                Some(pending) => {
                    debug!("Waiting for in-flight token acquisition");
                    pending.clone()
                }
                None => {
                    let pending = self.start_acquisition(&mut state);
                    state.pending = Some(pending.clone());
                    pending
                }
            }
        };

        pending.await.map(|token| token.token)
    }

    fn start_acquisition(&self, state: &mut CacheState) -> PendingToken {
        let provider = Arc::clone(&self.provider);
        let shared_state = Arc::clone(&self.state);
        let generation = state.generation;

        debug!("Starting token acquisition via {} provider", provider.provider_name());

        // Runs to completion even if every waiter goes away
        let handle = tokio::spawn(async move {
            let result = provider.acquire().await;
            let mut state = shared_state.lock().await;
            if state.generation == generation {
                state.pending = None;
                if let Ok(token) = &result {
                    state.cached = Some(token.clone());
                }
            }
            result
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                Err(FlowMonitorError::Auth(format!(
                    "Token acquisition task failed: {}",
                    e
                )))
            })
        }
        .boxed()
        .shared()
    }

    /// Drop the cached token if it is still `token`
    pub async fn invalidate(&self, token: &str) {
        let mut state = self.state.lock().await;
        if state.cached.as_ref().map_or(false, |t| t.token == token) {
            debug!("Invalidating rejected token");
            state.cached = None;
        }
    }

    /// Forget the cached token and detach any in-flight acquisition
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.cached = None;
        state.pending = None;
        state.generation += 1;
        info!("Token cache cleared");
    }
}
