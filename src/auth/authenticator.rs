//! Authenticator implementation
//!
//! Owns the configuration snapshot and cached token, and coordinates token
//! refresh so that at most one fetch is in flight regardless of how many
//! tasks discover an expired token at the same time.
//!
//! Concurrency layout: config and token state sit behind short, synchronous
//! `RwLock` critical sections; the `authenticated` flag is an `AtomicBool`
//! mirror of token validity; and the only async synchronization point is the
//! `refresh_gate` mutex guarding the fetch itself. Callers re-check validity
//! and a fetch epoch after acquiring the gate, so waiters behind a completed
//! refresh reuse its outcome (success or failure) instead of fetching
//! again.

use super::notify::{FailureListeners, ListenerId};
use super::types::{
    ServiceConfig, TokenErrorResponse, TokenFetchOutcome, TokenResponse, TokenState,
};
use crate::error::{Error, Result};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Manages bearer-token acquisition and caching for one service
pub struct Authenticator {
    /// Current configuration snapshot
    config: RwLock<ServiceConfig>,
    /// Cached token and its expiration
    state: RwLock<TokenState>,
    /// Set on fetch success, cleared on invalidation and while a refresh is
    /// in doubt; not re-evaluated when the token later expires
    authenticated: AtomicBool,
    /// Single-entrant gate serializing token fetches
    refresh_gate: Mutex<()>,
    /// Bumped after every completed fetch; lets callers that queued behind
    /// an in-flight fetch adopt its outcome instead of fetching again
    fetch_epoch: AtomicU64,
    /// Registered failure listeners
    listeners: FailureListeners,
    /// HTTP client used for token requests
    http_client: Client,
}

impl Authenticator {
    /// Create a new authenticator with its own HTTP client
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_client(config, Client::new())
    }

    /// Create an authenticator reusing an existing HTTP client
    pub fn with_client(config: ServiceConfig, http_client: Client) -> Self {
        Self {
            config: RwLock::new(config),
            state: RwLock::new(TokenState::default()),
            authenticated: AtomicBool::new(false),
            refresh_gate: Mutex::new(()),
            fetch_epoch: AtomicU64::new(0),
            listeners: FailureListeners::new(),
            http_client,
        }
    }

    /// Replace the configuration snapshot
    ///
    /// A change to endpoint, username, or password (compared field by field
    /// against the previous snapshot) invalidates the cached token. Changing
    /// only default headers leaves the token untouched.
    ///
    /// Replacement is not serialized against an in-flight fetch; callers
    /// should not reconfigure concurrently with outstanding requests.
    pub fn set_configuration(&self, config: ServiceConfig) {
        let mut current = self.config.write().expect("configuration lock poisoned");
        if current.credentials_differ(&config) {
            debug!("service credentials changed, invalidating cached token");
            self.state
                .write()
                .expect("token state lock poisoned")
                .invalidate();
            self.authenticated.store(false, Ordering::SeqCst);
        }
        *current = config;
    }

    /// Merge headers into the configuration's default headers
    ///
    /// Applied to the token request as well as every forwarded request.
    pub fn add_default_headers(&self, headers: HashMap<String, String>) {
        let mut current = self.config.write().expect("configuration lock poisoned");
        current.default_headers.extend(headers);
    }

    /// Snapshot of the current default headers
    pub fn default_headers(&self) -> HashMap<String, String> {
        self.config
            .read()
            .expect("configuration lock poisoned")
            .default_headers
            .clone()
    }

    /// Snapshot of the current configuration
    pub fn configuration(&self) -> ServiceConfig {
        self.config
            .read()
            .expect("configuration lock poisoned")
            .clone()
    }

    /// Check whether the cached token is currently valid
    pub fn token_is_valid(&self) -> bool {
        self.state
            .read()
            .expect("token state lock poisoned")
            .is_valid()
    }

    /// The `authenticated` flag: set on fetch success, cleared on
    /// invalidation and while a refresh is in doubt
    ///
    /// The flag only changes at fetch and invalidation boundaries; a token
    /// that expires naturally leaves it `true` until the next refresh.
    /// Use [`token_is_valid`] to check the token itself.
    ///
    /// [`token_is_valid`]: Authenticator::token_is_valid
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// The cached bearer token, if currently valid
    pub fn bearer_token(&self) -> Option<String> {
        let state = self.state.read().expect("token state lock poisoned");
        state.is_valid().then(|| state.token.clone())
    }

    /// Drop the cached token and reset the authenticated flag
    pub fn invalidate_token(&self) {
        self.state
            .write()
            .expect("token state lock poisoned")
            .invalidate();
        self.authenticated.store(false, Ordering::SeqCst);
    }

    /// Register an authentication failure listener
    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.listeners.subscribe(callback)
    }

    /// Remove a failure listener; unknown ids are ignored
    pub fn unsubscribe(&self, id: ListenerId) {
        self.listeners.unsubscribe(id);
    }

    /// Ensure a valid bearer token is cached, fetching one if necessary
    ///
    /// Returns `Ok(true)` when a valid token is available, `Ok(false)` when
    /// the token endpoint rejected the credentials (listeners have been
    /// notified), and `Err` for cancellation or a token endpoint contract
    /// violation.
    ///
    /// Concurrent callers serialize on the refresh gate; whichever caller
    /// enters first performs the single fetch and everyone queued behind it
    /// adopts the completed outcome (success via the validity re-check,
    /// failure via the fetch epoch), so one burst of demand produces exactly
    /// one fetch and one notification.
    pub async fn ensure_authenticated(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<bool> {
        // Fast path: no synchronization when the token is still valid.
        if self.token_is_valid() {
            return Ok(true);
        }

        let observed_epoch = self.fetch_epoch.load(Ordering::SeqCst);

        // Biased so an already-cancelled token wins over a free gate.
        let _gate = match cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => return Err(Error::Cancelled),
                guard = self.refresh_gate.lock() => guard,
            },
            None => self.refresh_gate.lock().await,
        };

        // A caller that held the gate before us may have already refreshed.
        if self.token_is_valid() {
            debug!("token refreshed by a concurrent caller, skipping fetch");
            return Ok(true);
        }

        // A fetch completed while we were queued and the token is still
        // invalid: the fetch failed. Share that outcome; listeners were
        // already notified once.
        if self.fetch_epoch.load(Ordering::SeqCst) != observed_epoch {
            debug!("adopting failed outcome of the fetch we queued behind");
            return Ok(false);
        }

        let outcome = self.fetch_token(cancel).await?;
        self.fetch_epoch.fetch_add(1, Ordering::SeqCst);
        if outcome.success {
            Ok(true)
        } else {
            let description = outcome
                .error
                .unwrap_or_else(|| "Unable to retrieve API bearer token".to_string());
            warn!("token fetch failed: {description}");
            self.listeners.notify(&description);
            Ok(false)
        }
    }

    /// Blocking convenience wrapper around [`ensure_authenticated`]
    ///
    /// Spins a current-thread runtime and blocks until the refresh
    /// completes. Must not be called from within an async runtime; use
    /// [`ensure_authenticated`] there instead.
    ///
    /// A failed operation surfaces its first underlying cause directly.
    ///
    /// [`ensure_authenticated`]: Authenticator::ensure_authenticated
    pub fn ensure_authenticated_blocking(&self) -> Result<bool> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::config(format!("failed to build blocking runtime: {e}")))?;
        runtime.block_on(self.ensure_authenticated(None))
    }

    /// Perform a single token fetch against `{endpoint}/token`
    ///
    /// The authenticated flag drops to false for the duration of the fetch:
    /// a refresh is in doubt until proven otherwise.
    async fn fetch_token(&self, cancel: Option<&CancellationToken>) -> Result<TokenFetchOutcome> {
        self.authenticated.store(false, Ordering::SeqCst);

        let fetch = self.fetch_token_inner();
        match cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => Err(Error::Cancelled),
                result = fetch => result,
            },
            None => fetch.await,
        }
    }

    async fn fetch_token_inner(&self) -> Result<TokenFetchOutcome> {
        let config = self.configuration();
        let token_url = format!("{}/token", config.endpoint.trim_end_matches('/'));

        debug!("fetching bearer token from {token_url}");

        let form = [
            ("grant_type", "password"),
            ("username", config.username.as_str()),
            ("password", config.password.as_str()),
        ];
        let mut request = self.http_client.post(&token_url);
        for (key, value) in &config.default_headers {
            request = request.header(key.as_str(), value.as_str());
        }

        // Transport-level failures (unreachable host, malformed endpoint)
        // are recoverable fetch failures, not hard errors.
        let response = match request.form(&form).send().await {
            Ok(response) => response,
            Err(e) => {
                return Ok(TokenFetchOutcome::failure(format!(
                    "Unable to retrieve API bearer token: {e}"
                )));
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Ok(TokenFetchOutcome::failure(format!(
                    "Unable to retrieve API bearer token: {e}"
                )));
            }
        };

        // The endpoint contract is structured JSON on success and failure
        // alike; anything else is an incompatible server.
        if status.is_success() {
            let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
                Error::protocol(format!(
                    "token endpoint returned {status} with an unexpected body: {e}"
                ))
            })?;

            {
                let mut state = self.state.write().expect("token state lock poisoned");
                state.store(token.access_token, token.expires_in);
            }
            self.authenticated.store(true, Ordering::SeqCst);
            debug!("bearer token refreshed, valid for {}s", token.expires_in);

            Ok(TokenFetchOutcome::success())
        } else {
            let rejection: TokenErrorResponse = serde_json::from_str(&body).map_err(|e| {
                Error::protocol(format!(
                    "token endpoint returned {status} without an error_description: {e}"
                ))
            })?;

            Ok(TokenFetchOutcome::failure(format!(
                "Unable to retrieve API bearer token: {}",
                rejection.error_description
            )))
        }
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let config = self.config.read().expect("configuration lock poisoned");
        f.debug_struct("Authenticator")
            .field("endpoint", &config.endpoint)
            .field("username", &config.username)
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}
