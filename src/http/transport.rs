//! Authenticated request forwarding
//!
//! `AuthenticatedTransport` is the piece callers hold: it intercepts each
//! outgoing request, resolves a bearer token when needed, and forwards the
//! request whether or not authentication succeeded. Callers never observe
//! the authentication machinery directly; a failed refresh shows up as the
//! downstream API's own unauthorized response.

use crate::auth::{Authenticator, ListenerId, ServiceConfig};
use crate::error::Result;
use reqwest::{Client, Method, Response};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for a single request
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    /// Query parameters
    pub query: HashMap<String, String>,
    /// Request headers; a caller-supplied `Authorization` header is
    /// overwritten whenever a valid bearer token exists
    pub headers: HashMap<String, String>,
    /// Request body (JSON)
    pub body: Option<Value>,
    /// Override timeout for this request
    pub timeout: Option<Duration>,
    /// Cancellation signal honored while waiting on the refresh gate,
    /// during the token fetch, and while forwarding
    pub cancel: Option<CancellationToken>,
}

impl RequestConfig {
    /// Create a new request config
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a query parameter
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set JSON body
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Set timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach a cancellation token
    #[must_use]
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// HTTP transport that authenticates outgoing requests transparently
///
/// Created once per logical client session and shared via `Arc` across
/// tasks. Dropping the transport releases the refresh gate, listener
/// registry, and HTTP client.
pub struct AuthenticatedTransport {
    client: Client,
    authenticator: Authenticator,
}

impl AuthenticatedTransport {
    /// Create a transport with its own HTTP client
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_client(config, Client::new())
    }

    /// Create a transport reusing an existing HTTP client
    ///
    /// The authenticator shares the same client, so token requests inherit
    /// the client's TLS and proxy settings.
    pub fn with_client(config: ServiceConfig, client: Client) -> Self {
        let authenticator = Authenticator::with_client(config, client.clone());
        Self {
            client,
            authenticator,
        }
    }

    /// Access the underlying authenticator
    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    /// Replace the service configuration (see [`Authenticator::set_configuration`])
    pub fn set_configuration(&self, config: ServiceConfig) {
        self.authenticator.set_configuration(config);
    }

    /// Merge headers into the default headers applied to every request
    pub fn add_default_headers(&self, headers: HashMap<String, String>) {
        self.authenticator.add_default_headers(headers);
    }

    /// Register an authentication failure listener
    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.authenticator.subscribe(callback)
    }

    /// Remove a failure listener; unknown ids are ignored
    pub fn unsubscribe(&self, id: ListenerId) {
        self.authenticator.unsubscribe(id);
    }

    /// Make a GET request
    pub async fn get(&self, url: &str, config: RequestConfig) -> Result<Response> {
        self.request(Method::GET, url, config).await
    }

    /// Make a POST request with a JSON body
    pub async fn post(&self, url: &str, body: Value) -> Result<Response> {
        self.request(Method::POST, url, RequestConfig::new().json(body))
            .await
    }

    /// Make a generic request
    ///
    /// 1. If the cached token is invalid, resolve authentication first. A
    ///    rejection from the token endpoint does not stop the request; it is
    ///    forwarded unauthenticated and the API's own response comes back.
    ///    Cancellation and protocol violations propagate as errors.
    /// 2. When a valid token exists, it is attached as
    ///    `Authorization: Bearer <token>`, overwriting any authorization
    ///    header the caller supplied.
    /// 3. The request is forwarded unconditionally and the response returned
    ///    verbatim; no response synthesis, no automatic retry.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        config: RequestConfig,
    ) -> Result<Response> {
        if !self.authenticator.token_is_valid()
            && !self
                .authenticator
                .ensure_authenticated(config.cancel.as_ref())
                .await?
        {
            warn!("authentication failed, forwarding {method} {url} unauthenticated");
        }

        // Merge order: defaults, then caller headers, then authorization.
        let mut headers = self.authenticator.default_headers();
        headers.extend(config.headers.clone());
        if let Some(token) = self.authenticator.bearer_token() {
            headers.retain(|key, _| !key.eq_ignore_ascii_case("authorization"));
            headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        }

        let mut request = self.client.request(method.clone(), url);
        for (key, value) in &headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if !config.query.is_empty() {
            request = request.query(&config.query);
        }
        if let Some(ref body) = config.body {
            request = request.json(body);
        }
        if let Some(timeout) = config.timeout {
            request = request.timeout(timeout);
        }

        let send = request.send();
        let response = match config.cancel {
            Some(ref cancel) => tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(crate::error::Error::Cancelled),
                result = send => result?,
            },
            None => send.await?,
        };

        debug!("forwarded {} {} -> {}", method, url, response.status());
        Ok(response)
    }
}

impl std::fmt::Debug for AuthenticatedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedTransport")
            .field("authenticator", &self.authenticator)
            .finish_non_exhaustive()
    }
}
