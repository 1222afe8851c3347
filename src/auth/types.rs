//! Auth data types
//!
//! The service configuration snapshot, the cached token state, and the
//! fetch outcome returned by the token protocol.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

/// Immutable configuration snapshot for the remote service
///
/// Replaced whole via `AuthenticatedTransport::set_configuration`; individual
/// fields are never mutated in place. Endpoint, username, and password are
/// compared by plain value equality when deciding whether a replacement
/// invalidates the cached token; no URL normalization is performed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Base URL of the remote API
    pub endpoint: String,
    /// Username for the password grant
    pub username: String,
    /// Password for the password grant
    pub password: String,
    /// Headers merged into every request, including the token request
    pub default_headers: HashMap<String, String>,
}

impl ServiceConfig {
    /// Create a new configuration with no default headers
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            default_headers: HashMap::new(),
        }
    }

    /// Add a default header, builder style
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(key.into(), value.into());
        self
    }

    /// Check whether `other` carries different credentials or endpoint
    ///
    /// Default headers are ignored: changing only headers must not
    /// invalidate a cached token.
    pub fn credentials_differ(&self, other: &ServiceConfig) -> bool {
        self.endpoint != other.endpoint
            || self.username != other.username
            || self.password != other.password
    }
}

/// Cached bearer token with its absolute UTC expiration
///
/// A token is valid iff the current UTC time is strictly before
/// `expires_at`. An empty token string is never valid. Expiry uses wall-clock
/// time on purpose: if the local clock is adjusted backward the token is
/// treated as invalid early, which is an accepted risk.
#[derive(Debug, Clone)]
pub struct TokenState {
    /// The bearer token, empty when no token is held
    pub token: String,
    /// Absolute expiration instant (UTC)
    pub expires_at: DateTime<Utc>,
}

impl Default for TokenState {
    fn default() -> Self {
        Self {
            token: String::new(),
            expires_at: DateTime::<Utc>::MIN_UTC,
        }
    }
}

impl TokenState {
    /// Check whether the token is currently valid
    pub fn is_valid(&self) -> bool {
        !self.token.is_empty() && Utc::now() < self.expires_at
    }

    /// Clear the token and pin expiry to the earliest representable instant
    ///
    /// Guarantees `is_valid()` is false immediately afterwards.
    pub fn invalidate(&mut self) {
        self.token.clear();
        self.expires_at = DateTime::<Utc>::MIN_UTC;
    }

    /// Store a freshly fetched token expiring `expires_in_secs` from now
    pub fn store(&mut self, token: String, expires_in_secs: u64) {
        self.token = token;
        // Cap absurd server-supplied lifetimes instead of panicking on
        // chrono's representable range.
        let secs = i64::try_from(expires_in_secs).unwrap_or(i64::MAX);
        let lifetime = chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX);
        self.expires_at = Utc::now()
            .checked_add_signed(lifetime)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
}

/// Result of a single token fetch attempt
///
/// A plain return value; never persisted. Recoverable authentication
/// rejections surface here, while contract violations and cancellation
/// bypass it as hard errors.
#[derive(Debug, Clone)]
pub struct TokenFetchOutcome {
    /// Whether the fetch produced a usable token
    pub success: bool,
    /// Error description when the fetch failed
    pub error: Option<String>,
}

impl TokenFetchOutcome {
    /// Successful fetch
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    /// Failed fetch with a description for listeners
    pub fn failure(description: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(description.into()),
        }
    }
}

/// Token endpoint success body: `{"access_token": ..., "expires_in": ...}`
///
/// Kept narrow on purpose so a missing field is a visible protocol
/// violation rather than a silently defaulted value.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
}

/// Token endpoint failure body: `{"error_description": ..., ...}`
#[derive(Debug, Deserialize)]
pub(crate) struct TokenErrorResponse {
    pub error_description: String,
}
