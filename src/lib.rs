//! # Authport
//!
//! A self-refreshing bearer-token transport for HTTP APIs.
//!
//! Authport sits between your code and a remote API that hands out bearer
//! tokens via the OAuth2 password grant. It acquires tokens lazily, caches
//! them until they expire, guarantees at most one in-flight token fetch no
//! matter how many tasks hit an expired token at once, and reports
//! authentication failures to registered listeners instead of failing the
//! caller's request.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use authport::{AuthenticatedTransport, RequestConfig, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> authport::Result<()> {
//!     let config = ServiceConfig::new("https://api.example.com", "user", "secret");
//!     let transport = AuthenticatedTransport::new(config);
//!
//!     // Subscribe to authentication failures (optional).
//!     let id = transport.subscribe(|description| {
//!         eprintln!("auth failed: {description}");
//!     });
//!
//!     // Requests are authenticated transparently; a failed token fetch
//!     // still forwards the request so the API's own 401 comes back.
//!     let response = transport
//!         .get("https://api.example.com/v1/widgets", RequestConfig::new())
//!         .await?;
//!
//!     transport.unsubscribe(id);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! caller request
//!       |
//! AuthenticatedTransport (request interceptor)
//!       |-- token valid? --no--> Authenticator
//!       |                          refresh gate (single entrant)
//!       |                          POST {endpoint}/token
//!       |                          success -> cache token + expiry
//!       |                          failure -> notify listeners
//!       |-- attach `Authorization: Bearer <token>` when valid
//!       `-- forward unconditionally, return response verbatim
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

/// Error types for the crate
pub mod error;

/// Token acquisition, caching, and failure notification
pub mod auth;

/// Authenticated request forwarding
pub mod http;

pub use auth::{
    Authenticator, FailureListeners, ListenerId, ServiceConfig, TokenFetchOutcome, TokenState,
};
pub use error::{Error, Result};
pub use http::{AuthenticatedTransport, RequestConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
