//! Error types for authport
//!
//! All public APIs return `Result<T, Error>` where `Error` is defined here.
//! Authentication rejections from the token endpoint are deliberately *not*
//! an `Err` at the transport surface: they are recovered locally, reported
//! through failure listeners, and the original request is forwarded anyway.
//! Only cancellation and token-endpoint contract violations propagate.

use thiserror::Error;

/// The main error type for authport
#[derive(Error, Debug)]
pub enum Error {
    /// Local configuration problem
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration problem
        message: String,
    },

    /// Token endpoint violated its response contract
    ///
    /// Missing `access_token`/`expires_in` on success, missing
    /// `error_description` on failure, or a body that is not JSON at all.
    /// Fatal to the fetch attempt; indicates an incompatible server.
    #[error("Token endpoint protocol violation: {message}")]
    Protocol {
        /// Description of the contract violation
        message: String,
    },

    /// Operation was cancelled by the caller-supplied cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// HTTP transport failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a protocol violation error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Check if this error is a caller-initiated cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Result type alias for authport
pub type Result<T> = std::result::Result<T, Error>;
