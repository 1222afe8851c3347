//! Authentication module
//!
//! Owns the service configuration, the cached bearer token, the refresh
//! coordinator that serializes token fetches, and the failure listener
//! registry. The `Authenticator` is the only component that mutates token
//! state; everything above it works through `ensure_authenticated` and
//! `bearer_token`.

mod authenticator;
mod notify;
mod types;

pub use authenticator::Authenticator;
pub use notify::{FailureListeners, ListenerId};
pub use types::{ServiceConfig, TokenFetchOutcome, TokenState};

#[cfg(test)]
mod tests;
