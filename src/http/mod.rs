//! HTTP transport module
//!
//! The authenticated request interceptor: merges default headers, resolves a
//! bearer token through the auth module, and forwards every request through
//! the underlying client unconditionally.

mod transport;

pub use transport::{AuthenticatedTransport, RequestConfig};
