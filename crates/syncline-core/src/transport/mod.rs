//! Abstract HTTP transport consumed by the sync core.
//!
//! The core never owns an HTTP client; the embedding application provides a
//! `Transport` implementation that attaches auth credentials to every call
//! and handles the login redirect on an authorization failure.

pub mod errors;
pub mod types;

pub use errors::TransportError;
pub use types::{ApiResponse, Method};

use async_trait::async_trait;
use serde_json::Value;

/// Request/response boundary to the remote system.
///
/// Implementations are expected to enforce their own timeouts; a timed-out
/// call surfaces here as `TransportError::Network`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<ApiResponse, TransportError>;
}
