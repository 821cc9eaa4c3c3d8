//! Typed client for the pairing endpoints.

use std::sync::Arc;

use serde_json::Value;

use crate::pairing::types::RemoteStatus;
use crate::transport::{Method, Transport, TransportError};

const STATUS_PATH: &str = "/pairing/status";
const CONNECT_PATH: &str = "/pairing/connect";
const DISCONNECT_PATH: &str = "/pairing/disconnect";

#[derive(Clone)]
pub struct PairingApi {
    transport: Arc<dyn Transport>,
}

impl PairingApi {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Current remote pairing state.
    pub async fn status(&self) -> Result<RemoteStatus, TransportError> {
        let response = self
            .transport
            .request(Method::Get, STATUS_PATH, None)
            .await?;
        serde_json::from_value(response.data).map_err(|e| TransportError::Rejected {
            status: response.status,
            message: format!("malformed status payload: {}", e),
        })
    }

    /// Request a fresh pairing credential. Returns the opaque token.
    pub async fn connect(&self) -> Result<String, TransportError> {
        let response = self
            .transport
            .request(Method::Post, CONNECT_PATH, None)
            .await?;
        response
            .data
            .get("credential")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TransportError::Rejected {
                status: response.status,
                message: "connect response missing credential".to_string(),
            })
    }

    /// Revoke the active pairing session.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        self.transport
            .request(Method::Post, DISCONNECT_PATH, None)
            .await?;
        Ok(())
    }
}
