use crate::errors::SynclineError;
use crate::transport::TransportError;

/// Typed fetch failure surfaced to subscribers alongside the last-known-good
/// cached value. Never tears down a subscription.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    /// Transport-level failure (timeout, connection refused).
    #[error("Network failure: {message}")]
    Network { message: String },

    /// The server returned an error payload.
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl SynclineError for FetchError {
    fn error_code(&self) -> &'static str {
        match self {
            FetchError::Network { .. } => "FETCH_NETWORK_FAILURE",
            FetchError::Rejected { .. } => "FETCH_REJECTED",
        }
    }
}

impl From<TransportError> for FetchError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Network { message } => FetchError::Network { message },
            TransportError::Rejected { status, message } => {
                FetchError::Rejected { status, message }
            }
            TransportError::Unauthorized => FetchError::Rejected {
                status: 401,
                message: "not authorized".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_from_transport() {
        let error = FetchError::from(TransportError::Network {
            message: "connection refused".to_string(),
        });
        assert_eq!(error.error_code(), "FETCH_NETWORK_FAILURE");
        assert_eq!(error.to_string(), "Network failure: connection refused");
    }

    #[test]
    fn test_unauthorized_maps_to_rejected_401() {
        let error = FetchError::from(TransportError::Unauthorized);
        assert_eq!(
            error,
            FetchError::Rejected {
                status: 401,
                message: "not authorized".to_string()
            }
        );
    }
}
