use crate::errors::SynclineError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Transport-level failure: timeout, connection refused, DNS, etc.
    #[error("Network failure: {message}")]
    Network { message: String },

    /// The server returned an error payload.
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// HTTP 401. The embedding application owns the login redirect; the
    /// core only reports the condition.
    #[error("Not authorized")]
    Unauthorized,
}

impl SynclineError for TransportError {
    fn error_code(&self) -> &'static str {
        match self {
            TransportError::Network { .. } => "TRANSPORT_NETWORK_FAILURE",
            TransportError::Rejected { .. } => "TRANSPORT_REJECTED",
            TransportError::Unauthorized => "TRANSPORT_UNAUTHORIZED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let error = TransportError::Rejected {
            status: 422,
            message: "invalid campaign".to_string(),
        };
        assert_eq!(error.to_string(), "Request rejected (422): invalid campaign");
        assert_eq!(error.error_code(), "TRANSPORT_REJECTED");
    }

    #[test]
    fn test_unauthorized_code() {
        assert_eq!(
            TransportError::Unauthorized.error_code(),
            "TRANSPORT_UNAUTHORIZED"
        );
    }
}
