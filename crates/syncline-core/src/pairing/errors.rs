use crate::errors::SynclineError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PairingError {
    /// Disconnect requires explicit user acknowledgment.
    #[error("Disconnect requires confirmation")]
    ConfirmationRequired,

    /// The requested operation is not valid in the current pairing state.
    /// UI gates should prevent this; the core rejects instead of crashing.
    #[error("Invalid pairing state: {message}")]
    InvalidState { message: String },

    #[error("Connect request failed: {message}")]
    ConnectFailed { message: String },

    #[error("Disconnect request failed: {message}")]
    DisconnectFailed { message: String },

    /// The pairing service task is no longer running.
    #[error("Pairing service unavailable")]
    ServiceUnavailable,
}

impl SynclineError for PairingError {
    fn error_code(&self) -> &'static str {
        match self {
            PairingError::ConfirmationRequired => "PAIRING_CONFIRMATION_REQUIRED",
            PairingError::InvalidState { .. } => "PAIRING_INVALID_STATE",
            PairingError::ConnectFailed { .. } => "PAIRING_CONNECT_FAILED",
            PairingError::DisconnectFailed { .. } => "PAIRING_DISCONNECT_FAILED",
            PairingError::ServiceUnavailable => "PAIRING_SERVICE_UNAVAILABLE",
        }
    }

    fn is_user_error(&self) -> bool {
        matches!(self, PairingError::ConfirmationRequired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_required_is_user_error() {
        let error = PairingError::ConfirmationRequired;
        assert_eq!(error.error_code(), "PAIRING_CONFIRMATION_REQUIRED");
        assert!(error.is_user_error());
    }

    #[test]
    fn test_invalid_state_display() {
        let error = PairingError::InvalidState {
            message: "no active session".to_string(),
        };
        assert_eq!(error.to_string(), "Invalid pairing state: no active session");
        assert!(!error.is_user_error());
    }
}
