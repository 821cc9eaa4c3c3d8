use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque, time-bounded pairing token displayed to the user during linking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Monotonic counter distinguishing successive credentials. Remote
    /// observations referencing an older credential are discarded.
    pub generation: u64,
}

impl Credential {
    /// Seconds until expiry, clamped at zero.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Lifecycle of a pairing session.
///
/// A credential is only meaningful while the state is `AwaitingScan` and the
/// validity window is open; once the machine moves to `Linked` or `Expired`,
/// any previously displayed credential is void even if a UI still holds it.
#[derive(Debug, Clone, PartialEq)]
pub enum PairingState {
    Idle,
    AwaitingScan {
        credential: Credential,
    },
    Linked {
        phone_number: Option<String>,
        linked_at: Option<DateTime<Utc>>,
        generation: u64,
    },
    Expired,
    Disconnecting {
        phone_number: Option<String>,
        linked_at: Option<DateTime<Utc>>,
        generation: u64,
    },
}

/// Payload of the remote status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStatus {
    pub state: RemoteState,
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub linked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteState {
    Offline,
    Pending,
    Active,
}

/// Events broadcast to the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum PairingEvent {
    /// A fresh credential is ready to display.
    CredentialIssued { credential: Credential },
    /// One-second countdown update while awaiting a scan.
    Countdown { remaining_secs: i64 },
    /// The displayed credential expired; a replacement request is underway.
    CredentialExpired,
    /// The remote side reports the device as linked.
    LinkEstablished { phone_number: Option<String> },
    /// The session ended (explicit disconnect or remote went offline).
    Disconnected,
    ConnectFailed { message: String },
    DisconnectFailed { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_credential_remaining_clamps_at_zero() {
        let now = Utc::now();
        let credential = Credential {
            token: "t".to_string(),
            issued_at: now - Duration::seconds(50),
            expires_at: now - Duration::seconds(5),
            generation: 1,
        };
        assert_eq!(credential.remaining_secs(now), 0);
        assert!(credential.is_expired(now));
    }

    #[test]
    fn test_credential_not_expired_within_window() {
        let now = Utc::now();
        let credential = Credential {
            token: "t".to_string(),
            issued_at: now,
            expires_at: now + Duration::seconds(45),
            generation: 1,
        };
        assert_eq!(credential.remaining_secs(now), 45);
        assert!(!credential.is_expired(now));
    }

    #[test]
    fn test_remote_status_deserializes_wire_shape() {
        let status: RemoteStatus = serde_json::from_str(
            r#"{"state": "active", "phoneNumber": "+4915112345678", "linkedAt": "2026-08-29T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(status.state, RemoteState::Active);
        assert_eq!(status.phone_number.as_deref(), Some("+4915112345678"));
        assert!(status.linked_at.is_some());
        assert_eq!(status.credential, None);
    }

    #[test]
    fn test_remote_status_minimal_payload() {
        let status: RemoteStatus = serde_json::from_str(r#"{"state": "offline"}"#).unwrap();
        assert_eq!(status.state, RemoteState::Offline);
        assert_eq!(status.phone_number, None);
    }
}
