//! Pure pairing state machine.
//!
//! Every transition is a synchronous function of the current state, an
//! input, and the current wall-clock time. Side effects (network requests,
//! scheduler subscriptions, UI events) come back as `PairingEffect`s for the
//! service layer to execute, which keeps the timing rules directly testable.
//!
//! Expiry is a pure local-clock decision driven by `Tick`; the machine never
//! relies on the remote poll to notice an expired credential.

use chrono::{DateTime, Utc};

use crate::pairing::errors::PairingError;
use crate::pairing::types::{Credential, PairingEvent, PairingState, RemoteState, RemoteStatus};
use crate::transport::TransportError;

/// Inputs fed to the machine by the service layer.
#[derive(Debug, Clone)]
pub enum PairingInput {
    /// User asked to connect, or to manually refresh the credential.
    ConnectRequested,
    /// The connect request settled; `Ok` carries the fresh credential token.
    ConnectSettled(Result<String, TransportError>),
    /// Local countdown tick (1 second).
    Tick,
    /// A status poll delivered a remote observation.
    RemoteObserved(RemoteStatus),
    /// User confirmed a disconnect.
    DisconnectRequested,
    DisconnectSettled(Result<(), TransportError>),
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum PairingEffect {
    IssueConnect,
    IssueDisconnect,
    /// Poll the status endpoint at the short scan interval.
    StartScanPolling,
    /// Poll the status endpoint at the longer linked interval.
    StartLinkedPolling,
    StopPolling,
    Emit(PairingEvent),
}

pub struct PairingMachine {
    state: PairingState,
    /// Generation of the most recently issued credential.
    generation: u64,
    credential_ttl: chrono::Duration,
    connect_in_flight: bool,
}

impl PairingMachine {
    pub fn new(credential_ttl: chrono::Duration) -> Self {
        Self {
            state: PairingState::Idle,
            generation: 0,
            credential_ttl,
            connect_in_flight: false,
        }
    }

    pub fn state(&self) -> &PairingState {
        &self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Apply one input at time `now`.
    ///
    /// Returns the effects to execute, or an error when the input is not
    /// valid in the current state (surfaced to the caller, never a panic).
    pub fn handle(
        &mut self,
        input: PairingInput,
        now: DateTime<Utc>,
    ) -> Result<Vec<PairingEffect>, PairingError> {
        match input {
            PairingInput::ConnectRequested => self.on_connect_requested(),
            PairingInput::ConnectSettled(outcome) => Ok(self.on_connect_settled(outcome, now)),
            PairingInput::Tick => Ok(self.on_tick(now)),
            PairingInput::RemoteObserved(status) => Ok(self.on_remote_observed(status)),
            PairingInput::DisconnectRequested => self.on_disconnect_requested(),
            PairingInput::DisconnectSettled(outcome) => Ok(self.on_disconnect_settled(outcome)),
        }
    }

    fn on_connect_requested(&mut self) -> Result<Vec<PairingEffect>, PairingError> {
        if self.connect_in_flight {
            return Ok(vec![]);
        }
        match self.state {
            PairingState::Idle | PairingState::Expired | PairingState::AwaitingScan { .. } => {
                self.connect_in_flight = true;
                Ok(vec![PairingEffect::IssueConnect])
            }
            PairingState::Linked { .. } | PairingState::Disconnecting { .. } => {
                Err(PairingError::InvalidState {
                    message: "already linked".to_string(),
                })
            }
        }
    }

    fn on_connect_settled(
        &mut self,
        outcome: Result<String, TransportError>,
        now: DateTime<Utc>,
    ) -> Vec<PairingEffect> {
        self.connect_in_flight = false;
        match outcome {
            Ok(token) => match self.state {
                PairingState::Idle | PairingState::Expired | PairingState::AwaitingScan { .. } => {
                    self.generation += 1;
                    let credential = Credential {
                        token,
                        issued_at: now,
                        expires_at: now + self.credential_ttl,
                        generation: self.generation,
                    };
                    self.state = PairingState::AwaitingScan {
                        credential: credential.clone(),
                    };
                    vec![
                        PairingEffect::Emit(PairingEvent::CredentialIssued { credential }),
                        PairingEffect::StartScanPolling,
                    ]
                }
                // The session linked while the request was in flight; the
                // fresh credential is moot and dropped.
                PairingState::Linked { .. } | PairingState::Disconnecting { .. } => vec![],
            },
            Err(error) => {
                self.state = PairingState::Idle;
                vec![
                    PairingEffect::Emit(PairingEvent::ConnectFailed {
                        message: error.to_string(),
                    }),
                    PairingEffect::StopPolling,
                ]
            }
        }
    }

    fn on_tick(&mut self, now: DateTime<Utc>) -> Vec<PairingEffect> {
        let PairingState::AwaitingScan { credential } = &self.state else {
            return vec![];
        };
        if credential.is_expired(now) {
            self.state = PairingState::Expired;
            self.connect_in_flight = true;
            return vec![
                PairingEffect::Emit(PairingEvent::CredentialExpired),
                PairingEffect::IssueConnect,
            ];
        }
        vec![PairingEffect::Emit(PairingEvent::Countdown {
            remaining_secs: credential.remaining_secs(now),
        })]
    }

    fn on_remote_observed(&mut self, status: RemoteStatus) -> Vec<PairingEffect> {
        match &self.state {
            PairingState::AwaitingScan { credential } => match status.state {
                RemoteState::Active => {
                    if status
                        .credential
                        .as_ref()
                        .is_some_and(|token| token != &credential.token)
                    {
                        // Observation references a superseded credential
                        return vec![];
                    }
                    let generation = credential.generation;
                    self.state = PairingState::Linked {
                        phone_number: status.phone_number.clone(),
                        linked_at: status.linked_at,
                        generation,
                    };
                    vec![
                        PairingEffect::Emit(PairingEvent::LinkEstablished {
                            phone_number: status.phone_number,
                        }),
                        PairingEffect::StartLinkedPolling,
                    ]
                }
                RemoteState::Pending | RemoteState::Offline => vec![],
            },
            PairingState::Linked { .. } => match status.state {
                RemoteState::Offline => {
                    self.state = PairingState::Idle;
                    vec![
                        PairingEffect::Emit(PairingEvent::Disconnected),
                        PairingEffect::StopPolling,
                    ]
                }
                RemoteState::Active | RemoteState::Pending => vec![],
            },
            // No credential is active in these states; any observation is a
            // leftover from a voided one.
            PairingState::Idle | PairingState::Expired | PairingState::Disconnecting { .. } => {
                vec![]
            }
        }
    }

    fn on_disconnect_requested(&mut self) -> Result<Vec<PairingEffect>, PairingError> {
        match &self.state {
            PairingState::Linked {
                phone_number,
                linked_at,
                generation,
            } => {
                self.state = PairingState::Disconnecting {
                    phone_number: phone_number.clone(),
                    linked_at: *linked_at,
                    generation: *generation,
                };
                Ok(vec![PairingEffect::IssueDisconnect])
            }
            PairingState::Disconnecting { .. } => Err(PairingError::InvalidState {
                message: "disconnect already in progress".to_string(),
            }),
            _ => Err(PairingError::InvalidState {
                message: "no active session".to_string(),
            }),
        }
    }

    fn on_disconnect_settled(&mut self, outcome: Result<(), TransportError>) -> Vec<PairingEffect> {
        let PairingState::Disconnecting {
            phone_number,
            linked_at,
            generation,
        } = &self.state
        else {
            return vec![];
        };
        match outcome {
            Ok(()) => {
                self.state = PairingState::Idle;
                vec![
                    PairingEffect::Emit(PairingEvent::Disconnected),
                    PairingEffect::StopPolling,
                ]
            }
            Err(error) => {
                // The remote side's state is unknown; return to Linked and
                // let the status poll settle the question.
                self.state = PairingState::Linked {
                    phone_number: phone_number.clone(),
                    linked_at: *linked_at,
                    generation: *generation,
                };
                vec![PairingEffect::Emit(PairingEvent::DisconnectFailed {
                    message: error.to_string(),
                })]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ttl() -> Duration {
        Duration::seconds(45)
    }

    fn machine() -> PairingMachine {
        PairingMachine::new(ttl())
    }

    fn connect(machine: &mut PairingMachine, token: &str, now: DateTime<Utc>) {
        machine.handle(PairingInput::ConnectRequested, now).unwrap();
        machine
            .handle(PairingInput::ConnectSettled(Ok(token.to_string())), now)
            .unwrap();
    }

    fn active_status(token: Option<&str>) -> RemoteStatus {
        RemoteStatus {
            state: RemoteState::Active,
            credential: token.map(str::to_string),
            phone_number: Some("+4915112345678".to_string()),
            linked_at: Some(Utc::now()),
        }
    }

    #[test]
    fn test_connect_issues_credential_with_45s_window() {
        let mut m = machine();
        let now = Utc::now();
        let effects = m.handle(PairingInput::ConnectRequested, now).unwrap();
        assert_eq!(effects, vec![PairingEffect::IssueConnect]);

        let effects = m
            .handle(PairingInput::ConnectSettled(Ok("c1".to_string())), now)
            .unwrap();
        let PairingState::AwaitingScan { credential } = m.state() else {
            panic!("expected AwaitingScan, got {:?}", m.state());
        };
        assert_eq!(credential.token, "c1");
        assert_eq!(credential.expires_at, now + Duration::seconds(45));
        assert_eq!(credential.generation, 1);
        assert!(effects.contains(&PairingEffect::StartScanPolling));
    }

    #[test]
    fn test_duplicate_connect_request_is_ignored() {
        let mut m = machine();
        let now = Utc::now();
        assert_eq!(
            m.handle(PairingInput::ConnectRequested, now).unwrap(),
            vec![PairingEffect::IssueConnect]
        );
        assert_eq!(m.handle(PairingInput::ConnectRequested, now).unwrap(), vec![]);
    }

    #[test]
    fn test_failed_connect_leaves_idle() {
        let mut m = machine();
        let now = Utc::now();
        m.handle(PairingInput::ConnectRequested, now).unwrap();
        let effects = m
            .handle(
                PairingInput::ConnectSettled(Err(TransportError::Network {
                    message: "timeout".to_string(),
                })),
                now,
            )
            .unwrap();
        assert_eq!(m.state(), &PairingState::Idle);
        assert!(matches!(
            effects[0],
            PairingEffect::Emit(PairingEvent::ConnectFailed { .. })
        ));
    }

    #[test]
    fn test_tick_counts_down_while_awaiting_scan() {
        let mut m = machine();
        let now = Utc::now();
        connect(&mut m, "c1", now);
        let effects = m
            .handle(PairingInput::Tick, now + Duration::seconds(10))
            .unwrap();
        assert_eq!(
            effects,
            vec![PairingEffect::Emit(PairingEvent::Countdown {
                remaining_secs: 35
            })]
        );
    }

    #[test]
    fn test_never_awaiting_scan_at_or_past_expiry() {
        let mut m = machine();
        let now = Utc::now();
        connect(&mut m, "c1", now);

        let effects = m
            .handle(PairingInput::Tick, now + Duration::seconds(45))
            .unwrap();
        assert!(!matches!(m.state(), PairingState::AwaitingScan { .. }));
        assert_eq!(
            effects,
            vec![
                PairingEffect::Emit(PairingEvent::CredentialExpired),
                PairingEffect::IssueConnect,
            ]
        );
    }

    #[test]
    fn test_exactly_one_auto_request_per_expiry() {
        let mut m = machine();
        let now = Utc::now();
        connect(&mut m, "c1", now);

        let effects = m
            .handle(PairingInput::Tick, now + Duration::seconds(46))
            .unwrap();
        assert!(effects.contains(&PairingEffect::IssueConnect));

        // Further ticks while Expired produce no second request
        for s in 47..50 {
            let effects = m
                .handle(PairingInput::Tick, now + Duration::seconds(s))
                .unwrap();
            assert_eq!(effects, vec![]);
        }
    }

    #[test]
    fn test_stale_linked_observation_for_superseded_credential_discarded() {
        // Scenario: C1 issued at t=0, expires t=45; at t=46 the machine
        // requests C2; a late "linked" observation referencing C1 arrives at
        // t=47 and must be discarded.
        let mut m = machine();
        let t0 = Utc::now();
        connect(&mut m, "c1", t0);

        m.handle(PairingInput::Tick, t0 + Duration::seconds(46))
            .unwrap();
        assert_eq!(m.state(), &PairingState::Expired);

        let effects = m
            .handle(
                PairingInput::RemoteObserved(active_status(Some("c1"))),
                t0 + Duration::seconds(47),
            )
            .unwrap();
        assert_eq!(effects, vec![]);
        assert_eq!(m.state(), &PairingState::Expired);

        // C2 arrives and the machine resumes scanning with generation 2
        m.handle(
            PairingInput::ConnectSettled(Ok("c2".to_string())),
            t0 + Duration::seconds(48),
        )
        .unwrap();
        let PairingState::AwaitingScan { credential } = m.state() else {
            panic!("expected AwaitingScan");
        };
        assert_eq!(credential.generation, 2);

        // A stale observation referencing C1 is still ignored
        let effects = m
            .handle(
                PairingInput::RemoteObserved(active_status(Some("c1"))),
                t0 + Duration::seconds(49),
            )
            .unwrap();
        assert_eq!(effects, vec![]);
        assert!(matches!(m.state(), PairingState::AwaitingScan { .. }));
    }

    #[test]
    fn test_linked_observation_for_current_credential_links() {
        let mut m = machine();
        let now = Utc::now();
        connect(&mut m, "c1", now);

        let effects = m
            .handle(PairingInput::RemoteObserved(active_status(Some("c1"))), now)
            .unwrap();
        assert!(matches!(
            m.state(),
            PairingState::Linked { generation: 1, .. }
        ));
        assert!(effects.contains(&PairingEffect::StartLinkedPolling));
        assert!(matches!(
            effects[0],
            PairingEffect::Emit(PairingEvent::LinkEstablished { .. })
        ));
    }

    #[test]
    fn test_observation_without_credential_echo_is_accepted() {
        let mut m = machine();
        let now = Utc::now();
        connect(&mut m, "c1", now);
        m.handle(PairingInput::RemoteObserved(active_status(None)), now)
            .unwrap();
        assert!(matches!(m.state(), PairingState::Linked { .. }));
    }

    #[test]
    fn test_manual_refresh_supersedes_credential() {
        let mut m = machine();
        let now = Utc::now();
        connect(&mut m, "c1", now);

        m.handle(PairingInput::ConnectRequested, now).unwrap();
        m.handle(PairingInput::ConnectSettled(Ok("c2".to_string())), now)
            .unwrap();
        let PairingState::AwaitingScan { credential } = m.state() else {
            panic!("expected AwaitingScan");
        };
        assert_eq!(credential.token, "c2");
        assert_eq!(credential.generation, 2);
    }

    #[test]
    fn test_remote_offline_while_linked_returns_to_idle() {
        let mut m = machine();
        let now = Utc::now();
        connect(&mut m, "c1", now);
        m.handle(PairingInput::RemoteObserved(active_status(Some("c1"))), now)
            .unwrap();

        let offline = RemoteStatus {
            state: RemoteState::Offline,
            credential: None,
            phone_number: None,
            linked_at: None,
        };
        let effects = m
            .handle(PairingInput::RemoteObserved(offline), now)
            .unwrap();
        assert_eq!(m.state(), &PairingState::Idle);
        assert!(effects.contains(&PairingEffect::StopPolling));
    }

    #[test]
    fn test_disconnect_requires_linked_state() {
        let mut m = machine();
        let now = Utc::now();
        let err = m
            .handle(PairingInput::DisconnectRequested, now)
            .unwrap_err();
        assert!(matches!(err, PairingError::InvalidState { .. }));
    }

    #[test]
    fn test_disconnect_lock_rejects_duplicates() {
        let mut m = machine();
        let now = Utc::now();
        connect(&mut m, "c1", now);
        m.handle(PairingInput::RemoteObserved(active_status(Some("c1"))), now)
            .unwrap();

        let effects = m.handle(PairingInput::DisconnectRequested, now).unwrap();
        assert_eq!(effects, vec![PairingEffect::IssueDisconnect]);
        assert!(matches!(m.state(), PairingState::Disconnecting { .. }));

        let err = m
            .handle(PairingInput::DisconnectRequested, now)
            .unwrap_err();
        assert!(matches!(err, PairingError::InvalidState { .. }));
    }

    #[test]
    fn test_failed_disconnect_returns_to_linked() {
        let mut m = machine();
        let now = Utc::now();
        connect(&mut m, "c1", now);
        m.handle(PairingInput::RemoteObserved(active_status(Some("c1"))), now)
            .unwrap();
        m.handle(PairingInput::DisconnectRequested, now).unwrap();

        let effects = m
            .handle(
                PairingInput::DisconnectSettled(Err(TransportError::Network {
                    message: "timeout".to_string(),
                })),
                now,
            )
            .unwrap();
        assert!(matches!(m.state(), PairingState::Linked { .. }));
        assert!(matches!(
            effects[0],
            PairingEffect::Emit(PairingEvent::DisconnectFailed { .. })
        ));
    }

    #[test]
    fn test_successful_disconnect_reaches_idle() {
        let mut m = machine();
        let now = Utc::now();
        connect(&mut m, "c1", now);
        m.handle(PairingInput::RemoteObserved(active_status(Some("c1"))), now)
            .unwrap();
        m.handle(PairingInput::DisconnectRequested, now).unwrap();

        let effects = m
            .handle(PairingInput::DisconnectSettled(Ok(())), now)
            .unwrap();
        assert_eq!(m.state(), &PairingState::Idle);
        assert!(effects.contains(&PairingEffect::Emit(PairingEvent::Disconnected)));
        assert!(effects.contains(&PairingEffect::StopPolling));
    }

    #[test]
    fn test_tick_is_noop_outside_awaiting_scan() {
        let mut m = machine();
        let now = Utc::now();
        assert_eq!(m.handle(PairingInput::Tick, now).unwrap(), vec![]);

        connect(&mut m, "c1", now);
        m.handle(PairingInput::RemoteObserved(active_status(Some("c1"))), now)
            .unwrap();
        assert_eq!(
            m.handle(PairingInput::Tick, now + Duration::seconds(100))
                .unwrap(),
            vec![]
        );
    }
}
