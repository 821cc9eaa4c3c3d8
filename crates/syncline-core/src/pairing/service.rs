//! Actor service driving the pairing machine.
//!
//! The task owns the machine exclusively; network requests, the countdown
//! tick and status-poll observations all arrive as messages and are applied
//! one at a time. Status polling goes through the scheduler under a single
//! key, with an interval policy that reads the current poll phase so the
//! cadence changes without resubscribing.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::PairingConfig;
use crate::errors::SynclineError;
use crate::pairing::api::PairingApi;
use crate::pairing::errors::PairingError;
use crate::pairing::machine::{PairingEffect, PairingInput, PairingMachine};
use crate::pairing::types::{PairingEvent, RemoteStatus};
use crate::scheduler::{FetchError, Fetcher, IntervalPolicy, Scheduler, SourceKey, SourceUpdate};
use crate::transport::TransportError;

enum PairingMsg {
    Connect {
        reply: oneshot::Sender<Result<(), PairingError>>,
    },
    Disconnect {
        confirmed: bool,
        reply: oneshot::Sender<Result<(), PairingError>>,
    },
    ConnectSettled(Result<String, TransportError>),
    DisconnectSettled(Result<(), TransportError>),
    StatusUpdate(SourceUpdate),
    Shutdown,
}

/// Which cadence the status subscription should poll at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollPhase {
    Inactive,
    Scanning,
    Linked,
}

/// Handle to the pairing service. Cheap to clone.
#[derive(Clone)]
pub struct PairingService {
    tx: mpsc::UnboundedSender<PairingMsg>,
}

impl PairingService {
    /// Spawn the pairing service on the current runtime.
    ///
    /// Returns the handle and the stream of UI-facing events.
    pub fn spawn(
        api: PairingApi,
        scheduler: Scheduler,
        config: PairingConfig,
    ) -> (Self, mpsc::UnboundedReceiver<PairingEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let task = PairingTask {
            machine: PairingMachine::new(config.credential_ttl()),
            api,
            scheduler,
            config,
            tx: tx.clone(),
            event_tx,
            poll_phase: Arc::new(Mutex::new(PollPhase::Inactive)),
            status_forwarder: None,
        };
        tokio::spawn(task.run(rx));
        (Self { tx }, event_rx)
    }

    /// Start pairing: request a credential and begin scan polling.
    pub async fn connect(&self) -> Result<(), PairingError> {
        self.send_with_reply(|reply| PairingMsg::Connect { reply })
            .await
    }

    /// Discard the displayed credential and request a fresh one.
    pub async fn refresh_credential(&self) -> Result<(), PairingError> {
        self.send_with_reply(|reply| PairingMsg::Connect { reply })
            .await
    }

    /// End the linked session. Callers must pass `confirmed = true` after
    /// user acknowledgment; an unconfirmed request is rejected without
    /// touching the session.
    pub async fn disconnect(&self, confirmed: bool) -> Result<(), PairingError> {
        self.send_with_reply(|reply| PairingMsg::Disconnect { confirmed, reply })
            .await
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(PairingMsg::Shutdown);
    }

    async fn send_with_reply(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<(), PairingError>>) -> PairingMsg,
    ) -> Result<(), PairingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .map_err(|_| PairingError::ServiceUnavailable)?;
        reply_rx.await.map_err(|_| PairingError::ServiceUnavailable)?
    }
}

struct PairingTask {
    machine: PairingMachine,
    api: PairingApi,
    scheduler: Scheduler,
    config: PairingConfig,
    tx: mpsc::UnboundedSender<PairingMsg>,
    event_tx: mpsc::UnboundedSender<PairingEvent>,
    /// Shared with the interval policy of the status subscription.
    poll_phase: Arc<Mutex<PollPhase>>,
    /// Task pumping status updates into the mailbox; aborting it drops the
    /// subscription handle and unsubscribes.
    status_forwarder: Option<tokio::task::JoinHandle<()>>,
}

fn status_key() -> SourceKey {
    SourceKey::root("pairing").with("status")
}

impl PairingTask {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<PairingMsg>) {
        let mut ticker = tokio::time::interval(self.config.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    match msg {
                        PairingMsg::Connect { reply } => {
                            let result = self.apply(PairingInput::ConnectRequested);
                            let _ = reply.send(result);
                        }
                        PairingMsg::Disconnect { confirmed, reply } => {
                            let result = if confirmed {
                                self.apply(PairingInput::DisconnectRequested)
                            } else {
                                Err(PairingError::ConfirmationRequired)
                            };
                            let _ = reply.send(result);
                        }
                        PairingMsg::ConnectSettled(outcome) => {
                            let _ = self.apply(PairingInput::ConnectSettled(outcome));
                        }
                        PairingMsg::DisconnectSettled(outcome) => {
                            let _ = self.apply(PairingInput::DisconnectSettled(outcome));
                        }
                        PairingMsg::StatusUpdate(update) => self.on_status_update(update),
                        PairingMsg::Shutdown => break,
                    }
                }
                _ = ticker.tick() => {
                    let _ = self.apply(PairingInput::Tick);
                }
            }
        }

        self.stop_polling();
        info!(event = "core.pairing.shutdown");
    }

    fn apply(&mut self, input: PairingInput) -> Result<(), PairingError> {
        match self.machine.handle(input, Utc::now()) {
            Ok(effects) => {
                for effect in effects {
                    self.execute(effect);
                }
                Ok(())
            }
            Err(error) => {
                debug!(
                    event = "core.pairing.input_rejected",
                    error_code = error.error_code(),
                );
                Err(error)
            }
        }
    }

    fn execute(&mut self, effect: PairingEffect) {
        match effect {
            PairingEffect::IssueConnect => {
                debug!(event = "core.pairing.connect_started");
                let api = self.api.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let outcome = api.connect().await;
                    let _ = tx.send(PairingMsg::ConnectSettled(outcome));
                });
            }
            PairingEffect::IssueDisconnect => {
                debug!(event = "core.pairing.disconnect_started");
                let api = self.api.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let outcome = api.disconnect().await;
                    let _ = tx.send(PairingMsg::DisconnectSettled(outcome));
                });
            }
            PairingEffect::StartScanPolling => self.set_poll_phase(PollPhase::Scanning),
            PairingEffect::StartLinkedPolling => self.set_poll_phase(PollPhase::Linked),
            PairingEffect::StopPolling => self.stop_polling(),
            PairingEffect::Emit(event) => {
                if let PairingEvent::LinkEstablished { .. } = &event {
                    info!(event = "core.pairing.link_established");
                }
                let _ = self.event_tx.send(event);
            }
        }
    }

    fn set_poll_phase(&mut self, phase: PollPhase) {
        {
            let mut current = self
                .poll_phase
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if *current == phase {
                return;
            }
            *current = phase;
        }
        debug!(event = "core.pairing.poll_phase_changed", phase = ?phase);

        if self.status_forwarder.is_some() {
            // Cadence changes take effect after the next fetch; pull one
            // forward so the new interval applies promptly.
            self.scheduler.force_refresh(status_key());
            return;
        }

        let api = self.api.clone();
        let fetcher: Fetcher = Arc::new(move || {
            let api = api.clone();
            async move {
                let status = api.status().await.map_err(FetchError::from)?;
                serde_json::to_value(status).map_err(|e| FetchError::Network {
                    message: e.to_string(),
                })
            }
            .boxed()
        });

        let poll_phase = self.poll_phase.clone();
        let scan = self.config.scan_poll();
        let linked = self.config.linked_poll();
        let policy: IntervalPolicy = Arc::new(move |_payload| {
            match *poll_phase.lock().unwrap_or_else(|e| e.into_inner()) {
                PollPhase::Linked => linked,
                PollPhase::Scanning | PollPhase::Inactive => scan,
            }
        });

        let mut handle = self.scheduler.subscribe(status_key(), fetcher, policy);
        let tx = self.tx.clone();
        self.status_forwarder = Some(tokio::spawn(async move {
            while let Some(update) = handle.recv().await {
                if tx.send(PairingMsg::StatusUpdate(update)).is_err() {
                    break;
                }
            }
        }));
    }

    fn stop_polling(&mut self) {
        *self.poll_phase.lock().unwrap_or_else(|e| e.into_inner()) = PollPhase::Inactive;
        if let Some(forwarder) = self.status_forwarder.take() {
            forwarder.abort();
            // The retained status cache describes the session that just
            // ended; a reconnect within the grace window must observe fresh
            // remote state, not be served the old snapshot.
            self.scheduler.invalidate(status_key());
            debug!(event = "core.pairing.status_polling_stopped");
        }
    }

    fn on_status_update(&mut self, update: SourceUpdate) {
        match update {
            SourceUpdate::Snapshot { payload, .. } => {
                match serde_json::from_value::<RemoteStatus>(payload) {
                    Ok(status) => {
                        let _ = self.apply(PairingInput::RemoteObserved(status));
                    }
                    Err(error) => {
                        warn!(
                            event = "core.pairing.status_malformed",
                            error = %error,
                        );
                    }
                }
            }
            SourceUpdate::FetchFailed { error, .. } => {
                // Transient; the countdown and local state are unaffected.
                warn!(event = "core.pairing.status_poll_failed", error = %error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use crate::transport::{ApiResponse, Method, Transport};
    use async_trait::async_trait;
    use serde_json::{Value, json};

    struct ScriptedTransport {
        status_data: Value,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn request(
            &self,
            _method: Method,
            path: &str,
            _body: Option<Value>,
        ) -> Result<ApiResponse, TransportError> {
            let data = match path {
                "/pairing/connect" => json!({"credential": "tok-1"}),
                "/pairing/status" => self.status_data.clone(),
                "/pairing/disconnect" => json!({}),
                other => panic!("unexpected path {}", other),
            };
            Ok(ApiResponse { status: 200, data })
        }
    }

    fn spawn_service(status_data: Value) -> (PairingService, mpsc::UnboundedReceiver<PairingEvent>) {
        let api = PairingApi::new(Arc::new(ScriptedTransport { status_data }));
        let scheduler = Scheduler::spawn(Default::default());
        PairingService::spawn(api, scheduler, PairingConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_emits_credential_issued() {
        let (service, mut events) = spawn_service(json!({"state": "pending"}));
        service.connect().await.unwrap();

        let event = events.recv().await.unwrap();
        let PairingEvent::CredentialIssued { credential } = event else {
            panic!("expected CredentialIssued, got {:?}", event);
        };
        assert_eq!(credential.token, "tok-1");
        assert_eq!(credential.generation, 1);
        service.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_polling_links_on_active_status() {
        let (service, mut events) =
            spawn_service(json!({"state": "active", "credential": "tok-1", "phoneNumber": "+49151"}));
        service.connect().await.unwrap();

        loop {
            match events.recv().await.unwrap() {
                PairingEvent::LinkEstablished { phone_number } => {
                    assert_eq!(phone_number.as_deref(), Some("+49151"));
                    break;
                }
                PairingEvent::CredentialIssued { .. } | PairingEvent::Countdown { .. } => {}
                other => panic!("unexpected event {:?}", other),
            }
        }
        service.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_disconnect_is_rejected() {
        let (service, _events) = spawn_service(json!({"state": "offline"}));
        let err = service.disconnect(false).await.unwrap_err();
        assert_eq!(err, PairingError::ConfirmationRequired);
        service.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_without_session_is_invalid_state() {
        let (service, _events) = spawn_service(json!({"state": "offline"}));
        let err = service.disconnect(true).await.unwrap_err();
        assert!(matches!(err, PairingError::InvalidState { .. }));
        service.shutdown();
    }

    /// Transport whose remote session dies when disconnect is called.
    struct FlippingTransport {
        status: Mutex<Value>,
    }

    #[async_trait]
    impl Transport for FlippingTransport {
        async fn request(
            &self,
            _method: Method,
            path: &str,
            _body: Option<Value>,
        ) -> Result<ApiResponse, TransportError> {
            let data = match path {
                "/pairing/connect" => json!({"credential": "tok-1"}),
                "/pairing/status" => self.status.lock().unwrap_or_else(|e| e.into_inner()).clone(),
                "/pairing/disconnect" => {
                    *self.status.lock().unwrap_or_else(|e| e.into_inner()) =
                        json!({"state": "offline"});
                    json!({})
                }
                other => panic!("unexpected path {}", other),
            };
            Ok(ApiResponse { status: 200, data })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_disconnect_ignores_cached_link_status() {
        // The status payload carries no credential echo, so only fresh
        // remote state may drive the observation: a pre-disconnect "active"
        // snapshot retained in the scheduler cache must not link the new
        // session.
        let api = PairingApi::new(Arc::new(FlippingTransport {
            status: Mutex::new(json!({"state": "active", "phoneNumber": "+49151"})),
        }));
        let scheduler = Scheduler::spawn(Default::default());
        let (service, mut events) =
            PairingService::spawn(api, scheduler, PairingConfig::default());

        service.connect().await.unwrap();
        loop {
            if let PairingEvent::LinkEstablished { .. } = events.recv().await.unwrap() {
                break;
            }
        }

        service.disconnect(true).await.unwrap();
        loop {
            if let PairingEvent::Disconnected = events.recv().await.unwrap() {
                break;
            }
        }

        // Reconnect well inside the status cache's grace window.
        service.connect().await.unwrap();
        let mut countdowns = 0;
        loop {
            match events.recv().await.unwrap() {
                PairingEvent::LinkEstablished { .. } => {
                    panic!("linked against the ended session's cached status")
                }
                // Several countdown ticks span multiple status polls, all of
                // which must observe the remote as offline.
                PairingEvent::Countdown { .. } => {
                    countdowns += 1;
                    if countdowns >= 5 {
                        break;
                    }
                }
                _ => {}
            }
        }
        service.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_events_flow_while_awaiting_scan() {
        let (service, mut events) = spawn_service(json!({"state": "pending"}));
        service.connect().await.unwrap();

        assert!(matches!(
            events.recv().await.unwrap(),
            PairingEvent::CredentialIssued { .. }
        ));
        loop {
            match events.recv().await.unwrap() {
                PairingEvent::Countdown { remaining_secs } => {
                    assert!(remaining_secs <= 45);
                    break;
                }
                PairingEvent::CredentialExpired => panic!("expired before any countdown"),
                _ => {}
            }
        }
        service.shutdown();
    }
}
