//! Device pairing lifecycle.
//!
//! A pure state machine (`machine`) owns the transition rules for the
//! credential handshake; the actor service (`service`) wires it to the
//! transport, the countdown tick and the scheduler's status polling.

pub mod api;
pub mod errors;
pub mod machine;
pub mod service;
pub mod types;

pub use api::PairingApi;
pub use errors::PairingError;
pub use machine::{PairingEffect, PairingInput, PairingMachine};
pub use service::PairingService;
pub use types::{Credential, PairingEvent, PairingState, RemoteState, RemoteStatus};
