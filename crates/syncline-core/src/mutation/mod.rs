//! Mutation-triggered cache invalidation protocol.

pub mod protocol;
pub mod types;

pub use protocol::MutationRunner;
pub use types::MutationSpec;
