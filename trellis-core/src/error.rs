//! Error types for the store and renderer.
//!
//! Only data errors and programmer errors that can be reported without
//! unwinding end up here. Failures of asynchronous writers and commands are
//! not errors at this level: they are captured into a token's
//! [`Meta`](crate::state::Meta) state so views can render them.

use thiserror::Error;

/// Errors surfaced by dispatch, snapshots and configuration loading.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A command was executed in a registry that has no controller for it.
    #[error("no controller installed for command `{command}`")]
    UnhandledCommand { command: String },

    /// A fallible reducer rejected a message.
    #[error("reducer for `{token}` rejected message: {reason}")]
    Reducer { token: String, reason: String },

    /// A hydration snapshot could not be parsed or produced as JSON.
    #[error("snapshot json: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// A snapshot could not be encoded as MessagePack.
    #[error("snapshot encode: {0}")]
    SnapshotEncode(#[from] rmp_serde::encode::Error),

    /// A snapshot could not be decoded from MessagePack.
    #[error("snapshot decode: {0}")]
    SnapshotDecode(#[from] rmp_serde::decode::Error),

    /// Render configuration was invalid.
    #[error("invalid render config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
