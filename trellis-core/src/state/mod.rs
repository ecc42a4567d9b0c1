//! Reactive State Graph
//!
//! This module implements the state side of Trellis: tokens, the handlers
//! backing them, registries, and the scheduler that coordinates re-runs.
//!
//! # Concepts
//!
//! ## Tokens
//!
//! A token is a typed identity for a piece of state. It does not hold a value;
//! a registry creates a [`StateHandler`] for it the first time it is read.
//! The same token can therefore have different values in different
//! registries (a root registry and the overlays of list items).
//!
//! ## Handlers
//!
//! A handler holds the current value of one token in one registry and the
//! subscriptions of everything that read it. Publishing an equal value does
//! nothing; publishing a different one queues every live listener.
//!
//! ## Listeners
//!
//! Derivations and effects are listeners. Each run reads state through a
//! [`Get`], which subscribes the listener to every handler read under the
//! listener's current version. Bumping the version invalidates all previous
//! subscriptions at once, so dependencies are rediscovered on every run.
//!
//! ## Scheduling
//!
//! Writes happen inside batch scopes. When the outermost scope closes, the
//! [`Scheduler`] refreshes queued derivations in rank order and then runs
//! queued effects, each at most once.

mod get;
mod handler;
mod listener;
mod meta;
mod registry;
mod scheduler;
mod snapshot;
mod token;

pub use get::Get;
pub use handler::{HandlerId, StateHandler};
pub use listener::{Listener, ListenerId};
pub use meta::Meta;
pub use registry::{Registry, WeakRegistry};
pub use scheduler::Scheduler;
pub use snapshot::{EntryKind, Snapshot, SnapshotEntry};
pub use token::{
    command, container, derived, scoped, supplied, value, Command, Container, Derived, MetaToken,
    Readable, Scoped, StateValue, Token, TokenInfo, TokenKey, Update, Value, Writable,
};

