//! Trellis Core
//!
//! This crate provides the core runtime for the Trellis reactive UI framework.
//! It implements:
//!
//! - A reactive state graph (tokens, handlers, registries, derivations)
//! - Message dispatch with batching, writers and commands
//! - Effects with versioned subscriptions
//! - A tree reconciler with a keyed children diff
//! - Server rendering with hydration snapshots and streaming
//!
//! Everything is single-threaded: state lives in `Rc`s and no type here is
//! `Send`.
//!
//! # Architecture
//!
//! - `state`: tokens, handlers, registries and the flush scheduler
//! - `dispatch`: messages and how they are applied
//! - `effect`: side-effecting listeners
//! - `view`: the immutable node tree views are described with
//! - `dom`: the in-memory document the reconciler writes to
//! - `render`: mount and patch
//! - `ssr`: string and streamed server output
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::prelude::*;
//!
//! let clicks = container(0);
//! let view = el("button")
//!     .on("click", {
//!         let clicks = clicks.clone();
//!         move |_, _| Some(Message::update(&clicks, |n| n + 1))
//!     })
//!     .child(reactive_text({
//!         let clicks = clicks.clone();
//!         move |get| format!("Clicks: {}", get.get(&clicks))
//!     }))
//!     .build();
//!
//! let registry = Registry::new();
//! let document = Document::new();
//! let mount = render(&registry, &document, document.body(), &view);
//! ```

pub mod config;
pub mod dispatch;
pub mod dom;
pub mod effect;
pub mod error;
pub mod render;
pub mod ssr;
pub mod state;
pub mod view;

mod html;

pub use config::RenderConfig;
pub use error::{Result, StoreError};

/// The types most views and stores need.
pub mod prelude {
    pub use crate::config::RenderConfig;
    pub use crate::dispatch::{CommandContext, Message, WriterActions};
    pub use crate::dom::{Document, DomNode, Event, PropValue};
    pub use crate::effect::{effect_fn, Effect, EffectHandle};
    pub use crate::error::{Result, StoreError};
    pub use crate::render::{render, Mount};
    pub use crate::ssr::{render_to_string, InitActions, Store};
    pub use crate::state::{
        command, container, derived, scoped, supplied, value, Get, Meta, Readable, Registry, Token,
        Writable,
    };
    pub use crate::view::{el, instance, list, reactive_text, template, text, zone, Key, VNode};
}
