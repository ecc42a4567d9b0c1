//! Instrumented Reads
//!
//! Derivations, effects and view generators read state through a [`Get`].
//! A tracked `Get` belongs to one run of one listener: every handler read
//! during the run is subscribed once, under the version the listener had
//! when the run started. The next run gets a fresh `Get` and a new version,
//! so dependencies always reflect exactly what the latest run read.
//!
//! An untracked `Get` reads without subscribing. Event handlers, `use`
//! messages and the string renderer read this way.

use std::rc::Rc;

use smallvec::SmallVec;

use super::handler::HandlerId;
use super::listener::Listener;
use super::registry::Registry;
use super::token::Readable;

struct Tracker {
    listener: Rc<dyn Listener>,
    version: u64,
    seen: SmallVec<[HandlerId; 8]>,
    max_rank: u32,
}

/// Reads state from a registry, recording dependencies when tracked.
pub struct Get<'a> {
    registry: &'a Registry,
    tracker: Option<Tracker>,
}

impl<'a> Get<'a> {
    /// A reader that subscribes `listener` (at `version`) to everything read.
    pub(crate) fn tracked(registry: &'a Registry, listener: Rc<dyn Listener>, version: u64) -> Self {
        Self {
            registry,
            tracker: Some(Tracker {
                listener,
                version,
                seen: SmallVec::new(),
                max_rank: 0,
            }),
        }
    }

    /// A reader that does not subscribe anything.
    pub fn untracked(registry: &'a Registry) -> Self {
        Self {
            registry,
            tracker: None,
        }
    }

    /// Read `token`, subscribing the current listener if tracked.
    pub fn get<S: Readable>(&mut self, token: &S) -> S::Value {
        let handler = self.registry.state(token);
        // Read before subscribing: a derivation recomputed here must not
        // count this reader as a listener that missed the change.
        let value = handler.value();
        if let Some(tracker) = &mut self.tracker {
            tracker.max_rank = tracker.max_rank.max(handler.depth());
            if !tracker.seen.contains(&handler.id()) {
                tracker.seen.push(handler.id());
                handler.subscribe(tracker.listener.clone(), tracker.version);
            }
        }
        value
    }

    /// Read `token` without subscribing, even in a tracked run.
    pub fn peek<S: Readable>(&self, token: &S) -> S::Value {
        self.registry.state(token).value()
    }

    /// The registry reads resolve against (an overlay inside list items).
    pub fn registry(&self) -> &Registry {
        self.registry
    }

    pub fn is_tracking(&self) -> bool {
        self.tracker.is_some()
    }

    /// Number of distinct handlers read so far in this run.
    pub fn dependency_count(&self) -> usize {
        self.tracker
            .as_ref()
            .map(|tracker| tracker.seen.len())
            .unwrap_or(0)
    }

    pub(crate) fn max_rank(&self) -> u32 {
        self.tracker
            .as_ref()
            .map(|tracker| tracker.max_rank)
            .unwrap_or(0)
    }
}
