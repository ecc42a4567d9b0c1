//! Effect Implementation
//!
//! An effect is a side-effecting computation that re-runs whenever state it
//! read changes.
//!
//! # How Effects Work
//!
//! 1. When subscribed, the effect runs [`Effect::init`] immediately, reading
//!    state through a tracked [`Get`]. Every read subscribes the effect.
//!
//! 2. When a dependency publishes, the effect is queued and runs once in the
//!    next flush, after all queued derivations have settled.
//!
//! 3. Before each run the effect's version is bumped, which turns every
//!    subscription from earlier runs stale. Dependencies always reflect what
//!    the latest run read.
//!
//! # Retirement
//!
//! An effect is retired when its handle says so, when its registry is gone,
//! or when [`Effect::is_live`] turns false. Retirement is pulled: a retired
//! effect is not removed from the handlers it read, it is skipped and pruned
//! the next time one of them publishes.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::state::{Get, Listener, ListenerId, Registry, WeakRegistry};

/// A computation that keeps something in sync with state.
pub trait Effect: 'static {
    /// First run.
    fn init(&mut self, get: &mut Get<'_>);

    /// Every later run.
    fn run(&mut self, get: &mut Get<'_>) {
        self.init(get)
    }

    /// Whether the effect still has something to update. Checked before
    /// every re-run; `false` retires the effect for good.
    fn is_live(&self) -> bool {
        true
    }
}

/// An [`Effect`] made from a closure.
pub struct FnEffect<F>(F);

/// Wrap a closure into an [`Effect`] that does the same thing on every run.
pub fn effect_fn<F>(f: F) -> FnEffect<F>
where
    F: FnMut(&mut Get<'_>) + 'static,
{
    FnEffect(f)
}

impl<F> Effect for FnEffect<F>
where
    F: FnMut(&mut Get<'_>) + 'static,
{
    fn init(&mut self, get: &mut Get<'_>) {
        (self.0)(get)
    }
}

/// A subscribed effect: the listener the scheduler runs.
pub(crate) struct EffectCell<E: Effect> {
    id: ListenerId,
    version: Cell<u64>,
    retired: Cell<bool>,
    runs: Cell<usize>,
    registry: WeakRegistry,
    effect: RefCell<E>,
    this: Weak<EffectCell<E>>,
}

impl<E: Effect> EffectCell<E> {
    /// Subscribe `effect` to `registry`, running `init` in a batch scope.
    pub(crate) fn spawn(registry: &Registry, effect: E) -> EffectHandle {
        let cell = Rc::new_cyclic(|this| Self {
            id: ListenerId::new(),
            version: Cell::new(0),
            retired: Cell::new(false),
            runs: Cell::new(0),
            registry: registry.downgrade(),
            effect: RefCell::new(effect),
            this: this.clone(),
        });
        registry.batch(|| cell.execute());
        EffectHandle { cell }
    }

    fn execute(&self) {
        if self.retired.get() {
            return;
        }
        let Some(registry) = self.registry.upgrade() else {
            self.retire();
            return;
        };
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let Ok(mut effect) = self.effect.try_borrow_mut() else {
            tracing::warn!(listener = ?self.id, "effect re-entered its own run; skipped");
            return;
        };
        let first = self.runs.get() == 0;
        if !first && !effect.is_live() {
            drop(effect);
            self.retire();
            return;
        }

        let version = self.version.get() + 1;
        self.version.set(version);
        let listener: Rc<dyn Listener> = this;
        let mut get = Get::tracked(&registry, listener, version);
        if first {
            effect.init(&mut get);
        } else {
            effect.run(&mut get);
        }
        self.runs.set(self.runs.get() + 1);
        tracing::trace!(listener = ?self.id, deps = get.dependency_count(), "effect run");
    }

    fn retire(&self) {
        if !self.retired.replace(true) {
            self.version.set(self.version.get() + 1);
        }
    }
}

impl<E: Effect> Listener for EffectCell<E> {
    fn listener_id(&self) -> ListenerId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version.get()
    }

    fn is_eager(&self) -> bool {
        true
    }

    fn is_retired(&self) -> bool {
        if self.retired.get() || self.registry.upgrade().is_none() {
            return true;
        }
        // A running effect is queued again by its own writes; it is live.
        match self.effect.try_borrow() {
            Ok(effect) => self.runs.get() > 0 && !effect.is_live(),
            Err(_) => false,
        }
    }

    fn run(self: Rc<Self>) {
        self.execute();
    }
}

/// Type-erased control over a subscribed effect.
trait EffectControl {
    fn retire(&self);
    fn is_retired(&self) -> bool;
    fn run_count(&self) -> usize;
}

impl<E: Effect> EffectControl for EffectCell<E> {
    fn retire(&self) {
        EffectCell::retire(self)
    }

    fn is_retired(&self) -> bool {
        Listener::is_retired(self)
    }

    fn run_count(&self) -> usize {
        self.runs.get()
    }
}

/// Handle to a subscribed effect.
///
/// Dropping the handle does not stop the effect; call
/// [`EffectHandle::unsubscribe`].
#[derive(Clone)]
pub struct EffectHandle {
    cell: Rc<dyn EffectControl>,
}

impl EffectHandle {
    /// Retire the effect. It never runs again, even if already queued.
    pub fn unsubscribe(&self) {
        self.cell.retire();
    }

    pub fn is_retired(&self) -> bool {
        self.cell.is_retired()
    }

    /// Number of completed runs, `init` included.
    pub fn run_count(&self) -> usize {
        self.cell.run_count()
    }
}

impl fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectHandle")
            .field("runs", &self.run_count())
            .field("retired", &self.is_retired())
            .finish()
    }
}
