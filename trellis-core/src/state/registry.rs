//! Token Registry
//!
//! A registry maps tokens to their handlers. Handlers are created lazily on
//! first access and cached, so there is exactly one handler per token per
//! registry.
//!
//! # Overlays
//!
//! An overlay registry intercepts a fixed set of token keys (a list item, its
//! index, derivations over them) and delegates every other token to its
//! parent. Overlays share the root's scheduler, writers, commands and
//! hydration snapshot; they only own handlers.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::dispatch::{self, CommandController, Message, Unhandled, Writer};
use crate::effect::{Effect, EffectCell, EffectHandle};
use crate::error::Result;

use super::handler::{AnyHandler, StateHandler};
use super::scheduler::Scheduler;
use super::snapshot::{Snapshot, SnapshotEntry};
use super::token::{Command, Readable, Token, TokenInfo, TokenKey, Writable};

/// State shared by a root registry and all of its overlays.
struct Services {
    scheduler: Rc<Scheduler>,
    writers: RefCell<HashMap<TokenKey, Box<dyn Any>>>,
    commands: RefCell<HashMap<TokenKey, Box<dyn Any>>>,
    hydration: RefCell<Snapshot>,
}

struct RegistryInner {
    parent: Option<Registry>,
    scoped: HashSet<TokenKey>,
    handlers: RefCell<HashMap<TokenKey, Rc<dyn AnyHandler>>>,
    services: Rc<Services>,
}

/// Store of state handlers, keyed by token identity.
///
/// Cloning a registry shares it.
#[derive(Clone)]
pub struct Registry {
    inner: Rc<RegistryInner>,
}

/// Non-owning reference to a [`Registry`].
#[derive(Clone)]
pub struct WeakRegistry(Weak<RegistryInner>);

impl WeakRegistry {
    pub fn upgrade(&self) -> Option<Registry> {
        self.0.upgrade().map(|inner| Registry { inner })
    }
}

impl fmt::Debug for WeakRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakRegistry")
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create an empty root registry.
    pub fn new() -> Self {
        Self::with_snapshot(Snapshot::new())
    }

    /// Create a root registry whose handlers are seeded from `snapshot` as
    /// they are created.
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            inner: Rc::new(RegistryInner {
                parent: None,
                scoped: HashSet::new(),
                handlers: RefCell::new(HashMap::new()),
                services: Rc::new(Services {
                    scheduler: Rc::new(Scheduler::new()),
                    writers: RefCell::new(HashMap::new()),
                    commands: RefCell::new(HashMap::new()),
                    hydration: RefCell::new(snapshot),
                }),
            }),
        }
    }

    /// Parse a JSON hydration snapshot and seed a new root registry with it.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self::with_snapshot(Snapshot::from_json(json)?))
    }

    /// Create an overlay that owns the handlers of `scoped` and delegates
    /// every other token to this registry.
    pub fn overlay(&self, scoped: impl IntoIterator<Item = TokenKey>) -> Registry {
        Self {
            inner: Rc::new(RegistryInner {
                parent: Some(self.clone()),
                scoped: scoped.into_iter().collect(),
                handlers: RefCell::new(HashMap::new()),
                services: self.inner.services.clone(),
            }),
        }
    }

    pub fn is_overlay(&self) -> bool {
        self.inner.parent.is_some()
    }

    pub fn parent(&self) -> Option<&Registry> {
        self.inner.parent.as_ref()
    }

    /// Whether both values refer to the same registry.
    pub fn ptr_eq(&self, other: &Registry) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry(Rc::downgrade(&self.inner))
    }

    pub fn scheduler(&self) -> Rc<Scheduler> {
        self.inner.services.scheduler.clone()
    }

    /// Number of handlers owned by this registry (not its parents).
    pub fn handler_count(&self) -> usize {
        self.inner.handlers.borrow().len()
    }

    fn owns(&self, key: TokenKey) -> bool {
        self.inner.parent.is_none() || self.inner.scoped.contains(&key)
    }

    fn local<S: Readable>(&self, token: &S) -> Option<Rc<StateHandler<S::Value>>> {
        let handler = self.inner.handlers.borrow().get(&token.key()).cloned()?;
        Some(downcast(token, handler))
    }

    /// The handler for `token`, created on first access.
    ///
    /// # Panics
    ///
    /// Panics when a [`Scoped`](super::Scoped) token is read outside any
    /// overlay that provides it.
    pub fn state<S: Readable>(&self, token: &S) -> Rc<StateHandler<S::Value>> {
        if let Some(handler) = self.local(token) {
            return handler;
        }
        match &self.inner.parent {
            Some(parent) if !self.inner.scoped.contains(&token.key()) => parent.state(token),
            _ => {
                let handler = token.create_handler(self);
                tracing::trace!(token = %token.info(), overlay = self.is_overlay(), "handler created");
                self.inner
                    .handlers
                    .borrow_mut()
                    .insert(token.key(), handler.clone());
                handler
            }
        }
    }

    /// The handler for `token` if one was already created here or in a parent.
    pub fn find_state<S: Readable>(&self, token: &S) -> Option<Rc<StateHandler<S::Value>>> {
        if let Some(handler) = self.local(token) {
            return Some(handler);
        }
        if self.owns(token.key()) {
            return None;
        }
        self.inner.parent.as_ref()?.find_state(token)
    }

    /// Install `handler` for `token` in this registry, replacing any other.
    pub fn set_state<S: Readable>(&self, token: &S, handler: Rc<StateHandler<S::Value>>) {
        self.inner.handlers.borrow_mut().insert(token.key(), handler);
    }

    /// Give `token` the value `value` in this registry.
    ///
    /// Publishes to an existing local handler, or creates one holding `value`.
    /// The token becomes local to this registry either way.
    pub fn supply<S: Readable>(&self, token: &S, value: S::Value) {
        if let Some(handler) = self.local(token) {
            handler.publish(value);
            return;
        }
        let handler = token.supplied_handler(self, value);
        self.inner.handlers.borrow_mut().insert(token.key(), handler);
    }

    /// Current value of `token`, without tracking.
    pub fn get<S: Readable>(&self, token: &S) -> S::Value {
        self.state(token).value()
    }

    /// Run `effect` now and again whenever the state it read changes.
    pub fn subscribe<E: Effect>(&self, effect: E) -> EffectHandle {
        EffectCell::spawn(self, effect)
    }

    /// Dispatch `message` against this registry.
    pub fn dispatch(&self, message: Message) -> Result<()> {
        dispatch::dispatch(self, message)
    }

    /// Run `f` as one batch: listeners re-run once, after `f` returns.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.services.scheduler.batch(f)
    }

    /// Route writes of `token` through `writer`.
    pub fn set_writer<S: Writable>(&self, token: &S, writer: impl Writer<S> + 'static) {
        let writer: Rc<dyn Writer<S>> = Rc::new(writer);
        self.inner
            .services
            .writers
            .borrow_mut()
            .insert(token.key(), Box::new(writer));
    }

    pub fn writer<S: Writable>(&self, token: &S) -> Option<Rc<dyn Writer<S>>> {
        self.inner
            .services
            .writers
            .borrow()
            .get(&token.key())?
            .downcast_ref::<Rc<dyn Writer<S>>>()
            .cloned()
    }

    /// Install the controller executing `command`.
    pub fn set_command<M: 'static>(
        &self,
        command: &Command<M>,
        controller: impl CommandController<M> + 'static,
    ) {
        let controller: Rc<dyn CommandController<M>> = Rc::new(controller);
        self.inner
            .services
            .commands
            .borrow_mut()
            .insert(command.key(), Box::new(controller));
    }

    /// The controller for `command`; one that fails with
    /// [`StoreError::UnhandledCommand`](crate::StoreError::UnhandledCommand)
    /// when none was installed.
    pub fn command<M: 'static>(&self, command: &Command<M>) -> Rc<dyn CommandController<M>> {
        let installed = self
            .inner
            .services
            .commands
            .borrow()
            .get(&command.key())
            .and_then(|any| any.downcast_ref::<Rc<dyn CommandController<M>>>())
            .cloned();
        installed.unwrap_or_else(|| {
            Rc::new(Unhandled::new(command.info())) as Rc<dyn CommandController<M>>
        })
    }

    /// Serialize every persisted handler of this registry, sorted by id.
    pub fn snapshot(&self, include_meta: bool) -> Snapshot {
        let mut snapshot = Snapshot::new();
        for handler in self.inner.handlers.borrow().values() {
            if let Some((id, entry)) = handler.persisted(include_meta) {
                snapshot.insert(id, entry);
            }
        }
        snapshot.sort();
        snapshot
    }

    /// The snapshot entry of one handler, if it exists and is persisted.
    pub(crate) fn persisted(
        &self,
        key: TokenKey,
        include_meta: bool,
    ) -> Option<(String, SnapshotEntry)> {
        self.inner.handlers.borrow().get(&key)?.persisted(include_meta)
    }

    /// Restore existing handlers from `snapshot` and keep its entries for
    /// handlers created later.
    pub fn apply_snapshot(&self, snapshot: &Snapshot) {
        let handlers: Vec<Rc<dyn AnyHandler>> =
            self.inner.handlers.borrow().values().cloned().collect();
        self.batch(|| {
            for handler in handlers {
                let Some(id) = handler.info().id() else {
                    continue;
                };
                if let Some(entry) = snapshot.get(id) {
                    handler.restore(entry);
                }
            }
        });
        self.inner
            .services
            .hydration
            .borrow_mut()
            .merge(snapshot.clone());
    }

    /// The hydration entry for a token, by its stable id.
    pub(crate) fn hydration_entry(&self, info: &TokenInfo) -> Option<SnapshotEntry> {
        let id = info.id()?;
        self.inner.services.hydration.borrow().get(id).cloned()
    }
}

fn downcast<S: Readable>(token: &S, handler: Rc<dyn AnyHandler>) -> Rc<StateHandler<S::Value>> {
    match handler.as_any().downcast::<StateHandler<S::Value>>() {
        Ok(handler) => handler,
        Err(_) => unreachable!("token {} bound to a handler of another type", token.info()),
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("overlay", &self.is_overlay())
            .field("handlers", &self.handler_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{container, derived, scoped, EntryKind, Meta};
    use serde_json::json;

    #[test]
    fn one_handler_per_token() {
        let registry = Registry::new();
        let count = container(0);
        let a = registry.state(&count);
        let b = registry.state(&count.clone());
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(registry.handler_count(), 1);
    }

    #[test]
    fn overlays_delegate_unscoped_tokens() {
        let registry = Registry::new();
        let shared = container("root".to_string());
        let item = scoped::<i32>();

        let overlay = registry.overlay([item.key()]);
        overlay.supply(&item, 7);

        assert_eq!(overlay.get(&item), 7);
        assert_eq!(overlay.get(&shared), "root");
        assert!(Rc::ptr_eq(&overlay.state(&shared), &registry.state(&shared)));
        assert_eq!(overlay.handler_count(), 1);
    }

    #[test]
    fn overlay_derivations_read_scoped_state() {
        let registry = Registry::new();
        let item = scoped::<i32>();
        let item_for_double = item.clone();
        let double = derived(move |get| get.get(&item_for_double) * 2);

        let first = registry.overlay([item.key(), double.key()]);
        let second = registry.overlay([item.key(), double.key()]);
        first.supply(&item, 1);
        second.supply(&item, 5);

        assert_eq!(first.get(&double), 2);
        assert_eq!(second.get(&double), 10);
    }

    #[test]
    #[should_panic(expected = "outside of its scope")]
    fn scoped_tokens_panic_outside_their_scope() {
        let registry = Registry::new();
        registry.get(&scoped::<i32>());
    }

    #[test]
    fn find_state_does_not_create() {
        let registry = Registry::new();
        let count = container(0);
        assert!(registry.find_state(&count).is_none());
        registry.state(&count);
        assert!(registry.find_state(&count).is_some());
    }

    #[test]
    fn handlers_are_seeded_from_the_snapshot() {
        let mut snapshot = Snapshot::new();
        snapshot.insert("count", SnapshotEntry::new(EntryKind::Value, json!(41)));
        snapshot.insert(
            "count:meta",
            SnapshotEntry::new(EntryKind::Meta, json!({"type": "pending", "message": 42})),
        );
        let registry = Registry::with_snapshot(snapshot);
        let count = container(0).with_id("count");

        assert_eq!(registry.get(&count), 41);
        assert_eq!(registry.get(&count.meta()), Meta::Pending { message: 42 });
    }

    #[test]
    fn message_entries_run_through_the_reducer() {
        let mut snapshot = Snapshot::new();
        snapshot.insert("total", SnapshotEntry::new(EntryKind::Message, json!(5)));
        let registry = Registry::with_snapshot(snapshot);
        let total = container(10)
            .with_reducer(|step: i32, current: &i32| crate::state::Update::new(current + step))
            .with_id("total");

        assert_eq!(registry.get(&total), 15);
    }

    #[test]
    fn undecodable_entries_fall_back_to_the_initial_value() {
        let mut snapshot = Snapshot::new();
        snapshot.insert("count", SnapshotEntry::new(EntryKind::Value, json!("nope")));
        let registry = Registry::with_snapshot(snapshot);
        assert_eq!(registry.get(&container(3).with_id("count")), 3);
    }

    #[test]
    fn snapshot_contains_identified_state_only() {
        let registry = Registry::new();
        let count = container(2).with_id("count");
        let anonymous = container(9);
        registry.state(&count);
        registry.state(&anonymous);
        registry.state(&count.meta());

        let snapshot = registry.snapshot(true);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("count").unwrap().value, json!(2));

        registry
            .state(&count.meta())
            .publish(Meta::Pending { message: 3 });
        assert_eq!(registry.snapshot(true).len(), 2);
        assert_eq!(registry.snapshot(false).len(), 1);
    }

    #[test]
    fn apply_snapshot_restores_live_handlers() {
        let registry = Registry::new();
        let count = container(0).with_id("count");
        registry.state(&count);

        let mut snapshot = Snapshot::new();
        snapshot.insert("count", SnapshotEntry::new(EntryKind::Value, json!(12)));
        registry.apply_snapshot(&snapshot);
        assert_eq!(registry.get(&count), 12);
    }

    #[test]
    fn missing_commands_resolve_to_the_unhandled_controller() {
        let registry = Registry::new();
        let save = crate::state::command::<String>().named("save");
        let err = registry
            .command(&save)
            .run("x".into(), &crate::dispatch::CommandContext::new(&registry))
            .unwrap_err();
        assert!(err.to_string().contains("save"));
    }
}
