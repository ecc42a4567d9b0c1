//! Tokens
//!
//! A token is an identity denoting a piece of state or a command. It has no
//! behavior of its own: the handler that backs it lives in a registry and is
//! created the first time the token is read there. Cloning a token shares its
//! identity.
//!
//! Tokens are created by the factory functions [`container`], [`derived`],
//! [`value`], [`supplied`], [`scoped`] and [`command`]. A token may carry a
//! stable `id` (used for hydration snapshots) and a debug `name`.

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::dispatch::Message;

use super::get::Get;
use super::handler::StateHandler;
use super::meta::Meta;
use super::registry::Registry;
use super::snapshot::{Codec, EntryKind, Persist};

/// Values that can live in a handler.
///
/// Equality decides whether a publish is a change at all.
pub trait StateValue: Clone + PartialEq + 'static {}

impl<T: Clone + PartialEq + 'static> StateValue for T {}

/// Process-unique identity of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenKey(u64);

impl TokenKey {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for TokenKey {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity, stable id and debug name of a token.
#[derive(Debug, Clone)]
pub struct TokenInfo {
    key: TokenKey,
    id: Option<Rc<str>>,
    name: Option<Rc<str>>,
}

impl TokenInfo {
    pub(crate) fn new(key: TokenKey, id: Option<Rc<str>>, name: Option<Rc<str>>) -> Self {
        Self { key, id, name }
    }

    fn anonymous() -> Self {
        Self::new(TokenKey::new(), None, None)
    }

    pub fn key(&self) -> TokenKey {
        self.key
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn with_id(&self, id: &str) -> Rc<Self> {
        Rc::new(Self::new(self.key, Some(id.into()), self.name.clone()))
    }

    fn with_name(&self, name: &str) -> Rc<Self> {
        Rc::new(Self::new(self.key, self.id.clone(), Some(name.into())))
    }
}

impl fmt::Display for TokenInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, &self.id) {
            (Some(name), _) => f.write_str(name),
            (None, Some(id)) => f.write_str(id),
            (None, None) => write!(f, "#{}", self.key.0),
        }
    }
}

/// Anything with a token identity.
pub trait Token {
    fn info(&self) -> &Rc<TokenInfo>;

    fn key(&self) -> TokenKey {
        self.info().key()
    }
}

/// A token whose handler can be read.
pub trait Readable: Token + Clone + 'static {
    type Value: StateValue;

    /// Build the handler backing this token in `registry`.
    #[doc(hidden)]
    fn create_handler(&self, registry: &Registry) -> Rc<StateHandler<Self::Value>>;

    /// Build the handler backing this token in `registry`, holding `value`.
    #[doc(hidden)]
    fn supplied_handler(
        &self,
        registry: &Registry,
        value: Self::Value,
    ) -> Rc<StateHandler<Self::Value>> {
        let handler = self.create_handler(registry);
        handler.publish(value);
        handler
    }
}

/// A token that accepts messages.
pub trait Writable: Readable {
    type Message: StateValue;

    fn initial(&self) -> Self::Value;

    /// Fold `message` into `current`. An `Err` is a rejected message.
    fn reduce(
        &self,
        message: Self::Message,
        current: &Self::Value,
    ) -> Result<Update<Self::Value>, String>;

    /// The token tracking this token's write status.
    fn meta(&self) -> MetaToken<Self::Message>;
}

/// Result of a reducer: the new value and an optional chained message.
///
/// The chained message is dispatched right after the value is published,
/// inside the same dispatch.
pub struct Update<T> {
    pub value: T,
    pub message: Option<Message>,
}

impl<T> Update<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            message: None,
        }
    }

    /// Also dispatch `message` once this update is published.
    pub fn chain(mut self, message: Message) -> Self {
        self.message = Some(message);
        self
    }
}

/// Decode a hydration entry of `kind` for `info`, if the registry has one.
fn seed<T>(
    registry: &Registry,
    info: &TokenInfo,
    kind: EntryKind,
    codec: Option<Codec<T>>,
) -> Option<T> {
    let codec = codec?;
    let entry = registry.hydration_entry(info)?;
    if entry.kind != kind {
        return None;
    }
    match (codec.decode)(entry.value) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(token = %info, %err, "ignoring undecodable hydration entry");
            None
        }
    }
}

// ----------------------------------------------------------------------------
// Container
// ----------------------------------------------------------------------------

type Reducer<T, M> = Rc<dyn Fn(M, &T) -> Result<Update<T>, String>>;

#[derive(Clone)]
struct ContainerInner<T, M> {
    info: Rc<TokenInfo>,
    meta: Rc<TokenInfo>,
    initial: T,
    reducer: Reducer<T, M>,
    value_codec: Option<Codec<T>>,
    message_codec: Option<Codec<M>>,
    meta_codec: Option<Codec<Meta<M>>>,
}

/// State holding a `T`, updated by messages of type `M` through a reducer.
pub struct Container<T: StateValue, M: StateValue = T> {
    inner: Rc<ContainerInner<T, M>>,
}

/// Create a container whose messages replace its value.
pub fn container<T: StateValue>(initial: T) -> Container<T, T> {
    Container {
        inner: Rc::new(ContainerInner {
            info: Rc::new(TokenInfo::anonymous()),
            meta: Rc::new(TokenInfo::anonymous()),
            initial,
            reducer: Rc::new(|message, _| Ok(Update::new(message))),
            value_codec: None,
            message_codec: None,
            meta_codec: None,
        }),
    }
}

impl<T: StateValue, M: StateValue> Container<T, M> {
    fn rebuild(self, f: impl FnOnce(&mut ContainerInner<T, M>)) -> Self {
        let mut inner = Rc::try_unwrap(self.inner).unwrap_or_else(|shared| (*shared).clone());
        f(&mut inner);
        Self {
            inner: Rc::new(inner),
        }
    }

    pub fn named(self, name: &str) -> Self {
        self.rebuild(|inner| {
            inner.info = inner.info.with_name(name);
            inner.meta = inner.meta.with_name(&format!("{name}:meta"));
        })
    }

    /// Replace the reducer. Messages become `M2`.
    ///
    /// Call this before [`Container::with_id`]: a new message type drops the
    /// message codecs.
    pub fn with_reducer<M2: StateValue>(
        self,
        reducer: impl Fn(M2, &T) -> Update<T> + 'static,
    ) -> Container<T, M2> {
        self.with_fallible_reducer(move |message, current| {
            Ok::<_, std::convert::Infallible>(reducer(message, current))
        })
    }

    /// Replace the reducer with one that may reject a message.
    ///
    /// A rejected message leaves the value alone and puts the container's
    /// meta state into [`Meta::Error`].
    pub fn with_fallible_reducer<M2: StateValue, E: fmt::Display>(
        self,
        reducer: impl Fn(M2, &T) -> Result<Update<T>, E> + 'static,
    ) -> Container<T, M2> {
        let inner = Rc::try_unwrap(self.inner).unwrap_or_else(|shared| (*shared).clone());
        Container {
            inner: Rc::new(ContainerInner {
                info: inner.info,
                meta: inner.meta,
                initial: inner.initial,
                reducer: Rc::new(move |message, current| {
                    reducer(message, current).map_err(|err| err.to_string())
                }),
                value_codec: inner.value_codec,
                message_codec: None,
                meta_codec: None,
            }),
        }
    }

    pub fn initial_value(&self) -> &T {
        &self.inner.initial
    }
}

impl<T, M> Container<T, M>
where
    T: StateValue + Serialize + DeserializeOwned,
    M: StateValue + Serialize + DeserializeOwned,
{
    /// Give the container a stable id so it takes part in hydration.
    pub fn with_id(self, id: &str) -> Self {
        self.rebuild(|inner| {
            inner.info = inner.info.with_id(id);
            inner.meta = inner.meta.with_id(&format!("{id}:meta"));
            inner.value_codec = Some(Codec::json());
            inner.message_codec = Some(Codec::json());
            inner.meta_codec = Some(Codec::json());
        })
    }
}

impl<T: StateValue, M: StateValue> Clone for Container<T, M> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: StateValue, M: StateValue> fmt::Debug for Container<T, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Container").field(&self.inner.info.to_string()).finish()
    }
}

impl<T: StateValue, M: StateValue> Token for Container<T, M> {
    fn info(&self) -> &Rc<TokenInfo> {
        &self.inner.info
    }
}

impl<T: StateValue, M: StateValue> Readable for Container<T, M> {
    type Value = T;

    fn create_handler(&self, registry: &Registry) -> Rc<StateHandler<T>> {
        let inner = &self.inner;
        let mut initial = seed(registry, &inner.info, EntryKind::Value, inner.value_codec)
            .unwrap_or_else(|| inner.initial.clone());

        if let Some(message) = seed(registry, &inner.info, EntryKind::Message, inner.message_codec) {
            match (inner.reducer)(message, &initial) {
                Ok(update) => initial = update.value,
                Err(reason) => {
                    tracing::warn!(token = %inner.info, %reason, "hydrated message rejected")
                }
            }
        }

        StateHandler::source(
            inner.info.clone(),
            initial,
            registry.scheduler(),
            inner
                .value_codec
                .map(|codec| Persist::new(codec, EntryKind::Value)),
        )
    }
}

impl<T: StateValue, M: StateValue> Writable for Container<T, M> {
    type Message = M;

    fn initial(&self) -> T {
        self.inner.initial.clone()
    }

    fn reduce(&self, message: M, current: &T) -> Result<Update<T>, String> {
        (self.inner.reducer)(message, current)
    }

    fn meta(&self) -> MetaToken<M> {
        MetaToken {
            info: self.inner.meta.clone(),
            codec: self.inner.meta_codec,
        }
    }
}

// ----------------------------------------------------------------------------
// Value / Supplied
// ----------------------------------------------------------------------------

#[derive(Clone)]
struct ValueInner<T> {
    info: Rc<TokenInfo>,
    meta: Rc<TokenInfo>,
    initial: T,
    supplied: bool,
    codec: Option<Codec<T>>,
    meta_codec: Option<Codec<Meta<T>>>,
}

/// Externally fed state without a reducer: a write replaces the value.
pub struct Value<T: StateValue> {
    inner: Rc<ValueInner<T>>,
}

fn value_token<T: StateValue>(initial: T, supplied: bool) -> Value<T> {
    Value {
        inner: Rc::new(ValueInner {
            info: Rc::new(TokenInfo::anonymous()),
            meta: Rc::new(TokenInfo::anonymous()),
            initial,
            supplied,
            codec: None,
            meta_codec: None,
        }),
    }
}

/// Create a plain value token.
pub fn value<T: StateValue>(initial: T) -> Value<T> {
    value_token(initial, false)
}

/// Create a value token fed by a provider (for example a server init hook).
pub fn supplied<T: StateValue>(initial: T) -> Value<T> {
    value_token(initial, true)
}

impl<T: StateValue> Value<T> {
    fn rebuild(self, f: impl FnOnce(&mut ValueInner<T>)) -> Self {
        let mut inner = Rc::try_unwrap(self.inner).unwrap_or_else(|shared| (*shared).clone());
        f(&mut inner);
        Self {
            inner: Rc::new(inner),
        }
    }

    pub fn named(self, name: &str) -> Self {
        self.rebuild(|inner| {
            inner.info = inner.info.with_name(name);
            inner.meta = inner.meta.with_name(&format!("{name}:meta"));
        })
    }

    /// Whether this token was created with [`supplied`].
    pub fn is_supplied(&self) -> bool {
        self.inner.supplied
    }
}

impl<T: StateValue + Serialize + DeserializeOwned> Value<T> {
    pub fn with_id(self, id: &str) -> Self {
        self.rebuild(|inner| {
            inner.info = inner.info.with_id(id);
            inner.meta = inner.meta.with_id(&format!("{id}:meta"));
            inner.codec = Some(Codec::json());
            inner.meta_codec = Some(Codec::json());
        })
    }
}

impl<T: StateValue> Clone for Value<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: StateValue> fmt::Debug for Value<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Value").field(&self.inner.info.to_string()).finish()
    }
}

impl<T: StateValue> Token for Value<T> {
    fn info(&self) -> &Rc<TokenInfo> {
        &self.inner.info
    }
}

impl<T: StateValue> Readable for Value<T> {
    type Value = T;

    fn create_handler(&self, registry: &Registry) -> Rc<StateHandler<T>> {
        let inner = &self.inner;
        let initial = seed(registry, &inner.info, EntryKind::Value, inner.codec)
            .unwrap_or_else(|| inner.initial.clone());
        StateHandler::source(
            inner.info.clone(),
            initial,
            registry.scheduler(),
            inner.codec.map(|codec| Persist::new(codec, EntryKind::Value)),
        )
    }
}

impl<T: StateValue> Writable for Value<T> {
    type Message = T;

    fn initial(&self) -> T {
        self.inner.initial.clone()
    }

    fn reduce(&self, message: T, _current: &T) -> Result<Update<T>, String> {
        Ok(Update::new(message))
    }

    fn meta(&self) -> MetaToken<T> {
        MetaToken {
            info: self.inner.meta.clone(),
            codec: self.inner.meta_codec,
        }
    }
}

// ----------------------------------------------------------------------------
// Derived
// ----------------------------------------------------------------------------

/// State computed from other state.
pub struct Derived<T: StateValue> {
    info: Rc<TokenInfo>,
    derive: Rc<dyn Fn(&mut Get<'_>) -> T>,
}

/// Create a memoized derivation.
pub fn derived<T: StateValue>(derive: impl Fn(&mut Get<'_>) -> T + 'static) -> Derived<T> {
    Derived {
        info: Rc::new(TokenInfo::anonymous()),
        derive: Rc::new(derive),
    }
}

impl<T: StateValue> Derived<T> {
    pub fn named(self, name: &str) -> Self {
        Self {
            info: self.info.with_name(name),
            derive: self.derive,
        }
    }
}

impl<T: StateValue> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            info: self.info.clone(),
            derive: self.derive.clone(),
        }
    }
}

impl<T: StateValue> fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Derived").field(&self.info.to_string()).finish()
    }
}

impl<T: StateValue> Token for Derived<T> {
    fn info(&self) -> &Rc<TokenInfo> {
        &self.info
    }
}

impl<T: StateValue> Readable for Derived<T> {
    type Value = T;

    fn create_handler(&self, registry: &Registry) -> Rc<StateHandler<T>> {
        StateHandler::derived(
            self.info.clone(),
            self.derive.clone(),
            registry.downgrade(),
            registry.scheduler(),
        )
    }
}

// ----------------------------------------------------------------------------
// Scoped
// ----------------------------------------------------------------------------

/// State that only exists inside overlay registries (list item, list index).
pub struct Scoped<T: StateValue> {
    info: Rc<TokenInfo>,
    _value: PhantomData<fn() -> T>,
}

/// Create a scoped token. Overlays provide its handlers.
pub fn scoped<T: StateValue>() -> Scoped<T> {
    Scoped {
        info: Rc::new(TokenInfo::anonymous()),
        _value: PhantomData,
    }
}

impl<T: StateValue> Scoped<T> {
    pub fn named(self, name: &str) -> Self {
        Self {
            info: self.info.with_name(name),
            _value: PhantomData,
        }
    }
}

impl<T: StateValue> Clone for Scoped<T> {
    fn clone(&self) -> Self {
        Self {
            info: self.info.clone(),
            _value: PhantomData,
        }
    }
}

impl<T: StateValue> fmt::Debug for Scoped<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Scoped").field(&self.info.to_string()).finish()
    }
}

impl<T: StateValue> Token for Scoped<T> {
    fn info(&self) -> &Rc<TokenInfo> {
        &self.info
    }
}

impl<T: StateValue> Readable for Scoped<T> {
    type Value = T;

    /// # Panics
    ///
    /// Always: a scoped token read outside an overlay that provides it is a
    /// programming error.
    fn create_handler(&self, _registry: &Registry) -> Rc<StateHandler<T>> {
        panic!("scoped token {} read outside of its scope", self.info)
    }

    fn supplied_handler(&self, registry: &Registry, value: T) -> Rc<StateHandler<T>> {
        StateHandler::source(self.info.clone(), value, registry.scheduler(), None)
    }
}

// ----------------------------------------------------------------------------
// Meta
// ----------------------------------------------------------------------------

/// Token for the [`Meta`] state of a writable token.
pub struct MetaToken<M: StateValue> {
    info: Rc<TokenInfo>,
    codec: Option<Codec<Meta<M>>>,
}

impl<M: StateValue> Clone for MetaToken<M> {
    fn clone(&self) -> Self {
        Self {
            info: self.info.clone(),
            codec: self.codec,
        }
    }
}

impl<M: StateValue> fmt::Debug for MetaToken<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MetaToken").field(&self.info.to_string()).finish()
    }
}

impl<M: StateValue> Token for MetaToken<M> {
    fn info(&self) -> &Rc<TokenInfo> {
        &self.info
    }
}

impl<M: StateValue> Readable for MetaToken<M> {
    type Value = Meta<M>;

    fn create_handler(&self, registry: &Registry) -> Rc<StateHandler<Meta<M>>> {
        let initial = seed(registry, &self.info, EntryKind::Meta, self.codec).unwrap_or(Meta::Ok);
        StateHandler::source(
            self.info.clone(),
            initial,
            registry.scheduler(),
            self.codec
                .map(|codec| Persist::new(codec, EntryKind::Meta).skip_when(Meta::is_ok)),
        )
    }
}

// ----------------------------------------------------------------------------
// Command
// ----------------------------------------------------------------------------

/// Token naming a command that accepts messages of type `M`.
pub struct Command<M> {
    info: Rc<TokenInfo>,
    _message: PhantomData<fn(M)>,
}

/// Create a command token. Registries install controllers for it.
pub fn command<M: 'static>() -> Command<M> {
    Command {
        info: Rc::new(TokenInfo::anonymous()),
        _message: PhantomData,
    }
}

impl<M> Command<M> {
    pub fn named(self, name: &str) -> Self {
        Self {
            info: self.info.with_name(name),
            _message: PhantomData,
        }
    }
}

impl<M> Clone for Command<M> {
    fn clone(&self) -> Self {
        Self {
            info: self.info.clone(),
            _message: PhantomData,
        }
    }
}

impl<M> fmt::Debug for Command<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Command").field(&self.info.to_string()).finish()
    }
}

impl<M> Token for Command<M> {
    fn info(&self) -> &Rc<TokenInfo> {
        &self.info
    }
}
