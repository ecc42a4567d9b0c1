//! Virtual nodes.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::dispatch::Message;
use crate::dom::{DomNode, Event, PropValue};
use crate::state::{Get, Registry, TokenKey};

/// A closure reading state to produce a value.
pub type Generator<T> = Rc<dyn Fn(&mut Get<'_>) -> T>;

/// Turns a document event into a message for the owning registry.
pub type EventHandler = Rc<dyn Fn(&Event, &EventContext) -> Option<Message>>;

/// An immutable description of something to render.
#[derive(Clone)]
pub enum VNode {
    Text(Rc<str>),
    ReactiveText(Generator<String>),
    Element(Rc<ElementNode>),
    Zone(Rc<ZoneNode>),
    List(Rc<ListNode>),
    Template(Rc<TemplateInstance>),
}

impl VNode {
    /// The key used by the keyed children diff.
    pub fn key(&self) -> Option<&Key> {
        match self {
            VNode::Text(_) | VNode::ReactiveText(_) => None,
            VNode::Element(element) => element.key.as_ref(),
            VNode::Zone(zone) => zone.key.as_ref(),
            VNode::List(list) => list.key.as_ref(),
            VNode::Template(instance) => Some(&instance.key),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            VNode::Text(_) => "text",
            VNode::ReactiveText(_) => "reactive-text",
            VNode::Element(_) => "element",
            VNode::Zone(_) => "zone",
            VNode::List(_) => "list",
            VNode::Template(_) => "template",
        }
    }
}

impl fmt::Debug for VNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VNode::Text(text) => write!(f, "Text({text:?})"),
            VNode::Element(element) => f
                .debug_struct("Element")
                .field("tag", &element.tag)
                .field("key", &element.key)
                .field("children", &element.children)
                .finish(),
            other => match other.key() {
                Some(key) => write!(f, "{}({key})", other.kind()),
                None => f.write_str(other.kind()),
            },
        }
    }
}

/// Sibling identity for the keyed diff.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Str(Rc<str>),
    Int(i64),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Str(key) => f.write_str(key),
            Key::Int(key) => write!(f, "{key}"),
        }
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Key::Str(key.into())
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Key::Str(key.into())
    }
}

impl From<i64> for Key {
    fn from(key: i64) -> Self {
        Key::Int(key)
    }
}

impl From<usize> for Key {
    fn from(key: usize) -> Self {
        Key::Int(key as i64)
    }
}

impl From<u32> for Key {
    fn from(key: u32) -> Self {
        Key::Int(key.into())
    }
}

/// An attribute value.
#[derive(Clone)]
pub enum AttrValue {
    Static(String),
    /// `None` removes the attribute.
    Reactive(Generator<Option<String>>),
}

/// A property value.
#[derive(Clone)]
pub enum PropBinding {
    Static(PropValue),
    Reactive(Generator<PropValue>),
}

pub struct ElementNode {
    pub tag: Rc<str>,
    pub key: Option<Key>,
    pub attributes: IndexMap<String, AttrValue>,
    pub properties: IndexMap<String, PropBinding>,
    pub events: IndexMap<String, EventHandler>,
    pub children: Vec<VNode>,
}

/// A subtree recomputed by its own effect.
pub struct ZoneNode {
    pub key: Option<Key>,
    pub render: Generator<VNode>,
}

/// A keyed sequence recomputed by its own effect.
pub struct ListNode {
    pub key: Option<Key>,
    pub source: Rc<dyn ListSource>,
}

/// Produces the items of a list. Items should be keyed.
pub trait ListSource {
    fn items(&self, get: &mut Get<'_>) -> Vec<VNode>;
}

/// Identity of a [`Template`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateId(u64);

impl TemplateId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A view rendered once per instance, each instance in its own overlay
/// registry owning the `scoped` tokens.
#[derive(Clone)]
pub struct Template {
    id: TemplateId,
    view: VNode,
    scoped: Rc<[TokenKey]>,
}

impl Template {
    pub fn new(scoped: impl IntoIterator<Item = TokenKey>, view: VNode) -> Self {
        Self {
            id: TemplateId::new(),
            view,
            scoped: scoped.into_iter().collect(),
        }
    }

    pub fn id(&self) -> TemplateId {
        self.id
    }

    pub fn view(&self) -> &VNode {
        &self.view
    }

    pub fn scoped(&self) -> &[TokenKey] {
        &self.scoped
    }

    /// An overlay of `registry` for one instance, seeded by `bind`.
    pub(crate) fn instantiate(&self, registry: &Registry, bind: &dyn Fn(&Registry)) -> Registry {
        let overlay = registry.overlay(self.scoped.iter().copied());
        overlay.batch(|| bind(&overlay));
        overlay
    }
}

/// One keyed use of a [`Template`]. `bind` supplies the instance's scoped
/// state; it runs on mount and again when a later patch reuses the instance.
pub struct TemplateInstance {
    pub key: Key,
    pub template: Template,
    pub bind: Rc<dyn Fn(&Registry)>,
}

/// What an event handler can see.
pub struct EventContext {
    pub registry: Registry,
    pub node: DomNode,
}

impl EventContext {
    pub fn get<S: crate::state::Readable>(&self, token: &S) -> S::Value {
        self.registry.get(token)
    }
}

/// Whether two `Rc`s point at the same allocation, ignoring metadata.
pub(crate) fn same_rc<T: ?Sized>(a: &Rc<T>, b: &Rc<T>) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}
