//! In-Memory Document
//!
//! The reconciler mutates a document through the operations a browser offers:
//! element creation, attribute and property writes, child insertion, removal
//! and reordering, and bubbling events. This module provides those operations
//! over an in-memory tree.
//!
//! # Mutation counting
//!
//! Every document keeps a [`Mutations`] tally. A mutation counts only when it
//! touches the connected tree (the node, or for insertions and removals the
//! parent, is reachable from the document root). Building a detached subtree
//! and inserting it costs one insertion, which is what a browser would lay
//! out.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::html;

/// Counts of document mutations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Mutations {
    pub created: usize,
    pub inserted: usize,
    pub moved: usize,
    pub removed: usize,
    pub text_writes: usize,
    pub attribute_writes: usize,
    pub property_writes: usize,
}

impl Mutations {
    /// Mutations of the connected tree (creation excluded).
    pub fn total(&self) -> usize {
        self.inserted
            + self.moved
            + self.removed
            + self.text_writes
            + self.attribute_writes
            + self.property_writes
    }
}

#[derive(Default)]
struct Stats(Cell<Mutations>);

impl Stats {
    fn bump(&self, f: impl FnOnce(&mut Mutations)) {
        let mut mutations = self.0.get();
        f(&mut mutations);
        self.0.set(mutations);
    }
}

/// A document: a root node with a `<body>` element.
#[derive(Clone)]
pub struct Document {
    stats: Rc<Stats>,
    root: DomNode,
    body: DomNode,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let stats = Rc::new(Stats::default());
        let root = DomNode::create(NodeKind::Document, String::new(), &stats);
        let body = DomNode::create(NodeKind::Element("body".into()), String::new(), &stats);
        root.append_child(&body);
        stats.0.set(Mutations::default());
        Self { stats, root, body }
    }

    pub fn root(&self) -> &DomNode {
        &self.root
    }

    pub fn body(&self) -> &DomNode {
        &self.body
    }

    pub fn create_element(&self, tag: &str) -> DomNode {
        DomNode::create(NodeKind::Element(tag.into()), String::new(), &self.stats)
    }

    pub fn create_text(&self, text: &str) -> DomNode {
        DomNode::create(NodeKind::Text, text.into(), &self.stats)
    }

    pub fn create_comment(&self, text: &str) -> DomNode {
        DomNode::create(NodeKind::Comment, text.into(), &self.stats)
    }

    pub fn mutations(&self) -> Mutations {
        self.stats.0.get()
    }

    pub fn reset_mutations(&self) {
        self.stats.0.set(Mutations::default());
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("body", &self.body.to_html())
            .finish()
    }
}

/// What a node is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    Element(String),
    Text,
    Comment,
}

/// A DOM property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Bool(bool),
    Text(String),
    Number(f64),
}

impl PropValue {
    /// Attribute form: `None` for `false`, empty for `true`.
    pub fn as_attribute(&self) -> Option<String> {
        match self {
            PropValue::Bool(true) => Some(String::new()),
            PropValue::Bool(false) => None,
            PropValue::Text(text) => Some(text.clone()),
            PropValue::Number(number) => Some(number.to_string()),
        }
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Text(value)
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Text(value.to_string())
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Number(value)
    }
}

/// A bubbling event.
pub struct Event {
    name: String,
    detail: Option<Rc<dyn Any>>,
    value: Option<String>,
    target: Option<DomNode>,
    stopped: bool,
}

impl Event {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            detail: None,
            value: None,
            target: None,
            stopped: false,
        }
    }

    pub fn with_detail(mut self, detail: impl Any) -> Self {
        self.detail = Some(Rc::new(detail));
        self
    }

    /// Attach an input value, as a form control event would.
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn detail<T: Any>(&self) -> Option<&T> {
        self.detail.as_ref()?.downcast_ref()
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// The node the event was dispatched on.
    pub fn target(&self) -> Option<&DomNode> {
        self.target.as_ref()
    }

    pub fn stop_propagation(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("value", &self.value)
            .field("stopped", &self.stopped)
            .finish()
    }
}

type Callback = Rc<dyn Fn(&mut Event, &DomNode)>;

/// Identifies one registered event listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerKey(u64);

impl ListenerKey {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

struct EventListener {
    key: ListenerKey,
    event: String,
    callback: Callback,
}

struct NodeData {
    kind: NodeKind,
    text: RefCell<String>,
    attributes: RefCell<IndexMap<String, String>>,
    properties: RefCell<IndexMap<String, PropValue>>,
    listeners: RefCell<Vec<EventListener>>,
    parent: RefCell<Weak<NodeData>>,
    children: RefCell<Vec<DomNode>>,
    stats: Weak<Stats>,
}

/// A node of a [`Document`]. Cloning shares the node.
#[derive(Clone)]
pub struct DomNode(Rc<NodeData>);

/// Non-owning reference to a [`DomNode`].
#[derive(Clone)]
pub struct WeakDomNode(Weak<NodeData>);

impl WeakDomNode {
    pub fn upgrade(&self) -> Option<DomNode> {
        self.0.upgrade().map(DomNode)
    }
}

impl DomNode {
    fn create(kind: NodeKind, text: String, stats: &Rc<Stats>) -> Self {
        stats.bump(|m| m.created += 1);
        Self(Rc::new(NodeData {
            kind,
            text: RefCell::new(text),
            attributes: RefCell::new(IndexMap::new()),
            properties: RefCell::new(IndexMap::new()),
            listeners: RefCell::new(Vec::new()),
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
            stats: Rc::downgrade(stats),
        }))
    }

    fn bump(&self, f: impl FnOnce(&mut Mutations)) {
        if let Some(stats) = self.0.stats.upgrade() {
            stats.bump(f);
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.0.kind
    }

    /// Tag name of an element.
    pub fn tag(&self) -> Option<&str> {
        match &self.0.kind {
            NodeKind::Element(tag) => Some(tag),
            _ => None,
        }
    }

    pub fn ptr_eq(&self, other: &DomNode) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakDomNode {
        WeakDomNode(Rc::downgrade(&self.0))
    }

    pub fn parent(&self) -> Option<DomNode> {
        self.0.parent.borrow().upgrade().map(DomNode)
    }

    pub fn children(&self) -> Vec<DomNode> {
        self.0.children.borrow().clone()
    }

    pub fn child_count(&self) -> usize {
        self.0.children.borrow().len()
    }

    pub fn next_sibling(&self) -> Option<DomNode> {
        let parent = self.parent()?;
        let children = parent.0.children.borrow();
        let index = children.iter().position(|child| child.ptr_eq(self))?;
        children.get(index + 1).cloned()
    }

    /// Whether the node is reachable from its document's root.
    pub fn is_connected(&self) -> bool {
        let mut node = self.clone();
        loop {
            if node.0.kind == NodeKind::Document {
                return true;
            }
            match node.parent() {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    fn detach_child(&self, child: &DomNode) -> bool {
        let mut children = self.0.children.borrow_mut();
        match children.iter().position(|c| c.ptr_eq(child)) {
            Some(index) => {
                children.remove(index);
                *child.0.parent.borrow_mut() = Weak::new();
                true
            }
            None => false,
        }
    }

    /// Insert `child` before `reference`, or at the end when `reference` is
    /// `None` (or not a child of this node). Moves `child` if it already has
    /// a parent.
    pub fn insert_before(&self, child: &DomNode, reference: Option<&DomNode>) {
        if reference.is_some_and(|reference| reference.ptr_eq(child)) {
            return;
        }
        let same_parent = match child.parent() {
            Some(old) => {
                old.detach_child(child);
                old.ptr_eq(self)
            }
            None => false,
        };
        {
            let mut children = self.0.children.borrow_mut();
            let index = reference
                .and_then(|reference| children.iter().position(|c| c.ptr_eq(reference)))
                .unwrap_or(children.len());
            children.insert(index, child.clone());
        }
        *child.0.parent.borrow_mut() = Rc::downgrade(&self.0);
        if self.is_connected() {
            self.bump(|m| {
                if same_parent {
                    m.moved += 1
                } else {
                    m.inserted += 1
                }
            });
        }
    }

    pub fn append_child(&self, child: &DomNode) {
        self.insert_before(child, None);
    }

    /// Remove `child` from this node. Returns `false` if it was not a child.
    pub fn remove_child(&self, child: &DomNode) -> bool {
        let removed = self.detach_child(child);
        if removed && self.is_connected() {
            self.bump(|m| m.removed += 1);
        }
        removed
    }

    /// Remove this node from its parent, if any.
    pub fn remove(&self) {
        if let Some(parent) = self.parent() {
            parent.remove_child(self);
        }
    }

    /// Data of a text or comment node.
    pub fn text(&self) -> String {
        self.0.text.borrow().clone()
    }

    pub fn set_text(&self, text: &str) {
        {
            let mut current = self.0.text.borrow_mut();
            if *current == text {
                return;
            }
            current.clear();
            current.push_str(text);
        }
        if self.is_connected() {
            self.bump(|m| m.text_writes += 1);
        }
    }

    /// Concatenated text of this node and its descendants.
    pub fn text_content(&self) -> String {
        match self.0.kind {
            NodeKind::Text => self.text(),
            NodeKind::Comment => String::new(),
            _ => self
                .0
                .children
                .borrow()
                .iter()
                .map(DomNode::text_content)
                .collect(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        self.0.attributes.borrow().get(name).cloned()
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.0.attributes.borrow().keys().cloned().collect()
    }

    pub fn set_attribute(&self, name: &str, value: &str) {
        {
            let mut attributes = self.0.attributes.borrow_mut();
            if attributes.get(name).is_some_and(|current| current == value) {
                return;
            }
            attributes.insert(name.to_string(), value.to_string());
        }
        if self.is_connected() {
            self.bump(|m| m.attribute_writes += 1);
        }
    }

    pub fn remove_attribute(&self, name: &str) {
        let removed = self.0.attributes.borrow_mut().shift_remove(name).is_some();
        if removed && self.is_connected() {
            self.bump(|m| m.attribute_writes += 1);
        }
    }

    pub fn property(&self, name: &str) -> Option<PropValue> {
        self.0.properties.borrow().get(name).cloned()
    }

    pub fn set_property(&self, name: &str, value: PropValue) {
        {
            let mut properties = self.0.properties.borrow_mut();
            if properties.get(name) == Some(&value) {
                return;
            }
            properties.insert(name.to_string(), value);
        }
        if self.is_connected() {
            self.bump(|m| m.property_writes += 1);
        }
    }

    pub fn remove_property(&self, name: &str) {
        let removed = self.0.properties.borrow_mut().shift_remove(name).is_some();
        if removed && self.is_connected() {
            self.bump(|m| m.property_writes += 1);
        }
    }

    pub fn add_event_listener(
        &self,
        event: &str,
        callback: impl Fn(&mut Event, &DomNode) + 'static,
    ) -> ListenerKey {
        let key = ListenerKey::new();
        self.0.listeners.borrow_mut().push(EventListener {
            key,
            event: event.to_string(),
            callback: Rc::new(callback),
        });
        key
    }

    pub fn remove_event_listener(&self, key: ListenerKey) {
        self.0
            .listeners
            .borrow_mut()
            .retain(|listener| listener.key != key);
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.0
            .listeners
            .borrow()
            .iter()
            .filter(|listener| listener.event == event)
            .count()
    }

    /// Dispatch `event` on this node and bubble it up through the ancestors
    /// until a listener stops it.
    pub fn dispatch_event(&self, event: &mut Event) {
        event.target = Some(self.clone());
        let mut current = Some(self.clone());
        while let Some(node) = current {
            let callbacks: Vec<Callback> = node
                .0
                .listeners
                .borrow()
                .iter()
                .filter(|listener| listener.event == event.name)
                .map(|listener| listener.callback.clone())
                .collect();
            for callback in callbacks {
                callback(event, &node);
            }
            if event.stopped {
                break;
            }
            current = node.parent();
        }
    }

    /// Serialize this node (a document serializes its children).
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    fn write_html(&self, out: &mut String) {
        match &self.0.kind {
            NodeKind::Document => {
                for child in self.0.children.borrow().iter() {
                    child.write_html(out);
                }
            }
            NodeKind::Text => html::escape_text(&self.0.text.borrow(), out),
            NodeKind::Comment => {
                out.push_str("<!--");
                out.push_str(&self.0.text.borrow());
                out.push_str("-->");
            }
            NodeKind::Element(tag) => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in self.0.attributes.borrow().iter() {
                    html::write_attr(name, value, out);
                }
                out.push('>');
                if html::is_void(tag) {
                    return;
                }
                for child in self.0.children.borrow().iter() {
                    child.write_html(out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }
}

impl fmt::Debug for DomNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.kind {
            NodeKind::Element(tag) => write!(f, "<{tag}>"),
            NodeKind::Text => write!(f, "{:?}", self.0.text.borrow()),
            NodeKind::Comment => write!(f, "<!--{}-->", self.0.text.borrow()),
            NodeKind::Document => f.write_str("#document"),
        }
    }
}
