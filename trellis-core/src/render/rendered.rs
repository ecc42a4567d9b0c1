//! The live counterpart of a [`VNode`] tree.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::trace;

use crate::dom::{Document, DomNode, Event, ListenerKey, PropValue};
use crate::effect::EffectHandle;
use crate::state::{Get, Registry, WeakRegistry};
use crate::view::{
    same_rc, AttrValue, ElementNode, EventContext, EventHandler, Generator, Key, ListSource,
    PropBinding, TemplateId, VNode,
};

use super::bindings::{AttrBinding, ListBinding, PropBinding as PropEffect, TextBinding, ZoneBinding};
use super::keyed;
use super::{DisplayMessage, DISPLAY_MESSAGE};

pub(crate) enum Rendered {
    Text(TextCell),
    Element(ElementCell),
    Zone(Rc<ZoneCell>),
    List(Rc<ListCell>),
    Template(TemplateCell),
}

pub(crate) struct TextCell {
    node: DomNode,
    source: Option<Generator<String>>,
    effect: Option<EffectHandle>,
}

impl TextCell {
    fn set_static(&mut self, text: &str) {
        if let Some(effect) = self.effect.take() {
            effect.unsubscribe();
        }
        self.source = None;
        self.node.set_text(text);
    }

    fn set_reactive(&mut self, generator: &Generator<String>, registry: &Registry) {
        if self.source.as_ref().is_some_and(|current| same_rc(current, generator)) {
            return;
        }
        if let Some(effect) = self.effect.take() {
            effect.unsubscribe();
        }
        self.source = Some(generator.clone());
        self.effect = Some(registry.subscribe(TextBinding {
            node: self.node.downgrade(),
            generator: generator.clone(),
        }));
    }
}

enum AttrState {
    Static(String),
    Reactive(Generator<Option<String>>, EffectHandle),
}

enum PropState {
    Static(PropValue),
    Reactive(Generator<PropValue>, EffectHandle),
}

impl AttrState {
    fn retire(&self) {
        if let AttrState::Reactive(_, effect) = self {
            effect.unsubscribe();
        }
    }
}

impl PropState {
    fn retire(&self) {
        if let PropState::Reactive(_, effect) = self {
            effect.unsubscribe();
        }
    }
}

type HandlerTable = Rc<RefCell<IndexMap<String, EventHandler>>>;

pub(crate) struct ElementCell {
    node: DomNode,
    tag: Rc<str>,
    key: Option<Key>,
    registry: WeakRegistry,
    attributes: IndexMap<String, AttrState>,
    properties: IndexMap<String, PropState>,
    handlers: HandlerTable,
    listeners: HashMap<String, ListenerKey>,
    children: Vec<Rendered>,
}

impl ElementCell {
    fn sync_attributes(&mut self, next: &IndexMap<String, AttrValue>, registry: &Registry) {
        let stale: Vec<String> = self
            .attributes
            .keys()
            .filter(|name| !next.contains_key(*name))
            .cloned()
            .collect();
        for name in stale {
            if let Some(state) = self.attributes.shift_remove(&name) {
                state.retire();
            }
            self.node.remove_attribute(&name);
        }

        for (name, value) in next {
            let unchanged = match (self.attributes.get(name), value) {
                (Some(AttrState::Static(old)), AttrValue::Static(new)) => old == new,
                (Some(AttrState::Reactive(old, _)), AttrValue::Reactive(new)) => same_rc(old, new),
                _ => false,
            };
            if unchanged {
                continue;
            }
            let state = match value {
                AttrValue::Static(value) => {
                    self.node.set_attribute(name, value);
                    AttrState::Static(value.clone())
                }
                AttrValue::Reactive(generator) => {
                    let effect = registry.subscribe(AttrBinding {
                        node: self.node.downgrade(),
                        name: name.clone(),
                        generator: generator.clone(),
                    });
                    AttrState::Reactive(generator.clone(), effect)
                }
            };
            if let Some(old) = self.attributes.insert(name.clone(), state) {
                old.retire();
            }
        }
    }

    fn sync_properties(&mut self, next: &IndexMap<String, PropBinding>, registry: &Registry) {
        let stale: Vec<String> = self
            .properties
            .keys()
            .filter(|name| !next.contains_key(*name))
            .cloned()
            .collect();
        for name in stale {
            if let Some(state) = self.properties.shift_remove(&name) {
                state.retire();
            }
            self.node.remove_property(&name);
        }

        for (name, value) in next {
            let unchanged = match (self.properties.get(name), value) {
                (Some(PropState::Static(old)), PropBinding::Static(new)) => old == new,
                (Some(PropState::Reactive(old, _)), PropBinding::Reactive(new)) => same_rc(old, new),
                _ => false,
            };
            if unchanged {
                continue;
            }
            let state = match value {
                PropBinding::Static(value) => {
                    self.node.set_property(name, value.clone());
                    PropState::Static(value.clone())
                }
                PropBinding::Reactive(generator) => {
                    let effect = registry.subscribe(PropEffect {
                        node: self.node.downgrade(),
                        name: name.clone(),
                        generator: generator.clone(),
                    });
                    PropState::Reactive(generator.clone(), effect)
                }
            };
            if let Some(old) = self.properties.insert(name.clone(), state) {
                old.retire();
            }
        }
    }

    /// One document listener per event name; it looks the current handler up
    /// in the table so a patch only has to swap table entries.
    fn sync_events(&mut self, next: &IndexMap<String, EventHandler>) {
        *self.handlers.borrow_mut() = next.clone();

        let node = &self.node;
        self.listeners.retain(|name, key| {
            let keep = next.contains_key(name);
            if !keep {
                node.remove_event_listener(*key);
            }
            keep
        });

        for name in next.keys() {
            if self.listeners.contains_key(name) {
                continue;
            }
            let handlers = self.handlers.clone();
            let registry = self.registry.clone();
            let event_name = name.clone();
            let key = self.node.add_event_listener(name, move |event, node| {
                let handler = handlers.borrow().get(&event_name).cloned();
                let (Some(handler), Some(registry)) = (handler, registry.upgrade()) else {
                    return;
                };
                let context = EventContext {
                    registry,
                    node: node.clone(),
                };
                if let Some(message) = handler(event, &context) {
                    trace!(event = %event_name, ?message, "event produced a message");
                    let mut forward = Event::new(DISPLAY_MESSAGE).with_detail(DisplayMessage {
                        message,
                        registry: context.registry.downgrade(),
                    });
                    node.dispatch_event(&mut forward);
                }
            });
            self.listeners.insert(name.clone(), key);
        }
    }

    fn retire(&self) {
        self.attributes.values().for_each(AttrState::retire);
        self.properties.values().for_each(PropState::retire);
        self.children.iter().for_each(dispose);
    }
}

pub(crate) struct ZoneCell {
    key: Option<Key>,
    anchor: DomNode,
    document: Document,
    render: RefCell<Generator<VNode>>,
    content: RefCell<Option<Rendered>>,
    effect: RefCell<Option<EffectHandle>>,
}

impl ZoneCell {
    pub(crate) fn anchor(&self) -> &DomNode {
        &self.anchor
    }

    fn start(self: &Rc<Self>, registry: &Registry) {
        let effect = registry.subscribe(ZoneBinding {
            cell: Rc::downgrade(self),
        });
        if let Some(old) = self.effect.replace(Some(effect)) {
            old.unsubscribe();
        }
    }

    fn rebind(self: &Rc<Self>, render: &Generator<VNode>, registry: &Registry) {
        let current = self.render.borrow().clone();
        if same_rc(&current, render) {
            return;
        }
        *self.render.borrow_mut() = render.clone();
        self.start(registry);
    }

    pub(crate) fn refresh(&self, get: &mut Get<'_>) {
        let render = self.render.borrow().clone();
        let next = render(get);
        let registry = get.registry().clone();
        let mut content = self.content.borrow_mut();
        match content.as_mut() {
            Some(current) => patch(&self.document, current, &next, &registry),
            None => *content = Some(mount(&self.document, &next, &registry)),
        }
    }

    fn retire(&self) {
        if let Some(effect) = self.effect.borrow_mut().take() {
            effect.unsubscribe();
        }
        if let Some(content) = self.content.borrow().as_ref() {
            dispose(content);
        }
    }
}

pub(crate) struct ListCell {
    key: Option<Key>,
    anchor: DomNode,
    document: Document,
    source: RefCell<Rc<dyn ListSource>>,
    items: RefCell<Vec<Rendered>>,
    effect: RefCell<Option<EffectHandle>>,
}

impl ListCell {
    pub(crate) fn anchor(&self) -> &DomNode {
        &self.anchor
    }

    fn start(self: &Rc<Self>, registry: &Registry) {
        let effect = registry.subscribe(ListBinding {
            cell: Rc::downgrade(self),
        });
        if let Some(old) = self.effect.replace(Some(effect)) {
            old.unsubscribe();
        }
    }

    fn rebind(self: &Rc<Self>, source: &Rc<dyn ListSource>, registry: &Registry) {
        let current = self.source.borrow().clone();
        if same_rc(&current, source) {
            return;
        }
        *self.source.borrow_mut() = source.clone();
        self.start(registry);
    }

    pub(crate) fn refresh(&self, get: &mut Get<'_>) {
        let source = self.source.borrow().clone();
        let next = source.items(get);
        let registry = get.registry().clone();
        let mut items = self.items.borrow_mut();
        let old = std::mem::take(&mut *items);
        *items = match self.anchor.parent() {
            Some(parent) => patch_children(&self.document, &parent, old, &next, &registry, Some(&self.anchor)),
            // Not placed yet: the items are inserted together with the anchor.
            None => {
                old.into_iter().for_each(remove);
                next.iter().map(|item| mount(&self.document, item, &registry)).collect()
            }
        };
    }

    fn retire(&self) {
        if let Some(effect) = self.effect.borrow_mut().take() {
            effect.unsubscribe();
        }
        self.items.borrow().iter().for_each(dispose);
    }
}

pub(crate) struct TemplateCell {
    key: Key,
    template: TemplateId,
    overlay: Registry,
    content: Box<Rendered>,
}

/// Build the document nodes for `vnode`, detached.
pub(crate) fn mount(document: &Document, vnode: &VNode, registry: &Registry) -> Rendered {
    match vnode {
        VNode::Text(text) => Rendered::Text(TextCell {
            node: document.create_text(text),
            source: None,
            effect: None,
        }),
        VNode::ReactiveText(generator) => {
            let mut cell = TextCell {
                node: document.create_text(""),
                source: None,
                effect: None,
            };
            cell.set_reactive(generator, registry);
            Rendered::Text(cell)
        }
        VNode::Element(element) => Rendered::Element(mount_element(document, element, registry)),
        VNode::Zone(zone) => {
            let cell = Rc::new(ZoneCell {
                key: zone.key.clone(),
                anchor: document.create_comment("zone"),
                document: document.clone(),
                render: RefCell::new(zone.render.clone()),
                content: RefCell::new(None),
                effect: RefCell::new(None),
            });
            cell.start(registry);
            Rendered::Zone(cell)
        }
        VNode::List(list) => {
            let cell = Rc::new(ListCell {
                key: list.key.clone(),
                anchor: document.create_comment("list"),
                document: document.clone(),
                source: RefCell::new(list.source.clone()),
                items: RefCell::new(Vec::new()),
                effect: RefCell::new(None),
            });
            cell.start(registry);
            Rendered::List(cell)
        }
        VNode::Template(instance) => {
            let overlay = instance.template.instantiate(registry, &*instance.bind);
            let content = mount(document, instance.template.view(), &overlay);
            Rendered::Template(TemplateCell {
                key: instance.key.clone(),
                template: instance.template.id(),
                overlay,
                content: Box::new(content),
            })
        }
    }
}

fn mount_element(document: &Document, element: &ElementNode, registry: &Registry) -> ElementCell {
    let mut cell = ElementCell {
        node: document.create_element(&element.tag),
        tag: element.tag.clone(),
        key: element.key.clone(),
        registry: registry.downgrade(),
        attributes: IndexMap::new(),
        properties: IndexMap::new(),
        handlers: Rc::new(RefCell::new(IndexMap::new())),
        listeners: HashMap::new(),
        children: Vec::with_capacity(element.children.len()),
    };
    cell.sync_attributes(&element.attributes, registry);
    cell.sync_properties(&element.properties, registry);
    cell.sync_events(&element.events);
    for child in &element.children {
        let rendered = mount(document, child, registry);
        insert(&cell.node, &rendered, None);
        cell.children.push(rendered);
    }
    cell
}

/// Bring `rendered` in line with `next`, reusing document nodes where the
/// kind (and tag, key, template) still match.
pub(crate) fn patch(document: &Document, rendered: &mut Rendered, next: &VNode, registry: &Registry) {
    if !patch_in_place(document, rendered, next, registry) {
        replace(document, rendered, next, registry);
    }
}

fn patch_in_place(document: &Document, rendered: &mut Rendered, next: &VNode, registry: &Registry) -> bool {
    match (rendered, next) {
        (Rendered::Text(cell), VNode::Text(text)) => cell.set_static(text),
        (Rendered::Text(cell), VNode::ReactiveText(generator)) => cell.set_reactive(generator, registry),
        (Rendered::Element(cell), VNode::Element(element))
            if cell.tag == element.tag && cell.key == element.key =>
        {
            cell.sync_attributes(&element.attributes, registry);
            cell.sync_properties(&element.properties, registry);
            cell.sync_events(&element.events);
            let old = std::mem::take(&mut cell.children);
            cell.children = patch_children(document, &cell.node, old, &element.children, registry, None);
        }
        (Rendered::Zone(cell), VNode::Zone(zone)) if cell.key == zone.key => cell.rebind(&zone.render, registry),
        (Rendered::List(cell), VNode::List(list)) if cell.key == list.key => cell.rebind(&list.source, registry),
        (Rendered::Template(cell), VNode::Template(instance))
            if cell.template == instance.template.id() && cell.key == instance.key =>
        {
            let overlay = cell.overlay.clone();
            overlay.batch(|| (instance.bind)(&overlay));
        }
        _ => return false,
    }
    true
}

fn replace(document: &Document, rendered: &mut Rendered, next: &VNode, registry: &Registry) {
    let fresh = mount(document, next, registry);
    let first = first_dom(rendered);
    if let Some(parent) = first.parent() {
        insert(&parent, &fresh, Some(&first));
    }
    remove(std::mem::replace(rendered, fresh));
}

/// Reconcile the children of `parent` that sit before `end` (or at the end).
/// Children are diffed by key when every old and new child has one, and by
/// position otherwise.
pub(crate) fn patch_children(
    document: &Document,
    parent: &DomNode,
    old: Vec<Rendered>,
    next: &[VNode],
    registry: &Registry,
    end: Option<&DomNode>,
) -> Vec<Rendered> {
    let keyed = !old.is_empty()
        && !next.is_empty()
        && old.iter().all(|rendered| key(rendered).is_some())
        && next.iter().all(|vnode| vnode.key().is_some());
    if keyed {
        return reconcile_keyed(document, parent, old, next, registry, end);
    }

    let mut result = Vec::with_capacity(next.len());
    let mut old = old.into_iter();
    for vnode in next {
        match old.next() {
            Some(mut rendered) => {
                patch(document, &mut rendered, vnode, registry);
                result.push(rendered);
            }
            None => {
                let rendered = mount(document, vnode, registry);
                insert(parent, &rendered, end);
                result.push(rendered);
            }
        }
    }
    old.for_each(remove);
    result
}

fn reconcile_keyed(
    document: &Document,
    parent: &DomNode,
    old: Vec<Rendered>,
    next: &[VNode],
    registry: &Registry,
    end: Option<&DomNode>,
) -> Vec<Rendered> {
    let old_keys: Vec<Key> = old.iter().filter_map(key).collect();
    let new_keys: Vec<Key> = next.iter().filter_map(|vnode| vnode.key().cloned()).collect();
    let plan = keyed::plan(&old_keys, &new_keys);
    trace!(
        prefix = plan.prefix,
        suffix = plan.suffix,
        moves = plan.moves(),
        insertions = plan.insertions(),
        removals = plan.removed.len(),
        "keyed reconcile"
    );

    let mut old: Vec<Option<Rendered>> = old.into_iter().map(Some).collect();
    for &index in &plan.removed {
        if let Some(rendered) = old[index].take() {
            remove(rendered);
        }
    }

    let mut result: Vec<Option<Rendered>> = next.iter().map(|_| None).collect();
    let mut reuse = |old_index: usize, new_index: usize, result: &mut Vec<Option<Rendered>>| {
        if let Some(mut rendered) = old[old_index].take() {
            patch(document, &mut rendered, &next[new_index], registry);
            result[new_index] = Some(rendered);
        }
    };
    for index in 0..plan.prefix {
        reuse(index, index, &mut result);
    }
    for offset in 1..=plan.suffix {
        reuse(old_keys.len() - offset, next.len() - offset, &mut result);
    }

    // Right to left, so the reference node is always already in place.
    for (position, source) in plan.sources.iter().enumerate().rev() {
        let new_index = plan.prefix + position;
        let reference = result
            .get(new_index + 1)
            .and_then(Option::as_ref)
            .map(first_dom)
            .or_else(|| end.cloned());
        let rendered = match source.and_then(|index| old[index].take()) {
            Some(mut rendered) => {
                patch(document, &mut rendered, &next[new_index], registry);
                if !plan.stable[position] {
                    insert(parent, &rendered, reference.as_ref());
                }
                rendered
            }
            None => {
                let rendered = mount(document, &next[new_index], registry);
                insert(parent, &rendered, reference.as_ref());
                rendered
            }
        };
        result[new_index] = Some(rendered);
    }

    result.into_iter().flatten().collect()
}

pub(crate) fn key(rendered: &Rendered) -> Option<Key> {
    match rendered {
        Rendered::Text(_) => None,
        Rendered::Element(cell) => cell.key.clone(),
        Rendered::Zone(cell) => cell.key.clone(),
        Rendered::List(cell) => cell.key.clone(),
        Rendered::Template(cell) => Some(cell.key.clone()),
    }
}

/// The document nodes of `rendered`, in order. Zones and lists end with
/// their anchor comment.
pub(crate) fn dom_nodes(rendered: &Rendered) -> Vec<DomNode> {
    let mut nodes = Vec::new();
    collect_nodes(rendered, &mut nodes);
    nodes
}

fn collect_nodes(rendered: &Rendered, nodes: &mut Vec<DomNode>) {
    match rendered {
        Rendered::Text(cell) => nodes.push(cell.node.clone()),
        Rendered::Element(cell) => nodes.push(cell.node.clone()),
        Rendered::Zone(cell) => {
            if let Some(content) = cell.content.borrow().as_ref() {
                collect_nodes(content, nodes);
            }
            nodes.push(cell.anchor.clone());
        }
        Rendered::List(cell) => {
            for item in cell.items.borrow().iter() {
                collect_nodes(item, nodes);
            }
            nodes.push(cell.anchor.clone());
        }
        Rendered::Template(cell) => collect_nodes(&cell.content, nodes),
    }
}

pub(crate) fn first_dom(rendered: &Rendered) -> DomNode {
    match rendered {
        Rendered::Text(cell) => cell.node.clone(),
        Rendered::Element(cell) => cell.node.clone(),
        Rendered::Zone(cell) => cell
            .content
            .borrow()
            .as_ref()
            .map(first_dom)
            .unwrap_or_else(|| cell.anchor.clone()),
        Rendered::List(cell) => cell
            .items
            .borrow()
            .first()
            .map(first_dom)
            .unwrap_or_else(|| cell.anchor.clone()),
        Rendered::Template(cell) => first_dom(&cell.content),
    }
}

/// Insert (or move) every node of `rendered` before `reference`.
pub(crate) fn insert(parent: &DomNode, rendered: &Rendered, reference: Option<&DomNode>) {
    for node in dom_nodes(rendered) {
        parent.insert_before(&node, reference);
    }
}

/// Retire every binding under `rendered` without touching the document.
pub(crate) fn dispose(rendered: &Rendered) {
    match rendered {
        Rendered::Text(cell) => {
            if let Some(effect) = &cell.effect {
                effect.unsubscribe();
            }
        }
        Rendered::Element(cell) => cell.retire(),
        Rendered::Zone(cell) => cell.retire(),
        Rendered::List(cell) => cell.retire(),
        Rendered::Template(cell) => dispose(&cell.content),
    }
}

pub(crate) fn remove(rendered: Rendered) {
    dispose(&rendered);
    for node in dom_nodes(&rendered) {
        node.remove();
    }
}
