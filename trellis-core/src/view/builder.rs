//! Builder functions producing [`VNode`]s.
//!
//! ```rust,ignore
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
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::dispatch::Message;
use crate::dom::{Event, PropValue};
use crate::state::{derived, scoped, Derived, Get, Registry, Scoped, StateValue, Token, TokenKey};

use super::node::{
    AttrValue, ElementNode, EventContext, EventHandler, Generator, Key, ListNode, ListSource,
    PropBinding, Template, TemplateInstance, VNode, ZoneNode,
};

/// Static text.
pub fn text(text: impl Into<String>) -> VNode {
    VNode::Text(text.into().into())
}

/// Text recomputed from state.
pub fn reactive_text(f: impl Fn(&mut Get<'_>) -> String + 'static) -> VNode {
    VNode::ReactiveText(Rc::new(f))
}

/// A subtree recomputed from state by its own effect.
pub fn zone(f: impl Fn(&mut Get<'_>) -> VNode + 'static) -> VNode {
    VNode::Zone(Rc::new(ZoneNode {
        key: None,
        render: Rc::new(f),
    }))
}

/// Start building an element.
pub fn el(tag: &str) -> ElementBuilder {
    ElementBuilder {
        tag: tag.into(),
        key: None,
        attributes: IndexMap::new(),
        properties: IndexMap::new(),
        events: IndexMap::new(),
        children: Vec::new(),
    }
}

pub struct ElementBuilder {
    tag: Rc<str>,
    key: Option<Key>,
    attributes: IndexMap<String, AttrValue>,
    properties: IndexMap<String, PropBinding>,
    events: IndexMap<String, EventHandler>,
    children: Vec<VNode>,
}

impl ElementBuilder {
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attributes
            .insert(name.to_string(), AttrValue::Static(value.into()));
        self
    }

    /// An attribute recomputed from state; `None` removes it.
    pub fn attr_fn(mut self, name: &str, f: impl Fn(&mut Get<'_>) -> Option<String> + 'static) -> Self {
        self.attributes
            .insert(name.to_string(), AttrValue::Reactive(Rc::new(f)));
        self
    }

    pub fn prop(mut self, name: &str, value: impl Into<PropValue>) -> Self {
        self.properties
            .insert(name.to_string(), PropBinding::Static(value.into()));
        self
    }

    pub fn prop_fn(mut self, name: &str, f: impl Fn(&mut Get<'_>) -> PropValue + 'static) -> Self {
        self.properties
            .insert(name.to_string(), PropBinding::Reactive(Rc::new(f)));
        self
    }

    /// Handle `event`; a returned message is dispatched to the registry the
    /// element was rendered with.
    pub fn on(
        mut self,
        event: &str,
        handler: impl Fn(&Event, &EventContext) -> Option<Message> + 'static,
    ) -> Self {
        self.events.insert(event.to_string(), Rc::new(handler));
        self
    }

    pub fn child(mut self, child: impl Into<VNode>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn children<V: Into<VNode>>(mut self, children: impl IntoIterator<Item = V>) -> Self {
        self.children.extend(children.into_iter().map(Into::into));
        self
    }

    pub fn text(self, text: impl Into<String>) -> Self {
        self.child(self::text(text))
    }

    pub fn build(self) -> VNode {
        VNode::Element(Rc::new(ElementNode {
            tag: self.tag,
            key: self.key,
            attributes: self.attributes,
            properties: self.properties,
            events: self.events,
            children: self.children,
        }))
    }
}

impl From<ElementBuilder> for VNode {
    fn from(builder: ElementBuilder) -> Self {
        builder.build()
    }
}

impl From<&str> for VNode {
    fn from(value: &str) -> Self {
        text(value)
    }
}

impl From<String> for VNode {
    fn from(value: String) -> Self {
        text(value)
    }
}

/// A template whose instances own the `scoped` tokens.
pub fn template(scoped: impl IntoIterator<Item = TokenKey>, view: impl Into<VNode>) -> Template {
    Template::new(scoped, view.into())
}

/// One keyed instance of `template`, seeded by `bind`.
pub fn instance(
    template: &Template,
    key: impl Into<Key>,
    bind: impl Fn(&Registry) + 'static,
) -> VNode {
    VNode::Template(Rc::new(TemplateInstance {
        key: key.into(),
        template: template.clone(),
        bind: Rc::new(bind),
    }))
}

/// Tokens available to the view of one list item.
pub struct ItemScope<T: StateValue> {
    item: Scoped<T>,
    index: Scoped<usize>,
    owned: RefCell<Vec<TokenKey>>,
}

impl<T: StateValue> ItemScope<T> {
    fn new() -> Self {
        let item = scoped::<T>().named("item");
        let index = scoped::<usize>().named("index");
        let owned = RefCell::new(vec![item.key(), index.key()]);
        Self { item, index, owned }
    }

    /// The item's value.
    pub fn item(&self) -> &Scoped<T> {
        &self.item
    }

    /// The item's position in the list.
    pub fn index(&self) -> &Scoped<usize> {
        &self.index
    }

    /// A derivation evaluated per item (it may read [`ItemScope::item`]).
    pub fn derive<U: StateValue>(&self, f: impl Fn(&mut Get<'_>) -> U + 'static) -> Derived<U> {
        let token = derived(f);
        self.owned.borrow_mut().push(token.key());
        token
    }
}

struct TypedList<T: StateValue> {
    items: Generator<Vec<T>>,
    key_of: Rc<dyn Fn(&T) -> Key>,
    template: Template,
    item: Scoped<T>,
    index: Scoped<usize>,
}

impl<T: StateValue> ListSource for TypedList<T> {
    fn items(&self, get: &mut Get<'_>) -> Vec<VNode> {
        (self.items)(get)
            .into_iter()
            .enumerate()
            .map(|(position, value)| {
                let key = (self.key_of)(&value);
                let (item, index) = (self.item.clone(), self.index.clone());
                VNode::Template(Rc::new(TemplateInstance {
                    key,
                    template: self.template.clone(),
                    bind: Rc::new(move |registry: &Registry| {
                        registry.supply(&item, value.clone());
                        registry.supply(&index, position);
                    }),
                }))
            })
            .collect()
    }
}

/// A keyed list. `render` builds the item view once; every item renders it
/// in its own overlay where [`ItemScope::item`] and [`ItemScope::index`]
/// hold that item's values.
pub fn list<T, I, K, R>(items: I, key: K, render: R) -> VNode
where
    T: StateValue,
    I: Fn(&mut Get<'_>) -> Vec<T> + 'static,
    K: Fn(&T) -> Key + 'static,
    R: FnOnce(&ItemScope<T>) -> VNode,
{
    let scope = ItemScope::new();
    let view = render(&scope);
    let ItemScope { item, index, owned } = scope;
    let template = Template::new(owned.into_inner(), view);
    VNode::List(Rc::new(ListNode {
        key: None,
        source: Rc::new(TypedList {
            items: Rc::new(items),
            key_of: Rc::new(key),
            template,
            item,
            index,
        }),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::container;

    #[test]
    fn builder_collects_element_parts() {
        let node = el("a")
            .key("home")
            .attr("href", "/")
            .prop("hidden", false)
            .on("click", |_, _| None)
            .text("Home")
            .build();

        let VNode::Element(element) = &node else {
            panic!("expected an element");
        };
        assert_eq!(&*element.tag, "a");
        assert_eq!(node.key(), Some(&Key::from("home")));
        assert!(matches!(element.attributes["href"], AttrValue::Static(ref v) if v == "/"));
        assert_eq!(element.events.len(), 1);
        assert_eq!(element.children.len(), 1);
    }

    #[test]
    fn list_items_are_keyed_template_instances() {
        let registry = Registry::new();
        let names = container(vec!["a".to_string(), "b".to_string()]);
        let view = {
            let names = names.clone();
            list(
                move |get| get.get(&names),
                |name: &String| Key::from(name.as_str()),
                |scope| {
                    let item = scope.item().clone();
                    el("li").child(reactive_text(move |get| get.get(&item))).build()
                },
            )
        };

        let VNode::List(list) = view else {
            panic!("expected a list");
        };
        let items = list.source.items(&mut Get::untracked(&registry));
        let keys: Vec<_> = items.iter().filter_map(VNode::key).cloned().collect();
        assert_eq!(keys, vec![Key::from("a"), Key::from("b")]);
    }

    #[test]
    fn item_scope_registers_derivations() {
        let scope = ItemScope::<i32>::new();
        let item = scope.item().clone();
        let doubled = scope.derive(move |get| get.get(&item) * 2);
        assert!(scope.owned.borrow().contains(&doubled.key()));
        assert_eq!(scope.owned.borrow().len(), 3);
    }
}
