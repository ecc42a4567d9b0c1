//! Virtual Node Model
//!
//! Views are immutable [`VNode`] trees. Reactive parts of a view (text,
//! attributes, properties, zones, lists) carry generators that read state;
//! the renderer turns each of them into an effect bound to one document node.

mod builder;
mod node;

pub use builder::{el, instance, list, reactive_text, template, text, zone, ElementBuilder, ItemScope};
pub use node::{
    AttrValue, ElementNode, EventContext, EventHandler, Generator, Key, ListNode, ListSource,
    PropBinding, Template, TemplateId, TemplateInstance, VNode, ZoneNode,
};

pub(crate) use node::same_rc;
