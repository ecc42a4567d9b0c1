//! One-shot string rendering.

use crate::html;
use crate::state::{Get, Registry};
use crate::view::{AttrValue, ElementNode, PropBinding, VNode};

/// Render `view` to markup with untracked reads.
///
/// Nothing stays subscribed afterwards. Zones and lists end with the same
/// anchor comments the document renderer uses, so the markup matches what a
/// client mount of the same view serializes to.
pub fn render_to_string(registry: &Registry, view: &VNode) -> String {
    let mut out = String::new();
    write_node(registry, view, &mut out);
    out
}

fn write_node(registry: &Registry, node: &VNode, out: &mut String) {
    match node {
        VNode::Text(text) => html::escape_text(text, out),
        VNode::ReactiveText(generator) => {
            let text = generator(&mut Get::untracked(registry));
            html::escape_text(&text, out);
        }
        VNode::Element(element) => write_element(registry, element, out),
        VNode::Zone(zone) => {
            let content = (zone.render)(&mut Get::untracked(registry));
            write_node(registry, &content, out);
            out.push_str("<!--zone-->");
        }
        VNode::List(list) => {
            let items = list.source.items(&mut Get::untracked(registry));
            for item in &items {
                write_node(registry, item, out);
            }
            out.push_str("<!--list-->");
        }
        VNode::Template(instance) => {
            let overlay = instance.template.instantiate(registry, &*instance.bind);
            write_node(&overlay, instance.template.view(), out);
        }
    }
}

fn write_element(registry: &Registry, element: &ElementNode, out: &mut String) {
    out.push('<');
    out.push_str(&element.tag);
    for (name, value) in &element.attributes {
        let value = match value {
            AttrValue::Static(value) => Some(value.clone()),
            AttrValue::Reactive(generator) => generator(&mut Get::untracked(registry)),
        };
        if let Some(value) = value {
            html::write_attr(name, &value, out);
        }
    }
    for (name, value) in &element.properties {
        let value = match value {
            PropBinding::Static(value) => value.clone(),
            PropBinding::Reactive(generator) => generator(&mut Get::untracked(registry)),
        };
        if let Some(value) = value.as_attribute() {
            html::write_attr(name, &value, out);
        }
    }
    out.push('>');
    if html::is_void(&element.tag) {
        return;
    }
    for child in &element.children {
        write_node(registry, child, out);
    }
    out.push_str("</");
    out.push_str(&element.tag);
    out.push('>');
}
