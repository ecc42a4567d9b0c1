//! Tree Reconciler
//!
//! Mounts [`VNode`] trees into a [`Document`] and keeps them in sync.
//!
//! # Structure
//!
//! Every reactive part of a view becomes an effect bound to exactly one
//! document node: a reactive text writes one text node, a reactive attribute
//! one attribute, a zone the nodes between its start and its anchor comment,
//! a list the keyed items before its anchor. When state changes only those
//! effects re-run; nothing above them is re-rendered.
//!
//! Sibling sequences are reconciled by key when every sibling has one (see
//! [`keyed`]), so moving an item moves its document nodes instead of
//! rebuilding them.
//!
//! # Events
//!
//! Element handlers return an optional [`Message`]. The message is sent up
//! the document as a bubbling `displayMessage` event and the [`Mount`]
//! container dispatches it to the registry the element was rendered with.

mod bindings;
mod keyed;
mod rendered;

use tracing::{debug, error};

use crate::dispatch::Message;
use crate::dom::{Document, DomNode, ListenerKey};
use crate::state::{Registry, WeakRegistry};
use crate::view::VNode;

use rendered::Rendered;

/// Name of the event carrying a [`DisplayMessage`].
pub const DISPLAY_MESSAGE: &str = "displayMessage";

/// Detail of a `displayMessage` event.
pub struct DisplayMessage {
    pub message: Message,
    pub registry: WeakRegistry,
}

/// A view rendered into a container.
pub struct Mount {
    document: Document,
    container: DomNode,
    registry: Registry,
    rendered: Option<Rendered>,
    listener: ListenerKey,
}

/// Render `view` at the end of `container`.
///
/// Messages produced by event handlers inside the view are dispatched to the
/// registry they were rendered with; failures are logged.
pub fn render(registry: &Registry, document: &Document, container: &DomNode, view: &VNode) -> Mount {
    let listener = container.add_event_listener(DISPLAY_MESSAGE, |event, _| {
        let Some(display) = event.detail::<DisplayMessage>() else {
            return;
        };
        let message = display.message.clone();
        let target = display.registry.upgrade();
        event.stop_propagation();

        match target {
            Some(registry) => {
                if let Err(err) = registry.dispatch(message) {
                    error!(%err, "message from the view failed");
                }
            }
            None => debug!(?message, "registry dropped, message ignored"),
        }
    });

    let rendered = registry.batch(|| {
        let rendered = rendered::mount(document, view, registry);
        rendered::insert(container, &rendered, None);
        rendered
    });
    debug!(kind = view.kind(), "view mounted");

    Mount {
        document: document.clone(),
        container: container.clone(),
        registry: registry.clone(),
        rendered: Some(rendered),
        listener,
    }
}

impl Mount {
    /// Patch the mounted tree towards `next`.
    pub fn update(&mut self, next: &VNode) {
        let Some(rendered) = self.rendered.as_mut() else {
            return;
        };
        let (document, registry) = (&self.document, &self.registry);
        registry.batch(|| rendered::patch(document, rendered, next, registry));
    }

    /// Remove the view from the container and retire its effects.
    pub fn unmount(mut self) {
        if let Some(rendered) = self.rendered.take() {
            rendered::remove(rendered);
        }
        self.container.remove_event_listener(self.listener);
        debug!("view unmounted");
    }

    pub fn container(&self) -> &DomNode {
        &self.container
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The top-level document nodes of the view.
    pub fn nodes(&self) -> Vec<DomNode> {
        self.rendered.as_ref().map(rendered::dom_nodes).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::dom::{Event, PropValue};
    use crate::state::{container, Container, Get};
    use crate::view::{el, list, reactive_text, text, zone, Key};

    fn setup() -> (Registry, Document) {
        (Registry::new(), Document::new())
    }

    #[test]
    fn static_tree_serializes() {
        let (registry, document) = setup();
        let view = el("p").attr("class", "intro").text("a < b").build();
        let _mount = render(&registry, &document, document.body(), &view);
        assert_eq!(document.body().to_html(), r#"<body><p class="intro">a &lt; b</p></body>"#);
    }

    #[test]
    fn reactive_text_tracks_state() {
        let (registry, document) = setup();
        let name = container("Ada".to_string());
        let view = el("h1")
            .child(reactive_text({
                let name = name.clone();
                move |get| format!("Hello {}", get.get(&name))
            }))
            .build();
        let _mount = render(&registry, &document, document.body(), &view);
        assert_eq!(document.body().text_content(), "Hello Ada");

        document.reset_mutations();
        registry.dispatch(Message::write(&name, "Grace".to_string())).unwrap();
        assert_eq!(document.body().text_content(), "Hello Grace");
        assert_eq!(document.mutations().text_writes, 1);
        assert_eq!(document.mutations().total(), 1);
    }

    #[test]
    fn reactive_attribute_and_property() {
        let (registry, document) = setup();
        let active = container(false);
        let view = el("button")
            .attr_fn("class", {
                let active = active.clone();
                move |get| get.get(&active).then(|| "active".to_string())
            })
            .prop_fn("disabled", {
                let active = active.clone();
                move |get| PropValue::Bool(!get.get(&active))
            })
            .build();
        let mount = render(&registry, &document, document.body(), &view);
        let button = mount.nodes()[0].clone();
        assert_eq!(button.attribute("class"), None);
        assert_eq!(button.property("disabled"), Some(PropValue::Bool(true)));

        registry.dispatch(Message::write(&active, true)).unwrap();
        assert_eq!(button.attribute("class").as_deref(), Some("active"));
        assert_eq!(button.property("disabled"), Some(PropValue::Bool(false)));
    }

    #[test]
    fn click_handler_dispatches_through_container() {
        let (registry, document) = setup();
        let clicks = container(0);
        let view = el("button")
            .on("click", {
                let clicks = clicks.clone();
                move |_, _| Some(Message::update(&clicks, |n| n + 1))
            })
            .child(reactive_text({
                let clicks = clicks.clone();
                move |get| format!("Clicks: {}", get.get(&clicks))
            }))
            .build();
        let mount = render(&registry, &document, document.body(), &view);
        let button = mount.nodes()[0].clone();

        for _ in 0..3 {
            button.dispatch_event(&mut Event::new("click"));
        }
        assert_eq!(registry.get(&clicks), 3);
        assert_eq!(button.text_content(), "Clicks: 3");
    }

    #[test]
    fn zone_swaps_subtree() {
        let (registry, document) = setup();
        let logged_in = container(false);
        let view = el("nav")
            .child(zone({
                let logged_in = logged_in.clone();
                move |get| {
                    if get.get(&logged_in) {
                        el("a").attr("href", "/logout").text("Log out").build()
                    } else {
                        text("Guest")
                    }
                }
            }))
            .build();
        let _mount = render(&registry, &document, document.body(), &view);
        assert_eq!(document.body().text_content(), "Guest");

        registry.dispatch(Message::write(&logged_in, true)).unwrap();
        assert_eq!(document.body().text_content(), "Log out");
        assert!(document.body().to_html().contains(r#"<a href="/logout">"#));
    }

    fn letters(items: &Container<Vec<String>>) -> VNode {
        let items = items.clone();
        el("ul")
            .child(list(
                move |get| get.get(&items),
                |item: &String| Key::from(item.as_str()),
                |scope| {
                    let item = scope.item().clone();
                    el("li").child(reactive_text(move |get| get.get(&item))).build()
                },
            ))
            .build()
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn list_rotation_moves_one_node() {
        let (registry, document) = setup();
        let items = container(strings(&["A", "B", "C"]));
        let _mount = render(&registry, &document, document.body(), &letters(&items));
        let before: Vec<DomNode> = document.body().children()[0]
            .children()
            .into_iter()
            .filter(|node| node.tag() == Some("li"))
            .collect();

        document.reset_mutations();
        registry.dispatch(Message::write(&items, strings(&["C", "A", "B"]))).unwrap();

        let ul = document.body().children()[0].clone();
        assert_eq!(ul.text_content(), "CAB");
        let mutations = document.mutations();
        assert_eq!(mutations.moved, 1);
        assert_eq!((mutations.inserted, mutations.removed, mutations.created), (0, 0, 0));
        let after = ul.children();
        assert!(after[0].ptr_eq(&before[2]));
        assert!(after[1].ptr_eq(&before[0]));
    }

    #[test]
    fn list_interleaved_inserts() {
        let (registry, document) = setup();
        let items = container(strings(&["a", "b"]));
        let _mount = render(&registry, &document, document.body(), &letters(&items));

        document.reset_mutations();
        registry
            .dispatch(Message::write(&items, strings(&["x", "a", "y", "b"])))
            .unwrap();
        assert_eq!(document.body().text_content(), "xayb");
        let mutations = document.mutations();
        assert_eq!((mutations.inserted, mutations.removed, mutations.moved), (2, 0, 0));
    }

    #[test]
    fn removed_items_stop_updating() {
        let (registry, document) = setup();
        let items = container(strings(&["a", "b"]));
        let suffix = container("!".to_string());
        let runs = Rc::new(Cell::new(0));
        let view = {
            let (items, suffix, runs) = (items.clone(), suffix.clone(), runs.clone());
            list(
                move |get| get.get(&items),
                |item: &String| Key::from(item.as_str()),
                move |scope| {
                    let item = scope.item().clone();
                    let (suffix, runs) = (suffix.clone(), runs.clone());
                    el("span")
                        .child(reactive_text(move |get: &mut Get<'_>| {
                            runs.set(runs.get() + 1);
                            format!("{}{}", get.get(&item), get.get(&suffix))
                        }))
                        .build()
                },
            )
        };
        let _mount = render(&registry, &document, document.body(), &view);
        assert_eq!(runs.get(), 2);

        registry.dispatch(Message::write(&items, strings(&["a"]))).unwrap();
        runs.set(0);
        registry.dispatch(Message::write(&suffix, "?".to_string())).unwrap();
        assert_eq!(runs.get(), 1);
        assert_eq!(document.body().text_content(), "a?");
    }

    #[test]
    fn update_patches_in_place() {
        let (registry, document) = setup();
        let mut mount = render(
            &registry,
            &document,
            document.body(),
            &el("div").attr("id", "a").text("one").build(),
        );
        let div = mount.nodes()[0].clone();

        document.reset_mutations();
        mount.update(&el("div").attr("id", "b").text("two").build());
        assert!(mount.nodes()[0].ptr_eq(&div));
        assert_eq!(div.attribute("id").as_deref(), Some("b"));
        assert_eq!(div.text_content(), "two");
        assert_eq!(document.mutations().created, 0);

        mount.update(&el("section").build());
        assert!(!mount.nodes()[0].ptr_eq(&div));
        assert_eq!(document.body().to_html(), "<body><section></section></body>");
    }

    #[test]
    fn unmount_clears_container() {
        let (registry, document) = setup();
        let mount = render(&registry, &document, document.body(), &el("p").build());
        mount.unmount();
        assert_eq!(document.body().child_count(), 0);
        assert_eq!(document.body().listener_count(DISPLAY_MESSAGE), 0);
    }
}
