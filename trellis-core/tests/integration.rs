//! Integration Tests
//!
//! End-to-end behavior across state, dispatch, rendering and server output.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use trellis_core::dispatch::WriterActions;
use trellis_core::prelude::*;
use trellis_core::state::Container;

fn names(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn letter_list(items: &Container<Vec<String>>) -> VNode {
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

fn list_items(document: &Document) -> Vec<DomNode> {
    document.body().children()[0]
        .children()
        .into_iter()
        .filter(|node| node.tag() == Some("li"))
        .collect()
}

/// Listeners never observe a batch half applied.
#[test]
fn batch_is_glitch_free() {
    let registry = Registry::new();
    let first = container("Ada".to_string());
    let last = container("Lovelace".to_string());
    let full = {
        let (first, last) = (first.clone(), last.clone());
        derived(move |get| format!("{} {}", get.get(&first), get.get(&last)))
    };
    let seen = Rc::new(RefCell::new(Vec::new()));

    let _effect = {
        let (first, full, seen) = (first.clone(), full.clone(), seen.clone());
        registry.subscribe(effect_fn(move |get| {
            seen.borrow_mut().push(format!("{} / {}", get.get(&first), get.get(&full)));
        }))
    };

    registry
        .dispatch(Message::batch([
            Message::write(&first, "Grace".to_string()),
            Message::write(&last, "Hopper".to_string()),
        ]))
        .unwrap();

    assert_eq!(
        *seen.borrow(),
        vec!["Ada / Ada Lovelace".to_string(), "Grace / Grace Hopper".to_string()]
    );
}

/// A read partway through a batch sees derivations two levels down the write.
#[test]
fn nested_derivations_are_fresh_mid_batch() {
    let registry = Registry::new();
    let base = container(1);
    let copied = container(0);
    let doubled = {
        let base = base.clone();
        derived(move |get| get.get(&base) * 2)
    };
    let plus_one = {
        let doubled = doubled.clone();
        derived(move |get| get.get(&doubled) + 1)
    };
    let seen = Rc::new(RefCell::new(Vec::new()));
    let _effect = {
        let (plus_one, seen) = (plus_one.clone(), seen.clone());
        registry.subscribe(effect_fn(move |get| seen.borrow_mut().push(get.get(&plus_one))))
    };

    registry
        .dispatch(Message::batch([
            Message::write(&base, 5),
            Message::using({
                let (plus_one, copied) = (plus_one.clone(), copied.clone());
                move |get| Message::write(&copied, get.get(&plus_one))
            }),
        ]))
        .unwrap();

    assert_eq!(registry.get(&copied), 11);
    assert_eq!(*seen.borrow(), vec![3, 11]);
}

/// A derivation that starts reading a deeper derivation runs once, on final values.
#[test]
fn switching_to_a_deeper_branch_computes_once() {
    let registry = Registry::new();
    let use_detail = container(false);
    let base = container(1);
    let tens = {
        let base = base.clone();
        derived(move |get| get.get(&base) * 10)
    };
    let detail = {
        let tens = tens.clone();
        derived(move |get| get.get(&tens) + 1)
    };
    let computed = Rc::new(RefCell::new(Vec::new()));
    let shown = {
        let (use_detail, base, detail, computed) =
            (use_detail.clone(), base.clone(), detail.clone(), computed.clone());
        derived(move |get| {
            let value = if get.get(&use_detail) {
                get.get(&detail)
            } else {
                get.get(&base)
            };
            computed.borrow_mut().push(value);
            value
        })
    };
    let _detail_effect = {
        let detail = detail.clone();
        registry.subscribe(effect_fn(move |get| {
            get.get(&detail);
        }))
    };
    let _shown_effect = {
        let shown = shown.clone();
        registry.subscribe(effect_fn(move |get| {
            get.get(&shown);
        }))
    };
    computed.borrow_mut().clear();

    registry
        .dispatch(Message::batch([
            Message::write(&use_detail, true),
            Message::write(&base, 5),
        ]))
        .unwrap();

    assert_eq!(*computed.borrow(), vec![51]);
    assert_eq!(registry.get(&shown), 51);
}

/// Changing the selection re-renders only the rows whose flag flipped.
#[test]
fn selection_change_reaches_two_rows() {
    let registry = Registry::new();
    let selected = container(0_u32);
    let runs = Rc::new(Cell::new(0));
    let _rows: Vec<_> = (0..2_000_u32)
        .map(|row| {
            let is_selected = {
                let selected = selected.clone();
                derived(move |get| get.get(&selected) == row)
            };
            let runs = runs.clone();
            registry.subscribe(effect_fn(move |get| {
                get.get(&is_selected);
                runs.set(runs.get() + 1);
            }))
        })
        .collect();
    assert_eq!(runs.get(), 2_000);
    assert_eq!(registry.state(&selected).listener_count(), 2_000);

    registry.dispatch(Message::write(&selected, 1_500)).unwrap();
    assert_eq!(runs.get(), 2_002);
}

/// A listener whose latest run no longer reads a token is not re-run by it.
#[test]
fn stale_subscriptions_are_ignored() {
    let registry = Registry::new();
    let show_detail = container(true);
    let detail = container(0);
    let runs = Rc::new(Cell::new(0));

    let _effect = {
        let (show_detail, detail, runs) = (show_detail.clone(), detail.clone(), runs.clone());
        registry.subscribe(effect_fn(move |get| {
            runs.set(runs.get() + 1);
            if get.get(&show_detail) {
                get.get(&detail);
            }
        }))
    };

    registry.dispatch(Message::write(&show_detail, false)).unwrap();
    assert_eq!(runs.get(), 2);
    registry.dispatch(Message::write(&detail, 5)).unwrap();
    assert_eq!(runs.get(), 2);
}

/// Derivations compute once per change, however often they are read.
#[test]
fn derivations_are_memoized() {
    let registry = Registry::new();
    let count = container(2);
    let computed = Rc::new(Cell::new(0));
    let squared = {
        let (count, computed) = (count.clone(), computed.clone());
        derived(move |get| {
            computed.set(computed.get() + 1);
            get.get(&count) * get.get(&count)
        })
    };

    assert_eq!(registry.get(&squared), 4);
    assert_eq!(registry.get(&squared), 4);
    assert_eq!(computed.get(), 1);

    registry.dispatch(Message::write(&count, 3)).unwrap();
    assert_eq!(registry.get(&squared), 9);
    assert_eq!(registry.get(&squared), 9);
    assert_eq!(computed.get(), 2);
}

/// An asynchronous writer moves the meta state through pending and back.
#[test]
fn async_writer_meta_lifecycle() {
    let registry = Registry::new();
    let saved = container(String::new());
    let parked: Rc<RefCell<Option<(String, WriterActions<Container<String>>)>>> = Rc::default();

    registry.set_writer(&saved, {
        let parked = parked.clone();
        move |message: String, actions: WriterActions<Container<String>>| {
            actions.pending(message.clone());
            *parked.borrow_mut() = Some((message, actions));
        }
    });

    let states = Rc::new(RefCell::new(Vec::new()));
    let _effect = {
        let (meta, states) = (saved.meta(), states.clone());
        registry.subscribe(effect_fn(move |get| {
            let state = match get.get(&meta) {
                Meta::Ok => "ok",
                Meta::Pending { .. } => "pending",
                Meta::Error { .. } => "error",
            };
            states.borrow_mut().push(state);
        }))
    };

    registry.dispatch(Message::write(&saved, "draft".to_string())).unwrap();
    assert_eq!(registry.get(&saved), "");

    let (message, actions) = parked.borrow_mut().take().unwrap();
    actions.ok(message).unwrap();

    assert_eq!(*states.borrow(), vec!["ok", "pending", "ok"]);
    assert_eq!(registry.get(&saved), "draft");
}

#[test]
fn unhandled_command_surfaces_to_the_caller() {
    let registry = Registry::new();
    let save = command::<String>().named("save");
    let err = registry.dispatch(Message::exec(&save, "now".to_string())).unwrap_err();
    assert!(matches!(err, StoreError::UnhandledCommand { ref command } if command == "save"));
}

#[test]
fn command_failure_lands_in_meta() {
    let registry = Registry::new();
    let profile = container(String::new());
    let load = command::<u32>();
    registry.set_command(&load, {
        let profile = profile.clone();
        move |id: u32, context: &CommandContext| {
            if id == 0 {
                context.error(&profile, "no such user", None);
            } else {
                context.supply(&profile, format!("user {id}"));
            }
            Ok(())
        }
    });

    registry.dispatch(Message::exec(&load, 0)).unwrap();
    assert_eq!(registry.get(&profile.meta()).reason(), Some("no such user"));

    registry.dispatch(Message::exec(&load, 7)).unwrap();
    assert_eq!(registry.get(&profile), "user 7");
    assert!(registry.get(&profile.meta()).is_ok());
}

#[test]
fn counter_end_to_end() {
    let registry = Registry::new();
    let document = Document::new();
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

/// Rotating a keyed list moves one node and keeps every element alive.
#[test]
fn keyed_rotation_preserves_identity() {
    let registry = Registry::new();
    let document = Document::new();
    let items = container(names(&["A", "B", "C"]));
    let _mount = render(&registry, &document, document.body(), &letter_list(&items));

    let weak: Vec<_> = list_items(&document).iter().map(DomNode::downgrade).collect();
    document.reset_mutations();

    registry.dispatch(Message::write(&items, names(&["C", "A", "B"]))).unwrap();

    let mutations = document.mutations();
    assert_eq!(mutations.moved, 1);
    assert_eq!(mutations.created, 0);
    assert_eq!(mutations.removed, 0);

    let after = list_items(&document);
    let expected = [2, 0, 1];
    for (node, old) in after.iter().zip(expected) {
        let old = weak[old].upgrade().expect("element was dropped");
        assert!(node.ptr_eq(&old));
    }
    assert_eq!(document.body().text_content(), "CAB");
}

#[test]
fn keyed_interleaved_insert() {
    let registry = Registry::new();
    let document = Document::new();
    let items = container(names(&["a", "b"]));
    let _mount = render(&registry, &document, document.body(), &letter_list(&items));
    document.reset_mutations();

    registry
        .dispatch(Message::write(&items, names(&["x", "a", "y", "b"])))
        .unwrap();

    let mutations = document.mutations();
    assert_eq!(mutations.inserted, 2);
    assert_eq!(mutations.removed, 0);
    assert_eq!(mutations.moved, 0);
    assert_eq!(document.body().text_content(), "xayb");
}

/// Item views read per-item state from their own overlay.
#[test]
fn list_items_derive_from_their_item() {
    let registry = Registry::new();
    let document = Document::new();
    let prices = container(vec![3_u32, 5]);
    let view = {
        let prices = prices.clone();
        el("ul")
            .child(list(
                move |get| get.get(&prices),
                |price: &u32| Key::from(*price),
                |scope| {
                    let item = scope.item().clone();
                    let doubled = scope.derive(move |get| get.get(&item) * 2);
                    el("li")
                        .child(reactive_text(move |get| get.get(&doubled).to_string()))
                        .build()
                },
            ))
            .build()
    };
    let _mount = render(&registry, &document, document.body(), &view);
    assert_eq!(document.body().text_content(), "610");

    registry.dispatch(Message::write(&prices, vec![5, 3, 1])).unwrap();
    assert_eq!(document.body().text_content(), "1062");
}

/// Server markup plus snapshot hydrate a client that renders the same markup.
#[tokio::test(flavor = "current_thread")]
async fn server_state_hydrates_the_client() {
    let user = container(String::new()).with_id("user");
    let view = {
        let user = user.clone();
        el("header")
            .child(reactive_text(move |get| format!("Signed in as {}", get.get(&user))))
            .build()
    };

    let mut store = Store::new(RenderConfig::default()).unwrap();
    store.init({
        let user = user.clone();
        move |actions| async move {
            tokio::task::yield_now().await;
            actions.supply(&user, "ada".to_string());
        }
    });
    let html = store.render_to_string(&view).await.unwrap();
    assert!(html.starts_with("<header>Signed in as ada</header><script>"));

    let snapshot = store.registry().snapshot(true).to_json().unwrap();
    let client = Registry::from_json(&snapshot).unwrap();
    let document = Document::new();
    let _mount = render(&client, &document, document.body(), &view);
    assert_eq!(document.body().text_content(), "Signed in as ada");
}
