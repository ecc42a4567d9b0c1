//! Message interpretation.
//!
//! Every dispatch runs inside one batch scope, so listeners re-run once after
//! the whole message (chained and batched messages included) has published.

use crate::error::{Result, StoreError};
use crate::state::{Get, Meta, Registry, Writable};

use super::message::Message;
use super::writer::WriterActions;

/// Dispatch `message` against `registry`.
///
/// A batch stops at the first failing message. Changes published before the
/// failure stay published and are flushed to listeners; the error is returned.
pub fn dispatch(registry: &Registry, message: Message) -> Result<()> {
    tracing::debug!(?message, "dispatch");
    let result = registry.batch(|| dispatch_one(registry, message));
    if let Err(err) = &result {
        match err {
            StoreError::UnhandledCommand { .. } => tracing::error!(%err, "dispatch failed"),
            _ => tracing::debug!(%err, "dispatch stopped"),
        }
    }
    result
}

fn dispatch_one(registry: &Registry, message: Message) -> Result<()> {
    match message {
        Message::Write(directive)
        | Message::Update(directive)
        | Message::Reset(directive)
        | Message::Exec(directive) => directive.apply(registry),
        Message::Batch(messages) => {
            for message in messages {
                dispatch_one(registry, message)?;
            }
            Ok(())
        }
        Message::Run(f) => {
            f();
            Ok(())
        }
        Message::Use(f) => {
            let next = f(&mut Get::untracked(registry));
            dispatch_one(registry, next)
        }
    }
}

/// Route a write through the token's writer, or accept it directly.
pub(crate) fn write<S: Writable>(registry: &Registry, token: &S, message: S::Message) -> Result<()> {
    match registry.writer(token) {
        Some(writer) => {
            tracing::trace!(token = %token.info(), "write handed to writer");
            writer.write(message, WriterActions::new(registry, token));
            Ok(())
        }
        None => accept(registry, token, message),
    }
}

/// Run `message` through the reducer and publish the result.
///
/// A rejected message leaves the value alone, records [`Meta::Error`] and
/// returns [`StoreError::Reducer`]. A chained message is dispatched right
/// after the publish, inside the same batch.
pub(crate) fn accept<S: Writable>(registry: &Registry, token: &S, message: S::Message) -> Result<()> {
    registry.batch(|| {
        let current = registry.get(token);
        match token.reduce(message.clone(), &current) {
            Ok(update) => {
                publish(registry, token, update.value);
                match update.message {
                    Some(next) => dispatch_one(registry, next),
                    None => Ok(()),
                }
            }
            Err(reason) => {
                set_meta(
                    registry,
                    token,
                    Meta::Error {
                        reason: reason.clone(),
                        message: Some(message),
                    },
                );
                Err(StoreError::Reducer {
                    token: token.info().to_string(),
                    reason,
                })
            }
        }
    })
}

/// Publish `value` and mark the write as completed.
pub(crate) fn publish<S: Writable>(registry: &Registry, token: &S, value: S::Value) {
    registry.batch(|| {
        registry.state(token).publish(value);
        // Nothing to clear if nobody ever looked at the meta state.
        if let Some(meta) = registry.find_state(&token.meta()) {
            meta.publish(Meta::Ok);
        }
    });
}

pub(crate) fn set_meta<S: Writable>(registry: &Registry, token: &S, meta: Meta<S::Message>) {
    registry.state(&token.meta()).publish(meta);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{container, derived, Update};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn chained_messages_publish_in_the_same_dispatch() {
        let registry = Registry::new();
        let log = container(Vec::<String>::new());
        let count = {
            let log = log.clone();
            container(0).with_reducer(move |step: i32, current: &i32| {
                let next = current + step;
                Update::new(next).chain(Message::update(&log, move |entries: &Vec<String>| {
                    let mut entries = entries.clone();
                    entries.push(format!("count={next}"));
                    entries
                }))
            })
        };

        dispatch(&registry, Message::write(&count, 2)).unwrap();
        assert_eq!(registry.get(&count), 2);
        assert_eq!(registry.get(&log), vec!["count=2".to_string()]);
    }

    #[test]
    fn batch_recomputes_dependents_once() {
        let registry = Registry::new();
        let a = container(1);
        let b = container(2);
        let runs = Rc::new(Cell::new(0));
        let sum = {
            let (a, b, runs) = (a.clone(), b.clone(), runs.clone());
            derived(move |get| {
                runs.set(runs.get() + 1);
                get.get(&a) + get.get(&b)
            })
        };
        let seen = Rc::new(Cell::new(0));
        let _effect = {
            let (sum, seen) = (sum.clone(), seen.clone());
            registry.subscribe(crate::effect::effect_fn(move |get| seen.set(get.get(&sum))))
        };
        assert_eq!(runs.get(), 1);

        dispatch(
            &registry,
            Message::batch([Message::write(&a, 10), Message::write(&b, 20)]),
        )
        .unwrap();

        assert_eq!(runs.get(), 2);
        assert_eq!(seen.get(), 30);
    }

    #[test]
    fn rejected_messages_land_in_meta_state() {
        let registry = Registry::new();
        let celsius = container(0.0f64).with_fallible_reducer(|text: String, _: &f64| {
            text.parse::<f64>().map(Update::new)
        });

        let err = dispatch(&registry, Message::write(&celsius, "warm".into())).unwrap_err();
        assert!(matches!(err, StoreError::Reducer { .. }));
        assert_eq!(registry.get(&celsius), 0.0);
        assert!(registry.get(&celsius.meta()).is_error());

        dispatch(&registry, Message::write(&celsius, "21.5".into())).unwrap();
        assert_eq!(registry.get(&celsius), 21.5);
        assert!(registry.get(&celsius.meta()).is_ok());
    }

    #[test]
    fn batches_stop_at_the_first_error_without_rollback() {
        let registry = Registry::new();
        let first = container(0);
        let last = container(0);
        let missing = crate::state::command::<()>();

        let result = dispatch(
            &registry,
            Message::batch([
                Message::write(&first, 1),
                Message::exec(&missing, ()),
                Message::write(&last, 1),
            ]),
        );

        assert!(matches!(result, Err(StoreError::UnhandledCommand { .. })));
        assert_eq!(registry.get(&first), 1);
        assert_eq!(registry.get(&last), 0);
    }

    #[test]
    fn reset_restores_the_initial_value() {
        let registry = Registry::new();
        let name = container("initial".to_string());
        dispatch(&registry, Message::write(&name, "changed".into())).unwrap();
        dispatch(&registry, Message::reset(&name)).unwrap();
        assert_eq!(registry.get(&name), "initial");
    }

    #[test]
    fn use_messages_read_current_state() {
        let registry = Registry::new();
        let source = container(4);
        let target = container(0);
        let message = {
            let (source, target) = (source.clone(), target.clone());
            Message::using(move |get| Message::write(&target, get.get(&source) * 10))
        };

        dispatch(&registry, message).unwrap();
        assert_eq!(registry.get(&target), 40);
        assert_eq!(registry.state(&source).listener_count(), 0);
    }
}
