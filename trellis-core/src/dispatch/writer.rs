//! Writers
//!
//! A writer takes over writes to one token in one registry. It receives the
//! message and a [`WriterActions`] handle, and decides what happens: accept
//! the message, publish some other value, or report progress and failure
//! through the token's [`Meta`] state. The actions handle is owned, so an
//! asynchronous writer can keep it and finish the write later.

use crate::error::Result;
use crate::state::{Meta, Registry, Writable};

use super::dispatcher;

/// Handles writes to the token `S`.
pub trait Writer<S: Writable> {
    fn write(&self, message: S::Message, actions: WriterActions<S>);
}

impl<S, F> Writer<S> for F
where
    S: Writable,
    F: Fn(S::Message, WriterActions<S>),
{
    fn write(&self, message: S::Message, actions: WriterActions<S>) {
        self(message, actions)
    }
}

/// What a writer can do with the write it was handed.
pub struct WriterActions<S: Writable> {
    registry: Registry,
    token: S,
}

impl<S: Writable> Clone for WriterActions<S> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            token: self.token.clone(),
        }
    }
}

impl<S: Writable> WriterActions<S> {
    pub(crate) fn new(registry: &Registry, token: &S) -> Self {
        Self {
            registry: registry.clone(),
            token: token.clone(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn token(&self) -> &S {
        &self.token
    }

    /// The token's current value.
    pub fn current(&self) -> S::Value {
        self.registry.get(&self.token)
    }

    /// Run `message` through the token's reducer and publish the result.
    pub fn ok(&self, message: S::Message) -> Result<()> {
        dispatcher::accept(&self.registry, &self.token, message)
    }

    /// Publish `value` as is and mark the write completed.
    pub fn publish(&self, value: S::Value) {
        dispatcher::publish(&self.registry, &self.token, value);
    }

    /// Mark `message` as in flight.
    pub fn pending(&self, message: S::Message) {
        dispatcher::set_meta(&self.registry, &self.token, Meta::Pending { message });
    }

    /// Mark the write as failed.
    pub fn error(&self, reason: impl Into<String>, message: Option<S::Message>) {
        let reason = reason.into();
        tracing::debug!(%reason, "writer reported an error");
        dispatcher::set_meta(
            &self.registry,
            &self.token,
            Meta::Error { reason, message },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Message;
    use crate::state::{container, Container};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn writer_replaces_the_default_write() {
        let registry = Registry::new();
        let name = container(String::new());
        registry.set_writer(&name, |message: String, actions: WriterActions<Container<String>>| {
            actions.publish(message.to_uppercase());
        });

        registry.dispatch(Message::write(&name, "ada".into())).unwrap();
        assert_eq!(registry.get(&name), "ADA");
    }

    #[test]
    fn writer_can_finish_later() {
        let registry = Registry::new();
        let count = container(0);
        let parked: Rc<RefCell<Option<(i32, WriterActions<Container<i32>>)>>> = Rc::new(RefCell::new(None));
        {
            let parked = parked.clone();
            registry.set_writer(&count, move |message: i32, actions: WriterActions<Container<i32>>| {
                actions.pending(message);
                *parked.borrow_mut() = Some((message, actions));
            });
        }

        registry.dispatch(Message::write(&count, 5)).unwrap();
        assert_eq!(registry.get(&count), 0);
        assert_eq!(registry.get(&count.meta()), Meta::Pending { message: 5 });

        let (message, actions) = parked.borrow_mut().take().unwrap();
        actions.ok(message).unwrap();
        assert_eq!(registry.get(&count), 5);
        assert!(registry.get(&count.meta()).is_ok());
    }

    #[test]
    fn writer_errors_keep_the_value() {
        let registry = Registry::new();
        let count = container(1);
        registry.set_writer(&count, |message: i32, actions: WriterActions<Container<i32>>| {
            actions.error("offline", Some(message));
        });

        registry.dispatch(Message::write(&count, 2)).unwrap();
        assert_eq!(registry.get(&count), 1);
        assert_eq!(registry.get(&count.meta()).reason(), Some("offline"));
    }
}
