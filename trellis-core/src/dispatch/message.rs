//! Store messages.
//!
//! A [`Message`] is a value describing a change to make against a registry.
//! Messages are built from typed tokens but erased into closures, so one
//! `Message` type travels through event handlers, reducers and batches.

use std::fmt;
use std::rc::Rc;

use crate::error::Result;
use crate::state::{Command, Get, Registry, Token, TokenInfo, Writable};

use super::command::CommandContext;
use super::dispatcher;

type Apply = Rc<dyn Fn(&Registry) -> Result<()>>;

/// A message bound to one target token.
#[derive(Clone)]
pub struct Directive {
    target: Rc<TokenInfo>,
    apply: Apply,
}

impl Directive {
    fn new(target: &Rc<TokenInfo>, apply: impl Fn(&Registry) -> Result<()> + 'static) -> Self {
        Self {
            target: target.clone(),
            apply: Rc::new(apply),
        }
    }

    pub fn target(&self) -> &TokenInfo {
        &self.target
    }

    pub(crate) fn apply(&self, registry: &Registry) -> Result<()> {
        (self.apply)(registry)
    }
}

/// A change to make against a registry.
#[derive(Clone)]
pub enum Message {
    /// Send a message to a writable token (through its writer, if any).
    Write(Directive),
    /// Compute a message from the token's current value, then write it.
    Update(Directive),
    /// Put a writable token back to its initial value.
    Reset(Directive),
    /// Dispatch messages in order, re-running listeners once at the end.
    Batch(Vec<Message>),
    /// Run a side effect.
    Run(Rc<dyn Fn()>),
    /// Hand a message to a command controller.
    Exec(Directive),
    /// Compute the message to dispatch from current state.
    Use(Rc<dyn Fn(&mut Get<'_>) -> Message>),
}

impl Message {
    pub fn write<S: Writable>(token: &S, message: S::Message) -> Self {
        let token = token.clone();
        let target = token.info().clone();
        Message::Write(Directive::new(&target, move |registry| {
            dispatcher::write(registry, &token, message.clone())
        }))
    }

    pub fn update<S: Writable>(token: &S, f: impl Fn(&S::Value) -> S::Message + 'static) -> Self {
        let token = token.clone();
        let target = token.info().clone();
        Message::Update(Directive::new(&target, move |registry| {
            let current = registry.get(&token);
            dispatcher::write(registry, &token, f(&current))
        }))
    }

    pub fn reset<S: Writable>(token: &S) -> Self {
        let token = token.clone();
        let target = token.info().clone();
        Message::Reset(Directive::new(&target, move |registry| {
            dispatcher::publish(registry, &token, token.initial());
            Ok(())
        }))
    }

    pub fn batch(messages: impl IntoIterator<Item = Message>) -> Self {
        Message::Batch(messages.into_iter().collect())
    }

    pub fn run(f: impl Fn() + 'static) -> Self {
        Message::Run(Rc::new(f))
    }

    pub fn exec<M: Clone + 'static>(command: &Command<M>, message: M) -> Self {
        let command = command.clone();
        let target = command.info().clone();
        Message::Exec(Directive::new(&target, move |registry| {
            let context = CommandContext::new(registry);
            registry.command(&command).run(message.clone(), &context)
        }))
    }

    /// Build the message from state read at dispatch time.
    pub fn using(f: impl Fn(&mut Get<'_>) -> Message + 'static) -> Self {
        Message::Use(Rc::new(f))
    }

    /// Short name of the message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Write(_) => "write",
            Message::Update(_) => "update",
            Message::Reset(_) => "reset",
            Message::Batch(_) => "batch",
            Message::Run(_) => "run",
            Message::Exec(_) => "exec",
            Message::Use(_) => "use",
        }
    }

    /// The token a directive message targets.
    pub fn target(&self) -> Option<&TokenInfo> {
        match self {
            Message::Write(d) | Message::Update(d) | Message::Reset(d) | Message::Exec(d) => {
                Some(d.target())
            }
            _ => None,
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Batch(messages) => f.debug_tuple("Batch").field(messages).finish(),
            other => match other.target() {
                Some(target) => write!(f, "{}({})", other.kind(), target),
                None => f.write_str(other.kind()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{command, container};

    #[test]
    fn debug_names_kind_and_target() {
        let count = container(0).named("count");
        let save = command::<()>().named("save");
        let message = Message::batch([
            Message::write(&count, 1),
            Message::exec(&save, ()),
            Message::run(|| {}),
        ]);
        assert_eq!(format!("{message:?}"), "Batch([write(count), exec(save), run])");
    }

    #[test]
    fn target_is_exposed_for_directives() {
        let count = container(0).named("count");
        assert_eq!(
            Message::reset(&count).target().map(ToString::to_string),
            Some("count".to_string())
        );
        assert!(Message::using(|_| Message::batch([])).target().is_none());
    }
}
