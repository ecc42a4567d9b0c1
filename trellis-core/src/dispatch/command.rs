//! Command controllers.
//!
//! A command is a named operation (save, load, navigate) with no state of its
//! own. Registries map command tokens to controllers; executing a command
//! that has no controller fails with [`StoreError::UnhandledCommand`].

use std::marker::PhantomData;

use crate::error::{Result, StoreError};
use crate::state::{Meta, Readable, Registry, TokenInfo, Writable};

use super::dispatcher;
use super::message::Message;

/// Executes messages sent to one command.
pub trait CommandController<M> {
    fn run(&self, message: M, context: &CommandContext) -> Result<()>;
}

impl<M, F> CommandController<M> for F
where
    F: Fn(M, &CommandContext) -> Result<()>,
{
    fn run(&self, message: M, context: &CommandContext) -> Result<()> {
        self(message, context)
    }
}

/// Controller used for commands nobody installed.
pub(crate) struct Unhandled<M> {
    command: String,
    _message: PhantomData<fn(M)>,
}

impl<M> Unhandled<M> {
    pub(crate) fn new(command: &TokenInfo) -> Self {
        Self {
            command: command.to_string(),
            _message: PhantomData,
        }
    }
}

impl<M> CommandController<M> for Unhandled<M> {
    fn run(&self, _message: M, _context: &CommandContext) -> Result<()> {
        Err(StoreError::UnhandledCommand {
            command: self.command.clone(),
        })
    }
}

/// Access to the registry a command runs against.
///
/// Owned, so controllers doing asynchronous work can clone and keep it.
#[derive(Clone)]
pub struct CommandContext {
    registry: Registry,
}

impl CommandContext {
    pub fn new(registry: &Registry) -> Self {
        Self {
            registry: registry.clone(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn get<S: Readable>(&self, token: &S) -> S::Value {
        self.registry.get(token)
    }

    pub fn dispatch(&self, message: Message) -> Result<()> {
        self.registry.dispatch(message)
    }

    /// Publish `value` to `token` and mark its write completed.
    pub fn supply<S: Writable>(&self, token: &S, value: S::Value) {
        dispatcher::publish(&self.registry, token, value);
    }

    pub fn pending<S: Writable>(&self, token: &S, message: S::Message) {
        dispatcher::set_meta(&self.registry, token, Meta::Pending { message });
    }

    pub fn error<S: Writable>(&self, token: &S, reason: impl Into<String>, message: Option<S::Message>) {
        dispatcher::set_meta(
            &self.registry,
            token,
            Meta::Error {
                reason: reason.into(),
                message,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{command, container};

    #[test]
    fn installed_controller_runs_against_the_registry() {
        let registry = Registry::new();
        let saved = container(Vec::<String>::new());
        let save = command::<String>().named("save");
        {
            let saved = saved.clone();
            registry.set_command(&save, move |message: String, context: &CommandContext| {
                let mut entries = context.get(&saved);
                entries.push(message);
                context.supply(&saved, entries);
                Ok(())
            });
        }

        registry.dispatch(Message::exec(&save, "draft".into())).unwrap();
        assert_eq!(registry.get(&saved), vec!["draft".to_string()]);
    }

    #[test]
    fn command_failures_can_be_reported_as_meta_errors() {
        let registry = Registry::new();
        let status = container(0);
        let sync = command::<i32>();
        {
            let status = status.clone();
            registry.set_command(&sync, move |message: i32, context: &CommandContext| {
                context.error(&status, "server unavailable", Some(message));
                Ok(())
            });
        }

        registry.dispatch(Message::exec(&sync, 3)).unwrap();
        assert_eq!(
            registry.get(&status.meta()),
            Meta::Error {
                reason: "server unavailable".into(),
                message: Some(3)
            }
        );
    }

    #[test]
    fn unhandled_commands_fail() {
        let registry = Registry::new();
        let missing = command::<()>().named("missing");
        let err = registry.dispatch(Message::exec(&missing, ())).unwrap_err();
        assert_eq!(
            err.to_string(),
            "no controller installed for command `missing`"
        );
    }
}
