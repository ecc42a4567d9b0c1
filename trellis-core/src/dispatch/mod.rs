//! Message Dispatch
//!
//! Messages are the only way views change state. A message is interpreted
//! against a registry synchronously and depth-first; listener re-runs wait
//! until the whole dispatch has published.

mod command;
pub(crate) mod dispatcher;
mod message;
mod writer;

pub use command::{CommandContext, CommandController};
pub use dispatcher::dispatch;
pub use message::{Directive, Message};
pub use writer::{Writer, WriterActions};

pub(crate) use command::Unhandled;
