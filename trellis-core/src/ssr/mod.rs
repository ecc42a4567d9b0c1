//! Server Rendering
//!
//! [`render_to_string`] renders a view once against a registry. [`Store`]
//! adds an async initialization phase and the hydration script, either as one
//! string or as a stream that sends the shell before slow state settles.

mod store;
mod string;

pub use store::{InitActions, Store};
pub use string::render_to_string;
