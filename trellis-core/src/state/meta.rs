//! Write status of a container or supplied value.

use serde::{Deserialize, Serialize};

/// Status of the most recent write to a writable token.
///
/// Every container and value token has exactly one meta token (see
/// [`Writable::meta`](super::Writable::meta)). Its handler is created lazily,
/// so a token nobody asked about costs nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Meta<M> {
    /// The last write completed.
    Ok,
    /// A writer accepted `message` and has not finished yet.
    Pending { message: M },
    /// A writer, command or reducer failed.
    Error {
        reason: String,
        message: Option<M>,
    },
}

impl<M> Meta<M> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Meta::Ok)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Meta::Pending { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Meta::Error { .. })
    }

    /// The failure reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Meta::Error { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

impl<M> Default for Meta<M> {
    fn default() -> Self {
        Meta::Ok
    }
}
