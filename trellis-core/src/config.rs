//! Render configuration.
//!
//! ```json
//! {
//!     "state_global": "__trellis_state__",
//!     "stream_global": "__trellis_stream__",
//!     "activation_scripts": ["/static/app.js"],
//!     "include_meta": true
//! }
//! ```
//!
//! Every field is optional.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::html;

/// How server output embeds state and boots the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// `window` property holding the hydration snapshot.
    pub state_global: String,
    /// `window` property collecting state streamed after the shell.
    pub stream_global: String,
    /// Script URLs appended after the markup.
    pub activation_scripts: Vec<String>,
    /// Whether pending and error write states are serialized.
    pub include_meta: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            state_global: "__trellis_state__".to_string(),
            stream_global: "__trellis_stream__".to_string(),
            activation_scripts: Vec::new(),
            include_meta: true,
        }
    }
}

impl RenderConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|err| StoreError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Both globals end up in generated scripts, so they must be plain
    /// identifiers.
    pub fn validate(&self) -> Result<()> {
        for (field, name) in [("state_global", &self.state_global), ("stream_global", &self.stream_global)] {
            if !is_identifier(name) {
                return Err(StoreError::Config(format!("{field} `{name}` is not a script identifier")));
            }
        }
        if self.state_global == self.stream_global {
            return Err(StoreError::Config("state_global and stream_global must differ".to_string()));
        }
        Ok(())
    }

    /// `<script src=...></script>` for every activation script.
    pub fn activation_tags(&self) -> String {
        let mut out = String::new();
        for src in &self.activation_scripts {
            out.push_str("<script");
            html::write_attr("src", src, &mut out);
            out.push_str("></script>");
        }
        out
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
