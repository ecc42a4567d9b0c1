//! Hydration Snapshots
//!
//! A snapshot maps a token's stable id to `{ "kind": ..., "value": ... }`:
//!
//! - `value`: the handler's current value;
//! - `meta`: a non-ok write status (keyed by the meta token's id, `"<id>:meta"`);
//! - `message`: a message to fold through the container's reducer when the
//!   handler is created.
//!
//! The server embeds the snapshot as an inline script; the client seeds its
//! registry from it before the first reactive run, so client state matches
//! the server markup.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What a snapshot entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Value,
    Meta,
    Message,
}

/// One serialized piece of state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub kind: EntryKind,
    pub value: serde_json::Value,
}

impl SnapshotEntry {
    pub fn new(kind: EntryKind, value: serde_json::Value) -> Self {
        Self { kind, value }
    }
}

/// Serialized registry state, keyed by token id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    entries: IndexMap<String, SnapshotEntry>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, entry: SnapshotEntry) {
        self.entries.insert(id.into(), entry);
    }

    pub fn get(&self, id: &str) -> Option<&SnapshotEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SnapshotEntry)> {
        self.entries.iter().map(|(id, entry)| (id.as_str(), entry))
    }

    /// Merge `other` into this snapshot; entries in `other` win.
    pub fn merge(&mut self, other: Snapshot) {
        self.entries.extend(other.entries);
    }

    pub(crate) fn sort(&mut self) {
        self.entries.sort_keys();
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Compact MessagePack form, for transports that are not inline scripts.
    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// JSON safe to embed inside a `<script>` element.
    pub fn to_script_json(&self) -> Result<String> {
        Ok(escape_script(&self.to_json()?))
    }

    /// `<script>window.<global> = {...};</script>`
    pub fn to_script(&self, global: &str) -> Result<String> {
        Ok(format!(
            "<script>window.{global} = {};</script>",
            self.to_script_json()?
        ))
    }
}

/// `<` is the only character that can end a script element early.
fn escape_script(json: &str) -> String {
    json.replace('<', "\\u003c")
}

/// Encoder/decoder pair for one value type.
pub(crate) struct Codec<T> {
    pub(crate) encode: fn(&T) -> serde_json::Result<serde_json::Value>,
    pub(crate) decode: fn(serde_json::Value) -> serde_json::Result<T>,
}

impl<T> Clone for Codec<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Codec<T> {}

impl<T: Serialize + DeserializeOwned> Codec<T> {
    pub(crate) fn json() -> Self {
        Self {
            encode: |value| serde_json::to_value(value),
            decode: |json| serde_json::from_value(json),
        }
    }
}

/// How a handler is written into (and restored from) a snapshot.
pub(crate) struct Persist<T> {
    pub(crate) codec: Codec<T>,
    pub(crate) kind: EntryKind,
    /// Values for which no entry is written.
    pub(crate) skip: Option<fn(&T) -> bool>,
}

impl<T> Clone for Persist<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Persist<T> {}

impl<T> Persist<T> {
    pub(crate) fn new(codec: Codec<T>, kind: EntryKind) -> Self {
        Self {
            codec,
            kind,
            skip: None,
        }
    }

    pub(crate) fn skip_when(mut self, skip: fn(&T) -> bool) -> Self {
        self.skip = Some(skip);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot::new();
        snapshot.insert("count", SnapshotEntry::new(EntryKind::Value, json!(3)));
        snapshot.insert(
            "count:meta",
            SnapshotEntry::new(EntryKind::Meta, json!({"type": "pending", "message": 4})),
        );
        snapshot
    }

    #[test]
    fn json_shape_is_id_to_kind_and_value() {
        let json: serde_json::Value = serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        assert_eq!(json["count"], json!({"kind": "value", "value": 3}));
        assert_eq!(json["count:meta"]["kind"], json!("meta"));
    }

    #[test]
    fn msgpack_preserves_entries() {
        let snapshot = sample();
        let bytes = snapshot.to_msgpack().unwrap();
        assert_eq!(Snapshot::from_msgpack(&bytes).unwrap(), snapshot);
    }

    #[test]
    fn script_escapes_closing_tags() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            "note",
            SnapshotEntry::new(EntryKind::Value, json!("</script><b>")),
        );
        let script = snapshot.to_script("__state__").unwrap();
        assert!(script.starts_with("<script>window.__state__ = {"));
        assert_eq!(script.matches("</script>").count(), 1);
    }

    #[test]
    fn merge_overrides_existing_ids() {
        let mut base = sample();
        let mut newer = Snapshot::new();
        newer.insert("count", SnapshotEntry::new(EntryKind::Value, json!(9)));
        base.merge(newer);
        assert_eq!(base.get("count").unwrap().value, json!(9));
        assert_eq!(base.len(), 2);
    }
}
