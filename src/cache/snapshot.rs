//! Serializable overlay state.
//!
//! A snapshot is one flat JSON object: the store's records at the top level
//! plus the bypass entries under the reserved [`BYPASS_ENTRIES_KEY`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::SnapshotError;

use super::query::QueryIdentity;
use super::registry::BypassEntry;

/// Top-level key holding the bypass entries.
pub const BYPASS_ENTRIES_KEY: &str = "bypassEntries";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheSnapshot {
    pub bypass_entries: BTreeMap<QueryIdentity, BypassEntry>,
    /// Records of the normalized store, passed through untouched.
    pub store: Map<String, Value>,
}

impl CacheSnapshot {
    pub fn new(
        bypass_entries: BTreeMap<QueryIdentity, BypassEntry>,
        store: Map<String, Value>,
    ) -> Self {
        Self {
            bypass_entries,
            store,
        }
    }

    /// Split a flat snapshot object into its two layers.
    ///
    /// Snapshots written without an overlay have no bypass key; those, and an
    /// explicit `null`, yield no entries.
    pub fn from_value(value: Value) -> Result<Self, SnapshotError> {
        let mut store = match value {
            Value::Object(map) => map,
            other => {
                return Err(SnapshotError::NotAnObject {
                    found: json_kind(&other),
                });
            }
        };
        let bypass_entries = match store.remove(BYPASS_ENTRIES_KEY) {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(entries) => serde_json::from_value(entries)?,
        };
        Ok(Self {
            bypass_entries,
            store,
        })
    }

    pub fn to_value(&self) -> Result<Value, SnapshotError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_json_str(json: &str) -> Result<Self, SnapshotError> {
        Self::from_value(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the snapshot to `path` as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn is_empty(&self) -> bool {
        self.bypass_entries.is_empty() && self.store.is_empty()
    }
}

impl Serialize for CacheSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // A store record under the reserved key would shadow the entries.
        let records = self
            .store
            .iter()
            .filter(|(key, _)| key.as_str() != BYPASS_ENTRIES_KEY);

        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry(BYPASS_ENTRIES_KEY, &self.bypass_entries)?;
        for (key, value) in records {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CacheSnapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(D::Error::custom)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
