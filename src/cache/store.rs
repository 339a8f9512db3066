//! Normalized store capability and an in-memory implementation.
//!
//! The overlay treats the store as a black box: anything implementing
//! [`NormalizedStore`] can sit underneath it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::StoreError;

use super::lock::{rw_read, rw_write};
use super::query::{ArgumentSet, QueryDocument};
use super::snapshot::BYPASS_ENTRIES_KEY;

const SOURCE: &str = "cache::store";
const DEFAULT_ROOT_ID: &str = "ROOT_QUERY";
const ANONYMOUS_OPERATION: &str = "<anonymous>";

/// Outcome of comparing a query against cached data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    /// Whatever part of the result could be assembled, if any.
    pub result: Option<Value>,
    /// True when every requested field was available.
    pub complete: bool,
    /// Keys of the records that were missing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

impl Diff {
    pub fn complete(result: Value) -> Self {
        Self {
            result: Some(result),
            complete: true,
            missing: Vec::new(),
        }
    }

    pub fn missing(key: impl Into<String>) -> Self {
        Self {
            result: None,
            complete: false,
            missing: vec![key.into()],
        }
    }
}

/// Capability contract of a generic normalized cache.
///
/// All methods take `&self`; implementations synchronize internally so one
/// store can be shared between threads.
pub trait NormalizedStore: Send + Sync {
    /// Construction parameters, passed through unchanged by the overlay.
    type Config;
    /// Failures reported by reads, diffs and restores.
    type Error: std::error::Error + Send + Sync + 'static;

    fn from_config(config: Self::Config) -> Self
    where
        Self: Sized;

    /// Merge a query result into the store.
    fn write(
        &self,
        query: &QueryDocument,
        variables: &ArgumentSet,
        result: Value,
    ) -> Result<(), Self::Error>;

    /// Read a complete result, failing if anything is missing.
    fn read(&self, query: &QueryDocument, variables: &ArgumentSet) -> Result<Value, Self::Error>;

    /// Read as much as is available and report completeness.
    fn diff(&self, query: &QueryDocument, variables: &ArgumentSet) -> Result<Diff, Self::Error>;

    /// Serializable copy of the store's records.
    fn extract(&self, optimistic: bool) -> Map<String, Value>;

    /// Replace the store's records with a previous extract.
    fn restore(&self, records: Map<String, Value>) -> Result<(), Self::Error>;

    /// Drop every record.
    fn reset(&self) -> Result<(), Self::Error>;

    /// Tell watchers that cache contents changed.
    fn broadcast_watches(&self);
}

/// Configuration of [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryStoreConfig {
    /// Key of the record that holds root query fields.
    ///
    /// Must not be [`BYPASS_ENTRIES_KEY`]; writes fail with
    /// [`StoreError::InvalidRecord`] while it is.
    pub root_id: String,
    /// Stamp `__typename: "Query"` on the root record.
    pub add_typename: bool,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            root_id: DEFAULT_ROOT_ID.to_string(),
            add_typename: true,
        }
    }
}

impl From<&crate::config::StoreSettings> for MemoryStoreConfig {
    fn from(settings: &crate::config::StoreSettings) -> Self {
        Self {
            root_id: settings.root_id.clone(),
            add_typename: settings.add_typename,
        }
    }
}

/// Handle returned by [`MemoryStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

type Watcher = Arc<dyn Fn() + Send + Sync>;

/// Record-per-root-field store kept in memory.
///
/// Each result is stored under the root record, keyed by operation name and
/// canonical arguments (`GetUser({"id":5})`). Optimistic layers are not
/// modelled; `extract(true)` equals `extract(false)`.
pub struct MemoryStore {
    config: MemoryStoreConfig,
    records: RwLock<Map<String, Value>>,
    watchers: RwLock<Vec<(WatchId, Watcher)>>,
    next_watch: AtomicU64,
}

impl MemoryStore {
    pub fn new(config: MemoryStoreConfig) -> Self {
        Self {
            config,
            records: RwLock::new(Map::new()),
            watchers: RwLock::new(Vec::new()),
            next_watch: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &MemoryStoreConfig {
        &self.config
    }

    /// Register a callback run on every broadcast.
    pub fn subscribe<F>(&self, watcher: F) -> WatchId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = WatchId(self.next_watch.fetch_add(1, Ordering::SeqCst));
        rw_write(&self.watchers, SOURCE, "subscribe").push((id, Arc::new(watcher)));
        id
    }

    pub fn unsubscribe(&self, id: WatchId) -> bool {
        let mut watchers = rw_write(&self.watchers, SOURCE, "unsubscribe");
        let before = watchers.len();
        watchers.retain(|(watch, _)| *watch != id);
        watchers.len() != before
    }

    /// Number of root fields currently stored.
    pub fn field_count(&self) -> usize {
        rw_read(&self.records, SOURCE, "field_count")
            .get(&self.config.root_id)
            .and_then(Value::as_object)
            .map(|root| root.keys().filter(|key| *key != "__typename").count())
            .unwrap_or(0)
    }

    /// Key of the root field holding the result of `query` for `variables`.
    pub fn field_key(query: &QueryDocument, variables: &ArgumentSet) -> String {
        let operation = query
            .identity()
            .map(|identity| identity.as_str())
            .unwrap_or(ANONYMOUS_OPERATION);
        format!("{operation}({})", variables.canonical_key())
    }

    fn lookup(&self, key: &str) -> Option<Value> {
        rw_read(&self.records, SOURCE, "lookup")
            .get(&self.config.root_id)
            .and_then(|root| root.get(key))
            .cloned()
    }
}

impl NormalizedStore for MemoryStore {
    type Config = MemoryStoreConfig;
    type Error = StoreError;

    fn from_config(config: Self::Config) -> Self {
        Self::new(config)
    }

    fn write(
        &self,
        query: &QueryDocument,
        variables: &ArgumentSet,
        result: Value,
    ) -> Result<(), StoreError> {
        if self.config.root_id == BYPASS_ENTRIES_KEY {
            return Err(StoreError::invalid_record(
                &self.config.root_id,
                "root id is reserved for bypass entries in snapshots",
            ));
        }
        let key = Self::field_key(query, variables);
        {
            let mut records = rw_write(&self.records, SOURCE, "write");
            let root = records
                .entry(self.config.root_id.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            let Some(root) = root.as_object_mut() else {
                return Err(StoreError::invalid_record(
                    &self.config.root_id,
                    "root record is not an object",
                ));
            };
            if self.config.add_typename {
                root.entry("__typename")
                    .or_insert_with(|| Value::String("Query".to_string()));
            }
            root.insert(key.clone(), result);
        }
        debug!(field = %key, "Stored result in normalized store");
        self.broadcast_watches();
        Ok(())
    }

    fn read(&self, query: &QueryDocument, variables: &ArgumentSet) -> Result<Value, StoreError> {
        let key = Self::field_key(query, variables);
        self.lookup(&key).ok_or_else(|| StoreError::not_found(key))
    }

    fn diff(&self, query: &QueryDocument, variables: &ArgumentSet) -> Result<Diff, StoreError> {
        let key = Self::field_key(query, variables);
        Ok(match self.lookup(&key) {
            Some(result) => Diff::complete(result),
            None => Diff::missing(key),
        })
    }

    fn extract(&self, _optimistic: bool) -> Map<String, Value> {
        rw_read(&self.records, SOURCE, "extract").clone()
    }

    fn restore(&self, records: Map<String, Value>) -> Result<(), StoreError> {
        if let Some(root) = records.get(&self.config.root_id) {
            if !root.is_object() {
                return Err(StoreError::invalid_record(
                    &self.config.root_id,
                    "root record is not an object",
                ));
            }
        }
        *rw_write(&self.records, SOURCE, "restore") = records;
        Ok(())
    }

    fn reset(&self) -> Result<(), StoreError> {
        rw_write(&self.records, SOURCE, "reset").clear();
        self.broadcast_watches();
        Ok(())
    }

    fn broadcast_watches(&self) {
        let watchers: Vec<Watcher> = rw_read(&self.watchers, SOURCE, "broadcast_watches")
            .iter()
            .map(|(_, watcher)| Arc::clone(watcher))
            .collect();
        for watcher in watchers {
            watcher();
        }
    }
}
