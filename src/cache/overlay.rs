//! The overlay cache.
//!
//! Wraps a [`NormalizedStore`] and keeps the results of registered named
//! queries verbatim. Every other query, and every registered query whose
//! arguments do not match the stored entry, goes to the store unchanged.

use std::sync::Arc;

use metrics::{counter, gauge};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::config::OverlayConfig;
use super::events::{ChangeListener, ChangeNotifier, EventQueue};
use super::query::{ArgumentSet, QueryDocument, QueryIdentity};
use super::registry::{BypassRegistry, StoreOutcome};
use super::snapshot::CacheSnapshot;
use super::store::{Diff, NormalizedStore};

const METRIC_BYPASS_WRITE: &str = "verbatim_bypass_write_total";
const METRIC_BYPASS_HIT: &str = "verbatim_bypass_hit_total";
const METRIC_BYPASS_MISS: &str = "verbatim_bypass_miss_total";
const METRIC_PASSTHROUGH: &str = "verbatim_passthrough_total";
const METRIC_BYPASS_ENTRIES: &str = "verbatim_bypass_entries";

/// Cache overlay serving registered queries from verbatim entries.
pub struct OverlayCache<S: NormalizedStore> {
    config: OverlayConfig,
    registry: BypassRegistry,
    notifier: ChangeNotifier,
    store: S,
}

impl<S: NormalizedStore> OverlayCache<S> {
    /// Wrap an existing store.
    pub fn new(config: OverlayConfig, store: S) -> Self {
        let registry = BypassRegistry::new(
            config.bypass_queries.iter().map(String::as_str),
            config.overwrite_policy,
        );
        info!(
            bypass_queries = ?config.bypass_queries,
            overwrite_policy = %config.overwrite_policy,
            "Overlay cache created"
        );
        Self {
            config,
            registry,
            notifier: ChangeNotifier::new(),
            store,
        }
    }

    /// Build the store from its configuration, passed through unchanged.
    pub fn with_store_config(config: OverlayConfig, store_config: S::Config) -> Self {
        Self::new(config, S::from_config(store_config))
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &BypassRegistry {
        &self.registry
    }

    /// True when `query` is registered for bypass, whether or not an entry
    /// has been stored yet.
    pub fn is_bypass(&self, query: &QueryDocument) -> bool {
        self.registry.is_registered(query.identity())
    }

    /// Receive a [`ChangeEvent`](super::events::ChangeEvent) for every bypass
    /// write from now on.
    pub fn subscribe(&self, listener: Arc<dyn ChangeListener>) {
        self.notifier.subscribe(listener);
    }

    /// Subscribe a fresh queue sized by `event_queue_limit`.
    pub fn event_queue(&self) -> Arc<EventQueue> {
        let queue = Arc::new(EventQueue::new(
            self.config.event_queue_limit_non_zero().get(),
        ));
        self.notifier.subscribe(queue.clone());
        queue
    }

    /// Record a query result.
    ///
    /// Results of registered queries are stored verbatim and announced to
    /// watchers; they never reach the store. Everything else is forwarded.
    pub fn write(
        &self,
        query: &QueryDocument,
        variables: &ArgumentSet,
        result: Value,
    ) -> Result<(), S::Error> {
        let result = match self.registry.registration(query.identity()) {
            Some(registration) => {
                match self.registry.store(registration, result, variables.clone()) {
                    StoreOutcome::Rejected { result } => {
                        debug!(
                            identity = %registration.identity(),
                            "Bypass entry kept, forwarding write with other arguments"
                        );
                        result
                    }
                    outcome => {
                        counter!(METRIC_BYPASS_WRITE).increment(1);
                        gauge!(METRIC_BYPASS_ENTRIES).set(self.registry.len() as f64);
                        debug!(
                            identity = %registration.identity(),
                            replaced = outcome == StoreOutcome::Replaced,
                            "Stored bypass entry"
                        );
                        self.notifier.notify(&self.store, registration.identity());
                        return Ok(());
                    }
                }
            }
            None => result,
        };

        counter!(METRIC_PASSTHROUGH, "op" => "write").increment(1);
        self.store.write(query, variables, result)
    }

    /// Read a complete result.
    pub fn read(&self, query: &QueryDocument, variables: &ArgumentSet) -> Result<Value, S::Error> {
        self.read_shared(query, variables).map(Arc::unwrap_or_clone)
    }

    /// Like [`OverlayCache::read`], but a bypass hit hands out the stored
    /// document itself instead of a copy.
    pub fn read_shared(
        &self,
        query: &QueryDocument,
        variables: &ArgumentSet,
    ) -> Result<Arc<Value>, S::Error> {
        if let Some(result) = self.lookup(query.identity(), variables, "read") {
            return Ok(result);
        }
        self.store.read(query, variables).map(Arc::new)
    }

    /// Compare a query against cached data.
    ///
    /// A matching bypass entry is always complete.
    pub fn diff(&self, query: &QueryDocument, variables: &ArgumentSet) -> Result<Diff, S::Error> {
        if let Some(result) = self.lookup(query.identity(), variables, "diff") {
            return Ok(Diff::complete(Arc::unwrap_or_clone(result)));
        }
        self.store.diff(query, variables)
    }

    /// Snapshot both layers.
    pub fn extract(&self, optimistic: bool) -> CacheSnapshot {
        CacheSnapshot::new(self.registry.entries(), self.store.extract(optimistic))
    }

    /// Load a snapshot taken by [`OverlayCache::extract`] or by the bare store.
    ///
    /// Entries for names that are no longer registered are discarded. When
    /// the store rejects its records, both layers keep their previous
    /// contents.
    pub fn restore(&self, snapshot: CacheSnapshot) -> Result<(), S::Error> {
        let CacheSnapshot {
            bypass_entries,
            store,
        } = snapshot;
        let store_records = store.len();
        self.store.restore(store)?;

        let offered = bypass_entries.len();
        let dropped = self.registry.replace_entries(bypass_entries);
        if !dropped.is_empty() {
            warn!(
                dropped = ?dropped,
                "Discarded snapshot entries for unregistered queries"
            );
        }
        gauge!(METRIC_BYPASS_ENTRIES).set(self.registry.len() as f64);
        info!(
            restored = offered - dropped.len(),
            store_records,
            "Restored overlay snapshot"
        );
        Ok(())
    }

    /// Drop all cached data. Registered names are kept.
    pub fn reset(&self) -> Result<(), S::Error> {
        self.registry.clear();
        gauge!(METRIC_BYPASS_ENTRIES).set(0.0);
        info!("Overlay cache reset");
        self.store.reset()
    }

    /// Ask the store to signal its watchers.
    pub fn broadcast_watches(&self) {
        self.store.broadcast_watches();
    }

    fn lookup(
        &self,
        identity: Option<&QueryIdentity>,
        variables: &ArgumentSet,
        op: &'static str,
    ) -> Option<Arc<Value>> {
        if !self.registry.is_registered(identity) {
            counter!(METRIC_PASSTHROUGH, "op" => op).increment(1);
            return None;
        }
        match self.registry.lookup(identity, variables) {
            Some(result) => {
                counter!(METRIC_BYPASS_HIT, "op" => op).increment(1);
                debug!(identity = ?identity, op, "Served bypass entry");
                Some(result)
            }
            None => {
                counter!(METRIC_BYPASS_MISS, "op" => op).increment(1);
                debug!(identity = ?identity, op, "Bypass entry absent or arguments differ");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::cache::config::OverwritePolicy;
    use crate::cache::store::{MemoryStore, MemoryStoreConfig};
    use crate::error::StoreError;

    fn overlay(names: &[&str]) -> OverlayCache<MemoryStore> {
        OverlayCache::with_store_config(
            OverlayConfig::with_names(names.iter().copied()),
            MemoryStoreConfig::default(),
        )
    }

    fn page(n: i64) -> ArgumentSet {
        ArgumentSet::new().with("page", n)
    }

    #[test]
    fn bypass_write_skips_the_store() {
        let cache = overlay(&["GetFeed"]);
        let query = QueryDocument::query("GetFeed");

        cache
            .write(&query, &page(1), json!({ "items": ["a"] }))
            .expect("write");

        assert_eq!(cache.store().field_count(), 0);
        assert_eq!(
            cache.read(&query, &page(1)).expect("bypass read"),
            json!({ "items": ["a"] })
        );
        assert_eq!(
            cache.diff(&query, &page(1)).expect("bypass diff"),
            Diff::complete(json!({ "items": ["a"] }))
        );
    }

    #[test]
    fn shared_reads_do_not_copy_bypass_results() {
        let cache = overlay(&["GetFeed"]);
        let query = QueryDocument::query("GetFeed");
        cache
            .write(&query, &page(1), json!({ "items": ["a", "b"] }))
            .expect("write");

        let first = cache.read_shared(&query, &page(1)).expect("hit");
        let second = cache.read_shared(&query, &page(1)).expect("hit");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*first, json!({ "items": ["a", "b"] }));
    }

    #[test]
    fn other_arguments_fall_through() {
        let cache = overlay(&["GetFeed"]);
        let query = QueryDocument::query("GetFeed");
        cache
            .write(&query, &page(1), json!({ "items": ["a"] }))
            .expect("write");

        let err = cache.read(&query, &page(2)).expect_err("falls through");
        assert!(matches!(err, StoreError::NotFound { .. }));
        let diff = cache.diff(&query, &page(2)).expect("diff");
        assert!(!diff.complete);
    }

    #[test]
    fn unregistered_writes_are_forwarded() {
        let cache = overlay(&["GetFeed"]);
        let query = QueryDocument::query("GetUser");
        let vars = ArgumentSet::new().with("id", 5);

        cache.write(&query, &vars, json!({ "id": 5 })).expect("write");

        assert!(cache.registry().is_empty());
        assert_eq!(cache.store().field_count(), 1);
        assert_eq!(cache.read(&query, &vars).expect("read"), json!({ "id": 5 }));
    }

    #[test]
    fn anonymous_queries_never_bypass() {
        let cache = overlay(&["GetFeed"]);
        let query = QueryDocument::anonymous();

        assert!(!cache.is_bypass(&query));
        cache
            .write(&query, &ArgumentSet::new(), json!(1))
            .expect("write");
        assert!(cache.registry().is_empty());
        assert_eq!(cache.store().field_count(), 1);
    }

    #[test]
    fn notifier_runs_once_per_bypass_write_only() {
        let cache = overlay(&["GetFeed"]);
        let broadcasts = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&broadcasts);
        cache.store().subscribe(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        let events = cache.event_queue();

        cache
            .write(&QueryDocument::query("GetFeed"), &page(1), json!(1))
            .expect("bypass write");
        assert_eq!(broadcasts.load(Ordering::SeqCst), 1);
        assert_eq!(events.len(), 1);

        // The store broadcasts on its own write path; no change event.
        cache
            .write(&QueryDocument::query("GetUser"), &page(1), json!(2))
            .expect("passthrough write");
        assert_eq!(broadcasts.load(Ordering::SeqCst), 2);
        assert_eq!(events.len(), 1);

        let drained = events.drain(10);
        assert_eq!(drained[0].identity.as_str(), "GetFeed");
    }

    #[test]
    fn first_write_wins_forwards_divergent_writes() {
        let cache: OverlayCache<MemoryStore> = OverlayCache::with_store_config(
            OverlayConfig::with_names(["GetFeed"])
                .overwrite_policy(OverwritePolicy::FirstWriteWins),
            MemoryStoreConfig::default(),
        );
        let query = QueryDocument::query("GetFeed");
        let events = cache.event_queue();

        cache.write(&query, &page(1), json!("first")).expect("write");
        cache.write(&query, &page(2), json!("second")).expect("write");

        assert_eq!(cache.read(&query, &page(1)).expect("bypass"), json!("first"));
        assert_eq!(
            cache.read(&query, &page(2)).expect("store"),
            json!("second")
        );
        assert_eq!(cache.store().field_count(), 1);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn reset_keeps_names_and_clears_entries() {
        let cache = overlay(&["GetFeed"]);
        let query = QueryDocument::query("GetFeed");
        cache.write(&query, &page(1), json!(1)).expect("write");

        cache.reset().expect("reset");

        assert!(cache.registry().is_empty());
        assert!(cache.is_bypass(&query));
        assert!(cache.read(&query, &page(1)).is_err());

        cache.write(&query, &page(1), json!(2)).expect("write");
        assert_eq!(cache.read(&query, &page(1)).expect("bypass"), json!(2));
    }

    #[test]
    fn rejected_restore_leaves_both_layers_untouched() {
        let cache = overlay(&["GetFeed"]);
        let feed = QueryDocument::query("GetFeed");
        let user = QueryDocument::query("GetUser");
        cache.write(&feed, &page(1), json!("before")).expect("write");
        cache.write(&user, &page(1), json!("user")).expect("write");
        let before = cache.extract(false);

        let snapshot = CacheSnapshot::from_value(json!({
            "bypassEntries": {
                "GetFeed": { "result": "from_bad_snapshot", "arguments": { "page": 1 } }
            },
            "ROOT_QUERY": [1, 2]
        }))
        .expect("parses");
        let err = cache.restore(snapshot).expect_err("root must be an object");

        assert!(matches!(err, StoreError::InvalidRecord { .. }));
        assert_eq!(cache.read(&feed, &page(1)).expect("bypass"), json!("before"));
        assert_eq!(cache.read(&user, &page(1)).expect("store"), json!("user"));
        assert_eq!(cache.extract(false), before);
    }

    #[test]
    fn restore_discards_unregistered_entries() {
        let source = overlay(&["GetFeed", "Retired"]);
        source
            .write(&QueryDocument::query("Retired"), &page(1), json!("old"))
            .expect("write");
        source
            .write(&QueryDocument::query("GetFeed"), &page(1), json!("feed"))
            .expect("write");

        let target = overlay(&["GetFeed"]);
        target.restore(source.extract(false)).expect("restore");

        assert_eq!(target.registry().len(), 1);
        assert_eq!(
            target
                .read(&QueryDocument::query("GetFeed"), &page(1))
                .expect("restored"),
            json!("feed")
        );
    }
}
