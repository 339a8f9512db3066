use serde_json::json;
use verbatim::cache::{
    ArgumentSet, CacheSnapshot, MemoryStore, MemoryStoreConfig, NormalizedStore, OverlayCache,
    OverlayConfig, QueryDocument,
};
use verbatim::error::SnapshotError;

fn overlay(names: &[&str]) -> OverlayCache<MemoryStore> {
    OverlayCache::with_store_config(
        OverlayConfig::with_names(names.iter().copied()),
        MemoryStoreConfig {
            add_typename: false,
            ..MemoryStoreConfig::default()
        },
    )
}

#[test]
fn extracted_snapshot_layout() {
    let cache = overlay(&["GetFeed"]);
    cache
        .write(
            &QueryDocument::query("GetFeed"),
            &ArgumentSet::new().with("page", 1),
            json!({ "items": ["a"] }),
        )
        .expect("bypass write");
    cache
        .write(
            &QueryDocument::query("GetUser"),
            &ArgumentSet::new(),
            json!({ "id": 5 }),
        )
        .expect("store write");

    let json = cache
        .extract(false)
        .to_json_string()
        .expect("serialize snapshot");

    insta::assert_snapshot!(json, @r#"
    {
      "bypassEntries": {
        "GetFeed": {
          "result": {
            "items": [
              "a"
            ]
          },
          "arguments": {
            "page": 1
          }
        }
      },
      "ROOT_QUERY": {
        "GetUser({})": {
          "id": 5
        }
      }
    }
    "#);
}

#[test]
fn snapshot_file_survives_a_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache.json");
    let feed = QueryDocument::query("GetFeed");
    let page = ArgumentSet::new().with("page", 2);

    let before = overlay(&["GetFeed"]);
    before
        .write(&feed, &page, json!({ "items": [] }))
        .expect("write");
    before.extract(false).save(&path).expect("save");

    let after = overlay(&["GetFeed"]);
    after
        .restore(CacheSnapshot::load(&path).expect("load"))
        .expect("restore");

    assert_eq!(after.read(&feed, &page).expect("read"), json!({ "items": [] }));
    assert_eq!(after.extract(false), before.extract(false));
}

#[test]
fn store_only_snapshot_restores_without_entries() {
    let store = MemoryStore::new(MemoryStoreConfig::default());
    let user = QueryDocument::query("GetUser");
    store
        .write(&user, &ArgumentSet::new(), json!({ "id": 1 }))
        .expect("write");
    let bare = serde_json::to_string(&store.extract(false)).expect("serialize records");

    let cache: OverlayCache<MemoryStore> = OverlayCache::with_store_config(
        OverlayConfig::with_names(["GetFeed"]),
        MemoryStoreConfig::default(),
    );
    cache
        .restore(CacheSnapshot::from_json_str(&bare).expect("parse"))
        .expect("restore");

    assert!(cache.registry().is_empty());
    assert_eq!(
        cache.read(&user, &ArgumentSet::new()).expect("read"),
        json!({ "id": 1 })
    );
}

#[test]
fn entries_for_unregistered_names_are_dropped_on_restore() {
    let snapshot = CacheSnapshot::from_value(json!({
        "bypassEntries": {
            "GetFeed": { "result": 1, "arguments": {} },
            "Retired": { "result": 2, "arguments": {} }
        }
    }))
    .expect("parse");

    let cache = overlay(&["GetFeed"]);
    cache.restore(snapshot).expect("restore");

    let restored = cache.extract(false);
    assert_eq!(restored.bypass_entries.len(), 1);
    assert!(
        restored
            .bypass_entries
            .keys()
            .all(|identity| identity.as_str() == "GetFeed")
    );
}

#[test]
fn restore_replaces_previous_entries() {
    let cache = overlay(&["GetFeed"]);
    let feed = QueryDocument::query("GetFeed");
    cache
        .write(&feed, &ArgumentSet::new(), json!("stale"))
        .expect("write");

    cache.restore(CacheSnapshot::default()).expect("restore");

    assert!(cache.read(&feed, &ArgumentSet::new()).is_err());
}

#[test]
fn malformed_snapshots_are_rejected() {
    assert!(matches!(
        CacheSnapshot::from_json_str("[]"),
        Err(SnapshotError::NotAnObject { found: "array" })
    ));
    assert!(matches!(
        CacheSnapshot::from_json_str("{ \"bypassEntries\": [1] }"),
        Err(SnapshotError::Json(_))
    ));
    assert!(matches!(
        CacheSnapshot::from_json_str("not json"),
        Err(SnapshotError::Json(_))
    ));
}
