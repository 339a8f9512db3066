use std::collections::HashMap;

use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use serde_json::json;
use verbatim::cache::{
    ArgumentSet, MemoryStore, MemoryStoreConfig, OverlayCache, OverlayConfig, QueryDocument,
};

fn metric_key(name: &str, labels: &[(String, String)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let labels: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{name}{{{}}}", labels.join(","))
}

#[test]
fn overlay_paths_emit_expected_metrics() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        let cache: OverlayCache<MemoryStore> = OverlayCache::with_store_config(
            OverlayConfig {
                event_queue_limit: 1,
                ..OverlayConfig::with_names(["GetFeed"])
            },
            MemoryStoreConfig::default(),
        );
        let events = cache.event_queue();
        let feed = QueryDocument::query("GetFeed");
        let user = QueryDocument::query("GetUser");
        let page = ArgumentSet::new().with("page", 1);

        cache.write(&feed, &page, json!([1])).expect("bypass write");
        cache.write(&feed, &page, json!([2])).expect("bypass write");
        cache.write(&feed, &page, json!([3])).expect("bypass write");
        cache.write(&user, &page, json!({})).expect("store write");
        cache.read(&feed, &page).expect("hit");
        let _ = cache.read(&feed, &ArgumentSet::new());
        cache.diff(&user, &page).expect("passthrough diff");

        assert_eq!(events.len(), 1);
        assert_eq!(events.dropped(), 2);
    });

    let values: HashMap<String, DebugValue> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, value)| {
            let key = composite_key.key();
            let labels: Vec<(String, String)> = key
                .labels()
                .map(|label| (label.key().to_string(), label.value().to_string()))
                .collect();
            (metric_key(key.name(), &labels), value)
        })
        .collect();

    let counter = |key: &str| match values.get(key) {
        Some(DebugValue::Counter(value)) => *value,
        other => panic!("expected counter {key}, found {other:?}"),
    };

    assert_eq!(counter("verbatim_bypass_write_total"), 3);
    assert_eq!(counter("verbatim_change_event_dropped_total"), 2);
    assert_eq!(counter("verbatim_bypass_hit_total{op=read}"), 1);
    assert_eq!(counter("verbatim_bypass_miss_total{op=read}"), 1);
    assert_eq!(counter("verbatim_passthrough_total{op=write}"), 1);
    assert_eq!(counter("verbatim_passthrough_total{op=diff}"), 1);
    match values.get("verbatim_bypass_entries") {
        Some(DebugValue::Gauge(value)) => assert_eq!(value.0, 1.0),
        other => panic!("expected gauge, found {other:?}"),
    }
}
