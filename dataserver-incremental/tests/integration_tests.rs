//! Integration tests for tagging, include ancestry and the result cache

use dataserver_incremental::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

#[test]
fn test_include_change_cascades_to_hosts() {
    let tagger = Arc::new(DependencyTagger::new());
    let mut index = IncludeIndex::new();

    // article/1 includes user/1, the home page includes article/1
    index.set_includes("en/article/1.json", ["en/user/1.json"]);
    tagger.set_dependency("en/article/1.json", ["en/user/1.json"]);
    index.set_includes("en/home.json", ["en/article/1.json"]);
    tagger.set_dependency("en/home.json", ["en/article/1.json"]);

    let bridge = InvalidationBridge::new(tagger.clone());
    bridge.on_store_change(&StoreChange::Written {
        path: "en/user/1.json".into(),
    });

    let invalidated = tagger.get_all_invalidated_tags();
    let ancestors = index.ancestors("en/user/1.json");

    for host in &ancestors {
        assert!(invalidated.contains(host), "{host} should be invalidated");
    }
    assert_eq!(ancestors.len(), 2);
}

#[test]
fn test_query_tag_leaves_wildcard_once_tags_known() {
    let tagger = DependencyTagger::new();
    let query_tag = "query:latest?limit=3";

    tagger.set_dependency(query_tag, [WILDCARD]);
    tagger.set_dependency("en/home.json", [query_tag]);

    tagger.invalidate_tags(["en/unrelated.json"]);
    assert!(tagger.get_all_invalidated_tags().contains("en/home.json"));
    tagger.clear_invalidated_tags();

    // The query ran and reported what it actually read
    tagger.set_dependency(query_tag, ["en/article/1.json"]);

    tagger.invalidate_tags(["en/unrelated.json"]);
    assert!(!tagger.get_all_invalidated_tags().contains("en/home.json"));
    tagger.clear_invalidated_tags();

    tagger.invalidate_tags(["en/article/1.json"]);
    assert!(tagger.get_all_invalidated_tags().contains("en/home.json"));
}

#[test]
fn test_cache_survives_until_revision_moves() {
    let cache = ResultCache::new();
    let mut revision = Revision::ZERO;
    cache.sync_revision(revision);

    let args: BTreeMap<String, String> = [("limit".to_string(), "3".to_string())].into();
    let key = CacheKey::for_query("latest", &args).unwrap();
    cache.put(key, &serde_json::json!(["a", "b"])).unwrap();

    cache.sync_revision(revision);
    assert!(cache.get::<serde_json::Value>(&key).is_some());

    revision = revision.next();
    cache.sync_revision(revision);
    assert!(cache.get::<serde_json::Value>(&key).is_none());
}
