//! Integration tests for cache entities backed by JSON files
//!
//! Covers:
//! - Persistence round trips and loading on construction
//! - Invalidation, deletion and rebuilds
//! - Validation and hook failures
//! - Byte-stable saves

use anyhow::anyhow;
use ouroboros_cache::{
    BackingStore, CacheEntity, CacheError, CacheHooks, EntityConfig, JsonFileStore,
};
use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn file_store(dir: &TempDir) -> Arc<JsonFileStore> {
    Arc::new(JsonFileStore::new(dir.path().join("entities")))
}

fn persistent(name: &str, store: &Arc<JsonFileStore>) -> ouroboros_cache::EntityBuilder {
    CacheEntity::builder(name).hooks(CacheHooks::from_store(store.clone()))
}

#[test]
fn test_persistent_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);

    let mut cache = persistent("persistent", &store)
        .contents(json!({}))
        .build()
        .unwrap();
    assert!(!store.path("persistent").exists());

    cache.set("foo", json!("bar")).unwrap();
    cache.save().unwrap();
    assert!(store.path("persistent").is_file());
    assert!(store.temp_artifacts("persistent").unwrap().is_empty());

    cache.load().unwrap();
    assert_eq!(cache.get("foo").unwrap(), Some(&json!("bar")));
    assert_eq!(cache.stats().saves, 1);
    assert_eq!(cache.stats().loads, 1);
}

#[test]
fn test_load_on_construction() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);

    let mut first = persistent("load_init", &store)
        .contents(json!({ "foo": "bar" }))
        .build()
        .unwrap();
    first.save().unwrap();

    let second = persistent("load_init", &store).build().unwrap();
    assert_eq!(second.get("foo").unwrap(), Some(&json!("bar")));
    assert_eq!(second.stats().builds, 0);
}

#[test]
fn test_build_on_construction() {
    let cache = CacheEntity::builder("built")
        .hooks(CacheHooks::in_memory().merge(CacheHooks::none().with_builder(|_| Ok(json!([])))))
        .config(EntityConfig::non_persistent())
        .build()
        .unwrap();

    // The in-memory loader always finds `{}`
    assert_eq!(cache.contents(), Some(&json!({})));

    let mut hooks = CacheHooks::in_memory().with_builder(|_| Ok(json!([])));
    hooks.loader = None;
    let cache = CacheEntity::builder("built")
        .hooks(hooks)
        .config(EntityConfig::non_persistent())
        .build()
        .unwrap();
    assert_eq!(cache.contents(), Some(&json!([])));
    assert_eq!(cache.stats().builds, 1);
}

#[test]
fn test_content_driven_sequence() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);

    let mut cache = CacheEntity::builder("content")
        .contents(json!([""]))
        .hooks(CacheHooks::from_store(store.clone()).with_builder(|_| Ok(json!([]))))
        .build()
        .unwrap();

    cache.set(0usize, json!("foo")).unwrap();
    cache.set(1usize, json!("bar")).unwrap();
    cache.save().unwrap();

    cache.load().unwrap();
    assert!(cache.contents().unwrap().is_array());
    assert_eq!(cache.get(0usize).unwrap(), Some(&json!("foo")));
    assert_eq!(cache.get(1usize).unwrap(), Some(&json!("bar")));
    assert!(store.path("content").is_file());

    cache.invalidate_and_rebuild().unwrap();
    assert_eq!(cache.contents(), Some(&json!([])));
    assert_eq!(store.load("content").unwrap(), Some(json!([])));
}

#[test]
fn test_invalidate_discards_unsaved_edits() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);
    let mut cache = persistent("invalidate", &store).build().unwrap();

    cache.set("foo", json!("bar")).unwrap();
    cache.save().unwrap();
    cache.set("baz", json!("bar")).unwrap();

    cache.invalidate().unwrap();
    assert_eq!(cache.get("foo").unwrap(), Some(&json!("bar")));
    assert!(!cache.contains("baz").unwrap());
}

#[test]
fn test_save_then_replace_then_load() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);
    let mut cache = persistent("save_load", &store).build().unwrap();

    cache.set("foo", json!("bar")).unwrap();
    cache.save().unwrap();

    cache.replace_contents(Some(json!({})));
    assert_eq!(cache.contents(), Some(&json!({})));

    cache.load().unwrap();
    assert_eq!(cache.get("foo").unwrap(), Some(&json!("bar")));
}

#[test]
fn test_delete_then_load_is_absent() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);
    let mut cache = persistent("deleted", &store)
        .contents(json!({ "foo": "bar" }))
        .build()
        .unwrap();
    cache.save().unwrap();

    cache.delete_saved_content().unwrap();
    assert!(!store.path("deleted").exists());
    // Memory is untouched until the next load
    assert_eq!(cache.get("foo").unwrap(), Some(&json!("bar")));

    assert_eq!(cache.load().unwrap(), None);
    assert_eq!(cache.contents(), None);
    assert!(matches!(
        cache.get("foo"),
        Err(CacheError::ContentsAbsent { .. })
    ));

    let (loaded, contents) = cache.load_or_build().unwrap();
    assert!(!loaded);
    assert_eq!(contents, &json!({}));
}

#[test]
fn test_idempotent_save_is_byte_identical() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);
    let mut cache = persistent("stable", &store)
        .contents(json!({ "b": [1, 2, 3], "a": { "nested": true } }))
        .build()
        .unwrap();

    cache.save().unwrap();
    let first = fs::read(store.path("stable")).unwrap();
    cache.save().unwrap();
    let second = fs::read(store.path("stable")).unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_validator_forces_build() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);
    let mut cache = CacheEntity::builder("validated")
        .hooks(
            CacheHooks::from_store(store.clone())
                .with_validator(|contents| Ok(contents.get("foo").is_some())),
        )
        .build()
        .unwrap();
    assert_eq!(cache.contents(), Some(&json!({})));

    cache.set("baz", json!("bar")).unwrap();
    cache.save().unwrap();

    // Saved contents lack "foo", so loading rejects them and a build follows
    let (loaded, contents) = cache.load_or_build().unwrap();
    assert!(!loaded);
    assert_eq!(contents, &json!({}));

    cache.set("foo", json!("bar")).unwrap();
    cache.save().unwrap();
    cache.load().unwrap();
    assert_eq!(cache.contents(), Some(&json!({ "foo": "bar" })));
}

#[test]
fn test_post_processor_applies_on_load_and_build() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);
    let hooks = CacheHooks::from_store(store.clone()).with_post_processor(|contents| {
        let mut contents = contents.clone();
        contents["baz"] = json!("bar");
        Ok(Some(contents))
    });

    let mut cache = CacheEntity::builder("post")
        .contents(json!({ "foo": "bar" }))
        .hooks(hooks)
        .build()
        .unwrap();
    cache.save().unwrap();
    assert_eq!(cache.contents(), Some(&json!({ "foo": "bar" })));

    cache.load().unwrap();
    assert_eq!(cache.contents(), Some(&json!({ "foo": "bar", "baz": "bar" })));

    cache.invalidate_and_rebuild().unwrap();
    assert_eq!(cache.contents(), Some(&json!({ "baz": "bar" })));
}

#[test]
fn test_saver_failure_reaches_caller() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);
    store.save("failing", &json!({ "old": true })).unwrap();

    let mut cache = CacheEntity::builder("failing")
        .contents(json!({ "new": true }))
        .hooks(CacheHooks::from_store(store.clone()).with_saver(|name, _| {
            Err(CacheError::BackingStoreUnavailable {
                name: name.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }))
        .build()
        .unwrap();

    let err = cache.save().unwrap_err();
    assert!(err.is_store_failure());
    assert_eq!(store.load("failing").unwrap(), Some(json!({ "old": true })));
    assert_eq!(cache.stats().saves, 0);
}

#[test]
fn test_builder_failure_is_a_hook_failure() {
    let result = CacheEntity::builder("no_source")
        .hooks(CacheHooks::none().with_builder(|name| -> ouroboros_cache::Result<Value> {
            Err(anyhow!("no source for {}", name).into())
        }))
        .build();

    match result {
        Err(CacheError::HookFailure(e)) => assert_eq!(e.to_string(), "no source for no_source"),
        other => panic!("expected a hook failure, got {:?}", other.map(|e| e.stats().clone())),
    }
}

#[test]
fn test_swapping_hooks_at_runtime() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);
    let mut cache = persistent("swapped", &store)
        .contents(json!({ "foo": "bar" }))
        .build()
        .unwrap();

    cache.hooks_mut().loader = Some(Arc::new(|_: &str| -> ouroboros_cache::Result<Option<Value>> {
        Ok(Some(json!({ "from": "override" })))
    }));
    cache.save().unwrap();
    cache.load().unwrap();

    assert_eq!(cache.contents(), Some(&json!({ "from": "override" })));
    assert_eq!(store.load("swapped").unwrap(), Some(json!({ "foo": "bar" })));
}
