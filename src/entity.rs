//! Cache entities
//!
//! A [`CacheEntity`] owns the contents of one named cache together with the
//! hooks that load, build, save and delete them. Content edits go through
//! the entity so the optional [`FlushTrigger`] can decide when enough has
//! changed to save on its own.

use crate::clock::{Clock, SystemClock};
use crate::config::EntityConfig;
use crate::error::{CacheError, Result};
use crate::hooks::{CacheHooks, Processor};
use crate::persistence::PersistenceCoordinator;
use crate::trigger::{FlushPolicy, FlushTrigger};
use crate::types::{ContentKey, EntityStats};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Named cache contents with their lifecycle hooks
#[derive(Debug)]
pub struct CacheEntity {
    name: String,
    contents: Option<Value>,
    dependents: BTreeSet<String>,
    hooks: CacheHooks,
    config: EntityConfig,
    trigger: Option<FlushTrigger>,
    clock: Arc<dyn Clock>,
    rebuild_pending: bool,
    coordinator: Arc<PersistenceCoordinator>,
    stats: EntityStats,
}

fn shape(value: &Value) -> &'static str {
    match value {
        Value::Object(_) => "mapping",
        Value::Array(_) => "sequence",
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
        Value::Null => "null",
    }
}

fn invalid_key(name: &str, key: &ContentKey, reason: impl Into<String>) -> CacheError {
    CacheError::InvalidKey {
        name: name.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn process(processor: Option<&Processor>, contents: Value) -> Result<Value> {
    match processor {
        Some(processor) => Ok(processor(&contents)?.unwrap_or(contents)),
        None => Ok(contents),
    }
}

impl CacheEntity {
    pub fn builder(name: impl Into<String>) -> EntityBuilder {
        EntityBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // Content access

    fn present(&self) -> Result<&Value> {
        self.contents
            .as_ref()
            .ok_or_else(|| CacheError::absent(&self.name))
    }

    pub fn get(&self, key: impl Into<ContentKey>) -> Result<Option<&Value>> {
        let key = key.into();
        match (self.present()?, &key) {
            (Value::Object(map), ContentKey::Field(field)) => Ok(map.get(field)),
            (Value::Array(items), ContentKey::Index(index)) => Ok(items.get(*index)),
            (other, _) => Err(invalid_key(
                &self.name,
                &key,
                format!("cannot index {} contents", shape(other)),
            )),
        }
    }

    /// Store `value` under `key`, returning what was there before
    ///
    /// On a sequence, an index equal to its length appends.
    ///
    /// The edit is applied before any automatic save it triggers; if that save
    /// fails its error is returned and the edit stays in memory.
    pub fn set(&mut self, key: impl Into<ContentKey>, value: Value) -> Result<Option<Value>> {
        let key = key.into();
        let contents = self
            .contents
            .as_mut()
            .ok_or_else(|| CacheError::absent(&self.name))?;

        let previous = match (contents, &key) {
            (Value::Object(map), ContentKey::Field(field)) => map.insert(field.clone(), value),
            (Value::Array(items), ContentKey::Index(index)) => {
                let index = *index;
                if index < items.len() {
                    Some(std::mem::replace(&mut items[index], value))
                } else if index == items.len() {
                    items.push(value);
                    None
                } else {
                    return Err(invalid_key(
                        &self.name,
                        &key,
                        format!("index past the end of a sequence of length {}", items.len()),
                    ));
                }
            }
            (other, _) => {
                return Err(invalid_key(
                    &self.name,
                    &key,
                    format!("cannot index {} contents", shape(other)),
                ))
            }
        };

        self.track_edit()?;
        Ok(previous)
    }

    /// Remove `key`, returning the removed value; missing keys are not an error
    ///
    /// The edit is applied before any automatic save it triggers; if that save
    /// fails its error is returned and the edit stays in memory.
    pub fn delete(&mut self, key: impl Into<ContentKey>) -> Result<Option<Value>> {
        let key = key.into();
        let contents = self
            .contents
            .as_mut()
            .ok_or_else(|| CacheError::absent(&self.name))?;

        let removed = match (contents, &key) {
            (Value::Object(map), ContentKey::Field(field)) => map.remove(field),
            (Value::Array(items), ContentKey::Index(index)) => {
                (*index < items.len()).then(|| items.remove(*index))
            }
            (other, _) => {
                return Err(invalid_key(
                    &self.name,
                    &key,
                    format!("cannot index {} contents", shape(other)),
                ))
            }
        };

        if removed.is_some() {
            self.track_edit()?;
        }
        Ok(removed)
    }

    pub fn contains(&self, key: impl Into<ContentKey>) -> Result<bool> {
        self.get(key).map(|value| value.is_some())
    }

    /// Number of entries; strings count characters
    pub fn len(&self) -> Result<usize> {
        match self.present()? {
            Value::Object(map) => Ok(map.len()),
            Value::Array(items) => Ok(items.len()),
            Value::String(s) => Ok(s.chars().count()),
            Value::Null => Ok(0),
            other => Err(CacheError::Other(format!(
                "{} contents of '{}' have no length",
                shape(other),
                self.name
            ))),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|len| len == 0)
    }

    /// Apply an arbitrary edit to the contents; counts as one edit
    ///
    /// The edit is applied before any automatic save it triggers; if that save
    /// fails its error is returned and the edit stays in memory.
    pub fn modify<R>(&mut self, edit: impl FnOnce(&mut Value) -> R) -> Result<R> {
        let contents = self
            .contents
            .as_mut()
            .ok_or_else(|| CacheError::absent(&self.name))?;
        let result = edit(contents);
        self.track_edit()?;
        Ok(result)
    }

    pub fn contents(&self) -> Option<&Value> {
        self.contents.as_ref()
    }

    /// Swap in new contents without touching the backing store
    pub fn replace_contents(&mut self, contents: Option<Value>) -> Option<Value> {
        std::mem::replace(&mut self.contents, contents)
    }

    pub fn take_contents(&mut self) -> Option<Value> {
        self.contents.take()
    }

    // Edit accounting

    fn track_edit(&mut self) -> Result<()> {
        let due = match self.trigger.as_mut() {
            Some(trigger) => trigger.record_edit(),
            None => false,
        };
        self.after_edit(due).map(|_| ())
    }

    /// Count an edit made at `edit_time`; returns true when it caused a save
    pub fn track_edit_at(&mut self, edit_time: DateTime<Utc>) -> Result<bool> {
        let due = match self.trigger.as_mut() {
            Some(trigger) => trigger.record_edit_at(edit_time),
            None => false,
        };
        self.after_edit(due)
    }

    fn after_edit(&mut self, due: bool) -> Result<bool> {
        self.stats.edits += 1;
        if !due {
            return Ok(false);
        }

        debug!("Edit volume on '{}' reached a flush window, saving", self.name);
        self.save()?;
        self.stats.auto_flushes += 1;
        Ok(true)
    }

    fn reset_trigger(&mut self) {
        if let Some(trigger) = self.trigger.as_mut() {
            trigger.reset();
        }
    }

    // Lifecycle

    /// Replace the contents with whatever the loader produces
    ///
    /// Contents the validator rejects (or fails on) become absent, as does
    /// everything when no loader is configured. A failing loader or
    /// post-processor leaves the current contents untouched.
    pub fn load(&mut self) -> Result<Option<&Value>> {
        let loaded = match &self.hooks.loader {
            Some(loader) => loader(&self.name)?,
            None => None,
        };

        let accepted = match loaded {
            Some(contents) if self.accepts(&contents) => {
                Some(process(self.hooks.post_processor.as_ref(), contents)?)
            }
            _ => None,
        };

        debug!(
            "Loaded '{}': {}",
            self.name,
            if accepted.is_some() { "present" } else { "absent" }
        );
        self.contents = accepted;
        self.stats.loads += 1;
        self.reset_trigger();
        Ok(self.contents.as_ref())
    }

    fn accepts(&self, contents: &Value) -> bool {
        let Some(validator) = &self.hooks.validator else {
            return true;
        };

        match validator(contents) {
            Ok(true) => true,
            Ok(false) => {
                debug!("{}", CacheError::ValidationRejected { name: self.name.clone() });
                false
            }
            Err(e) => {
                debug!("Validator failed for '{}', treating as absent: {}", self.name, e);
                false
            }
        }
    }

    /// Build fresh contents, save them, and clear the rebuild flag
    pub fn build(&mut self) -> Result<&Value> {
        let built = match &self.hooks.builder {
            Some(builder) => builder(&self.name)?,
            None => json!({}),
        };
        let built = process(self.hooks.post_processor.as_ref(), built)?;

        self.contents = Some(built);
        self.stats.builds += 1;
        debug!("Built '{}'", self.name);

        self.save()?;
        self.rebuild_pending = false;
        self.present()
    }

    /// Persist the (pre-processed) contents; returns the snapshot handed to the saver
    ///
    /// Absent contents are not saved. Empty snapshots are skipped when the
    /// entity is configured not to save them, and non-persistent entities
    /// never reach the backing store.
    pub fn save(&mut self) -> Result<Option<Value>> {
        let Some(contents) = &self.contents else {
            debug!("Nothing to save for '{}': contents absent", self.name);
            return Ok(None);
        };

        let snapshot = process(self.hooks.pre_processor.as_ref(), contents.clone())?;

        if !self.config.save_on_empty && is_blank(&snapshot) {
            debug!("Skipping save of empty contents for '{}'", self.name);
        } else if !self.config.persistent {
            debug!("'{}' is not persistent, save skipped", self.name);
        } else if self.config.async_save {
            self.coordinator.save_async(
                &self.name,
                snapshot.clone(),
                self.hooks.save_hooks(),
                self.config.save_timeout,
            )?;
            self.stats.saves += 1;
        } else {
            self.coordinator
                .save_sync(&self.name, &snapshot, &self.hooks.save_hooks())?;
            self.stats.saves += 1;
        }

        self.reset_trigger();
        Ok(Some(snapshot))
    }

    /// Re-pull from the backing store, discarding unsaved edits
    pub fn invalidate(&mut self) -> Result<Option<&Value>> {
        self.load()
    }

    /// Remove the saved contents; in-memory contents stay as they are
    pub fn delete_saved_content(&mut self) -> Result<()> {
        if !self.config.persistent {
            debug!("'{}' is not persistent, delete skipped", self.name);
        } else if let Some(deleter) = &self.hooks.deleter {
            deleter(&self.name)?;
            self.stats.deletes += 1;
            debug!("Deleted saved contents of '{}'", self.name);
        }

        self.reset_trigger();
        Ok(())
    }

    /// Invalidate, clear the backing store, then build from scratch
    pub fn invalidate_and_rebuild(&mut self) -> Result<&Value> {
        self.invalidate()?;
        self.delete_saved_content()?;
        self.build()
    }

    /// Load, building when nothing could be loaded; the flag tells which happened
    pub fn load_or_build(&mut self) -> Result<(bool, &Value)> {
        let loaded = self.load()?.is_some();
        if !loaded {
            self.build()?;
        }
        Ok((loaded, self.present()?))
    }

    /// Save one last time and give up the entity
    pub fn close(mut self) -> Result<Option<Value>> {
        self.save()
    }

    // Graph and state

    pub fn dependents(&self) -> &BTreeSet<String> {
        &self.dependents
    }

    pub fn add_dependent(&mut self, dependent: impl Into<String>) -> bool {
        self.dependents.insert(dependent.into())
    }

    pub fn remove_dependent(&mut self, dependent: &str) -> bool {
        self.dependents.remove(dependent)
    }

    pub fn hooks(&self) -> &CacheHooks {
        &self.hooks
    }

    /// Hooks can be swapped at any time
    pub fn hooks_mut(&mut self) -> &mut CacheHooks {
        &mut self.hooks
    }

    pub fn config(&self) -> &EntityConfig {
        &self.config
    }

    pub fn set_async_save(&mut self, enable: bool) {
        self.config.async_save = enable;
    }

    /// Replace the flush policy; pending edit counts are dropped
    pub fn set_flush_policy(&mut self, policy: Option<FlushPolicy>) -> Result<()> {
        self.trigger = policy
            .clone()
            .map(|policy| FlushTrigger::new(policy, self.clock.clone()))
            .transpose()?;
        self.config.flush_policy = policy;
        Ok(())
    }

    pub fn flush_trigger(&self) -> Option<&FlushTrigger> {
        self.trigger.as_ref()
    }

    pub fn flush_trigger_mut(&mut self) -> Option<&mut FlushTrigger> {
        self.trigger.as_mut()
    }

    /// Have the next retrieval rebuild instead of returning what is held
    pub fn mark_for_rebuild(&mut self) {
        self.rebuild_pending = true;
    }

    pub fn needs_rebuild(&self) -> bool {
        self.rebuild_pending
    }

    pub fn stats(&self) -> &EntityStats {
        &self.stats
    }

    pub fn coordinator(&self) -> &Arc<PersistenceCoordinator> {
        &self.coordinator
    }
}

/// Builder for cache entities
#[derive(Debug)]
pub struct EntityBuilder {
    name: String,
    contents: Option<Value>,
    dependents: BTreeSet<String>,
    hooks: CacheHooks,
    config: EntityConfig,
    clock: Option<Arc<dyn Clock>>,
    coordinator: Option<Arc<PersistenceCoordinator>>,
}

impl EntityBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contents: None,
            dependents: BTreeSet::new(),
            hooks: CacheHooks::none(),
            config: EntityConfig::default(),
            clock: None,
            coordinator: None,
        }
    }

    pub fn contents(mut self, contents: Value) -> Self {
        self.contents = Some(contents);
        self
    }

    pub fn dependent(mut self, dependent: impl Into<String>) -> Self {
        self.dependents.insert(dependent.into());
        self
    }

    pub fn dependents<I, S>(mut self, dependents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependents
            .extend(dependents.into_iter().map(Into::into));
        self
    }

    pub fn hooks(mut self, hooks: CacheHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn config(mut self, config: EntityConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share background-save bookkeeping with other entities
    pub fn coordinator(mut self, coordinator: Arc<PersistenceCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Build the entity, loading or building contents when none were given
    pub fn build(self) -> Result<CacheEntity> {
        let mut entity = self.build_unloaded()?;
        if entity.contents.is_none() {
            entity.load_or_build()?;
        }
        Ok(entity)
    }

    /// Build the entity without invoking any hook
    pub fn build_unloaded(self) -> Result<CacheEntity> {
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let trigger = self
            .config
            .flush_policy
            .clone()
            .map(|policy| FlushTrigger::new(policy, clock.clone()))
            .transpose()?;

        Ok(CacheEntity {
            name: self.name,
            contents: self.contents,
            dependents: self.dependents,
            hooks: self.hooks,
            config: self.config,
            trigger,
            clock,
            rebuild_pending: false,
            coordinator: self
                .coordinator
                .unwrap_or_else(|| Arc::new(PersistenceCoordinator::new())),
            stats: EntityStats::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BackingStore, MemoryStore};
    use crate::trigger::FlushWindow;
    use std::time::Duration;

    fn memory_entity(name: &str, contents: Value) -> (CacheEntity, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let entity = CacheEntity::builder(name)
            .contents(contents)
            .hooks(CacheHooks::from_store(store.clone()))
            .coordinator(Arc::new(PersistenceCoordinator::detached()))
            .build()
            .unwrap();
        (entity, store)
    }

    #[test]
    fn test_failed_auto_save_keeps_edit() {
        let mut entity = CacheEntity::builder("disk_full")
            .contents(json!({}))
            .hooks(CacheHooks::none().with_saver(|_, _| Err(CacheError::Other("disk full".into()))))
            .config(
                EntityConfig::builder()
                    .flush_policy(FlushPolicy::new(
                        vec![FlushWindow::new(60, 1)],
                        Duration::from_secs(1),
                    ))
                    .build(),
            )
            .coordinator(Arc::new(PersistenceCoordinator::detached()))
            .build_unloaded()
            .unwrap();

        assert!(entity.set("k", json!(1)).is_err());
        assert_eq!(entity.contents(), Some(&json!({ "k": 1 })));

        assert!(entity.modify(|contents| contents["m"] = json!(2)).is_err());
        assert!(entity.delete("k").is_err());
        assert_eq!(entity.contents(), Some(&json!({ "m": 2 })));
        assert_eq!(entity.stats().auto_flushes, 0);
    }

    #[test]
    fn test_mapping_access() {
        let (mut entity, _) = memory_entity("map", json!({}));

        assert_eq!(entity.set("foo", json!("bar")).unwrap(), None);
        assert_eq!(entity.get("foo").unwrap(), Some(&json!("bar")));
        assert!(entity.contains("foo").unwrap());
        assert!(!entity.contains("foo2").unwrap());
        assert_eq!(entity.len().unwrap(), 1);

        assert_eq!(entity.set("foo", json!("baz")).unwrap(), Some(json!("bar")));
        assert_eq!(entity.delete("foo").unwrap(), Some(json!("baz")));
        assert_eq!(entity.delete("foo").unwrap(), None);
        assert!(entity.is_empty().unwrap());
        assert_eq!(entity.stats().edits, 3);
    }

    #[test]
    fn test_sequence_access() {
        let (mut entity, _) = memory_entity("seq", json!([""]));

        entity.set(0usize, json!("foo")).unwrap();
        entity.set(1usize, json!("bar")).unwrap();
        assert_eq!(entity.contents(), Some(&json!(["foo", "bar"])));

        let err = entity.set(5usize, json!("far")).unwrap_err();
        assert!(matches!(err, CacheError::InvalidKey { .. }));

        assert_eq!(entity.delete(0usize).unwrap(), Some(json!("foo")));
        assert_eq!(entity.get(0usize).unwrap(), Some(&json!("bar")));
    }

    #[test]
    fn test_key_kind_mismatch() {
        let (mut entity, _) = memory_entity("mismatch", json!([1, 2]));
        assert!(matches!(
            entity.get("foo"),
            Err(CacheError::InvalidKey { .. })
        ));
        assert!(matches!(
            entity.set("foo", json!(1)),
            Err(CacheError::InvalidKey { .. })
        ));
        assert_eq!(entity.stats().edits, 0);
    }

    #[test]
    fn test_absent_contents() {
        let mut entity = CacheEntity::builder("absent")
            .coordinator(Arc::new(PersistenceCoordinator::detached()))
            .build_unloaded()
            .unwrap();

        assert!(matches!(entity.get("foo"), Err(CacheError::ContentsAbsent { .. })));
        assert!(matches!(
            entity.set("foo", json!(1)),
            Err(CacheError::ContentsAbsent { .. })
        ));
        assert!(matches!(entity.len(), Err(CacheError::ContentsAbsent { .. })));
        assert!(matches!(entity.contains("foo"), Err(CacheError::ContentsAbsent { .. })));
        // Nothing to persist
        assert_eq!(entity.save().unwrap(), None);
    }

    #[test]
    fn test_modify_counts_one_edit() {
        let (mut entity, _) = memory_entity("modify", json!([]));
        let len = entity
            .modify(|contents| {
                if let Value::Array(items) = contents {
                    items.push(json!(1));
                    items.push(json!(2));
                }
                contents.as_array().map(Vec::len)
            })
            .unwrap();
        assert_eq!(len, Some(2));
        assert_eq!(entity.stats().edits, 1);
    }

    #[test]
    fn test_build_without_builder_is_empty_mapping() {
        let mut entity = CacheEntity::builder("defaults")
            .coordinator(Arc::new(PersistenceCoordinator::detached()))
            .build()
            .unwrap();
        assert_eq!(entity.contents(), Some(&json!({})));
        assert_eq!(entity.stats().builds, 1);

        entity.mark_for_rebuild();
        assert!(entity.needs_rebuild());
        entity.build().unwrap();
        assert!(!entity.needs_rebuild());
    }

    #[test]
    fn test_load_without_loader_is_absent() {
        let (mut entity, _) = memory_entity("no_loader", json!({ "a": 1 }));
        entity.hooks_mut().loader = None;
        assert_eq!(entity.load().unwrap(), None);
        assert_eq!(entity.contents(), None);
    }

    #[test]
    fn test_failing_loader_keeps_contents() {
        let (mut entity, _) = memory_entity("broken", json!({ "a": 1 }));
        entity.hooks_mut().loader = Some(Arc::new(|_: &str| -> Result<Option<Value>> {
            Err(anyhow::anyhow!("disk on fire").into())
        }));

        let err = entity.load().unwrap_err();
        assert!(matches!(err, CacheError::HookFailure(_)));
        assert_eq!(entity.contents(), Some(&json!({ "a": 1 })));
    }

    #[test]
    fn test_validator_rejection_and_failure_are_absent() {
        let (mut entity, store) = memory_entity("validated", json!({ "a": 1 }));
        entity.save().unwrap();

        entity.hooks_mut().validator = Some(Arc::new(|_: &Value| -> Result<bool> { Ok(false) }));
        assert_eq!(entity.load().unwrap(), None);

        entity.hooks_mut().validator = Some(Arc::new(|_: &Value| -> Result<bool> {
            Err(CacheError::Other("bad validator".to_string()))
        }));
        assert_eq!(entity.load().unwrap(), None);

        entity.hooks_mut().validator = Some(Arc::new(|_: &Value| -> Result<bool> { Ok(true) }));
        assert_eq!(entity.load().unwrap(), Some(&json!({ "a": 1 })));
        assert!(store.raw("validated").is_some());
    }

    #[test]
    fn test_processors_apply_around_persistence() {
        let store = Arc::new(MemoryStore::new());
        let hooks = CacheHooks::from_store(store.clone())
            .with_pre_processor(|contents| {
                let mut saved = contents.clone();
                saved["saved"] = json!(true);
                Ok(Some(saved))
            })
            .with_post_processor(|contents| {
                let mut loaded = contents.clone();
                loaded["loaded"] = json!(true);
                Ok(Some(loaded))
            });
        let mut entity = CacheEntity::builder("processed")
            .contents(json!({ "foo": "bar" }))
            .hooks(hooks)
            .coordinator(Arc::new(PersistenceCoordinator::detached()))
            .build()
            .unwrap();

        let snapshot = entity.save().unwrap();
        assert_eq!(snapshot, Some(json!({ "foo": "bar", "saved": true })));
        // In-memory contents are not pre-processed
        assert_eq!(entity.contents(), Some(&json!({ "foo": "bar" })));

        entity.load().unwrap();
        assert_eq!(
            entity.contents(),
            Some(&json!({ "foo": "bar", "saved": true, "loaded": true }))
        );
    }

    #[test]
    fn test_processor_returning_none_keeps_contents() {
        let (mut entity, store) = memory_entity("unchanged", json!({ "foo": "bar" }));
        entity.hooks_mut().pre_processor = Some(Arc::new(|_: &Value| -> Result<Option<Value>> { Ok(None) }));
        entity.save().unwrap();
        assert_eq!(store.load("unchanged").unwrap(), Some(json!({ "foo": "bar" })));
    }

    #[test]
    fn test_save_on_empty_disabled() {
        let store = Arc::new(MemoryStore::new());
        let mut entity = CacheEntity::builder("blank")
            .contents(json!({}))
            .hooks(CacheHooks::from_store(store.clone()))
            .config(EntityConfig::builder().save_on_empty(false).build())
            .coordinator(Arc::new(PersistenceCoordinator::detached()))
            .build()
            .unwrap();

        assert_eq!(entity.save().unwrap(), Some(json!({})));
        assert_eq!(store.raw("blank"), None);
        assert_eq!(entity.stats().saves, 0);

        entity.set("foo", json!("bar")).unwrap();
        entity.save().unwrap();
        assert!(store.raw("blank").is_some());
    }

    #[test]
    fn test_non_persistent_entity_skips_store() {
        let store = Arc::new(MemoryStore::new());
        store.save("transient", &json!({ "old": true })).unwrap();

        let mut entity = CacheEntity::builder("transient")
            .contents(json!({ "new": true }))
            .hooks(CacheHooks::from_store(store.clone()))
            .config(EntityConfig::non_persistent())
            .coordinator(Arc::new(PersistenceCoordinator::detached()))
            .build()
            .unwrap();

        entity.save().unwrap();
        entity.delete_saved_content().unwrap();
        assert_eq!(store.load("transient").unwrap(), Some(json!({ "old": true })));
    }

    #[test]
    fn test_delete_saved_keeps_memory() {
        let (mut entity, store) = memory_entity("delete_saved", json!({ "foo": "bar" }));
        entity.save().unwrap();
        entity.delete_saved_content().unwrap();

        assert_eq!(store.raw("delete_saved"), None);
        assert_eq!(entity.get("foo").unwrap(), Some(&json!("bar")));
        assert_eq!(entity.load().unwrap(), None);
    }

    #[test]
    fn test_load_or_build_reports_origin() {
        let (mut entity, _) = memory_entity("origin", json!({ "foo": "bar" }));
        let (loaded, contents) = entity.load_or_build().unwrap();
        assert!(!loaded);
        assert_eq!(contents, &json!({}));

        entity.set("foo", json!("bar")).unwrap();
        entity.save().unwrap();
        let (loaded, contents) = entity.load_or_build().unwrap();
        assert!(loaded);
        assert_eq!(contents, &json!({ "foo": "bar" }));
    }

    #[test]
    fn test_invalidate_and_rebuild() {
        let store = Arc::new(MemoryStore::new());
        let mut entity = CacheEntity::builder("rebuilt")
            .contents(json!(["stale"]))
            .hooks(CacheHooks::from_store(store.clone()).with_builder(|_| Ok(json!([]))))
            .coordinator(Arc::new(PersistenceCoordinator::detached()))
            .build()
            .unwrap();
        entity.save().unwrap();

        assert_eq!(entity.invalidate_and_rebuild().unwrap(), &json!([]));
        assert_eq!(store.load("rebuilt").unwrap(), Some(json!([])));
        assert_eq!(entity.stats().deletes, 1);
    }

    #[test]
    fn test_dependents() {
        let mut entity = CacheEntity::builder("parent")
            .dependents(["b", "a"])
            .dependent("c")
            .contents(json!({}))
            .build_unloaded()
            .unwrap();

        let names: Vec<&str> = entity.dependents().iter().map(String::as_str).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(!entity.add_dependent("a"));
        assert!(entity.remove_dependent("b"));
        assert_eq!(entity.dependents().len(), 2);
    }

    #[test]
    fn test_close_saves() {
        let (entity, store) = memory_entity("closing", json!({ "foo": "bar" }));
        entity.close().unwrap();
        assert_eq!(store.load("closing").unwrap(), Some(json!({ "foo": "bar" })));
    }
}
