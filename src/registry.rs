//! Cache registry
//!
//! Owns entities by name, creates them on first reference, and walks the
//! dependency graph when applying lifecycle operations.
//!
//! `load`, `save`, `delete_saved_content` and `load_or_build` visit
//! dependents before the entity itself; `invalidate_and_rebuild` rebuilds the
//! entity first so dependents can build from its fresh contents. A visited
//! set scoped to one top-level call keeps every entity to a single
//! application, whatever cycles or diamonds the graph holds.

use crate::clock::{Clock, SystemClock};
use crate::config::{EntityConfig, RegistryConfig};
use crate::entity::{CacheEntity, EntityBuilder};
use crate::error::{CacheError, Result};
use crate::graph::DependencyGraph;
use crate::hooks::CacheHooks;
use crate::persistence::PersistenceCoordinator;
use crate::store::{BackingStore, JsonFileStore};
use crate::types::{Lifecycle, PropagationOrder};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Named cache entities and the edges between them
pub struct CacheRegistry {
    config: RegistryConfig,
    entities: HashMap<String, CacheEntity>,
    store: Arc<dyn BackingStore>,
    coordinator: Arc<PersistenceCoordinator>,
    clock: Arc<dyn Clock>,
}

impl CacheRegistry {
    /// Registry saving JSON files under the configured store directory
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let store = Arc::new(JsonFileStore::new(config.store_dir()));
        Self::with_store(config, store)
    }

    /// Registry whose synthesized entities use `store`
    pub fn with_store(config: RegistryConfig, store: Arc<dyn BackingStore>) -> Result<Self> {
        config.validate()?;
        info!(
            "Cache registry '{}' ready (async saves by default: {})",
            config.name, config.defaults.async_save
        );

        Ok(Self {
            config,
            entities: HashMap::new(),
            store,
            coordinator: Arc::new(PersistenceCoordinator::new()),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_coordinator(mut self, coordinator: Arc<PersistenceCoordinator>) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<PersistenceCoordinator> {
        &self.coordinator
    }

    /// Hooks given to entities the registry creates itself
    pub fn default_hooks(&self) -> CacheHooks {
        CacheHooks::from_store(self.store.clone())
    }

    /// Entity builder wired to this registry's store, defaults, clock and coordinator
    pub fn entity_builder(&self, name: impl Into<String>) -> EntityBuilder {
        CacheEntity::builder(name)
            .hooks(self.default_hooks())
            .config(self.config.defaults.clone())
            .clock(self.clock.clone())
            .coordinator(self.coordinator.clone())
    }

    // Registration

    /// Add `entity`, replacing any entity already registered under its name
    pub fn register(&mut self, entity: CacheEntity) -> Option<CacheEntity> {
        let name = entity.name().to_string();
        let previous = self.entities.insert(name.clone(), entity);
        if previous.is_some() {
            info!("Replaced cache '{}'", name);
        } else {
            info!("Registered cache '{}'", name);
        }
        previous
    }

    /// Register a cache with the default hooks
    ///
    /// Non-persistent caches load and build `{}` and never touch the store.
    pub fn register_cache(
        &mut self,
        name: &str,
        contents: Option<Value>,
        persistent: bool,
    ) -> Result<&mut CacheEntity> {
        let mut builder = self.entity_builder(name);
        if !persistent {
            builder = builder.hooks(CacheHooks::in_memory()).config(EntityConfig {
                persistent: false,
                ..self.config.defaults.clone()
            });
        }
        if let Some(contents) = contents {
            builder = builder.contents(contents);
        }

        self.register(builder.build_unloaded()?);
        self.get_registered_mut(name)
    }

    /// Make `dependent` follow lifecycle changes of `name`; both are created if needed
    pub fn register_dependent(&mut self, name: &str, dependent: &str) -> Result<()> {
        self.ensure(dependent)?;
        self.ensure(name)?.add_dependent(dependent);
        debug!("'{}' now propagates to '{}'", name, dependent);
        Ok(())
    }

    fn ensure(&mut self, name: &str) -> Result<&mut CacheEntity> {
        if !self.entities.contains_key(name) {
            let entity = self.entity_builder(name).build_unloaded()?;
            debug!("Created cache '{}' on first reference", name);
            self.entities.insert(name.to_string(), entity);
        }
        self.get_registered_mut(name)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entities.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity(&self, name: &str) -> Option<&CacheEntity> {
        self.entities.get(name)
    }

    pub fn entity_mut(&mut self, name: &str) -> Option<&mut CacheEntity> {
        self.entities.get_mut(name)
    }

    /// Like [`entity`](Self::entity) but failing when nothing is registered
    pub fn get_registered(&self, name: &str) -> Result<&CacheEntity> {
        self.entities
            .get(name)
            .ok_or_else(|| CacheError::NotRegistered(name.to_string()))
    }

    pub fn get_registered_mut(&mut self, name: &str) -> Result<&mut CacheEntity> {
        self.entities
            .get_mut(name)
            .ok_or_else(|| CacheError::NotRegistered(name.to_string()))
    }

    // Retrieval

    /// Entity for `name` with contents in place
    ///
    /// Creates the entity on first reference, rebuilds it when flagged, and
    /// loads (or builds) it when its contents are absent.
    pub fn retrieve(&mut self, name: &str) -> Result<&mut CacheEntity> {
        let entity = self.ensure(name)?;
        if entity.needs_rebuild() {
            debug!("Rebuilding flagged cache '{}'", name);
            entity.build()?;
        } else if entity.contents().is_none() {
            entity.load_or_build()?;
        }
        Ok(entity)
    }

    /// Drop unsaved edits and retrieve again
    pub fn reload(&mut self, name: &str) -> Result<&mut CacheEntity> {
        self.ensure(name)?.invalidate()?;
        self.retrieve(name)
    }

    /// Flag `name` (and, when propagating, its dependents) for rebuild on next retrieval
    pub fn mark_stale(&mut self, name: &str, propagate: bool) -> Result<()> {
        let mut visited = HashSet::new();
        self.mark_stale_inner(name, propagate, &mut visited)
    }

    fn mark_stale_inner(
        &mut self,
        name: &str,
        propagate: bool,
        visited: &mut HashSet<String>,
    ) -> Result<()> {
        if !visited.insert(name.to_string()) {
            return Ok(());
        }

        let entity = self.ensure(name)?;
        entity.mark_for_rebuild();
        let dependents: Vec<String> = entity.dependents().iter().cloned().collect();

        if propagate {
            for dependent in &dependents {
                self.mark_stale_inner(dependent, propagate, visited)?;
            }
        }
        Ok(())
    }

    // Propagating lifecycle operations

    pub fn load(&mut self, name: &str, propagate: bool) -> Result<&mut CacheEntity> {
        self.run(name, Lifecycle::Load, propagate)
    }

    /// Same as [`load`](Self::load)
    pub fn invalidate(&mut self, name: &str, propagate: bool) -> Result<&mut CacheEntity> {
        self.run(name, Lifecycle::Load, propagate)
    }

    pub fn save(&mut self, name: &str, propagate: bool) -> Result<&mut CacheEntity> {
        self.run(name, Lifecycle::Save, propagate)
    }

    pub fn delete_saved_content(&mut self, name: &str, propagate: bool) -> Result<&mut CacheEntity> {
        self.run(name, Lifecycle::DeleteSavedContent, propagate)
    }

    pub fn load_or_build(&mut self, name: &str, propagate: bool) -> Result<&mut CacheEntity> {
        self.run(name, Lifecycle::LoadOrBuild, propagate)
    }

    pub fn invalidate_and_rebuild(
        &mut self,
        name: &str,
        propagate: bool,
    ) -> Result<&mut CacheEntity> {
        self.run(name, Lifecycle::InvalidateAndRebuild, propagate)
    }

    fn run(&mut self, name: &str, op: Lifecycle, propagate: bool) -> Result<&mut CacheEntity> {
        let mut visited = HashSet::new();
        self.apply(name, op, propagate, &mut visited)?;
        debug!("{} on '{}' touched {} cache(s)", op, name, visited.len());
        self.get_registered_mut(name)
    }

    /// Apply `op` to `name` and, when propagating, to every reachable dependent
    ///
    /// Names already in `visited` are skipped.
    pub fn apply(
        &mut self,
        name: &str,
        op: Lifecycle,
        propagate: bool,
        visited: &mut HashSet<String>,
    ) -> Result<()> {
        if !visited.insert(name.to_string()) {
            return Ok(());
        }

        let dependents: Vec<String> = if propagate {
            self.ensure(name)?.dependents().iter().cloned().collect()
        } else {
            Vec::new()
        };

        match op.order() {
            PropagationOrder::DependentsFirst => {
                for dependent in &dependents {
                    self.apply(dependent, op, propagate, visited)?;
                }
                self.apply_one(name, op)?;
            }
            PropagationOrder::SelfFirst => {
                self.apply_one(name, op)?;
                for dependent in &dependents {
                    self.apply(dependent, op, propagate, visited)?;
                }
            }
        }
        Ok(())
    }

    fn apply_one(&mut self, name: &str, op: Lifecycle) -> Result<()> {
        let entity = self.ensure(name)?;
        match op {
            Lifecycle::Load => {
                entity.load()?;
            }
            Lifecycle::Save => {
                entity.save()?;
            }
            Lifecycle::DeleteSavedContent => entity.delete_saved_content()?,
            Lifecycle::LoadOrBuild => {
                entity.load_or_build()?;
            }
            Lifecycle::InvalidateAndRebuild => {
                entity.invalidate_and_rebuild()?;
            }
        }
        debug!("Applied {} to '{}'", op, name);
        Ok(())
    }

    // Deregistration

    /// Save `name` one last time and remove it
    ///
    /// With `propagate`, dependents are deregistered first. The name is
    /// also dropped from every remaining entity's dependents so propagation
    /// cannot bring it back. A failing final save leaves the entity
    /// registered.
    pub fn deregister(&mut self, name: &str, propagate: bool) -> Result<Option<CacheEntity>> {
        let mut visited = HashSet::new();
        self.deregister_inner(name, propagate, &mut visited)
    }

    fn deregister_inner(
        &mut self,
        name: &str,
        propagate: bool,
        visited: &mut HashSet<String>,
    ) -> Result<Option<CacheEntity>> {
        if !visited.insert(name.to_string()) {
            return Ok(None);
        }
        let Some(entity) = self.entities.get(name) else {
            return Ok(None);
        };

        if propagate {
            let dependents: Vec<String> = entity.dependents().iter().cloned().collect();
            for dependent in &dependents {
                self.deregister_inner(dependent, propagate, visited)?;
            }
        }

        if let Some(entity) = self.entities.get_mut(name) {
            entity.save()?;
        }
        let removed = self.entities.remove(name);
        for other in self.entities.values_mut() {
            other.remove_dependent(name);
        }

        info!("Deregistered cache '{}'", name);
        Ok(removed)
    }

    // Batch operations, one entity at a time in name order

    pub fn save_all(&mut self) -> Result<()> {
        self.for_each_name(|registry, name| registry.save(name, false).map(|_| ()))
    }

    pub fn reload_all(&mut self) -> Result<()> {
        self.for_each_name(|registry, name| registry.reload(name).map(|_| ()))
    }

    pub fn invalidate_and_rebuild_all(&mut self) -> Result<()> {
        self.for_each_name(|registry, name| {
            registry.invalidate_and_rebuild(name, false).map(|_| ())
        })
    }

    pub fn delete_all_saved_contents(&mut self) -> Result<()> {
        self.for_each_name(|registry, name| {
            registry.delete_saved_content(name, false).map(|_| ())
        })
    }

    pub fn deregister_all(&mut self) -> Result<()> {
        self.for_each_name(|registry, name| registry.deregister(name, false).map(|_| ()))?;
        info!("Deregistered every cache from '{}'", self.config.name);
        Ok(())
    }

    fn for_each_name(
        &mut self,
        mut op: impl FnMut(&mut Self, &str) -> Result<()>,
    ) -> Result<()> {
        for name in self.names() {
            op(self, &name)?;
        }
        Ok(())
    }

    // Diagnostics

    /// Snapshot of the registered dependency edges
    pub fn dependency_graph(&self) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for name in self.names() {
            graph.add_cache(&name);
        }
        for (name, entity) in &self.entities {
            for dependent in entity.dependents() {
                graph.add_dependent(name, dependent);
            }
        }
        graph
    }

    pub fn has_cycles(&self) -> bool {
        self.dependency_graph().has_cycles()
    }

    /// Direct dependents of `name`, sorted; empty when it is not registered
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.entities
            .get(name)
            .map(|entity| entity.dependents().iter().cloned().collect())
            .unwrap_or_default()
    }

    // Shutdown

    /// Save every registered cache
    pub fn close(&mut self) -> Result<()> {
        self.save_all()?;
        info!("Closed cache registry '{}'", self.config.name);
        Ok(())
    }

    /// Wait for every background save started through this registry
    pub async fn wait_for_saves(&self) {
        self.coordinator.wait_idle().await;
    }
}

impl fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("name", &self.config.name)
            .field("caches", &self.names())
            .field("store", &self.store)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn memory_registry() -> (CacheRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = CacheRegistry::with_store(
            RegistryConfig::builder().name("unit").build(),
            store.clone(),
        )
        .unwrap()
        .with_coordinator(Arc::new(PersistenceCoordinator::detached()));
        (registry, store)
    }

    #[test]
    fn test_retrieve_creates_on_first_reference() {
        let (mut registry, store) = memory_registry();
        assert!(!registry.is_registered("fresh"));

        let entity = registry.retrieve("fresh").unwrap();
        assert_eq!(entity.contents(), Some(&json!({})));
        assert!(registry.is_registered("fresh"));
        // Building saves
        assert!(store.raw("fresh").is_some());
    }

    #[test]
    fn test_register_replaces() {
        let (mut registry, _) = memory_registry();
        registry
            .register_cache("dup", Some(json!({ "v": 1 })), true)
            .unwrap();
        let entity = registry
            .entity_builder("dup")
            .contents(json!({ "v": 2 }))
            .build_unloaded()
            .unwrap();

        let previous = registry.register(entity).unwrap();
        assert_eq!(previous.contents(), Some(&json!({ "v": 1 })));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get_registered("dup").unwrap().contents(),
            Some(&json!({ "v": 2 }))
        );
    }

    #[test]
    fn test_get_registered_missing() {
        let (registry, _) = memory_registry();
        assert!(matches!(
            registry.get_registered("nope"),
            Err(CacheError::NotRegistered(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_visited_names_are_skipped() {
        let (mut registry, store) = memory_registry();
        registry
            .register_cache("a", Some(json!({ "a": 1 })), true)
            .unwrap();

        let mut visited = HashSet::from(["a".to_string()]);
        registry
            .apply("a", Lifecycle::Save, true, &mut visited)
            .unwrap();
        assert_eq!(store.raw("a"), None);
    }

    #[test]
    fn test_mark_stale_rebuilds_on_retrieve() {
        let (mut registry, _) = memory_registry();
        registry
            .register_cache("parent", Some(json!({ "stale": true })), true)
            .unwrap();
        registry
            .register_cache("child", Some(json!({ "stale": true })), true)
            .unwrap();
        registry.register_dependent("parent", "child").unwrap();

        registry.mark_stale("parent", true).unwrap();
        assert!(registry.entity("child").unwrap().needs_rebuild());

        let parent = registry.retrieve("parent").unwrap();
        assert_eq!(parent.contents(), Some(&json!({})));
        assert!(!parent.needs_rebuild());
    }

    #[test]
    fn test_deregister_strips_incoming_edges() {
        let (mut registry, _) = memory_registry();
        registry.register_dependent("a", "b").unwrap();
        registry.register_dependent("c", "b").unwrap();

        let removed = registry.deregister("b", false).unwrap();
        assert!(removed.is_some());
        assert!(registry.dependents_of("a").is_empty());
        assert!(registry.dependents_of("c").is_empty());

        registry.save("a", true).unwrap();
        assert!(!registry.is_registered("b"));
    }

    #[test]
    fn test_dependency_graph_view() {
        let (mut registry, _) = memory_registry();
        registry.register_dependent("a", "b").unwrap();
        registry.register_dependent("b", "c").unwrap();
        assert!(!registry.has_cycles());

        let graph = registry.dependency_graph();
        assert_eq!(graph.cache_count(), 3);
        assert_eq!(graph.dependents_of("a"), vec!["b"]);

        registry.register_dependent("c", "a").unwrap();
        assert!(registry.has_cycles());
    }
}
