//! # Ouroboros Cache (ouroboros-cache)
//!
//! Named, persistent cache entities that keep dependent caches consistent.
//!
//! ## Features
//!
//! - Entities with pluggable load/build/save/delete hooks
//! - Dependency graph propagation that terminates on cycles
//! - Rate-triggered saves over several time windows
//! - Background saves with atomic commit and supersession of stale workers
//! - JSON file and in-memory backing stores
//!
//! ## Entities
//!
//! ```no_run
//! use ouroboros_cache::{CacheEntity, CacheHooks, JsonFileStore};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! fn main() -> ouroboros_cache::Result<()> {
//!     let store = Arc::new(JsonFileStore::new("/tmp/ouroboros-cache/example"));
//!     let mut users = CacheEntity::builder("users")
//!         .hooks(CacheHooks::from_store(store))
//!         .build()?;
//!
//!     users.set("alice", json!({ "admin": true }))?;
//!     users.save()?;
//!
//!     users.invalidate()?;
//!     assert!(users.contains("alice")?);
//!     Ok(())
//! }
//! ```
//!
//! ## Registry
//!
//! Lifecycle operations on a registry follow dependency edges.
//!
//! ```no_run
//! use ouroboros_cache::{CacheRegistry, RegistryConfig};
//! use serde_json::json;
//!
//! fn main() -> ouroboros_cache::Result<()> {
//!     let mut registry = CacheRegistry::new(RegistryConfig::from_env()?)?;
//!     registry.register_cache("users", Some(json!({})), true)?;
//!     registry.register_cache("user_index", Some(json!([])), true)?;
//!     registry.register_dependent("users", "user_index")?;
//!
//!     // Rebuilds `users`, then `user_index`
//!     registry.invalidate_and_rebuild("users", true)?;
//!
//!     registry.close()
//! }
//! ```
//!
//! ## Background saves
//!
//! ```no_run
//! use ouroboros_cache::{CacheRegistry, EntityConfig, RegistryConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RegistryConfig::builder()
//!         .name("sessions")
//!         .defaults(EntityConfig::background())
//!         .build();
//!     let mut registry = CacheRegistry::new(config)?;
//!
//!     let sessions = registry.retrieve("sessions")?;
//!     sessions.set("latest", serde_json::json!("abc"))?;
//!     sessions.save()?; // returns immediately
//!
//!     registry.wait_for_saves().await;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod entity;
pub mod error;
pub mod graph;
pub mod hooks;
pub mod logging;
pub mod persistence;
pub mod registry;
pub mod store;
pub mod trigger;
pub mod types;

// Re-export main types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EntityConfig, EntityConfigBuilder, RegistryConfig, RegistryConfigBuilder};
pub use entity::{CacheEntity, EntityBuilder};
pub use error::{CacheError, Result};
pub use graph::DependencyGraph;
pub use hooks::{CacheHooks, SaveHooks, SaveToken};
pub use persistence::PersistenceCoordinator;
pub use registry::CacheRegistry;
pub use store::{BackingStore, JsonFileStore, MemoryStore};
pub use trigger::{FlushPolicy, FlushTrigger, FlushWindow};
pub use types::{ContentKey, EntityStats, Lifecycle, PropagationOrder};
