//! Configuration for cache entities and registries

use crate::error::{CacheError, Result};
use crate::trigger::FlushPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Registry name used when none is configured
pub const DEFAULT_REGISTRY_NAME: &str = "general_cacher";

/// Per-entity persistence flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityConfig {
    /// Whether saves and deletes reach the backing store at all
    pub persistent: bool,

    /// Save on a background worker instead of the caller's thread
    pub async_save: bool,

    /// How long a background save waits for older saves of the same entity
    /// before cancelling them
    pub save_timeout: Duration,

    /// Save even when the (pre-processed) contents are empty
    pub save_on_empty: bool,

    /// Rate-triggered automatic saves; `None` disables them
    pub flush_policy: Option<FlushPolicy>,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            persistent: true,
            async_save: false,
            save_timeout: Duration::from_secs(60),
            save_on_empty: true,
            flush_policy: None,
        }
    }
}

impl EntityConfig {
    /// Create a new builder for entity configuration
    pub fn builder() -> EntityConfigBuilder {
        EntityConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.async_save && self.save_timeout.is_zero() {
            return Err(CacheError::ConfigError(
                "save_timeout must be greater than 0 for background saves".to_string(),
            ));
        }

        if let Some(policy) = &self.flush_policy {
            policy.validate()?;
        }

        Ok(())
    }

    /// Contents that never touch a backing store
    pub fn non_persistent() -> Self {
        Self {
            persistent: false,
            ..Default::default()
        }
    }

    /// Saves handed to background workers
    pub fn background() -> Self {
        Self {
            async_save: true,
            ..Default::default()
        }
    }

    /// Saves triggered by edit volume with the default windows
    pub fn auto_sync() -> Self {
        Self {
            flush_policy: Some(FlushPolicy::default()),
            ..Default::default()
        }
    }
}

/// Builder for entity configuration
#[derive(Debug, Default)]
pub struct EntityConfigBuilder {
    persistent: Option<bool>,
    async_save: Option<bool>,
    save_timeout: Option<Duration>,
    save_on_empty: Option<bool>,
    flush_policy: Option<FlushPolicy>,
}

impl EntityConfigBuilder {
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = Some(persistent);
        self
    }

    pub fn async_save(mut self, enable: bool) -> Self {
        self.async_save = Some(enable);
        self
    }

    pub fn save_timeout(mut self, timeout: Duration) -> Self {
        self.save_timeout = Some(timeout);
        self
    }

    pub fn save_on_empty(mut self, enable: bool) -> Self {
        self.save_on_empty = Some(enable);
        self
    }

    pub fn flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.flush_policy = Some(policy);
        self
    }

    /// Build the entity configuration
    pub fn build(self) -> EntityConfig {
        let defaults = EntityConfig::default();

        EntityConfig {
            persistent: self.persistent.unwrap_or(defaults.persistent),
            async_save: self.async_save.unwrap_or(defaults.async_save),
            save_timeout: self.save_timeout.unwrap_or(defaults.save_timeout),
            save_on_empty: self.save_on_empty.unwrap_or(defaults.save_on_empty),
            flush_policy: self.flush_policy.or(defaults.flush_policy),
        }
    }
}

/// Registry-wide configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry name; also the subdirectory saved contents live in
    pub name: String,

    /// Root directory for saved contents
    pub cache_dir: PathBuf,

    /// Configuration given to entities the registry creates itself
    pub defaults: EntityConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_REGISTRY_NAME.to_string(),
            cache_dir: default_cache_dir(),
            defaults: EntityConfig::default(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("ouroboros-cache")
}

impl RegistryConfig {
    /// Create a new builder for registry configuration
    pub fn builder() -> RegistryConfigBuilder {
        RegistryConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CacheError::ConfigError(
                "registry name must not be empty".to_string(),
            ));
        }

        if self.name.contains(['/', '\\']) {
            return Err(CacheError::ConfigError(format!(
                "registry name '{}' must not contain path separators",
                self.name
            )));
        }

        self.defaults.validate()
    }

    /// Directory the registry's default store writes to
    pub fn store_dir(&self) -> PathBuf {
        self.cache_dir.join(&self.name)
    }

    /// Defaults overridden by `OUROBOROS_CACHE_*` variables (a `.env` file is honoured)
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            debug!("Loaded environment from {:?}", path);
        }

        let mut config = Self::default();

        if let Ok(name) = std::env::var("OUROBOROS_CACHE_NAME") {
            config.name = name;
        }
        if let Ok(dir) = std::env::var("OUROBOROS_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Ok(value) = std::env::var("OUROBOROS_CACHE_ASYNC") {
            config.defaults.async_save = value.parse().map_err(|_| {
                CacheError::ConfigError(format!("OUROBOROS_CACHE_ASYNC must be true or false, got '{}'", value))
            })?;
        }
        if let Ok(value) = std::env::var("OUROBOROS_CACHE_SAVE_TIMEOUT_SECS") {
            let secs: u64 = value.parse().map_err(|_| {
                CacheError::ConfigError(format!(
                    "OUROBOROS_CACHE_SAVE_TIMEOUT_SECS must be a number of seconds, got '{}'",
                    value
                ))
            })?;
            config.defaults.save_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Read a YAML configuration file; missing fields take their defaults
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&raw).map_err(|e| {
            CacheError::ConfigError(format!("invalid registry config {:?}: {}", path, e))
        })?;
        config.validate()?;
        Ok(config)
    }
}

/// Builder for registry configuration
#[derive(Debug, Default)]
pub struct RegistryConfigBuilder {
    name: Option<String>,
    cache_dir: Option<PathBuf>,
    defaults: Option<EntityConfig>,
}

impl RegistryConfigBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn defaults(mut self, defaults: EntityConfig) -> Self {
        self.defaults = Some(defaults);
        self
    }

    /// Build the registry configuration
    pub fn build(self) -> RegistryConfig {
        let defaults = RegistryConfig::default();

        RegistryConfig {
            name: self.name.unwrap_or(defaults.name),
            cache_dir: self.cache_dir.unwrap_or(defaults.cache_dir),
            defaults: self.defaults.unwrap_or(defaults.defaults),
        }
    }
}
