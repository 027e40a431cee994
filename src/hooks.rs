//! Hook set consumed by cache entities
//!
//! Every hook is optional and can be replaced at any time. Hooks return
//! [`crate::Result`] so a failing hook can report a store failure
//! ([`crate::CacheError::BackingStoreUnavailable`]) or anything else
//! (`anyhow` errors convert into [`crate::CacheError::HookFailure`]).

use crate::error::Result;
use crate::store::BackingStore;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

pub type Loader = Arc<dyn Fn(&str) -> Result<Option<Value>> + Send + Sync>;
pub type Builder = Arc<dyn Fn(&str) -> Result<Value> + Send + Sync>;
pub type Saver = Arc<dyn Fn(&str, &Value) -> Result<()> + Send + Sync>;
pub type PreSaver = Arc<dyn Fn(&str, &Value, &SaveToken) -> Result<()> + Send + Sync>;
pub type Committer = Arc<dyn Fn(&str, &Value, &SaveToken) -> Result<()> + Send + Sync>;
pub type Cleaner = Arc<dyn Fn(&str, &SaveToken) -> Result<()> + Send + Sync>;
pub type Deleter = Arc<dyn Fn(&str) -> Result<()> + Send + Sync>;

/// Returns `Some(new)` to replace the contents, `None` to leave them as they are
pub type Processor = Arc<dyn Fn(&Value) -> Result<Option<Value>> + Send + Sync>;
pub type Validator = Arc<dyn Fn(&Value) -> Result<bool> + Send + Sync>;

/// Identifies the temporary artifact of one save attempt
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SaveToken(String);

impl SaveToken {
    pub fn new() -> Self {
        SaveToken(format!("tmp-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SaveToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SaveToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hooks supplied by the owner of a cache entity
#[derive(Clone, Default)]
pub struct CacheHooks {
    pub loader: Option<Loader>,
    pub builder: Option<Builder>,
    pub saver: Option<Saver>,
    pub pre_saver: Option<PreSaver>,
    pub committer: Option<Committer>,
    pub cleaner: Option<Cleaner>,
    pub deleter: Option<Deleter>,
    pub pre_processor: Option<Processor>,
    pub post_processor: Option<Processor>,
    pub validator: Option<Validator>,
}

impl CacheHooks {
    /// No hooks at all: loads come back absent, builds produce `{}`
    pub fn none() -> Self {
        Self::default()
    }

    /// Contents that live only in memory
    pub fn in_memory() -> Self {
        Self::none()
            .with_loader(|_| Ok(Some(json!({}))))
            .with_builder(|_| Ok(json!({})))
            .with_saver(|_, _| Ok(()))
            .with_deleter(|_| Ok(()))
    }

    /// Route load/save/delete through a backing store
    pub fn from_store(store: Arc<dyn BackingStore>) -> Self {
        let loader = store.clone();
        let saver = store.clone();
        let pre_saver = store.clone();
        let committer = store.clone();
        let cleaner = store.clone();
        let deleter = store;

        Self::none()
            .with_loader(move |name| loader.load(name))
            .with_saver(move |name, contents| saver.save(name, contents))
            .with_pre_saver(move |name, contents, token| pre_saver.stage(name, contents, token))
            .with_committer(move |name, _contents, token| committer.commit(name, token))
            .with_cleaner(move |name, token| cleaner.discard(name, token))
            .with_deleter(move |name| deleter.delete(name))
    }

    pub fn with_loader<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        self.loader = Some(Arc::new(f));
        self
    }

    pub fn with_builder<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Result<Value> + Send + Sync + 'static,
    {
        self.builder = Some(Arc::new(f));
        self
    }

    pub fn with_saver<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &Value) -> Result<()> + Send + Sync + 'static,
    {
        self.saver = Some(Arc::new(f));
        self
    }

    pub fn with_pre_saver<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &Value, &SaveToken) -> Result<()> + Send + Sync + 'static,
    {
        self.pre_saver = Some(Arc::new(f));
        self
    }

    pub fn with_committer<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &Value, &SaveToken) -> Result<()> + Send + Sync + 'static,
    {
        self.committer = Some(Arc::new(f));
        self
    }

    pub fn with_cleaner<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &SaveToken) -> Result<()> + Send + Sync + 'static,
    {
        self.cleaner = Some(Arc::new(f));
        self
    }

    pub fn with_deleter<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Result<()> + Send + Sync + 'static,
    {
        self.deleter = Some(Arc::new(f));
        self
    }

    pub fn with_pre_processor<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        self.pre_processor = Some(Arc::new(f));
        self
    }

    pub fn with_post_processor<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        self.post_processor = Some(Arc::new(f));
        self
    }

    pub fn with_validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Result<bool> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(f));
        self
    }

    /// Take every hook set in `overrides`, keep ours for the rest
    pub fn merge(self, overrides: CacheHooks) -> Self {
        Self {
            loader: overrides.loader.or(self.loader),
            builder: overrides.builder.or(self.builder),
            saver: overrides.saver.or(self.saver),
            pre_saver: overrides.pre_saver.or(self.pre_saver),
            committer: overrides.committer.or(self.committer),
            cleaner: overrides.cleaner.or(self.cleaner),
            deleter: overrides.deleter.or(self.deleter),
            pre_processor: overrides.pre_processor.or(self.pre_processor),
            post_processor: overrides.post_processor.or(self.post_processor),
            validator: overrides.validator.or(self.validator),
        }
    }

    /// Hooks the persistence coordinator needs for one save
    pub fn save_hooks(&self) -> SaveHooks {
        SaveHooks {
            saver: self.saver.clone(),
            pre_saver: self.pre_saver.clone(),
            committer: self.committer.clone(),
            cleaner: self.cleaner.clone(),
        }
    }

    fn configured(&self) -> Vec<&'static str> {
        [
            ("loader", self.loader.is_some()),
            ("builder", self.builder.is_some()),
            ("saver", self.saver.is_some()),
            ("pre_saver", self.pre_saver.is_some()),
            ("committer", self.committer.is_some()),
            ("cleaner", self.cleaner.is_some()),
            ("deleter", self.deleter.is_some()),
            ("pre_processor", self.pre_processor.is_some()),
            ("post_processor", self.post_processor.is_some()),
            ("validator", self.validator.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect()
    }
}

impl fmt::Debug for CacheHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheHooks")
            .field("configured", &self.configured())
            .finish()
    }
}

/// The subset of hooks a save needs, detached from the entity
#[derive(Clone, Default)]
pub struct SaveHooks {
    pub saver: Option<Saver>,
    pub pre_saver: Option<PreSaver>,
    pub committer: Option<Committer>,
    pub cleaner: Option<Cleaner>,
}

impl SaveHooks {
    /// Stage + commit pair, when both are available
    pub(crate) fn staged(&self) -> Option<(PreSaver, Committer)> {
        match (&self.pre_saver, &self.committer) {
            (Some(pre_saver), Some(committer)) => Some((pre_saver.clone(), committer.clone())),
            _ => None,
        }
    }
}

impl fmt::Debug for SaveHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveHooks")
            .field("saver", &self.saver.is_some())
            .field("staged", &self.staged().is_some())
            .field("cleaner", &self.cleaner.is_some())
            .finish()
    }
}
