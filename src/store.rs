//! Backing stores reachable through the hook set
//!
//! A store persists one serialized value per cache name. Saving is split in
//! two steps so readers never see a partial write: `stage` writes the
//! contents under a [`SaveToken`], `commit` moves the staged artifact over
//! the live one in a single step.

use crate::error::{CacheError, Result};
use crate::hooks::SaveToken;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Persistence strategy for cache contents
pub trait BackingStore: Send + Sync + fmt::Debug {
    /// Saved contents, or `None` when nothing has been saved
    fn load(&self, name: &str) -> Result<Option<Value>>;

    /// Write the contents under a temporary name
    fn stage(&self, name: &str, contents: &Value, token: &SaveToken) -> Result<()>;

    /// Replace the saved contents with a staged artifact
    fn commit(&self, name: &str, token: &SaveToken) -> Result<()>;

    /// Remove a staged artifact; missing artifacts are fine
    fn discard(&self, name: &str, token: &SaveToken) -> Result<()>;

    /// Remove the saved contents; missing contents are fine
    fn delete(&self, name: &str) -> Result<()>;

    /// Stage and commit in one go
    fn save(&self, name: &str, contents: &Value) -> Result<()> {
        let token = SaveToken::new();
        let result = self
            .stage(name, contents, &token)
            .and_then(|_| self.commit(name, &token));

        if result.is_err() {
            if let Err(e) = self.discard(name, &token) {
                debug!("Ignoring cleanup failure for '{}' ({}): {}", name, token, e);
            }
        }
        result
    }
}

/// Names that would resolve outside the store directory
fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name.contains("..") || name.contains(['/', '\\']) {
        return Err(CacheError::InvalidKey {
            name: name.to_string(),
            key: format!("'{}'", name),
            reason: "cache names must not be empty or contain path separators or '..'".to_string(),
        });
    }
    Ok(())
}

/// One JSON file per cache inside a directory
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
    pretty: bool,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pretty: true,
        }
    }

    /// Write compact JSON instead of pretty-printed
    pub fn compact(mut self) -> Self {
        self.pretty = false;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of the committed contents for `name`
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    fn staged_path(&self, name: &str, token: &SaveToken) -> PathBuf {
        self.dir.join(format!("{}.json.{}", name, token))
    }

    /// Staged artifacts currently sitting next to the committed file
    pub fn temp_artifacts(&self, name: &str) -> Result<Vec<PathBuf>> {
        check_name(name)?;
        let prefix = format!("{}.json.", name);
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(CacheError::store(name, e)),
        };

        let mut artifacts = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::store(name, e))?;
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                artifacts.push(entry.path());
            }
        }
        artifacts.sort();
        Ok(artifacts)
    }

    fn encode(&self, contents: &Value) -> Result<Vec<u8>> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(contents)?
        } else {
            serde_json::to_vec(contents)?
        };
        Ok(bytes)
    }
}

impl BackingStore for JsonFileStore {
    fn load(&self, name: &str) -> Result<Option<Value>> {
        check_name(name)?;
        let bytes = match fs::read(self.path(name)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::store(name, e)),
        };

        if bytes.is_empty() {
            return Ok(None);
        }

        match serde_json::from_slice(&bytes)? {
            Value::Null => Ok(None),
            contents => Ok(Some(contents)),
        }
    }

    fn stage(&self, name: &str, contents: &Value, token: &SaveToken) -> Result<()> {
        check_name(name)?;
        fs::create_dir_all(&self.dir).map_err(|e| CacheError::store(name, e))?;

        let bytes = self.encode(contents)?;
        let path = self.staged_path(name, token);
        let mut file = fs::File::create(&path).map_err(|e| CacheError::store(name, e))?;
        file.write_all(&bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| CacheError::store(name, e))?;

        debug!("Staged '{}' at {:?} ({} bytes)", name, path, bytes.len());
        Ok(())
    }

    fn commit(&self, name: &str, token: &SaveToken) -> Result<()> {
        check_name(name)?;
        fs::rename(self.staged_path(name, token), self.path(name))
            .map_err(|e| CacheError::store(name, e))
    }

    fn discard(&self, name: &str, token: &SaveToken) -> Result<()> {
        check_name(name)?;
        match fs::remove_file(self.staged_path(name, token)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::store(name, e)),
        }
    }

    fn delete(&self, name: &str) -> Result<()> {
        check_name(name)?;
        match fs::remove_file(self.path(name)) {
            Ok(()) => {
                debug!("Deleted saved contents for '{}'", name);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::store(name, e)),
        }
    }
}

/// Serialized contents kept in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    committed: HashMap<String, Vec<u8>>,
    staged: HashMap<(String, SaveToken), Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed bytes for `name`
    pub fn raw(&self, name: &str) -> Option<Vec<u8>> {
        self.inner.lock().committed.get(name).cloned()
    }

    /// Staged artifacts not yet committed or discarded
    pub fn staged_count(&self, name: &str) -> usize {
        self.inner
            .lock()
            .staged
            .keys()
            .filter(|(staged_name, _)| staged_name == name)
            .count()
    }
}

impl BackingStore for MemoryStore {
    fn load(&self, name: &str) -> Result<Option<Value>> {
        let inner = self.inner.lock();
        match inner.committed.get(name) {
            Some(bytes) => match serde_json::from_slice(bytes)? {
                Value::Null => Ok(None),
                contents => Ok(Some(contents)),
            },
            None => Ok(None),
        }
    }

    fn stage(&self, name: &str, contents: &Value, token: &SaveToken) -> Result<()> {
        let bytes = serde_json::to_vec(contents)?;
        self.inner
            .lock()
            .staged
            .insert((name.to_string(), token.clone()), bytes);
        Ok(())
    }

    fn commit(&self, name: &str, token: &SaveToken) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.staged.remove(&(name.to_string(), token.clone())) {
            Some(bytes) => {
                inner.committed.insert(name.to_string(), bytes);
                Ok(())
            }
            None => {
                warn!("Commit for '{}' found no staged artifact {}", name, token);
                Err(CacheError::store(
                    name,
                    std::io::Error::new(ErrorKind::NotFound, format!("no staged artifact {}", token)),
                ))
            }
        }
    }

    fn discard(&self, name: &str, token: &SaveToken) -> Result<()> {
        self.inner
            .lock()
            .staged
            .remove(&(name.to_string(), token.clone()));
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.inner.lock().committed.remove(name);
        Ok(())
    }
}
