//! Error types for cache operations
//!
//! Hook failures are carried through untouched: whatever a loader, saver or
//! builder returns is what the caller sees.

use thiserror::Error;

/// Main error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// Operation attempted on an entity with no loaded contents
    #[error("No cache contents defined for '{name}'")]
    ContentsAbsent { name: String },

    /// Loader/saver/deleter I/O failure
    #[error("Backing store unavailable for '{name}': {source}")]
    BackingStoreUnavailable {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Validator refused loaded contents; load treats this as absent
    #[error("Contents of '{name}' rejected by validator")]
    ValidationRejected { name: String },

    /// A user supplied hook failed
    #[error("Hook failure: {0}")]
    HookFailure(#[from] anyhow::Error),

    /// Key kind does not fit the shape of the contents
    #[error("Invalid key {key} for '{name}': {reason}")]
    InvalidKey {
        name: String,
        key: String,
        reason: String,
    },

    /// Name lookup on the registry found nothing
    #[error("Cache '{0}' is not registered")]
    NotRegistered(String),

    /// A newer background save cancelled this one
    #[error("Background save for '{name}' was superseded")]
    SaveSuperseded { name: String },

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl CacheError {
    pub(crate) fn absent(name: &str) -> Self {
        CacheError::ContentsAbsent {
            name: name.to_string(),
        }
    }

    pub(crate) fn store(name: &str, source: std::io::Error) -> Self {
        CacheError::BackingStoreUnavailable {
            name: name.to_string(),
            source,
        }
    }

    /// Whether the error came from the backing store rather than a hook or caller
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            CacheError::BackingStoreUnavailable { .. } | CacheError::Io(_)
        )
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<String> for CacheError {
    fn from(s: String) -> Self {
        CacheError::Other(s)
    }
}

impl From<&str> for CacheError {
    fn from(s: &str) -> Self {
        CacheError::Other(s.to_string())
    }
}
