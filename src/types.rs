//! Core type definitions shared by entities and the registry

use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of one element inside cache contents
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentKey {
    /// Key of a mapping
    Field(String),

    /// Position in a sequence
    Index(usize),
}

impl From<&str> for ContentKey {
    fn from(key: &str) -> Self {
        ContentKey::Field(key.to_string())
    }
}

impl From<String> for ContentKey {
    fn from(key: String) -> Self {
        ContentKey::Field(key)
    }
}

impl From<usize> for ContentKey {
    fn from(index: usize) -> Self {
        ContentKey::Index(index)
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKey::Field(key) => write!(f, "'{}'", key),
            ContentKey::Index(index) => write!(f, "[{}]", index),
        }
    }
}

/// Lifecycle operation the registry can propagate across dependents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifecycle {
    Load,
    Save,
    DeleteSavedContent,
    LoadOrBuild,
    InvalidateAndRebuild,
}

/// Whether an operation visits dependents before or after the entity itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationOrder {
    DependentsFirst,
    SelfFirst,
}

impl Lifecycle {
    pub fn order(self) -> PropagationOrder {
        match self {
            // A dependent's builder may read the freshly rebuilt contents
            Lifecycle::InvalidateAndRebuild => PropagationOrder::SelfFirst,
            Lifecycle::Load
            | Lifecycle::Save
            | Lifecycle::DeleteSavedContent
            | Lifecycle::LoadOrBuild => PropagationOrder::DependentsFirst,
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Load => write!(f, "load"),
            Lifecycle::Save => write!(f, "save"),
            Lifecycle::DeleteSavedContent => write!(f, "delete_saved_content"),
            Lifecycle::LoadOrBuild => write!(f, "load_or_build"),
            Lifecycle::InvalidateAndRebuild => write!(f, "invalidate_and_rebuild"),
        }
    }
}

/// Counters for one entity's lifecycle activity
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct EntityStats {
    /// Loader invocations (including invalidations)
    pub loads: u64,

    /// Saves handed to the persistence coordinator
    pub saves: u64,

    /// Builder invocations
    pub builds: u64,

    /// Deletions of saved contents
    pub deletes: u64,

    /// Content edits recorded
    pub edits: u64,

    /// Saves triggered by edit volume
    pub auto_flushes: u64,
}

impl EntityStats {
    /// Share of saves that came from the flush trigger, as a percentage
    pub fn auto_flush_rate(&self) -> f64 {
        if self.saves == 0 {
            0.0
        } else {
            (self.auto_flushes as f64 / self.saves as f64) * 100.0
        }
    }
}

impl fmt::Display for EntityStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EntityStats {{ loads: {}, saves: {}, builds: {}, deletes: {}, edits: {}, auto_flushes: {} }}",
            self.loads, self.saves, self.builds, self.deletes, self.edits, self.auto_flushes
        )
    }
}
