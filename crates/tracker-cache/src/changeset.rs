//! Net add/delete log used to replicate the content cache.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Version reported when nothing has been committed yet.
pub const NO_VERSION_AVAILABLE: i64 = -1;

/// Whether `version` is absent from the known versions.
///
/// [`NO_VERSION_AVAILABLE`] is never unknown: it means "start from scratch".
pub fn is_unknown_version(version: i64, known: &[i64]) -> bool {
    version != NO_VERSION_AVAILABLE && !known.contains(&version)
}

/// Kind of change recorded for a cache path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Add,
    Delete,
}

/// A path and how it changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub path: String,
    pub kind: ChangeKind,
}

impl ChangeRecord {
    pub fn add(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Add,
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Delete,
        }
    }
}

/// Half-open range of versions `(from, to]` covered by a set of changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionRange {
    pub from: i64,
    pub to: i64,
}

impl VersionRange {
    pub fn new(from: i64, to: i64) -> Self {
        Self { from, to }
    }

    /// A range starting from nothing lists every stored path.
    pub fn is_full(&self) -> bool {
        self.from == NO_VERSION_AVAILABLE
    }
}

/// Keys added or deleted since the last flush.
///
/// A key is never in both sets: the last operation on a key wins.
/// A transient change set records nothing; read-only caches use one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    adds: BTreeSet<String>,
    deletes: BTreeSet<String>,
    #[serde(skip)]
    transient: bool,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transient() -> Self {
        Self {
            transient: true,
            ..Self::default()
        }
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn add_or_replace(&mut self, key: impl Into<String>) {
        if self.transient {
            return;
        }
        let key = key.into();
        self.deletes.remove(&key);
        self.adds.insert(key);
    }

    pub fn delete(&mut self, key: impl Into<String>) {
        if self.transient {
            return;
        }
        let key = key.into();
        self.adds.remove(&key);
        self.deletes.insert(key);
    }

    pub fn adds(&self) -> &BTreeSet<String> {
        &self.adds
    }

    pub fn deletes(&self) -> &BTreeSet<String> {
        &self.deletes
    }

    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.deletes.is_empty()
    }

    /// Fold a later change set into this one.
    pub fn merge(&mut self, later: &ChangeSet) {
        for key in &later.deletes {
            self.delete(key.clone());
        }
        for key in &later.adds {
            self.add_or_replace(key.clone());
        }
    }

    /// Flatten into records, adds first.
    pub fn records(&self) -> Vec<ChangeRecord> {
        self.adds
            .iter()
            .map(ChangeRecord::add)
            .chain(self.deletes.iter().map(ChangeRecord::delete))
            .collect()
    }

    pub fn clear(&mut self) {
        self.adds.clear();
        self.deletes.clear();
    }
}
