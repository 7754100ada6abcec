//! Filesystem content cache.
//!
//! Payloads live at `<root>/<tenant>/<bucket>/<id>.gz`, gzip compressed.
//! Flushed change sets are kept under `<root>/.changesets/<version>.json`
//! and the last committed version is recorded as plain text in
//! `<root>/.version`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::changeset::{
    is_unknown_version, ChangeRecord, ChangeSet, VersionRange, NO_VERSION_AVAILABLE,
};
use crate::error::CacheError;

const CHANGESET_DIR: &str = ".changesets";
const VERSION_FILE: &str = ".version";
const BUCKETS: u64 = 1000;

/// Access mode of a cache.
///
/// `NotSet` moves to `ReadOnly` or `ReadWrite`. `ReadOnly` may be promoted
/// to `ReadWrite`; `ReadWrite` never goes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    NotSet,
    ReadOnly,
    ReadWrite,
}

struct CacheState {
    mode: AccessMode,
    changes: ChangeSet,
}

impl CacheState {
    fn ensure_mode_set(&self, operation: &str) -> Result<(), CacheError> {
        if self.mode == AccessMode::NotSet {
            return Err(CacheError::IllegalState(format!(
                "{} called before the cache access mode was set",
                operation
            )));
        }
        Ok(())
    }
}

/// On-disk cache of documents and payloads keyed by `(tenant, id)`.
///
/// Mode and pending change set share one lock; every mutation holds it
/// for its whole duration.
pub struct ContentCache {
    root: PathBuf,
    state: Mutex<CacheState>,
}

impl ContentCache {
    /// Open (creating if needed) a cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(root.join(CHANGESET_DIR))?;
        info!(path = ?root, "Opened content cache");
        Ok(Self {
            root,
            state: Mutex::new(CacheState {
                mode: AccessMode::NotSet,
                changes: ChangeSet::transient(),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, CacheState>, CacheError> {
        self.state
            .lock()
            .map_err(|e| CacheError::Lock(e.to_string()))
    }

    pub fn access_mode(&self) -> Result<AccessMode, CacheError> {
        Ok(self.lock()?.mode)
    }

    /// Switch between read-only and read-write.
    ///
    /// Asking a read-write cache to become read-only is a no-op.
    pub fn toggle_read_only(&self, read_only: bool) -> Result<AccessMode, CacheError> {
        let mut state = self.lock()?;
        let next = match (state.mode, read_only) {
            (AccessMode::ReadWrite, true) => {
                debug!("Ignoring read-only request on a read-write cache");
                AccessMode::ReadWrite
            }
            (AccessMode::ReadWrite, false) => AccessMode::ReadWrite,
            (_, true) => AccessMode::ReadOnly,
            (_, false) => AccessMode::ReadWrite,
        };
        if next != state.mode {
            state.changes = match next {
                AccessMode::ReadWrite => ChangeSet::new(),
                _ => ChangeSet::transient(),
            };
            info!(from = ?state.mode, to = ?next, "Content cache access mode changed");
            state.mode = next;
        }
        Ok(next)
    }

    /// Relative path of the payload stored for `(tenant, id)`.
    pub fn key(tenant: &str, id: u64) -> Result<String, CacheError> {
        if tenant.is_empty() || tenant.contains('/') || tenant.contains('\\') || tenant == ".." {
            return Err(CacheError::InvalidKey(format!("tenant '{}'", tenant)));
        }
        Ok(format!("{}/{}/{}.gz", tenant, id % BUCKETS, id))
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, CacheError> {
        let path = Path::new(relative);
        let valid = !relative.is_empty()
            && !relative.starts_with('.')
            && path
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(CacheError::InvalidKey(relative.to_string()));
        }
        Ok(self.root.join(path))
    }

    /// Fetch the payload stored for `(tenant, id)`.
    pub fn retrieve(&self, tenant: &str, id: u64) -> Result<Option<Vec<u8>>, CacheError> {
        self.read_path(&Self::key(tenant, id)?)
    }

    /// Store a payload, replacing any previous one.
    pub fn store(&self, tenant: &str, id: u64, payload: &[u8]) -> Result<(), CacheError> {
        self.write_path(&Self::key(tenant, id)?, payload)
    }

    /// Remove a payload. Returns whether one existed.
    pub fn remove(&self, tenant: &str, id: u64) -> Result<bool, CacheError> {
        self.delete_path(&Self::key(tenant, id)?)
    }

    /// Read and decompress the payload at a cache-relative path.
    pub fn read_path(&self, relative: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.resolve(relative)?;
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut payload = Vec::new();
        GzDecoder::new(file).read_to_end(&mut payload)?;
        Ok(Some(payload))
    }

    /// Compress and atomically write a payload at a cache-relative path.
    pub fn write_path(&self, relative: &str, payload: &[u8]) -> Result<(), CacheError> {
        let path = self.resolve(relative)?;
        let mut state = self.lock()?;
        state.ensure_mode_set("store")?;

        let parent = path
            .parent()
            .ok_or_else(|| CacheError::InvalidKey(relative.to_string()))?;
        fs::create_dir_all(parent)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        {
            let mut encoder = GzEncoder::new(tmp.as_file_mut(), Compression::default());
            encoder.write_all(payload)?;
            encoder.finish()?;
        }
        tmp.persist(&path).map_err(|e| CacheError::Io(e.error))?;

        state.changes.add_or_replace(relative);
        debug!(path = relative, bytes = payload.len(), "Stored cache entry");
        Ok(())
    }

    /// Delete the payload at a cache-relative path.
    pub fn delete_path(&self, relative: &str) -> Result<bool, CacheError> {
        let path = self.resolve(relative)?;
        let mut state = self.lock()?;
        state.ensure_mode_set("remove")?;

        let existed = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        state.changes.delete(relative);
        debug!(path = relative, existed, "Removed cache entry");
        Ok(existed)
    }

    /// Persist the pending change set under a new version.
    ///
    /// Returns the new version, or `None` when there was nothing to flush.
    pub fn flush_change_set(&self) -> Result<Option<i64>, CacheError> {
        let mut state = self.lock()?;
        state.ensure_mode_set("flush_change_set")?;
        if state.changes.is_transient() || state.changes.is_empty() {
            return Ok(None);
        }

        let last = self.read_version()?;
        let version = Utc::now().timestamp_millis().max(last + 1);
        let bytes = serde_json::to_vec(&state.changes)?;
        self.write_atomic(&self.change_set_path(version), &bytes)?;
        self.write_atomic(&self.root.join(VERSION_FILE), version.to_string().as_bytes())?;

        info!(
            version,
            adds = state.changes.adds().len(),
            deletes = state.changes.deletes().len(),
            "Flushed content cache change set"
        );
        state.changes.clear();
        Ok(Some(version))
    }

    /// Snapshot of the changes recorded since the last flush.
    pub fn pending_changes(&self) -> Result<ChangeSet, CacheError> {
        Ok(self.lock()?.changes.clone())
    }

    pub fn last_committed_version(&self) -> Result<i64, CacheError> {
        self.read_version()
    }

    /// Record the version this cache reflects, e.g. after a replica sync.
    pub fn set_last_committed_version(&self, version: i64) -> Result<(), CacheError> {
        let state = self.lock()?;
        state.ensure_mode_set("set_last_committed_version")?;
        self.write_atomic(&self.root.join(VERSION_FILE), version.to_string().as_bytes())?;
        debug!(version, "Set last committed cache version");
        Ok(())
    }

    /// Versions of every flushed change set, ascending.
    pub fn versions(&self) -> Result<Vec<i64>, CacheError> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(self.root.join(CHANGESET_DIR))? {
            let name = entry?.file_name();
            if let Some(v) = name
                .to_str()
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|n| n.parse::<i64>().ok())
            {
                versions.push(v);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    /// Net changes between `since` and the last committed version.
    ///
    /// An unknown `since` (or [`NO_VERSION_AVAILABLE`]) yields every stored
    /// path as an add under a full range.
    pub fn get_changes(
        &self,
        since: i64,
    ) -> Result<BTreeMap<VersionRange, Vec<ChangeRecord>>, CacheError> {
        let mut result = BTreeMap::new();
        let last = self.read_version()?;
        if last == NO_VERSION_AVAILABLE || since == last {
            return Ok(result);
        }

        let versions = self.versions()?;
        if since != NO_VERSION_AVAILABLE && since < last && !is_unknown_version(since, &versions) {
            let mut merged = ChangeSet::new();
            for version in versions.iter().filter(|v| **v > since && **v <= last) {
                let bytes = fs::read(self.change_set_path(*version))?;
                let changes: ChangeSet = serde_json::from_slice(&bytes)?;
                merged.merge(&changes);
            }
            result.insert(VersionRange::new(since, last), merged.records());
        } else {
            let records = self
                .stored_paths()?
                .into_iter()
                .map(ChangeRecord::add)
                .collect();
            result.insert(VersionRange::new(NO_VERSION_AVAILABLE, last), records);
        }
        Ok(result)
    }

    /// Every payload path currently stored, relative to the root.
    pub fn stored_paths(&self) -> Result<BTreeSet<String>, CacheError> {
        let mut paths = BTreeSet::new();
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
        for entry in walker {
            let entry = entry.map_err(|e| CacheError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !name.ends_with(".gz") {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                let parts: Vec<_> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                paths.insert(parts.join("/"));
            }
        }
        Ok(paths)
    }

    fn change_set_path(&self, version: i64) -> PathBuf {
        self.root.join(CHANGESET_DIR).join(format!("{}.json", version))
    }

    fn read_version(&self) -> Result<i64, CacheError> {
        match fs::read_to_string(self.root.join(VERSION_FILE)) {
            Ok(text) => text
                .trim()
                .parse::<i64>()
                .map_err(|e| CacheError::IllegalState(format!("corrupt version file: {}", e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(NO_VERSION_AVAILABLE),
            Err(e) => Err(e.into()),
        }
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
        let parent = path.parent().unwrap_or(&self.root);
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(bytes)?;
        tmp.persist(path).map_err(|e| CacheError::Io(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read_write_cache() -> (TempDir, ContentCache) {
        let dir = TempDir::new().unwrap();
        let cache = ContentCache::open(dir.path()).unwrap();
        cache.toggle_read_only(false).unwrap();
        (dir, cache)
    }

    #[test]
    fn test_mutations_fail_before_mode_is_set() {
        let dir = TempDir::new().unwrap();
        let cache = ContentCache::open(dir.path()).unwrap();
        assert_eq!(cache.access_mode().unwrap(), AccessMode::NotSet);

        assert!(matches!(
            cache.store("_DEFAULT_", 1, b"x"),
            Err(CacheError::IllegalState(_))
        ));
        assert!(matches!(
            cache.remove("_DEFAULT_", 1),
            Err(CacheError::IllegalState(_))
        ));
        assert!(matches!(
            cache.flush_change_set(),
            Err(CacheError::IllegalState(_))
        ));
        assert!(matches!(
            cache.set_last_committed_version(3),
            Err(CacheError::IllegalState(_))
        ));
        // Reads are always allowed
        assert!(cache.retrieve("_DEFAULT_", 1).unwrap().is_none());
    }

    #[test]
    fn test_read_write_is_permanent() {
        let (_dir, cache) = read_write_cache();
        assert_eq!(cache.toggle_read_only(true).unwrap(), AccessMode::ReadWrite);
        assert_eq!(cache.access_mode().unwrap(), AccessMode::ReadWrite);
    }

    #[test]
    fn test_read_only_can_be_promoted() {
        let dir = TempDir::new().unwrap();
        let cache = ContentCache::open(dir.path()).unwrap();
        assert_eq!(cache.toggle_read_only(true).unwrap(), AccessMode::ReadOnly);
        assert_eq!(cache.toggle_read_only(false).unwrap(), AccessMode::ReadWrite);
        assert_eq!(cache.toggle_read_only(true).unwrap(), AccessMode::ReadWrite);
    }

    #[test]
    fn test_store_retrieve_remove() {
        let (_dir, cache) = read_write_cache();
        cache.store("_DEFAULT_", 1234, b"payload").unwrap();
        assert_eq!(
            cache.retrieve("_DEFAULT_", 1234).unwrap().as_deref(),
            Some(&b"payload"[..])
        );

        cache.store("_DEFAULT_", 1234, b"replaced").unwrap();
        assert_eq!(
            cache.retrieve("_DEFAULT_", 1234).unwrap().as_deref(),
            Some(&b"replaced"[..])
        );

        assert!(cache.remove("_DEFAULT_", 1234).unwrap());
        assert!(!cache.remove("_DEFAULT_", 1234).unwrap());
        assert!(cache.retrieve("_DEFAULT_", 1234).unwrap().is_none());
    }

    #[test]
    fn test_tenants_are_isolated() {
        let (_dir, cache) = read_write_cache();
        cache.store("acme", 1, b"acme").unwrap();
        cache.store("globex", 1, b"globex").unwrap();
        assert_eq!(cache.retrieve("acme", 1).unwrap().as_deref(), Some(&b"acme"[..]));
        assert_eq!(cache.retrieve("globex", 1).unwrap().as_deref(), Some(&b"globex"[..]));
    }

    #[test]
    fn test_invalid_keys_rejected() {
        let (_dir, cache) = read_write_cache();
        assert!(matches!(
            cache.store("../escape", 1, b"x"),
            Err(CacheError::InvalidKey(_))
        ));
        assert!(matches!(
            cache.write_path("a/../../b.gz", b"x"),
            Err(CacheError::InvalidKey(_))
        ));
        assert!(matches!(
            cache.write_path(".version", b"x"),
            Err(CacheError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_store_and_remove_record_net_changes() {
        let (_dir, cache) = read_write_cache();
        cache.store("_DEFAULT_", 1, b"a").unwrap();
        cache.store("_DEFAULT_", 2, b"b").unwrap();
        cache.remove("_DEFAULT_", 1).unwrap();

        let pending = cache.pending_changes().unwrap();
        let key1 = ContentCache::key("_DEFAULT_", 1).unwrap();
        let key2 = ContentCache::key("_DEFAULT_", 2).unwrap();
        assert!(pending.deletes().contains(&key1));
        assert!(pending.adds().contains(&key2));
        assert!(!pending.adds().contains(&key1));
    }

    #[test]
    fn test_read_only_cache_records_no_changes() {
        let dir = TempDir::new().unwrap();
        let cache = ContentCache::open(dir.path()).unwrap();
        cache.toggle_read_only(true).unwrap();
        cache.store("_DEFAULT_", 1, b"a").unwrap();

        assert!(cache.pending_changes().unwrap().is_empty());
        assert_eq!(cache.flush_change_set().unwrap(), None);
        assert_eq!(cache.last_committed_version().unwrap(), NO_VERSION_AVAILABLE);
    }

    #[test]
    fn test_flush_bumps_version_and_writes_marker() {
        let (dir, cache) = read_write_cache();
        assert_eq!(cache.last_committed_version().unwrap(), NO_VERSION_AVAILABLE);
        assert_eq!(cache.flush_change_set().unwrap(), None);

        cache.store("_DEFAULT_", 1, b"a").unwrap();
        let v1 = cache.flush_change_set().unwrap().unwrap();
        assert!(cache.pending_changes().unwrap().is_empty());

        cache.store("_DEFAULT_", 2, b"b").unwrap();
        let v2 = cache.flush_change_set().unwrap().unwrap();
        assert!(v2 > v1);

        let marker = std::fs::read_to_string(dir.path().join(".version")).unwrap();
        assert_eq!(marker.trim(), v2.to_string());
        assert_eq!(cache.versions().unwrap(), vec![v1, v2]);

        // Empty flush does not move the version
        assert_eq!(cache.flush_change_set().unwrap(), None);
        assert_eq!(cache.last_committed_version().unwrap(), v2);
    }

    #[test]
    fn test_incremental_changes_are_net() {
        let (_dir, cache) = read_write_cache();
        cache.store("_DEFAULT_", 1, b"a").unwrap();
        let v1 = cache.flush_change_set().unwrap().unwrap();

        cache.store("_DEFAULT_", 2, b"b").unwrap();
        cache.flush_change_set().unwrap();
        cache.remove("_DEFAULT_", 2).unwrap();
        cache.store("_DEFAULT_", 3, b"c").unwrap();
        let v3 = cache.flush_change_set().unwrap().unwrap();

        let changes = cache.get_changes(v1).unwrap();
        assert_eq!(changes.len(), 1);
        let (range, records) = changes.into_iter().next().unwrap();
        assert_eq!(range, VersionRange::new(v1, v3));
        assert_eq!(
            records,
            vec![
                ChangeRecord::add(ContentCache::key("_DEFAULT_", 3).unwrap()),
                ChangeRecord::delete(ContentCache::key("_DEFAULT_", 2).unwrap()),
            ]
        );

        assert!(cache.get_changes(v3).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_version_gets_full_listing() {
        let (_dir, cache) = read_write_cache();
        cache.store("_DEFAULT_", 1, b"a").unwrap();
        cache.store("acme", 2, b"b").unwrap();
        let v = cache.flush_change_set().unwrap().unwrap();

        let changes = cache.get_changes(12345).unwrap();
        let (range, records) = changes.into_iter().next().unwrap();
        assert!(range.is_full());
        assert_eq!(range.to, v);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.kind == crate::ChangeKind::Add));
    }
}
