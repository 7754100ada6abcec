//! Replicate a read-write cache into a read-only replica.

use tracing::{debug, info};

use crate::changeset::ChangeKind;
use crate::error::CacheError;
use crate::store::ContentCache;

/// Outcome of a [`sync_replica`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub from_version: i64,
    pub to_version: i64,
    pub added: usize,
    pub deleted: usize,
}

/// Bring `replica` up to the last committed version of `primary`.
///
/// A replica at a version the primary does not know receives a full
/// listing; paths it holds that the primary no longer has are deleted.
pub fn sync_replica(primary: &ContentCache, replica: &ContentCache) -> Result<SyncReport, CacheError> {
    let since = replica.last_committed_version()?;
    let mut report = SyncReport {
        from_version: since,
        to_version: since,
        ..SyncReport::default()
    };

    for (range, records) in primary.get_changes(since)? {
        if range.is_full() {
            let wanted: std::collections::BTreeSet<&str> =
                records.iter().map(|r| r.path.as_str()).collect();
            for stale in replica.stored_paths()? {
                if !wanted.contains(stale.as_str()) && replica.delete_path(&stale)? {
                    report.deleted += 1;
                }
            }
        }

        for record in &records {
            match record.kind {
                ChangeKind::Add => {
                    if let Some(payload) = primary.read_path(&record.path)? {
                        replica.write_path(&record.path, &payload)?;
                        report.added += 1;
                    } else {
                        debug!(path = %record.path, "Added path vanished from primary");
                    }
                }
                ChangeKind::Delete => {
                    if replica.delete_path(&record.path)? {
                        report.deleted += 1;
                    }
                }
            }
        }

        replica.set_last_committed_version(range.to)?;
        report.to_version = range.to;
    }

    info!(
        from = report.from_version,
        to = report.to_version,
        added = report.added,
        deleted = report.deleted,
        "Replica synchronised"
    );
    Ok(report)
}
