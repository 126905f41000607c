// Recovery paths: topping up a thin live collection from the seed snapshot,
// and reloading the whole collection from a backup after an operator mistake.

use std::collections::HashSet;
use std::fmt;

use tracing::info;

use crate::error::SyncError;
use crate::traits::ContentStore;

/// Store keys for the collections a pass touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionKeys {
    pub live: String,
    pub seed: String,
    pub backup: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedReport {
    pub target: usize,
    pub added: u64,
    pub total: u64,
    /// The seed snapshot ran out before the target was reached.
    pub exhausted: bool,
}

impl fmt::Display for SeedReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seed(target={} added={} total={} exhausted={})",
            self.target, self.added, self.total, self.exhausted
        )
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: u64,
    pub cutoff: i64,
    pub newer_than_cutoff: u64,
}

impl fmt::Display for RestoreReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "restore(restored={} newer_than_cutoff={} cutoff={})",
            self.restored, self.newer_than_cutoff, self.cutoff
        )
    }
}

/// Add records from the seed snapshot until the live collection holds
/// `target` records or the snapshot runs out. Ids already live are skipped.
pub async fn seed(
    store: &dyn ContentStore,
    keys: &CollectionKeys,
    target: usize,
) -> Result<SeedReport, SyncError> {
    let mut live = store
        .get_all(&keys.live)
        .await
        .map_err(|e| SyncError::Store(e.to_string()))?;

    let mut report = SeedReport {
        target,
        total: live.len() as u64,
        ..Default::default()
    };
    if live.len() >= target {
        info!(live = live.len(), target, "Live collection already at seed target");
        return Ok(report);
    }

    let snapshot = store
        .get_all(&keys.seed)
        .await
        .map_err(|e| SyncError::Store(e.to_string()))?;

    let mut ids: HashSet<String> = live.iter().map(|r| r.id.clone()).collect();
    for record in snapshot {
        if live.len() >= target {
            break;
        }
        if ids.insert(record.id.clone()) {
            live.push(record);
            report.added += 1;
        }
    }
    report.exhausted = live.len() < target;
    report.total = live.len() as u64;

    if report.added > 0 {
        store
            .put_all(&keys.live, &live)
            .await
            .map_err(|e| SyncError::PersistenceFailure(e.to_string()))?;
    }

    info!(
        added = report.added,
        total = report.total,
        exhausted = report.exhausted,
        "Seeded live collection"
    );
    Ok(report)
}

/// Replace the live collection with the backup snapshot.
pub async fn restore(
    store: &dyn ContentStore,
    keys: &CollectionKeys,
    cutoff: i64,
) -> Result<RestoreReport, SyncError> {
    let backup = store
        .get_all(&keys.backup)
        .await
        .map_err(|e| SyncError::Store(e.to_string()))?;

    if backup.is_empty() {
        return Err(SyncError::EmptySnapshot(keys.backup.clone()));
    }

    store
        .put_all(&keys.live, &backup)
        .await
        .map_err(|e| SyncError::PersistenceFailure(e.to_string()))?;

    let report = RestoreReport {
        restored: backup.len() as u64,
        cutoff,
        newer_than_cutoff: backup
            .iter()
            .filter(|r| r.published_at.is_some_and(|t| t > cutoff))
            .count() as u64,
    };
    info!(
        restored = report.restored,
        newer_than_cutoff = report.newer_than_cutoff,
        "Restored live collection from backup"
    );
    Ok(report)
}
