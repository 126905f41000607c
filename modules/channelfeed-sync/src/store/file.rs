use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use channelfeed_common::ContentRecord;

use crate::traits::ContentStore;

const LEASE_FILE: &str = "sync.lease";
const RECLAIM_GUARD: &str = "sync.lease.reclaim";
const RECLAIM_GUARD_STALE: Duration = Duration::from_secs(10);

/// One JSON file per collection under a data directory.
///
/// Writes go to a temp file in the same directory and are renamed into place,
/// so a reader never sees a half-written collection.
#[derive(Debug, Clone)]
pub struct FileContentStore {
    dir: PathBuf,
    cursor_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct LeaseFile {
    holder: String,
    /// Unix milliseconds.
    expires_at_ms: i64,
}

impl FileContentStore {
    pub fn open(dir: impl Into<PathBuf>, cursor_key: impl Into<String>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create data dir {}", dir.display()))?;
        Ok(Self {
            dir,
            cursor_key: cursor_key.into(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn collection_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn cursor_path(&self) -> PathBuf {
        self.dir.join(&self.cursor_key)
    }

    fn lease_path(&self) -> PathBuf {
        self.dir.join(LEASE_FILE)
    }

    async fn write(&self, path: PathBuf, bytes: Vec<u8>) -> Result<()> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || write_atomic(&dir, &path, &bytes)).await?
    }

    async fn read_lease(&self) -> Result<Option<LeaseFile>> {
        Ok(read_optional(&self.lease_path())
            .await?
            .and_then(|bytes| serde_json::from_slice(&bytes).ok()))
    }
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Take the lease file for `holder`, renew it while `holder` still has it, or
/// reclaim it once expired. The lease file is only ever created without
/// clobbering, and expired leases are removed under a reclaim guard, so two
/// contenders cannot both come away holding it.
fn acquire_lease_blocking(
    dir: &Path,
    path: &Path,
    holder: &str,
    ttl: Duration,
) -> Result<bool> {
    let now = Utc::now().timestamp_millis();
    let lease = LeaseFile {
        holder: holder.to_string(),
        expires_at_ms: now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)),
    };
    let bytes = serde_json::to_vec(&lease)?;

    if let Some(seen) = read_optional_blocking(path)? {
        match serde_json::from_slice::<LeaseFile>(&seen) {
            Ok(current) if current.expires_at_ms > now => {
                if current.holder != holder {
                    return Ok(false);
                }
                write_atomic(dir, path, &bytes)?;
                return Ok(true);
            }
            Ok(current) => {
                warn!(stale_holder = %current.holder, "Reclaiming expired sync lease")
            }
            Err(e) => warn!(error = %e, "Unreadable lease file, reclaiming"),
        }
        if !retire_lease(dir, path, &seen)? {
            return Ok(false);
        }
    }

    create_exclusive(dir, path, &bytes)
}

fn create_exclusive(dir: &Path, path: &Path, bytes: &[u8]) -> Result<bool> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => {
            Err(e.error).with_context(|| format!("Failed to create {}", path.display()))
        }
    }
}

/// Remove an expired lease if it is still the one inspected. Returns false
/// when another contender holds the reclaim guard or replaced the lease first.
fn retire_lease(dir: &Path, path: &Path, seen: &[u8]) -> Result<bool> {
    let Some(_guard) = ReclaimGuard::take(&dir.join(RECLAIM_GUARD))? else {
        return Ok(false);
    };
    match read_optional_blocking(path)? {
        Some(current) if current != seen => Ok(false),
        Some(_) => match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        },
        None => Ok(true),
    }
}

/// Marker file held for the few syscalls of a reclaim.
struct ReclaimGuard {
    path: PathBuf,
}

impl ReclaimGuard {
    fn take(path: &Path) -> Result<Option<Self>> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => Ok(Some(Self {
                path: path.to_path_buf(),
            })),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                // Left behind by a process that died mid-reclaim.
                let age = std::fs::metadata(path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| t.elapsed().ok());
                if age.is_some_and(|age| age > RECLAIM_GUARD_STALE) {
                    warn!(path = %path.display(), "Removing abandoned reclaim guard");
                    let _ = std::fs::remove_file(path);
                }
                Ok(None)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to create {}", path.display())),
        }
    }
}

impl Drop for ReclaimGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn read_optional_blocking(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

#[async_trait]
impl ContentStore for FileContentStore {
    async fn get_all(&self, key: &str) -> Result<Vec<ContentRecord>> {
        let path = self.collection_path(key);
        match read_optional(&path).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("{} is not a record list", path.display())),
            None => Ok(Vec::new()),
        }
    }

    async fn put_all(&self, key: &str, records: &[ContentRecord]) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(records)?;
        self.write(self.collection_path(key), bytes).await?;
        debug!(key, count = records.len(), "Collection written");
        Ok(())
    }

    async fn get_cursor(&self) -> Result<Option<i64>> {
        match read_optional(&self.cursor_path()).await? {
            Some(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                let value = text
                    .trim()
                    .parse()
                    .with_context(|| format!("Cursor file holds `{}`", text.trim()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set_cursor(&self, value: i64) -> Result<()> {
        self.write(self.cursor_path(), value.to_string().into_bytes())
            .await
    }

    async fn try_acquire_lease(&self, holder: &str, ttl: Duration) -> Result<bool> {
        let dir = self.dir.clone();
        let path = self.lease_path();
        let holder = holder.to_string();
        tokio::task::spawn_blocking(move || acquire_lease_blocking(&dir, &path, &holder, ttl))
            .await?
    }

    async fn release_lease(&self, holder: &str) -> Result<()> {
        let ours = self
            .read_lease()
            .await?
            .is_some_and(|l| l.holder == holder);
        if ours {
            match tokio::fs::remove_file(self.lease_path()).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
