// The sync pass: cursor → pages → groups → merged collection → persist → cursor.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use channelfeed_common::{ChatTarget, ConfigError, ContentRecord, FileConfig, Placeholders};

use crate::cursor::CursorStore;
use crate::error::SyncError;
use crate::fetcher::{FetchOutcome, FetchStop, Fetcher};
use crate::grouping::{group_updates, MessageGroup};
use crate::lease::LeaseHeartbeat;
use crate::merge::merge;
use crate::recovery::{self, CollectionKeys, RestoreReport, SeedReport};
use crate::traits::{ContentStore, FileResolver, UpdateSource};

/// Everything a pass needs that does not change between passes.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub target: ChatTarget,
    pub page_size: u32,
    pub max_pages: u32,
    pub upstream_timeout: Duration,
    pub lease_ttl: Duration,
    pub keys: CollectionKeys,
    pub placeholders: Placeholders,
    pub historical_cutoff: i64,
}

impl SyncSettings {
    pub fn from_config(config: &FileConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            target: config.channel.target()?,
            page_size: config.sync.page_size,
            max_pages: config.sync.max_pages,
            upstream_timeout: config.sync.upstream_timeout(),
            lease_ttl: config.sync.lease_ttl(),
            keys: CollectionKeys {
                live: config.store.live_key.clone(),
                seed: config.store.seed_key.clone(),
                backup: config.store.backup_key.clone(),
            },
            placeholders: config.placeholders.clone(),
            historical_cutoff: config.restore.historical_cutoff,
        })
    }
}

/// What the trigger asks for.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    /// Posts older than now minus this are ignored.
    pub window: Duration,
    /// Top the live collection up from the seed snapshot to this many records.
    pub seed_target: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncPhase {
    #[default]
    Idle,
    FetchingCursor,
    Paging,
    Grouping,
    Merging,
    Persisting,
    AdvancingCursor,
    Aborted,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::FetchingCursor => write!(f, "fetching_cursor"),
            Self::Paging => write!(f, "paging"),
            Self::Grouping => write!(f, "grouping"),
            Self::Merging => write!(f, "merging"),
            Self::Persisting => write!(f, "persisting"),
            Self::AdvancingCursor => write!(f, "advancing_cursor"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Outcome of one pass. Counts are filled in as far as the pass got.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub added: u64,
    /// Existing records whose content changed.
    pub merged: u64,
    pub updates_observed: u64,
    pub groups: u64,
    pub records_total: u64,
    pub cursor_before: i64,
    pub cursor_after: i64,
    pub seed: Option<SeedReport>,
    /// `Idle` after a completed pass, `Aborted` otherwise.
    pub phase: SyncPhase,
    pub aborted_in: Option<SyncPhase>,
    pub error: Option<SyncError>,
}

impl SyncReport {
    fn enter(&mut self, phase: SyncPhase) {
        debug!(from = %self.phase, to = %phase, "Sync phase");
        self.phase = phase;
    }

    fn abort(mut self, error: SyncError) -> Self {
        warn!(phase = %self.phase, error = %error, "Sync pass aborted");
        self.aborted_in = Some(self.phase);
        self.phase = SyncPhase::Aborted;
        self.error = Some(error);
        self
    }

    pub fn is_aborted(&self) -> bool {
        self.phase == SyncPhase::Aborted
    }

    /// True when the cursor moved forward in this pass.
    pub fn cursor_advanced(&self) -> bool {
        self.cursor_after > self.cursor_before
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "added={} merged={} updates={} groups={} total={} cursor={}->{} phase={}",
            self.added,
            self.merged,
            self.updates_observed,
            self.groups,
            self.records_total,
            self.cursor_before,
            self.cursor_after,
            self.phase,
        )?;
        if let Some(seed) = &self.seed {
            write!(f, " {seed}")?;
        }
        if let Some(e) = &self.error {
            write!(f, " error=\"{e}\"")?;
        }
        Ok(())
    }
}

/// Drives sync passes and the recovery paths against one channel and one store.
pub struct ChannelSync {
    source: Option<Arc<dyn UpdateSource>>,
    store: Arc<dyn ContentStore>,
    resolver: Arc<dyn FileResolver>,
    settings: SyncSettings,
    cancel: Arc<AtomicBool>,
}

impl ChannelSync {
    pub fn new(
        store: Arc<dyn ContentStore>,
        resolver: Arc<dyn FileResolver>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            source: None,
            store,
            resolver,
            settings,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Without a source, passes run seed-only or report missing configuration.
    pub fn with_source(mut self, source: Arc<dyn UpdateSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Flag the harness sets to stop the current pass before it writes.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Run one pass under the run lease.
    pub async fn run(&self, request: SyncRequest) -> SyncReport {
        let lease = match self.acquire().await {
            Ok(lease) => lease,
            Err(e) => return SyncReport::default().abort(e),
        };

        let report = self.run_inner(&request, &lease).await;
        self.release(lease).await;

        info!("Sync pass finished. {report}");
        report
    }

    async fn run_inner(&self, request: &SyncRequest, lease: &LeaseHeartbeat) -> SyncReport {
        let mut report = SyncReport::default();

        let Some(source) = self.source.as_deref() else {
            return self.run_seed_only(request, report).await;
        };

        report.enter(SyncPhase::FetchingCursor);
        let cursor = CursorStore::new(self.store.clone());
        let before = match cursor.get().await {
            Ok(c) => c,
            Err(e) => return report.abort(SyncError::Store(e.to_string())),
        };
        report.cursor_before = before;
        report.cursor_after = before;

        report.enter(SyncPhase::Paging);
        let fetcher = Fetcher::new(
            source,
            self.settings.page_size,
            self.settings.max_pages,
            self.settings.upstream_timeout,
        );
        let outcome = fetcher.fetch(before, &self.cancel).await;
        report.updates_observed = outcome.updates.len() as u64;

        if outcome.stop == FetchStop::Cancelled {
            warn_confirmed_loss(&outcome);
            return report.abort(SyncError::Cancelled);
        }
        let upstream_error = match outcome.error.as_ref() {
            Some(e) if outcome.pages == 0 => {
                return report.abort(SyncError::UpstreamUnavailable(e.to_string()));
            }
            Some(e) => Some(SyncError::UpstreamPartial {
                pages: outcome.pages,
                message: e.to_string(),
            }),
            None => None,
        };

        report.enter(SyncPhase::Grouping);
        let cutoff = Utc::now().timestamp() - request.window.as_secs() as i64;
        let groups = group_updates(
            &outcome.updates,
            &self.settings.target,
            cutoff,
            self.resolver.as_ref(),
        );
        report.groups = groups.len() as u64;

        report.enter(SyncPhase::Merging);
        let existing = match self.store.get_all(&self.settings.keys.live).await {
            Ok(records) => records,
            Err(e) => {
                warn_confirmed_loss(&outcome);
                return report.abort(SyncError::Store(e.to_string()));
            }
        };
        let merged = merge_collection(existing, &groups, &self.settings.placeholders);
        report.added = merged.added;
        report.merged = merged.merged;

        if self.cancel.load(Ordering::Relaxed) {
            warn_confirmed_loss(&outcome);
            return report.abort(SyncError::Cancelled);
        }
        if lease.is_lost() {
            warn_confirmed_loss(&outcome);
            return report.abort(SyncError::LeaseLost);
        }

        report.enter(SyncPhase::Persisting);
        if let Err(e) = self
            .store
            .put_all(&self.settings.keys.live, &merged.records)
            .await
        {
            warn_confirmed_loss(&outcome);
            return report.abort(SyncError::PersistenceFailure(e.to_string()));
        }
        report.records_total = merged.records.len() as u64;

        report.enter(SyncPhase::AdvancingCursor);
        if let Some(last) = outcome.last_update_id() {
            match cursor.set(last).await {
                Ok(now) => report.cursor_after = now,
                Err(e) => {
                    warn!(
                        error = %e,
                        cursor = last,
                        "Cursor write failed; next pass retries from the previous cursor"
                    );
                }
            }
        }

        report.enter(SyncPhase::Idle);
        report.error = upstream_error;

        if let Some(target) = request.seed_target {
            self.apply_seed(target, &mut report).await;
        }

        report
    }

    async fn run_seed_only(&self, request: &SyncRequest, mut report: SyncReport) -> SyncReport {
        let Some(target) = request.seed_target else {
            return report.abort(SyncError::ConfigurationMissing(
                "no update source configured (TELEGRAM_BOT_TOKEN unset)".to_string(),
            ));
        };
        info!(target, "No update source configured, running seed only");
        self.apply_seed(target, &mut report).await;
        if report.error.is_some() {
            report.aborted_in = Some(SyncPhase::Persisting);
            report.phase = SyncPhase::Aborted;
        }
        report
    }

    async fn apply_seed(&self, target: usize, report: &mut SyncReport) {
        match recovery::seed(self.store.as_ref(), &self.settings.keys, target).await {
            Ok(seeded) => {
                report.added += seeded.added;
                report.records_total = seeded.total;
                report.seed = Some(seeded);
            }
            Err(e) => {
                warn!(error = %e, "Seeding failed");
                report.error.get_or_insert(e);
            }
        }
    }

    /// Top the live collection up from the seed snapshot, under the run lease.
    pub async fn seed(&self, target: usize) -> Result<SeedReport, SyncError> {
        let lease = self.acquire().await?;
        let result = recovery::seed(self.store.as_ref(), &self.settings.keys, target).await;
        self.release(lease).await;
        result
    }

    /// Reload the live collection from the backup snapshot, under the run lease.
    pub async fn restore(&self) -> Result<RestoreReport, SyncError> {
        let lease = self.acquire().await?;
        let result = recovery::restore(
            self.store.as_ref(),
            &self.settings.keys,
            self.settings.historical_cutoff,
        )
        .await;
        self.release(lease).await;
        result
    }

    /// Take the run lease and keep it renewed until released.
    async fn acquire(&self) -> Result<LeaseHeartbeat, SyncError> {
        let holder = format!("sync-{}", Uuid::new_v4());
        let ttl = self.settings.lease_ttl;
        match self.store.try_acquire_lease(&holder, ttl).await {
            Ok(true) => {
                debug!(holder = %holder, ttl_ms = ttl.as_millis() as u64, "Sync lease acquired");
                Ok(LeaseHeartbeat::start(self.store.clone(), holder, ttl))
            }
            Ok(false) => {
                warn!("Another sync pass holds the lease, exiting");
                Err(SyncError::AlreadyRunning)
            }
            Err(e) => Err(SyncError::Store(e.to_string())),
        }
    }

    async fn release(&self, lease: LeaseHeartbeat) {
        if lease.is_lost() {
            return;
        }
        let holder = lease.stop().await;
        if let Err(e) = self.store.release_lease(&holder).await {
            warn!(error = %e, "Failed to release sync lease");
        }
    }
}

/// The Bot API confirms every update below the offset of each request, so
/// once a second page has been asked for, the earlier pages are gone upstream.
/// A pass that then fails to persist loses them.
fn warn_confirmed_loss(outcome: &FetchOutcome) {
    if outcome.pages > 1 {
        warn!(
            pages = outcome.pages,
            updates = outcome.updates.len(),
            first = outcome.updates.first().map(|u| u.update_id),
            "Pass ended without persisting after later pages confirmed earlier ones upstream"
        );
    }
}

/// The collection after merging, with counts.
#[derive(Debug)]
pub struct MergedCollection {
    pub records: Vec<ContentRecord>,
    pub added: u64,
    pub merged: u64,
}

/// Fold `groups` into `existing`. Records no group touches pass through in
/// place; new records are appended in group order.
pub fn merge_collection(
    existing: Vec<ContentRecord>,
    groups: &[MessageGroup],
    placeholders: &Placeholders,
) -> MergedCollection {
    let mut records = existing;
    let mut index: HashMap<String, usize> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id.clone(), i))
        .collect();
    let mut added = 0;
    let mut merged = 0;

    for group in groups {
        let id = group.record_id();
        match index.get(&id) {
            Some(&i) => {
                let next = merge(Some(&records[i]), group, placeholders);
                if next != records[i] {
                    merged += 1;
                    records[i] = next;
                }
            }
            None => {
                records.push(merge(None, group, placeholders));
                index.insert(id, records.len() - 1);
                added += 1;
            }
        }
    }

    MergedCollection {
        records,
        added,
        merged,
    }
}
