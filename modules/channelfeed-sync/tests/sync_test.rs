//! End-to-end sync passes against the in-memory store and a scripted source.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use channelfeed_common::{ChatTarget, Placeholders};
use channelfeed_sync::testing::{
    album_message, record, single_message, update, MemoryStore, MockUpdateSource,
};
use channelfeed_sync::{
    ChannelSync, CollectionKeys, ProxyFileResolver, SyncError, SyncPhase, SyncRequest,
    SyncSettings, UpdateSource,
};

const LIVE: &str = "posts";
const SEED: &str = "posts_seed";
const BACKUP: &str = "posts_backup";

fn settings() -> SyncSettings {
    SyncSettings {
        target: ChatTarget::Username("shop".to_string()),
        page_size: 100,
        max_pages: 50,
        upstream_timeout: Duration::from_secs(5),
        lease_ttl: Duration::from_secs(60),
        keys: CollectionKeys {
            live: LIVE.to_string(),
            seed: SEED.to_string(),
            backup: BACKUP.to_string(),
        },
        placeholders: Placeholders::default(),
        historical_cutoff: 1_000,
    }
}

/// Wide enough that fixture timestamps near the epoch are inside it.
fn all_time() -> SyncRequest {
    SyncRequest {
        window: Duration::from_secs(100 * 365 * 24 * 3600),
        seed_target: None,
    }
}

fn engine(store: &Arc<MemoryStore>, source: Option<Arc<dyn UpdateSource>>) -> ChannelSync {
    let sync = ChannelSync::new(
        store.clone(),
        Arc::new(ProxyFileResolver::new("/api/telegram-file")),
        settings(),
    );
    match source {
        Some(source) => sync.with_source(source),
        None => sync,
    }
}

fn album_updates() -> Vec<channelfeed_common::RawUpdate> {
    vec![
        update(1, album_message(501, "77", 1000, "", &["p1"])),
        update(2, album_message(502, "77", 1005, "Осень #мода", &["p2"])),
    ]
}

fn numbered(range: std::ops::RangeInclusive<i64>) -> Vec<channelfeed_common::RawUpdate> {
    range
        .map(|i| update(i, single_message(i, 1_000 + i, &format!("post {i}"))))
        .collect()
}

#[tokio::test]
async fn album_becomes_one_record() {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(MockUpdateSource::new(album_updates()));
    let report = engine(&store, Some(source)).run(all_time()).await;

    assert_eq!(report.phase, SyncPhase::Idle);
    assert!(report.error.is_none());
    assert_eq!(report.added, 1);
    assert_eq!(report.updates_observed, 2);
    assert_eq!(report.cursor_after, 2);
    assert!(report.cursor_advanced());

    let records = store.records(LIVE);
    assert_eq!(records.len(), 1);
    let r = &records[0];
    assert_eq!(r.id, "501");
    assert_eq!(r.title, "Осень #мода");
    assert_eq!(r.hashtag_line, "#мода");
    assert_eq!(r.description, "Осень #мода");
    assert_eq!(r.link, "https://t.me/shop/501");
    assert_eq!(r.primary_image, "/api/telegram-file?fileId=p1");
    assert_eq!(r.images.len(), 2);
    assert_eq!(r.published_at, Some(1005));
    assert_eq!(store.cursor(), Some(2));
}

#[tokio::test]
async fn replaying_the_same_updates_changes_nothing() {
    let first = Arc::new(MemoryStore::new());
    let source: Arc<dyn UpdateSource> = Arc::new(MockUpdateSource::new(album_updates()));
    engine(&first, Some(source.clone())).run(all_time()).await;
    let before = serde_json::to_string(&first.records(LIVE)).unwrap();

    // Same collection, cursor lost: every update is folded in again.
    let second = Arc::new(MemoryStore::new().with_records(LIVE, first.records(LIVE)));
    let report = engine(&second, Some(source)).run(all_time()).await;

    assert_eq!(report.added, 0);
    assert_eq!(report.merged, 0);
    assert_eq!(serde_json::to_string(&second.records(LIVE)).unwrap(), before);
}

#[tokio::test]
async fn second_pass_sees_nothing_new() {
    let store = Arc::new(MemoryStore::new());
    let source: Arc<dyn UpdateSource> = Arc::new(MockUpdateSource::new(album_updates()));
    engine(&store, Some(source.clone())).run(all_time()).await;
    let before = serde_json::to_string(&store.records(LIVE)).unwrap();

    let report = engine(&store, Some(source)).run(all_time()).await;
    assert_eq!(report.updates_observed, 0);
    assert!(!report.cursor_advanced());
    assert_eq!(store.cursor(), Some(2));
    assert_eq!(serde_json::to_string(&store.records(LIVE)).unwrap(), before);
}

#[tokio::test]
async fn manual_edits_survive_a_pass() {
    let mut edited = record("501", 900);
    edited.title = "Curated title".to_string();
    let store = Arc::new(MemoryStore::new().with_records(LIVE, vec![edited]));
    let source = Arc::new(MockUpdateSource::new(album_updates()));
    let report = engine(&store, Some(source)).run(all_time()).await;

    assert_eq!(report.added, 0);
    assert_eq!(report.merged, 1);
    let r = &store.records(LIVE)[0];
    assert_eq!(r.title, "Curated title");
    assert_eq!(r.images, vec!["/img/501.jpg"]);
    assert_eq!(r.published_at, Some(1005));
}

#[tokio::test]
async fn cursor_only_moves_forward() {
    let store = Arc::new(MemoryStore::new().with_cursor(50));
    let source = Arc::new(MockUpdateSource::new(numbered(1..=60)));
    let report = engine(&store, Some(source.clone())).run(all_time()).await;

    assert_eq!(source.requested_offsets()[0], 50);
    assert_eq!(report.updates_observed, 10);
    assert_eq!(report.cursor_before, 50);
    assert_eq!(report.cursor_after, 60);
    assert_eq!(store.records(LIVE).len(), 10);
}

#[tokio::test]
async fn stale_posts_are_ignored_but_cursor_advances() {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(MockUpdateSource::new(numbered(1..=3)));
    let request = SyncRequest {
        window: Duration::from_secs(3600),
        seed_target: None,
    };
    let report = engine(&store, Some(source)).run(request).await;

    assert_eq!(report.groups, 0);
    assert!(store.records(LIVE).is_empty());
    assert_eq!(store.cursor(), Some(3));
}

#[tokio::test]
async fn unavailable_upstream_changes_nothing() {
    let store = Arc::new(MemoryStore::new().with_records(LIVE, vec![record("1", 10)]));
    let source = Arc::new(MockUpdateSource::new(numbered(1..=5)).unavailable());
    let report = engine(&store, Some(source)).run(all_time()).await;

    assert!(report.is_aborted());
    assert_eq!(report.aborted_in, Some(SyncPhase::Paging));
    assert!(matches!(report.error, Some(SyncError::UpstreamUnavailable(_))));
    assert_eq!(store.put_count(), 0);
    assert_eq!(store.cursor(), None);
    assert_eq!(store.lease_holder(), None);
}

#[tokio::test]
async fn partial_upstream_keeps_what_arrived() {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(MockUpdateSource::new(numbered(1..=250)).fail_on_call(2));
    let report = engine(&store, Some(source)).run(all_time()).await;

    assert!(!report.is_aborted());
    assert!(report.error.as_ref().is_some_and(SyncError::is_partial));
    assert_eq!(store.records(LIVE).len(), 100);
    assert_eq!(store.cursor(), Some(100));
}

#[tokio::test]
async fn persistence_failure_leaves_cursor_alone() {
    let store = Arc::new(MemoryStore::new());
    store.fail_puts(true);
    let source = Arc::new(MockUpdateSource::new(album_updates()));
    let report = engine(&store, Some(source)).run(all_time()).await;

    assert_eq!(report.aborted_in, Some(SyncPhase::Persisting));
    assert!(matches!(report.error, Some(SyncError::PersistenceFailure(_))));
    assert_eq!(store.cursor(), None);
}

#[tokio::test]
async fn single_page_pass_retries_after_failed_write() {
    let store = Arc::new(MemoryStore::new());
    store.fail_puts(true);
    let source = Arc::new(MockUpdateSource::new(numbered(1..=50)).confirming());
    let report = engine(&store, Some(source.clone())).run(all_time()).await;
    assert!(matches!(report.error, Some(SyncError::PersistenceFailure(_))));

    store.fail_puts(false);
    let report = engine(&store, Some(source)).run(all_time()).await;
    assert!(!report.is_aborted());
    assert_eq!(store.records(LIVE).len(), 50);
    assert_eq!(store.cursor(), Some(50));
}

#[tokio::test]
async fn failed_write_after_several_pages_loses_the_confirmed_pages() {
    let store = Arc::new(MemoryStore::new());
    store.fail_puts(true);
    let source = Arc::new(MockUpdateSource::new(numbered(1..=150)).confirming());
    let report = engine(&store, Some(source.clone())).run(all_time()).await;
    assert!(matches!(report.error, Some(SyncError::PersistenceFailure(_))));
    assert_eq!(report.updates_observed, 150);
    assert_eq!(store.cursor(), None);

    // Asking for the second page confirmed the first upstream.
    store.fail_puts(false);
    let report = engine(&store, Some(source.clone())).run(all_time()).await;
    assert!(!report.is_aborted());
    let ids: Vec<String> = store.records(LIVE).into_iter().map(|r| r.id).collect();
    assert_eq!(ids.len(), 50);
    assert_eq!(ids.first().map(String::as_str), Some("101"));
    assert_eq!(store.cursor(), Some(150));
    assert_eq!(source.requested_offsets(), vec![0, 100, 0]);
}

#[tokio::test]
async fn cursor_write_failure_is_not_fatal() {
    let store = Arc::new(MemoryStore::new());
    store.fail_cursor_writes(true);
    let source = Arc::new(MockUpdateSource::new(album_updates()));
    let report = engine(&store, Some(source)).run(all_time()).await;

    assert!(!report.is_aborted());
    assert_eq!(store.records(LIVE).len(), 1);
    assert_eq!(report.cursor_after, 0);
}

#[tokio::test]
async fn cancelled_pass_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(MockUpdateSource::new(album_updates()));
    let cancel = Arc::new(AtomicBool::new(true));
    let report = engine(&store, Some(source))
        .with_cancel(cancel)
        .run(all_time())
        .await;

    assert!(matches!(report.error, Some(SyncError::Cancelled)));
    assert_eq!(store.put_count(), 0);
    assert_eq!(store.cursor(), None);
}

#[tokio::test]
async fn store_read_failure_aborts_before_fetch() {
    let store = Arc::new(MemoryStore::new());
    store.fail_reads(true);
    let source = Arc::new(MockUpdateSource::new(album_updates()));
    let report = engine(&store, Some(source.clone())).run(all_time()).await;

    assert_eq!(report.aborted_in, Some(SyncPhase::FetchingCursor));
    assert!(matches!(report.error, Some(SyncError::Store(_))));
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn no_source_without_seed_target_is_a_config_error() {
    let store = Arc::new(MemoryStore::new());
    let report = engine(&store, None).run(all_time()).await;
    assert!(matches!(report.error, Some(SyncError::ConfigurationMissing(_))));
    assert!(report.is_aborted());
}

#[tokio::test]
async fn no_source_with_seed_target_seeds() {
    let store = Arc::new(
        MemoryStore::new()
            .with_records(SEED, vec![record("s1", 1), record("s2", 2), record("s3", 3)]),
    );
    let request = SyncRequest {
        seed_target: Some(2),
        ..all_time()
    };
    let report = engine(&store, None).run(request).await;

    assert!(!report.is_aborted());
    assert_eq!(report.added, 2);
    assert_eq!(report.records_total, 2);
    assert_eq!(store.records(LIVE).len(), 2);
}

#[tokio::test]
async fn seed_runs_after_sync_when_requested() {
    let store =
        Arc::new(MemoryStore::new().with_records(SEED, vec![record("s1", 1), record("s2", 2)]));
    let source = Arc::new(MockUpdateSource::new(album_updates()));
    let request = SyncRequest {
        seed_target: Some(3),
        ..all_time()
    };
    let report = engine(&store, Some(source)).run(request).await;

    let ids: Vec<String> = store.records(LIVE).into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec!["501", "s1", "s2"]);
    assert_eq!(report.seed.map(|s| s.added), Some(2));
}

#[tokio::test]
async fn held_lease_refuses_a_second_pass() {
    let store = Arc::new(MemoryStore::new().with_lease_held_by("sync-other"));
    let source = Arc::new(MockUpdateSource::new(album_updates()));
    let report = engine(&store, Some(source.clone())).run(all_time()).await;

    assert!(matches!(report.error, Some(SyncError::AlreadyRunning)));
    assert_eq!(source.calls(), 0);
    assert_eq!(store.lease_holder().as_deref(), Some("sync-other"));
}

#[tokio::test]
async fn overlapping_passes_run_one_at_a_time() {
    let store = Arc::new(MemoryStore::new());
    let source: Arc<dyn UpdateSource> = Arc::new(
        MockUpdateSource::new(album_updates()).with_delay(Duration::from_millis(50)),
    );
    let a = engine(&store, Some(source.clone()));
    let b = engine(&store, Some(source));

    let (ra, rb) = futures::join!(a.run(all_time()), b.run(all_time()));
    let refused = [&ra, &rb]
        .iter()
        .filter(|r| matches!(r.error, Some(SyncError::AlreadyRunning)))
        .count();
    assert_eq!(refused, 1);
    assert_eq!(store.records(LIVE).len(), 1);
    assert_eq!(store.lease_holder(), None);
}

#[tokio::test]
async fn lease_lost_mid_pass_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(
        MockUpdateSource::new(album_updates()).with_delay(Duration::from_millis(400)),
    );
    let sync = ChannelSync::new(
        store.clone(),
        Arc::new(ProxyFileResolver::new("/api/telegram-file")),
        SyncSettings {
            lease_ttl: Duration::from_millis(300),
            ..settings()
        },
    )
    .with_source(source);

    let thief = {
        let store = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            store.take_over_lease("sync-other");
        })
    };
    let report = sync.run(all_time()).await;
    thief.await.unwrap();

    assert!(matches!(report.error, Some(SyncError::LeaseLost)));
    assert_eq!(report.aborted_in, Some(SyncPhase::Merging));
    assert_eq!(store.put_count(), 0);
    assert_eq!(store.cursor(), None);
    assert_eq!(store.lease_holder().as_deref(), Some("sync-other"));
}

#[tokio::test]
async fn restore_reloads_backup() {
    let store = Arc::new(
        MemoryStore::new()
            .with_records(LIVE, vec![])
            .with_records(BACKUP, vec![record("1", 500), record("2", 2_000)]),
    );
    let report = engine(&store, None).restore().await.unwrap();

    assert_eq!(report.restored, 2);
    assert_eq!(report.newer_than_cutoff, 1);
    assert_eq!(store.records(LIVE).len(), 2);
    assert_eq!(store.lease_holder(), None);
}

#[tokio::test]
async fn seed_command_respects_lease() {
    let store = Arc::new(
        MemoryStore::new()
            .with_lease_held_by("sync-other")
            .with_records(SEED, vec![record("s1", 1)]),
    );
    let err = engine(&store, None).seed(5).await.unwrap_err();
    assert!(matches!(err, SyncError::AlreadyRunning));
    assert!(store.records(LIVE).is_empty());
}
