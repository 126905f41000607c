//! Sync passes against the JSON file store in a temp directory.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use channelfeed_common::{ChatTarget, Placeholders};
use channelfeed_sync::testing::{single_message, update, MockUpdateSource};
use channelfeed_sync::{
    ChannelSync, CollectionKeys, FileContentStore, ProxyFileResolver, SyncError, SyncRequest,
    SyncSettings, UpdateSource,
};

fn settings(lease_ttl: Duration) -> SyncSettings {
    SyncSettings {
        target: ChatTarget::Username("shop".to_string()),
        page_size: 100,
        max_pages: 50,
        upstream_timeout: Duration::from_secs(5),
        lease_ttl,
        keys: CollectionKeys {
            live: "posts".to_string(),
            seed: "posts_seed".to_string(),
            backup: "posts_backup".to_string(),
        },
        placeholders: Placeholders::default(),
        historical_cutoff: 1_000,
    }
}

fn all_time() -> SyncRequest {
    SyncRequest {
        window: Duration::from_secs(100 * 365 * 24 * 3600),
        seed_target: None,
    }
}

fn engine(dir: &Path, source: Arc<dyn UpdateSource>, lease_ttl: Duration) -> ChannelSync {
    let store = FileContentStore::open(dir, "last_update_id").unwrap();
    ChannelSync::new(
        Arc::new(store),
        Arc::new(ProxyFileResolver::new("/api/telegram-file")),
        settings(lease_ttl),
    )
    .with_source(source)
}

fn stored(dir: &Path) -> Vec<Value> {
    let bytes = std::fs::read(dir.join("posts.json")).unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn untouched_record_keeps_unknown_and_missing_fields() {
    let dir = tempfile::tempdir().unwrap();
    let legacy = json!({"id": "42", "title": "Old post", "category": "coats", "price": "99"});
    std::fs::write(
        dir.path().join("posts.json"),
        serde_json::to_vec_pretty(&json!([legacy])).unwrap(),
    )
    .unwrap();

    let source: Arc<dyn UpdateSource> = Arc::new(MockUpdateSource::new(vec![update(
        1,
        single_message(600, 1_000, "New coat\nwarm"),
    )]));
    let report = engine(dir.path(), source.clone(), Duration::from_secs(60))
        .run(all_time())
        .await;
    assert!(!report.is_aborted(), "{report}");
    assert_eq!(report.added, 1);

    let records = stored(dir.path());
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], legacy);
    assert_eq!(records[1]["id"], "600");

    // A pass with nothing new rewrites the file byte for byte.
    let before = std::fs::read(dir.path().join("posts.json")).unwrap();
    let report = engine(dir.path(), source, Duration::from_secs(60))
        .run(all_time())
        .await;
    assert!(!report.is_aborted(), "{report}");
    assert_eq!(std::fs::read(dir.path().join("posts.json")).unwrap(), before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lease_outlives_its_ttl_while_the_pass_runs() {
    let dir = tempfile::tempdir().unwrap();
    let ttl = Duration::from_secs(1);
    let slow: Arc<dyn UpdateSource> = Arc::new(
        MockUpdateSource::new(vec![update(1, single_message(600, 1_000, "Slow"))])
            .with_delay(Duration::from_millis(2_500)),
    );
    let first = engine(dir.path(), slow.clone(), ttl);
    let second = engine(dir.path(), slow, ttl);

    let late = async {
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        second.run(all_time()).await
    };
    let (ra, rb) = tokio::join!(first.run(all_time()), late);

    assert!(!ra.is_aborted(), "{ra}");
    assert!(matches!(rb.error, Some(SyncError::AlreadyRunning)), "{rb}");
    assert_eq!(stored(dir.path()).len(), 1);
    assert!(!dir.path().join("sync.lease").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_passes_on_separate_handles_run_once() {
    let dir = tempfile::tempdir().unwrap();
    let source: Arc<dyn UpdateSource> = Arc::new(
        MockUpdateSource::new(vec![update(1, single_message(600, 1_000, "Once"))])
            .with_delay(Duration::from_millis(200)),
    );
    let engines: Vec<ChannelSync> = (0..4)
        .map(|_| engine(dir.path(), source.clone(), Duration::from_secs(60)))
        .collect();

    let reports = futures::future::join_all(engines.iter().map(|e| e.run(all_time()))).await;
    let refused = reports
        .iter()
        .filter(|r| matches!(r.error, Some(SyncError::AlreadyRunning)))
        .count();
    assert_eq!(refused, 3);
    assert_eq!(stored(dir.path()).len(), 1);
}
