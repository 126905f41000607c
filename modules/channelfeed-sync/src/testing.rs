// Test doubles for the sync engine.
//
// Two mocks matching the two async trait boundaries:
// - MockUpdateSource (UpdateSource) — fixed update list, paged like the Bot API
// - MemoryStore (ContentStore) — collections, cursor and lease in memory
//
// Plus fixture builders for updates, messages and records.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use channelfeed_common::{ChannelMessage, ContentRecord, RawUpdate};

use crate::traits::{ContentStore, UpdateSource};

/// Chat the fixtures post into.
pub const TEST_CHAT_ID: i64 = -1001234567890;
pub const TEST_CHAT_USERNAME: &str = "shop";

// ---------------------------------------------------------------------------
// MockUpdateSource
// ---------------------------------------------------------------------------

/// Serves a fixed update list. Builder knobs: `.fail_on_call()`,
/// `.unavailable()`, `.with_delay()`, `.confirming()`.
pub struct MockUpdateSource {
    updates: Vec<RawUpdate>,
    fail_on: Option<u32>,
    always_fail: bool,
    delay: Option<Duration>,
    confirming: bool,
    confirmed: Mutex<i64>,
    calls: AtomicU32,
    offsets: Mutex<Vec<i64>>,
}

impl MockUpdateSource {
    pub fn new(mut updates: Vec<RawUpdate>) -> Self {
        updates.sort_by_key(|u| u.update_id);
        Self {
            updates,
            fail_on: None,
            always_fail: false,
            delay: None,
            confirming: false,
            confirmed: Mutex::new(i64::MIN),
            calls: AtomicU32::new(0),
            offsets: Mutex::new(Vec::new()),
        }
    }

    /// Fail the `n`th call (1-indexed) and every call after it.
    pub fn fail_on_call(mut self, n: u32) -> Self {
        self.fail_on = Some(n);
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.always_fail = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Drop every update at or below `after` for good on each call, the way
    /// the Bot API forgets updates below the requested offset.
    pub fn confirming(mut self) -> Self {
        self.confirming = true;
        self
    }

    /// The `after` argument of every call so far.
    pub fn requested_offsets(&self) -> Vec<i64> {
        self.offsets.lock().unwrap().clone()
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpdateSource for MockUpdateSource {
    async fn list_updates(&self, after: i64, limit: u32) -> Result<Vec<RawUpdate>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.offsets.lock().unwrap().push(after);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.always_fail {
            bail!("MockUpdateSource: upstream unavailable");
        }
        if self.fail_on.is_some_and(|n| call >= n) {
            bail!("MockUpdateSource: failure on call {call}");
        }

        let floor = {
            let mut confirmed = self.confirmed.lock().unwrap();
            if self.confirming {
                *confirmed = (*confirmed).max(after);
            }
            (*confirmed).max(after)
        };

        Ok(self
            .updates
            .iter()
            .filter(|u| u.update_id > floor)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    collections: HashMap<String, Vec<ContentRecord>>,
    cursor: Option<i64>,
    lease: Option<String>,
}

/// In-memory ContentStore with failure injection.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    puts: AtomicU32,
    cursor_writes: AtomicU32,
    lease_attempts: AtomicU32,
    fail_puts: AtomicBool,
    fail_reads: AtomicBool,
    fail_cursor_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(self, key: &str, records: Vec<ContentRecord>) -> Self {
        self.state
            .lock()
            .unwrap()
            .collections
            .insert(key.to_string(), records);
        self
    }

    pub fn with_cursor(self, cursor: i64) -> Self {
        self.state.lock().unwrap().cursor = Some(cursor);
        self
    }

    /// Pretend another pass already holds the lease.
    pub fn with_lease_held_by(self, holder: &str) -> Self {
        self.state.lock().unwrap().lease = Some(holder.to_string());
        self
    }

    pub fn records(&self, key: &str) -> Vec<ContentRecord> {
        self.state
            .lock()
            .unwrap()
            .collections
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn cursor(&self) -> Option<i64> {
        self.state.lock().unwrap().cursor
    }

    pub fn lease_holder(&self) -> Option<String> {
        self.state.lock().unwrap().lease.clone()
    }

    pub fn put_count(&self) -> u32 {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn cursor_writes(&self) -> u32 {
        self.cursor_writes.load(Ordering::SeqCst)
    }

    /// Hand the lease to `holder` behind the current holder's back.
    pub fn take_over_lease(&self, holder: &str) {
        self.state.lock().unwrap().lease = Some(holder.to_string());
    }

    /// Calls to `try_acquire_lease`, renewals included.
    pub fn lease_attempts(&self) -> u32 {
        self.lease_attempts.load(Ordering::SeqCst)
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_cursor_writes(&self, fail: bool) {
        self.fail_cursor_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn get_all(&self, key: &str) -> Result<Vec<ContentRecord>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("MemoryStore: read of {key} failed");
        }
        Ok(self.records(key))
    }

    async fn put_all(&self, key: &str, records: &[ContentRecord]) -> Result<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            bail!("MemoryStore: write of {key} failed");
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .unwrap()
            .collections
            .insert(key.to_string(), records.to_vec());
        Ok(())
    }

    async fn get_cursor(&self) -> Result<Option<i64>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("MemoryStore: cursor read failed");
        }
        Ok(self.cursor())
    }

    async fn set_cursor(&self, value: i64) -> Result<()> {
        if self.fail_cursor_writes.load(Ordering::SeqCst) {
            bail!("MemoryStore: cursor write failed");
        }
        self.cursor_writes.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap().cursor = Some(value);
        Ok(())
    }

    async fn try_acquire_lease(&self, holder: &str, _ttl: Duration) -> Result<bool> {
        self.lease_attempts.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        match &state.lease {
            Some(current) if current != holder => Ok(false),
            _ => {
                state.lease = Some(holder.to_string());
                Ok(true)
            }
        }
    }

    async fn release_lease(&self, holder: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.lease.as_deref() == Some(holder) {
            state.lease = None;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn update(update_id: i64, message: ChannelMessage) -> RawUpdate {
    RawUpdate {
        update_id,
        message: Some(message),
    }
}

/// A standalone text post in the test chat.
pub fn single_message(message_id: i64, date: i64, text: &str) -> ChannelMessage {
    ChannelMessage {
        chat_id: TEST_CHAT_ID,
        chat_username: Some(TEST_CHAT_USERNAME.to_string()),
        message_id,
        date,
        text: text.to_string(),
        ..Default::default()
    }
}

/// One slide of album `album` carrying the given photo references.
pub fn album_message(
    message_id: i64,
    album: &str,
    date: i64,
    text: &str,
    photos: &[&str],
) -> ChannelMessage {
    ChannelMessage {
        album_id: Some(album.to_string()),
        photos: photos.iter().map(|p| p.to_string()).collect(),
        ..single_message(message_id, date, text)
    }
}

/// A fully filled stored record.
pub fn record(id: &str, published_at: i64) -> ContentRecord {
    let image = format!("/img/{id}.jpg");
    ContentRecord {
        id: id.to_string(),
        title: format!("Post {id}"),
        hashtag_line: "#tag".to_string(),
        description: format!("Description {id}"),
        link: format!("https://t.me/{TEST_CHAT_USERNAME}/{id}"),
        primary_image: image.clone(),
        images: vec![image],
        video_link: None,
        published_at: Some(published_at),
        ..Default::default()
    }
}
