// Trait abstractions for the sync engine's collaborators.
//
// UpdateSource is the upstream post stream (the Telegram Bot API in production).
// ContentStore holds the record collections, the cursor and the run lease.
// FileResolver turns opaque file references into addresses a page can load.
//
// These enable deterministic testing with MockUpdateSource and MemoryStore:
// no network, no database.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use channelfeed_common::{AnnotationKind, ChannelMessage, ContentRecord, LinkAnnotation, RawUpdate};

// ---------------------------------------------------------------------------
// UpdateSource
// ---------------------------------------------------------------------------

#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Up to `limit` updates with a sequence number greater than `after`,
    /// in sequence order.
    ///
    /// The Bot API treats `after` as an acknowledgement: updates at or below
    /// it are discarded upstream and never served again.
    async fn list_updates(&self, after: i64, limit: u32) -> Result<Vec<RawUpdate>>;
}

#[async_trait]
impl UpdateSource for telegram_client::TelegramClient {
    async fn list_updates(&self, after: i64, limit: u32) -> Result<Vec<RawUpdate>> {
        let updates = self.get_updates(after + 1, limit).await?;
        Ok(updates.iter().map(raw_update).collect())
    }
}

/// Convert a Bot API update into the engine's input shape.
pub fn raw_update(update: &telegram_client::Update) -> RawUpdate {
    RawUpdate {
        update_id: update.update_id,
        message: update.post().map(channel_message),
    }
}

fn channel_message(msg: &telegram_client::Message) -> ChannelMessage {
    let annotations = msg
        .body_entities()
        .iter()
        .filter_map(|e| {
            let kind = match (e.kind.as_str(), &e.url) {
                ("url", _) => AnnotationKind::Url,
                ("text_link", Some(url)) => AnnotationKind::TextLink { url: url.clone() },
                _ => return None,
            };
            Some(LinkAnnotation {
                kind,
                offset: e.offset,
                length: e.length,
            })
        })
        .collect();

    let photos = msg
        .largest_photo()
        .map(|p| p.file_id.clone())
        .into_iter()
        .chain(msg.image_document().map(|d| d.file_id.clone()))
        .collect();

    ChannelMessage {
        chat_id: msg.chat.id,
        chat_username: msg.chat.username.clone(),
        message_id: msg.message_id,
        album_id: msg.media_group_id.clone(),
        date: msg.date,
        text: msg.body().unwrap_or_default().to_string(),
        annotations,
        photos,
        video: msg.video.as_ref().map(|v| v.file_id.clone()),
    }
}

// ---------------------------------------------------------------------------
// ContentStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Every record stored under `key`; empty when the key has never been written.
    async fn get_all(&self, key: &str) -> Result<Vec<ContentRecord>>;

    /// Replace the whole collection under `key` in one write.
    async fn put_all(&self, key: &str, records: &[ContentRecord]) -> Result<()>;

    /// Last persisted cursor, `None` before the first successful pass.
    async fn get_cursor(&self) -> Result<Option<i64>>;

    async fn set_cursor(&self, value: i64) -> Result<()>;

    /// Take the run lease for `holder` until `ttl` from now. Returns false
    /// while another holder's lease is unexpired. Calling again as the same
    /// holder extends the lease. Two concurrent callers never both get true.
    async fn try_acquire_lease(&self, holder: &str, ttl: Duration) -> Result<bool>;

    /// Drop the lease if `holder` still owns it.
    async fn release_lease(&self, holder: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// FileResolver
// ---------------------------------------------------------------------------

pub trait FileResolver: Send + Sync {
    /// Address at which the file behind `file_ref` can be fetched.
    fn resolve(&self, file_ref: &str) -> String;
}
