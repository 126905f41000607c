// Folds a batch of raw updates into one group per logical post.
//
// Album slides arrive as separate messages sharing an album id; they collapse
// into a single group. Everything else is its own group.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::debug;

use channelfeed_common::{ChannelMessage, ChatTarget, LinkAnnotation, RawUpdate};

use crate::traits::FileResolver;

/// Bucket key for a post.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum GroupKey {
    Album(String),
    Single(i64),
}

impl GroupKey {
    fn for_message(msg: &ChannelMessage) -> Self {
        match msg.album_id.as_deref().filter(|a| !a.is_empty()) {
            Some(album) => Self::Album(album.to_string()),
            None => Self::Single(msg.message_id),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Album(id) => write!(f, "group:{id}"),
            Self::Single(id) => write!(f, "single:{id}"),
        }
    }
}

/// All messages belonging to one logical post, folded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageGroup {
    pub key: GroupKey,
    /// Smallest member message id; the record id derives from it.
    pub id: i64,
    pub message_ids: BTreeSet<i64>,
    pub chat_id: i64,
    pub chat_username: Option<String>,
    /// Longest text seen among members.
    pub text: String,
    /// Annotations belonging to `text`.
    pub annotations: Vec<LinkAnnotation>,
    /// Resolved image addresses, in fold order.
    pub images: Vec<String>,
    pub video: Option<String>,
    pub max_timestamp: i64,
}

impl MessageGroup {
    pub fn record_id(&self) -> String {
        self.id.to_string()
    }

    /// Deep link to the first message of the post.
    pub fn permalink(&self) -> String {
        match self.chat_username.as_deref().filter(|u| !u.is_empty()) {
            Some(username) => format!("https://t.me/{username}/{}", self.id),
            None => {
                let chat = self.chat_id.to_string();
                let internal = chat
                    .strip_prefix("-100")
                    .map(str::to_string)
                    .unwrap_or_else(|| self.chat_id.unsigned_abs().to_string());
                format!("https://t.me/c/{internal}/{}", self.id)
            }
        }
    }
}

#[derive(Default)]
struct Bucket {
    message_ids: BTreeSet<i64>,
    chat_id: i64,
    chat_username: Option<String>,
    text: String,
    text_len: usize,
    annotations: Vec<LinkAnnotation>,
    images: Vec<String>,
    video: Option<String>,
    max_timestamp: i64,
}

impl Bucket {
    fn absorb(&mut self, msg: &ChannelMessage, resolver: &dyn FileResolver) {
        self.message_ids.insert(msg.message_id);
        self.chat_id = msg.chat_id;
        if self.chat_username.is_none() {
            self.chat_username = msg.chat_username.clone();
        }
        self.max_timestamp = self.max_timestamp.max(msg.date);

        // Longest wins; equal length keeps the earlier one.
        let len = msg.text.trim().chars().count();
        if len > self.text_len {
            self.text = msg.text.clone();
            self.text_len = len;
            self.annotations = msg.annotations.clone();
        }

        for file_ref in &msg.photos {
            let image = resolver.resolve(file_ref);
            if !self.images.contains(&image) {
                self.images.push(image);
            }
        }

        if self.video.is_none() {
            self.video = msg.video.as_deref().map(|v| resolver.resolve(v));
        }
    }

    fn finish(self, key: GroupKey) -> Option<MessageGroup> {
        let id = *self.message_ids.first()?;
        if self.text_len == 0 && self.images.is_empty() {
            return None;
        }
        Some(MessageGroup {
            key,
            id,
            message_ids: self.message_ids,
            chat_id: self.chat_id,
            chat_username: self.chat_username,
            text: self.text,
            annotations: self.annotations,
            images: self.images,
            video: self.video,
            max_timestamp: self.max_timestamp,
        })
    }
}

/// Group `updates` from `target` no older than `cutoff` (unix seconds).
///
/// Messages are folded in update-sequence order regardless of the order they
/// were handed in, so regrouping any permutation of the same batch yields the
/// same groups. The result is sorted by group id.
pub fn group_updates(
    updates: &[RawUpdate],
    target: &ChatTarget,
    cutoff: i64,
    resolver: &dyn FileResolver,
) -> Vec<MessageGroup> {
    let mut ordered: Vec<(i64, &ChannelMessage)> = updates
        .iter()
        .filter_map(|u| u.message.as_ref().map(|m| (u.update_id, m)))
        .collect();
    ordered.sort_by_key(|(update_id, m)| (*update_id, m.message_id));

    let mut buckets: BTreeMap<GroupKey, Bucket> = BTreeMap::new();
    let mut foreign = 0usize;
    let mut stale = 0usize;

    for (_, msg) in ordered {
        if !target.matches(msg.chat_id, msg.chat_username.as_deref()) {
            foreign += 1;
            continue;
        }
        if msg.date < cutoff {
            stale += 1;
            continue;
        }
        buckets
            .entry(GroupKey::for_message(msg))
            .or_default()
            .absorb(msg, resolver);
    }

    let bucket_count = buckets.len();
    let mut groups: Vec<MessageGroup> = buckets
        .into_iter()
        .filter_map(|(key, bucket)| bucket.finish(key))
        .collect();
    groups.sort_by_key(|g| g.id);

    debug!(
        updates = updates.len(),
        foreign,
        stale,
        buckets = bucket_count,
        groups = groups.len(),
        "Grouped updates"
    );

    groups
}
