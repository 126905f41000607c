use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// --- Published content ---

/// A published content item derived from one or more channel messages.
///
/// `id` is the decimal string of the smallest message id folded into the
/// record. Older collections may lack some fields entirely and operators add
/// fields of their own. Known fields default on read and empty ones are
/// omitted on write; unknown fields ride along in `extra`. A record no pass
/// touches is therefore written back with the same content it was read with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    /// Space-separated `#tags`, case preserved.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hashtag_line: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Deep link to the source post.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub link: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub primary_image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_link: Option<String>,
    /// Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<i64>,
    /// Fields this engine does not model (operator additions, legacy keys).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// --- Upstream input ---

/// One entry from the update stream. `message` is `None` for update kinds
/// that carry no post; those still advance the cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawUpdate {
    pub update_id: i64,
    pub message: Option<ChannelMessage>,
}

/// A single post as delivered by the upstream source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub chat_id: i64,
    pub chat_username: Option<String>,
    pub message_id: i64,
    /// Set when the message is one slide of a photo album.
    pub album_id: Option<String>,
    /// Unix seconds.
    pub date: i64,
    /// Text or caption.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub annotations: Vec<LinkAnnotation>,
    /// Opaque file references for photos and image documents, in message order.
    #[serde(default)]
    pub photos: Vec<String>,
    pub video: Option<String>,
}

/// Structured annotation over a span of message text. Offsets and lengths
/// count UTF-16 code units, as the upstream API reports them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAnnotation {
    pub kind: AnnotationKind,
    pub offset: i64,
    pub length: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnnotationKind {
    /// The annotated span is itself a URL.
    Url,
    /// The annotated span is display text pointing at `url`.
    TextLink { url: String },
}
