use serde::{Deserialize, Serialize};

/// Update kinds that carry channel or chat posts. Everything else
/// (polls, callback queries, member changes) is never requested.
pub const POST_UPDATE_KINDS: &[&str] = &[
    "channel_post",
    "edited_channel_post",
    "message",
    "edited_message",
];

/// Query body for `getUpdates`.
#[derive(Debug, Clone, Serialize)]
pub struct GetUpdatesParams {
    pub offset: i64,
    pub limit: u32,
    /// Long-poll seconds. Always 0 here: a sync pass never waits for new posts.
    pub timeout: u32,
    pub allowed_updates: Vec<String>,
}

/// Envelope returned by every Bot API method.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<u16>,
}

/// A single entry from `getUpdates`.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub edited_message: Option<Message>,
    pub channel_post: Option<Message>,
    pub edited_channel_post: Option<Message>,
}

impl Update {
    /// The post this update carries, whichever slot it arrived in.
    pub fn post(&self) -> Option<&Message> {
        self.channel_post
            .as_ref()
            .or(self.edited_channel_post.as_ref())
            .or(self.message.as_ref())
            .or(self.edited_message.as_ref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
    pub title: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub date: i64,
    pub media_group_id: Option<String>,
    pub text: Option<String>,
    pub caption: Option<String>,
    #[serde(default)]
    pub entities: Vec<MessageEntity>,
    #[serde(default)]
    pub caption_entities: Vec<MessageEntity>,
    #[serde(default)]
    pub photo: Vec<PhotoSize>,
    pub document: Option<Document>,
    pub video: Option<Video>,
}

impl Message {
    /// Text or caption, whichever the message carries.
    pub fn body(&self) -> Option<&str> {
        self.text.as_deref().or(self.caption.as_deref())
    }

    /// Entities that annotate `body()`.
    pub fn body_entities(&self) -> &[MessageEntity] {
        if self.text.is_some() {
            &self.entities
        } else {
            &self.caption_entities
        }
    }

    /// Largest rendition of the attached photo. Telegram sends sizes
    /// smallest-first, but file_size is compared in case that ever changes.
    pub fn largest_photo(&self) -> Option<&PhotoSize> {
        self.photo
            .iter()
            .max_by_key(|p| {
                let area = u64::from(p.width) * u64::from(p.height);
                (p.file_size.unwrap_or(0), area)
            })
    }

    /// Document attached as a file but carrying an image mime type.
    pub fn image_document(&self) -> Option<&Document> {
        self.document.as_ref().filter(|d| {
            d.mime_type
                .as_deref()
                .is_some_and(|m| m.starts_with("image/"))
        })
    }
}

/// Offsets and lengths are in UTF-16 code units.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: i64,
    pub length: i64,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub file_unique_id: String,
    pub width: u32,
    pub height: u32,
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub file_id: String,
    pub file_unique_id: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Video {
    pub file_id: String,
    pub file_unique_id: String,
    pub duration: Option<u32>,
    pub mime_type: Option<String>,
}
