pub mod error;
pub mod types;

pub use error::{Result, TelegramError};
pub use types::{
    ApiResponse, Chat, Document, GetUpdatesParams, Message, MessageEntity, PhotoSize, Update,
    Video, POST_UPDATE_KINDS,
};

use std::time::Duration;

const BASE_URL: &str = "https://api.telegram.org";

/// Default per-request timeout when the caller does not supply one.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TelegramClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl TelegramClient {
    pub fn new(token: String) -> Self {
        Self::with_timeout(token, DEFAULT_TIMEOUT)
    }

    /// Build a client whose every request is bounded by `timeout`.
    pub fn with_timeout(token: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            token,
            base_url: BASE_URL.to_string(),
        }
    }

    /// Point the client at a different Bot API server (self-hosted or a test double).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    /// Fetch one page of updates with `update_id >= offset`.
    ///
    /// Only post-carrying update kinds are requested. Long polling is disabled.
    pub async fn get_updates(&self, offset: i64, limit: u32) -> Result<Vec<Update>> {
        let params = GetUpdatesParams {
            offset,
            limit,
            timeout: 0,
            allowed_updates: POST_UPDATE_KINDS.iter().map(|k| k.to_string()).collect(),
        };

        tracing::debug!(offset, limit, "Requesting updates page");

        let resp = self
            .client
            .post(self.method_url("getUpdates"))
            .json(&params)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(TelegramError::Api {
                status: status.as_u16(),
                message: api_description(&body),
            });
        }

        let api_resp: ApiResponse<Vec<Update>> = serde_json::from_str(&body)?;
        if !api_resp.ok {
            return Err(TelegramError::Api {
                status: api_resp.error_code.unwrap_or(status.as_u16()),
                message: api_resp.description.unwrap_or_default(),
            });
        }

        let updates = api_resp.result.unwrap_or_default();
        tracing::debug!(count = updates.len(), "Fetched updates page");
        Ok(updates)
    }
}

/// Pull the `description` out of an error body, falling back to the raw text.
fn api_description(body: &str) -> String {
    serde_json::from_str::<ApiResponse<serde_json::Value>>(body)
        .ok()
        .and_then(|r| r.description)
        .unwrap_or_else(|| body.to_string())
}
