use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// TOML-backed configuration loaded from disk.
/// Secrets (bot token, DB URL) stay as env vars; see [`AppConfig`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub channel: ChannelConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub placeholders: Placeholders,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub restore: RestoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    /// Numeric chat id (`-100…`) or `@username`.
    pub chat: String,
}

impl ChannelConfig {
    pub fn target(&self) -> Result<ChatTarget, ConfigError> {
        ChatTarget::parse(&self.chat)
    }
}

/// Which chat a sync pass ingests. Channels are matched by id when the config
/// names one, otherwise by username (case-insensitive, `@` optional).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatTarget {
    Id(i64),
    Username(String),
}

impl ChatTarget {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::Invalid("channel.chat must not be empty".into()));
        }
        if let Ok(id) = trimmed.parse::<i64>() {
            return Ok(Self::Id(id));
        }
        let name = trimmed.trim_start_matches('@');
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ConfigError::Invalid(format!(
                "channel.chat is neither a chat id nor a username: {raw}"
            )));
        }
        Ok(Self::Username(name.to_string()))
    }

    pub fn matches(&self, chat_id: i64, chat_username: Option<&str>) -> bool {
        match self {
            Self::Id(id) => *id == chat_id,
            Self::Username(name) => chat_username.is_some_and(|u| u.eq_ignore_ascii_case(name)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub page_size: u32,
    pub max_pages: u32,
    pub window_hours: u64,
    pub upstream_timeout_secs: u64,
    pub lease_ttl_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_pages: 50,
            window_hours: 72,
            upstream_timeout_secs: 30,
            lease_ttl_secs: 600,
        }
    }
}

impl SyncConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_hours * 3600)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    File,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Directory for the file backend.
    pub path: String,
    pub live_key: String,
    pub seed_key: String,
    pub backup_key: String,
    pub cursor_key: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            path: "./data".to_string(),
            live_key: "posts".to_string(),
            seed_key: "posts_seed".to_string(),
            backup_key: "posts_backup".to_string(),
            cursor_key: "last_update_id".to_string(),
        }
    }
}

/// Literal defaults that mark a field as "never filled in". The merger treats
/// a field equal to its placeholder as empty, so these must be the only copy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Placeholders {
    pub title: String,
    pub hashtag: String,
    pub image: String,
}

impl Default for Placeholders {
    fn default() -> Self {
        Self {
            title: "Untitled post".to_string(),
            hashtag: "#post".to_string(),
            image: "/images/placeholder.jpg".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilesConfig {
    /// Endpoint that serves upstream files by reference.
    pub proxy_base: String,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            proxy_base: "/api/telegram-file".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RestoreConfig {
    /// Restores report how many records are newer than this (unix seconds).
    pub historical_cutoff: i64,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        // 2024-01-01T00:00:00Z
        Self {
            historical_cutoff: 1_704_067_200,
        }
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(&content, path)
}

fn parse_config(content: &str, path: &Path) -> Result<FileConfig, ConfigError> {
    let config: FileConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    config.channel.target()?;
    if config.sync.page_size == 0 || config.sync.page_size > 100 {
        return Err(ConfigError::Invalid(format!(
            "sync.page_size must be between 1 and 100, got {}",
            config.sync.page_size
        )));
    }
    Ok(config)
}

/// Secrets and env-specific values.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Absent means the pass runs in seed-only mode.
    pub telegram_bot_token: Option<String>,
    pub telegram_api_base: Option<String>,
    pub database_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let config = Self {
            telegram_bot_token: non_empty_env("TELEGRAM_BOT_TOKEN"),
            telegram_api_base: non_empty_env("TELEGRAM_API_BASE"),
            database_url: non_empty_env("DATABASE_URL"),
        };

        config.log_keys();
        config
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::MissingEnv("DATABASE_URL"))
    }

    fn log_keys(&self) {
        fn preview_opt(val: &Option<String>) -> String {
            match val {
                Some(v) => {
                    let n = v.char_indices().nth(5).map(|(i, _)| i).unwrap_or(v.len());
                    format!("{}...({} chars)", &v[..n], v.len())
                }
                None => "<not set>".to_string(),
            }
        }

        tracing::info!("Config loaded:");
        tracing::info!("  TELEGRAM_BOT_TOKEN: {}", preview_opt(&self.telegram_bot_token));
        tracing::info!("  TELEGRAM_API_BASE: {}", preview_opt(&self.telegram_api_base));
        tracing::info!("  DATABASE_URL: {}", preview_opt(&self.database_url));
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
