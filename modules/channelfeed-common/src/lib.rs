pub mod config;
pub mod error;
pub mod types;

pub use config::{AppConfig, ChatTarget, FileConfig, Placeholders, StoreBackend};
pub use error::ConfigError;
pub use types::*;
