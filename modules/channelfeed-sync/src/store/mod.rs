mod file;
mod postgres;

pub use file::FileContentStore;
pub use postgres::PgContentStore;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use channelfeed_common::{AppConfig, FileConfig, StoreBackend};

use crate::traits::ContentStore;

/// Open the backend the config names. Postgres needs `DATABASE_URL`.
pub async fn open_store(config: &FileConfig, env: &AppConfig) -> Result<Arc<dyn ContentStore>> {
    match config.store.backend {
        StoreBackend::Postgres => {
            let url = env.require_database_url()?;
            let store = PgContentStore::connect(url, config.store.cursor_key.clone()).await?;
            store.migrate().await?;
            info!("Using Postgres store");
            Ok(Arc::new(store))
        }
        StoreBackend::File => {
            let store =
                FileContentStore::open(&config.store.path, config.store.cursor_key.clone())?;
            info!(path = %store.dir().display(), "Using file store");
            Ok(Arc::new(store))
        }
    }
}
