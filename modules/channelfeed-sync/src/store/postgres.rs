use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, info};

use channelfeed_common::ContentRecord;

use crate::traits::ContentStore;

const LEASE_NAME: &str = "channel-sync";

/// Collections as JSONB documents, one row per key.
#[derive(Clone)]
pub struct PgContentStore {
    pool: PgPool,
    cursor_key: String,
}

impl PgContentStore {
    pub fn new(pool: PgPool, cursor_key: impl Into<String>) -> Self {
        Self {
            pool,
            cursor_key: cursor_key.into(),
        }
    }

    pub async fn connect(database_url: &str, cursor_key: impl Into<String>) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;
        Ok(Self::new(pool, cursor_key))
    }

    /// Create the tables if they are missing.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Store migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ContentStore for PgContentStore {
    async fn get_all(&self, key: &str) -> Result<Vec<ContentRecord>> {
        let row = sqlx::query_as::<_, (serde_json::Value,)>(
            "SELECT records FROM content_collections WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((records,)) => serde_json::from_value(records)
                .with_context(|| format!("Collection `{key}` is not a record list")),
            None => Ok(Vec::new()),
        }
    }

    async fn put_all(&self, key: &str, records: &[ContentRecord]) -> Result<()> {
        let value = serde_json::to_value(records)?;
        sqlx::query(
            r#"
            INSERT INTO content_collections (key, records, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (key) DO UPDATE
            SET records = EXCLUDED.records, updated_at = now()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        debug!(key, count = records.len(), "Collection written");
        Ok(())
    }

    async fn get_cursor(&self) -> Result<Option<i64>> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT value FROM sync_cursor WHERE key = $1")
            .bind(&self.cursor_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }

    async fn set_cursor(&self, value: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_cursor (key, value, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (key) DO UPDATE
            SET value = GREATEST(sync_cursor.value, EXCLUDED.value), updated_at = now()
            "#,
        )
        .bind(&self.cursor_key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn try_acquire_lease(&self, holder: &str, ttl: Duration) -> Result<bool> {
        // Takes the row when free, expired, or already ours.
        let row = sqlx::query_as::<_, (String,)>(
            r#"
            INSERT INTO sync_lease (name, holder, acquired_at, expires_at)
            VALUES ($1, $2, now(), now() + make_interval(secs => $3))
            ON CONFLICT (name) DO UPDATE
            SET holder = EXCLUDED.holder,
                acquired_at = EXCLUDED.acquired_at,
                expires_at = EXCLUDED.expires_at
            WHERE sync_lease.expires_at < now() OR sync_lease.holder = EXCLUDED.holder
            RETURNING holder
            "#,
        )
        .bind(LEASE_NAME)
        .bind(holder)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn release_lease(&self, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM sync_lease WHERE name = $1 AND holder = $2")
            .bind(LEASE_NAME)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
