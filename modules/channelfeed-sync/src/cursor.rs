use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::traits::ContentStore;

/// Reads and writes the update high-water mark.
///
/// Only the orchestrator holds one. The value never moves backward: a `set`
/// lower than the stored value is a no-op.
pub struct CursorStore {
    store: Arc<dyn ContentStore>,
}

impl CursorStore {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    /// Last persisted cursor, 0 before the first pass.
    pub async fn get(&self) -> Result<i64> {
        Ok(self.store.get_cursor().await?.unwrap_or(0))
    }

    /// Persist `value` if it is ahead of the stored cursor. Returns the cursor
    /// now in effect.
    pub async fn set(&self, value: i64) -> Result<i64> {
        let current = self.get().await?;
        if value <= current {
            return Ok(current);
        }
        self.store.set_cursor(value).await?;
        info!(from = current, to = value, "Cursor advanced");
        Ok(value)
    }
}
