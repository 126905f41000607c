// Sequential pagination over the update source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use channelfeed_common::RawUpdate;

use crate::traits::UpdateSource;

/// Why pagination stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStop {
    /// A short or empty page: nothing more upstream right now.
    Exhausted,
    /// `max_pages` reached; the next pass continues from the cursor.
    PageLimit,
    /// An upstream call failed or timed out.
    Failed,
    Cancelled,
}

/// Everything fetched in one pass, plus how it ended.
#[derive(Debug)]
pub struct FetchOutcome {
    pub updates: Vec<RawUpdate>,
    pub pages: u32,
    pub stop: FetchStop,
    pub error: Option<anyhow::Error>,
}

impl FetchOutcome {
    /// Highest sequence number actually obtained.
    pub fn last_update_id(&self) -> Option<i64> {
        self.updates.iter().map(|u| u.update_id).max()
    }
}

pub struct Fetcher<'a> {
    source: &'a dyn UpdateSource,
    page_size: u32,
    max_pages: u32,
    timeout: Duration,
}

impl<'a> Fetcher<'a> {
    pub fn new(
        source: &'a dyn UpdateSource,
        page_size: u32,
        max_pages: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
            max_pages: max_pages.max(1),
            timeout,
        }
    }

    /// Page through every update after `after`. Never fails outright: an
    /// upstream error ends pagination and is returned alongside whatever was
    /// fetched before it.
    pub async fn fetch(&self, after: i64, cancel: &AtomicBool) -> FetchOutcome {
        let mut updates = Vec::new();
        let mut offset = after;
        let mut pages = 0;

        let (stop, error) = loop {
            if pages >= self.max_pages {
                break (FetchStop::PageLimit, None);
            }
            if cancel.load(Ordering::Relaxed) {
                break (FetchStop::Cancelled, None);
            }

            let page = match tokio::time::timeout(
                self.timeout,
                self.source.list_updates(offset, self.page_size),
            )
            .await
            {
                Ok(Ok(page)) => page,
                Ok(Err(e)) => break (FetchStop::Failed, Some(e)),
                Err(_) => {
                    break (
                        FetchStop::Failed,
                        Some(anyhow::anyhow!("upstream call timed out after {:?}", self.timeout)),
                    )
                }
            };
            pages += 1;

            let full_page = page.len() >= self.page_size as usize;
            // Anything at or below the offset was already folded in.
            let fresh: Vec<RawUpdate> = page.into_iter().filter(|u| u.update_id > offset).collect();
            debug!(page = pages, offset, fetched = fresh.len(), "Fetched page");

            let Some(max_id) = fresh.iter().map(|u| u.update_id).max() else {
                break (FetchStop::Exhausted, None);
            };
            offset = max_id;
            updates.extend(fresh);

            if !full_page {
                break (FetchStop::Exhausted, None);
            }
        };

        match &error {
            Some(e) => warn!(
                pages,
                fetched = updates.len(),
                error = %e,
                "Pagination stopped by upstream error"
            ),
            None => info!(pages, fetched = updates.len(), ?stop, "Pagination finished"),
        }

        FetchOutcome {
            updates,
            pages,
            stop,
            error,
        }
    }
}
