/// Why a sync pass (or recovery operation) did not fully succeed. Always
/// delivered inside a report that carries the counts reached so far.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The first page could not be fetched. Nothing changed.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Some pages arrived before a failure. What arrived was merged and
    /// persisted; the cursor stops at the last update obtained.
    #[error("Upstream failed after {pages} page(s): {message}")]
    UpstreamPartial { pages: u32, message: String },

    /// Writing the collection failed. Nothing changed.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// Reading the live collection or the cursor failed. Nothing changed.
    #[error("Store read failed: {0}")]
    Store(String),

    /// No upstream source is configured and no seed target was requested.
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    /// The harness cancelled the pass before anything was written.
    #[error("Sync pass cancelled")]
    Cancelled,

    /// A restore was asked to replace the live collection with nothing.
    #[error("Snapshot `{0}` is empty; live collection left untouched")]
    EmptySnapshot(String),

    /// Another pass holds the run lease.
    #[error("Another sync pass is in progress")]
    AlreadyRunning,

    /// The run lease expired and another pass took it before this one wrote.
    /// Nothing changed.
    #[error("Sync lease lost to another pass")]
    LeaseLost,
}

impl SyncError {
    /// True when the pass still persisted new data.
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::UpstreamPartial { .. })
    }
}
