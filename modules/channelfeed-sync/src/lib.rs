pub mod cursor;
pub mod error;
pub mod fetcher;
pub mod grouping;
pub mod lease;
pub mod links;
pub mod merge;
pub mod recovery;
pub mod resolver;
pub mod store;
pub mod sync;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::SyncError;
pub use recovery::{CollectionKeys, RestoreReport, SeedReport};
pub use resolver::ProxyFileResolver;
pub use store::{open_store, FileContentStore, PgContentStore};
pub use sync::{ChannelSync, SyncPhase, SyncReport, SyncRequest, SyncSettings};
pub use traits::{ContentStore, FileResolver, UpdateSource};
