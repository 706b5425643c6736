//! stagecache - cache freshness registry and staging-table locks
//!
//! Records when cached copies of remote data were last written, stamped
//! with the registry database's own clock, and arbitrates which loader
//! process owns a staging table. All coordination happens in the backing
//! store, so loaders on different hosts interact safely through it alone.

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod repository;
pub mod store;

pub use error::{StageCacheError, StageCacheResult};
pub use model::{CacheEntry, CacheEntryUpdate, LockRecord};
pub use repository::CacheInfoRepository;
pub use store::PersistenceHandle;
