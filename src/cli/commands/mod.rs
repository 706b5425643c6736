//! CLI command implementations

pub mod config;
pub mod delete;
pub mod get;
pub mod init;
pub mod locks;
pub mod release;

pub use config::execute as config;
pub use delete::execute as delete;
pub use get::execute as get;
pub use init::execute as init;
pub use locks::execute as locks;
pub use release::execute as release;

use crate::config::Config;
use crate::error::StageCacheResult;
use crate::repository::CacheInfoRepository;
use crate::store::{PersistenceHandle, PgHandle, PgStore};
use tracing::debug;

/// Check out one session from a fresh pool and wrap it in a repository
pub(crate) async fn open_repository(
    config: &Config,
) -> StageCacheResult<CacheInfoRepository<PgHandle>> {
    let store = PgStore::connect(&config.database, &config.schema)?;
    let handle = store.handle().await?;
    debug!(backend = handle.backend_name(), "Opened registry session");
    Ok(CacheInfoRepository::new(handle))
}
