//! Configuration schema for stagecache
//!
//! Configuration is stored at `~/.config/stagecache/config.toml`

use serde::{Deserialize, Serialize};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Registry database connection
    pub database: DatabaseConfig,

    /// Registry table names
    pub schema: SchemaConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// Registry database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL (overridden by STAGECACHE_DATABASE_URL)
    pub url: Option<String>,

    /// Maximum pooled connections
    pub pool_size: usize,

    /// Seconds to wait for a connection before failing
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: 4,
            connect_timeout_secs: 30,
        }
    }
}

/// Names of the registry tables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Cache entry table
    pub entry_table: String,

    /// Lock record table
    pub lock_table: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            entry_table: "cache_entry".to_string(),
            lock_table: "cache_lock".to_string(),
        }
    }
}
