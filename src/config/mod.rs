//! Configuration management for stagecache

pub mod schema;

pub use schema::Config;

use crate::error::{StageCacheError, StageCacheResult};
use crate::store::postgres::is_plain_identifier;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Environment variable that overrides `database.url`
pub const DATABASE_URL_ENV: &str = "STAGECACHE_DATABASE_URL";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
    explicit: bool,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
            explicit: false,
        }
    }

    /// Create a config manager with a custom path; the file must exist
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            config_path: path,
            explicit: true,
        }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stagecache")
            .join("config.toml")
    }

    /// Load configuration, falling back to defaults when the default file
    /// is missing, then apply environment overrides
    pub async fn load(&self) -> StageCacheResult<Config> {
        let mut config = if self.config_path.exists() {
            self.load_from_file(&self.config_path).await?
        } else if self.explicit {
            return Err(StageCacheError::ConfigNotFound(self.config_path.clone()));
        } else {
            debug!("Config file not found, using defaults");
            Config::default()
        };

        apply_database_url(&mut config, std::env::var(DATABASE_URL_ENV).ok());
        Ok(config)
    }

    /// Load and validate configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> StageCacheResult<Config> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            StageCacheError::io(format!("reading config from {}", path.display()), e)
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| StageCacheError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        validate(&config).map_err(|reason| StageCacheError::ConfigInvalid {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> StageCacheResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            StageCacheError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> StageCacheResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StageCacheError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace the configured database URL when an override is present
fn apply_database_url(config: &mut Config, url: Option<String>) {
    if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
        debug!("Using database URL from {}", DATABASE_URL_ENV);
        config.database.url = Some(url);
    }
}

/// Check values serde cannot check
fn validate(config: &Config) -> Result<(), String> {
    for (key, name) in [
        ("schema.entry_table", &config.schema.entry_table),
        ("schema.lock_table", &config.schema.lock_table),
    ] {
        if !is_plain_identifier(name) {
            return Err(format!("{} must be a plain SQL identifier, got {:?}", key, name));
        }
    }
    if config.schema.entry_table.eq_ignore_ascii_case(&config.schema.lock_table) {
        return Err("schema.entry_table and schema.lock_table must differ".to_string());
    }
    if config.database.pool_size == 0 {
        return Err("database.pool_size must be at least 1".to_string());
    }
    if !matches!(config.general.log_format.as_str(), "text" | "json") {
        return Err(format!(
            "general.log_format must be \"text\" or \"json\", got {:?}",
            config.general.log_format
        ));
    }
    Ok(())
}
