//! Error types for stagecache
//!
//! All modules use `StageCacheResult<T>` as their return type. Expected
//! outcomes (a missing entry, a contended table) are not errors; they come
//! back as `None`/`false` from the repository.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for stagecache operations
pub type StageCacheResult<T> = Result<T, StageCacheError>;

/// Boxed backend error carried by persistence failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// All errors that can occur in stagecache
#[derive(Error, Debug)]
pub enum StageCacheError {
    // Usage errors
    #[error("Invalid {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    #[error("{operation} requires an open transaction")]
    NoTransaction { operation: &'static str },

    #[error("A transaction is already open on this handle")]
    TransactionOpen,

    // Store errors
    #[error("Duplicate key in {table}: {detail}")]
    UniqueViolation { table: String, detail: String },

    #[error("Persistence failure: {context}")]
    Persistence {
        context: String,
        transient: bool,
        #[source]
        source: BoxError,
    },

    #[error("Unexpected row returned by {query}")]
    UnexpectedRow { query: &'static str },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No database URL configured")]
    DatabaseUrlMissing,

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl StageCacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an argument validation error
    pub fn invalid_argument(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }

    /// Create a persistence failure that will not go away on retry
    pub fn persistence(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Persistence {
            context: context.into(),
            transient: false,
            source: source.into(),
        }
    }

    /// Create a persistence failure caused by connectivity (pool exhaustion, dropped link)
    pub fn transient(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Persistence {
            context: context.into(),
            transient: true,
            source: source.into(),
        }
    }

    /// Check if error is retryable by the caller's retry policy
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Persistence {
                transient: true,
                ..
            }
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::DatabaseUrlMissing => {
                Some("Set database.url in the config file or export STAGECACHE_DATABASE_URL")
            }
            Self::Persistence {
                transient: true, ..
            } => Some("Check that the database is reachable and retry"),
            Self::ConfigNotFound(_) => Some("Run: stagecache config init"),
            _ => None,
        }
    }
}
