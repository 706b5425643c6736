//! Cache entry and lock records
//!
//! `CacheEntry` is what the registry stores; `CacheEntryUpdate` is what a
//! caller hands to a put. The update deliberately has no local timestamp:
//! that value only ever comes from the store clock.

use crate::error::{StageCacheError, StageCacheResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest identifier accepted for ids, owners and table names (bytes)
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Freshness record for one cached copy of a remote source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Caller-chosen cache id
    pub id: String,

    /// Store-clock time the cached copy was last written
    pub local_timestamp: Option<DateTime<Utc>>,

    /// Freshness time of the remote source, as reported by the caller
    pub remote_timestamp: Option<DateTime<Utc>>,

    /// Staging table holding the cached rows
    pub table_name: String,

    /// Storage location of the cached data
    pub path: String,
}

impl CacheEntry {
    /// Build the stored form of an update, stamped with `local_timestamp`
    pub fn from_update(update: &CacheEntryUpdate, local_timestamp: DateTime<Utc>) -> Self {
        Self {
            id: update.id.clone(),
            local_timestamp: Some(local_timestamp),
            remote_timestamp: update.remote_timestamp,
            table_name: update.table_name.clone(),
            path: update.path.clone(),
        }
    }
}

/// Caller-supplied contents of a put
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntryUpdate {
    pub id: String,
    pub remote_timestamp: Option<DateTime<Utc>>,
    pub table_name: String,
    pub path: String,
}

impl CacheEntryUpdate {
    /// Create an update with no remote timestamp
    pub fn new(
        id: impl Into<String>,
        table_name: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            remote_timestamp: None,
            table_name: table_name.into(),
            path: path.into(),
        }
    }

    /// Attach the remote source's freshness time
    pub fn with_remote_timestamp(mut self, remote_timestamp: DateTime<Utc>) -> Self {
        self.remote_timestamp = Some(remote_timestamp);
        self
    }

    /// Reject updates that could never be stored
    pub fn validate(&self) -> StageCacheResult<()> {
        validate_identifier("id", &self.id)?;
        validate_identifier("table_name", &self.table_name)?;
        if self.path.is_empty() {
            return Err(StageCacheError::invalid_argument("path", "must not be empty"));
        }
        if self.path.contains('\0') {
            return Err(StageCacheError::invalid_argument(
                "path",
                "must not contain NUL bytes",
            ));
        }
        Ok(())
    }
}

/// Claim on a staging table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Locked staging table (unique across all owners)
    pub table_name: String,

    /// Group under which the lock is released
    pub owner_id: String,

    /// Free-text description of who holds the lock
    pub holder: String,
}

impl LockRecord {
    pub fn new(
        owner_id: impl Into<String>,
        holder: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            owner_id: owner_id.into(),
            holder: holder.into(),
        }
    }
}

impl fmt::Display for LockRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (owner {}, holder {})", self.table_name, self.owner_id, self.holder)
    }
}

/// Check an id, owner id or table name before it reaches the store
pub fn validate_identifier(field: &'static str, value: &str) -> StageCacheResult<()> {
    if value.trim().is_empty() {
        return Err(StageCacheError::invalid_argument(field, "must not be empty"));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(StageCacheError::invalid_argument(
            field,
            format!("longer than {} bytes", MAX_IDENTIFIER_LEN),
        ));
    }
    if value.contains('\0') {
        return Err(StageCacheError::invalid_argument(
            field,
            "must not contain NUL bytes",
        ));
    }
    Ok(())
}
