//! VFS configuration.
//!
//! Loaded from a RON file (`nimbus.ron` in the CLI's data directory). Every
//! field has a default, so a partial file or no file at all is valid:
//!
//! ```ron
//! (
//!     disk_quota: 1073741824,
//!     versioning: (max_number_to_keep: 10, min_delay_secs: 600),
//!     naming: sharded,
//! )
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use strum::{Display, EnumString};
use thiserror::Error;

/// Error loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

/// How object names are derived from document ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NamingScheme {
    /// `<file id>/<internal id>`.
    Flat,
    /// Flat, plus a `<dir id>/` marker per directory.
    FlatWithDirs,
    /// `<id[0..22]>/<id[22..27]>/<id[27..]>/<internal id>`.
    #[default]
    Sharded,
}

/// Old content retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersioningConfig {
    /// Snapshot overwritten content as versions.
    pub enabled: bool,
    /// Budget of retained versions per file, current content included.
    pub max_number_to_keep: usize,
    /// Snapshots closer than this to the previous one replace it.
    pub min_delay_secs: u64,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_number_to_keep: 20,
            min_delay_secs: 15 * 60,
        }
    }
}

impl VersioningConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_secs(self.min_delay_secs)
    }
}

/// Per-tenant VFS configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Quota in bytes; zero or negative means unlimited.
    pub disk_quota: i64,
    /// Largest accepted single file, on top of the quota.
    pub max_file_size: Option<u64>,
    pub versioning: VersioningConfig,
    pub naming: NamingScheme,
    /// How long to wait for the tenant lock.
    pub lock_timeout_ms: u64,
    /// Lease of long operation locks, refreshed at a third of it.
    pub lease_ttl_secs: u64,
    /// Directories rewritten per batch when moving a subtree.
    pub move_batch_size: usize,
    /// Upper bound on move batches.
    pub move_max_batches: usize,
    /// Documents deleted per bulk request.
    pub delete_batch_size: usize,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            disk_quota: 0,
            max_file_size: None,
            versioning: VersioningConfig::default(),
            naming: NamingScheme::default(),
            lock_timeout_ms: 30_000,
            lease_ttl_secs: 60,
            move_batch_size: 256,
            move_max_batches: 128,
            delete_batch_size: nimbus_store::MAX_BULK,
        }
    }
}

impl VfsConfig {
    /// Load a config file, falling back to defaults when it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_ron(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn with_quota(mut self, quota: i64) -> Self {
        self.disk_quota = quota;
        self
    }
}
