use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{DbError, Result};

/// Counters older than this are recomputed on load.
pub const DEFAULT_RECHECK_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;

/// Configuration supplied when opening a [`super::Lowlevel`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DbOptions {
    /// Database file; ignored when `in_memory` is set.
    pub path: Option<PathBuf>,
    /// Keep everything in memory.
    pub in_memory: bool,
    /// Maximum age of persisted folder counters, in seconds.
    pub recheck_interval_secs: u64,
    /// Run schema migrations when opening.
    pub migrate_on_open: bool,
    /// Recompute counters that are stale or behind the sequence index when loading a folder.
    ///
    /// Missing or corrupt counters are always recomputed.
    pub repair_on_load: bool,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            path: None,
            in_memory: false,
            recheck_interval_secs: DEFAULT_RECHECK_INTERVAL_SECS,
            migrate_on_open: true,
            repair_on_load: true,
        }
    }
}

impl DbOptions {
    /// Options for a database file at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Options for an in-memory database.
    pub fn memory() -> Self {
        Self {
            in_memory: true,
            ..Self::default()
        }
    }

    /// Sets the counter recheck interval.
    pub fn recheck_interval(mut self, interval: Duration) -> Self {
        self.recheck_interval_secs = interval.as_secs();
        self
    }

    /// Enables or disables migration on open.
    pub fn migrate_on_open(mut self, enabled: bool) -> Self {
        self.migrate_on_open = enabled;
        self
    }

    /// Enables or disables stale-counter detection on load.
    pub fn repair_on_load(mut self, enabled: bool) -> Self {
        self.repair_on_load = enabled;
        self
    }

    /// The recheck interval as a [`Duration`].
    pub fn recheck_interval_duration(&self) -> Duration {
        Duration::from_secs(self.recheck_interval_secs)
    }

    /// Parses options from TOML; absent keys keep their defaults.
    pub fn from_toml_str(src: &str) -> Result<Self> {
        toml::from_str(src).map_err(|err| DbError::Config(err.to_string()))
    }

    /// Reads options from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let src = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&src)
    }
}
