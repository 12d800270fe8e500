use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::storage::DbOptions;

/// Settings read from the CLI configuration file.
///
/// ```toml
/// [database]
/// default = "/var/lib/syncdb/index.redb"
///
/// [options]
/// recheck_interval_secs = 86400
/// ```
#[derive(Debug, Default)]
pub struct CliConfig {
    path: Option<PathBuf>,
    data: RawConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    database: DatabaseSection,
    #[serde(default)]
    options: DbOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatabaseSection {
    #[serde(rename = "default")]
    default_path: Option<PathBuf>,
}

impl CliConfig {
    /// Reads `explicit`, or the default location when `None`.
    ///
    /// A missing default file yields the defaults; a missing explicit file is an error.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let required = explicit.is_some();
        let path = explicit.or_else(default_config_path);
        let data = match path.as_ref() {
            Some(config_path) if required || config_path.exists() => read_file(config_path)?,
            _ => RawConfig::default(),
        };
        Ok(Self { path, data })
    }

    /// Parses configuration text directly.
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let data = toml::from_str(src).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Ok(Self { path: None, data })
    }

    /// Where the configuration was looked for.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Database used when a command names none.
    pub fn default_db_path(&self) -> Option<&PathBuf> {
        self.data.database.default_path.as_ref()
    }

    /// Database options; the path is supplied per command.
    pub fn db_options(&self) -> &DbOptions {
        &self.data.options
    }
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let src = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&src).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Failure to load the CLI configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read CLI config {path}: {source}")]
    Read {
        /// Config file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid configuration.
    #[error("failed to parse CLI config {path}: {source}")]
    Parse {
        /// Config file.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
}

/// `<config dir>/syncdb/cli.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("syncdb").join("cli.toml"))
}
