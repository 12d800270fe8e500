#![forbid(unsafe_code)]

//! Support code for the `syncdb` binary: configuration file and logging.

mod config;

pub use config::{default_config_path, CliConfig, ConfigError};

use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "SYNCDB_LOG";

/// Installs a stderr subscriber filtered by [`LOG_ENV`], `warn` when unset.
///
/// Later calls are no-ops.
pub fn install_tracing_subscriber() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}
