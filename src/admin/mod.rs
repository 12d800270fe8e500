#![forbid(unsafe_code)]

//! Database administration and maintenance utilities.
//!
//! Every function opens the database at a path, so they back the `syncdb`
//! binary directly. Only [`repair`] migrates; the others leave the stored
//! schema as they found it.

mod dump;
mod error;
mod options;
mod repair;
mod stats;
mod util;
mod verify;

/// Raw JSON-lines dump and load.
pub use dump::{export_jsonl, import_jsonl, DumpReport};

/// Error types for administrative operations.
pub use error::{AdminError, Result};

/// Configuration options for opening a database in admin mode.
pub use options::AdminOpenOptions;

/// Forced recomputation of every folder plus garbage collection.
pub use repair::{repair, FolderRepair, RepairReport};

/// Per-folder and per-device counters.
pub use stats::{stats, DeviceStats, FilesystemStats, FolderStats, StatsReport};

/// Read-only consistency checks.
pub use verify::{verify, VerifyCounts, VerifyFinding, VerifyLevel, VerifyReport, VerifySeverity};

/// Opens a database the way the admin commands do.
pub use util::open_lowlevel;
