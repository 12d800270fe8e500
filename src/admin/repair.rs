use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::storage::keys::KeyType;
use crate::storage::{FileReader, GcReport, GlobalsCheck, RecalcReason, SequenceRepair};

use crate::admin::options::AdminOpenOptions;
use crate::admin::util::open_lowlevel;
use crate::admin::Result;

/// Fixes applied to one folder.
#[derive(Clone, Debug, Serialize)]
pub struct FolderRepair {
    /// Folder id.
    pub folder: String,
    /// Device records counted.
    pub records: u64,
    /// Global list fixes.
    pub globals: GlobalsCheck,
    /// Sequence index fixes.
    pub sequences: SequenceRepair,
}

/// Outcome of [`repair`].
#[derive(Clone, Debug, Serialize)]
pub struct RepairReport {
    /// One entry per folder with device records.
    pub folders: Vec<FolderRepair>,
    /// Leftovers of folders without device records.
    pub gc: GcReport,
}

impl RepairReport {
    /// Total number of fixes across all folders.
    pub fn fixes(&self) -> u64 {
        self.folders
            .iter()
            .map(|f| f.globals.total() + f.sequences.total())
            .sum::<u64>()
            + self.gc.keys_deleted
    }
}

/// Migrates the database at `path`, recomputes every folder's counters
/// (repairing global lists and the sequence index on the way) and removes
/// keys of folders that no longer have records.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or a transaction fails.
pub fn repair(path: impl AsRef<Path>, opts: &AdminOpenOptions) -> Result<RepairReport> {
    let mut opts = opts.clone();
    opts.db.migrate_on_open = true;
    let db = open_lowlevel(path.as_ref(), &opts)?;
    let folders = db.begin_read()?.list_folders_of(KeyType::DeviceFile)?;
    let mut report = Vec::with_capacity(folders.len());
    for folder in folders {
        let recalc = db.recalc_meta_report(&folder, RecalcReason::Forced)?;
        report.push(FolderRepair {
            folder,
            records: recalc.records,
            globals: recalc.globals,
            sequences: recalc.sequences,
        });
    }
    let gc = db.garbage_collect()?;
    let report = RepairReport {
        folders: report,
        gc,
    };
    info!(folders = report.folders.len(), fixes = report.fixes(), "syncdb.admin.repaired");
    Ok(report)
}
