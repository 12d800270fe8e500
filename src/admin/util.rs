use std::fs;
use std::path::Path;

use crate::storage::keys::{self, KeyType};
use crate::storage::{record, FileReader, Lowlevel, MetadataTracker};
use crate::types::GLOBAL_DEVICE_ID;

use crate::admin::error::{AdminError, Result};
use crate::admin::options::AdminOpenOptions;

/// Opens the database at `path` with the administrative options.
///
/// # Errors
///
/// Returns an error if the database doesn't exist and `create_if_missing` is false,
/// or if opening or migrating it fails.
pub fn open_lowlevel(path: &Path, opts: &AdminOpenOptions) -> Result<Lowlevel> {
    if !path.exists() {
        if !opts.create_if_missing {
            return Err(AdminError::missing_database(path));
        }
        ensure_parent_dir(path)?;
    }
    let mut db_opts = opts.db.clone();
    db_opts.path = Some(path.to_path_buf());
    db_opts.in_memory = false;
    Ok(Lowlevel::open(db_opts)?)
}

pub(crate) fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Counters of `folder` computed from the records without writing anything.
pub(crate) fn count_folder(txn: &impl FileReader, folder: &str) -> Result<MetadataTracker> {
    let mut meta = MetadataTracker::new();
    txn.with_all_folder(folder, |device, file| {
        meta.add_file(device, &file);
        Ok(true)
    })?;
    for (gk, value) in txn.collect_prefix(&keys::folder_prefix(KeyType::GlobalVersion, folder))? {
        let list = record::decode_version_list(&value)?;
        let Some(head) = list.head() else { continue };
        let name = keys::name_from_global_version_key(&gk);
        if let Some(file) = txn.get_file_by_key(&keys::device_file_key(folder, &head.device, name))? {
            meta.add_file(GLOBAL_DEVICE_ID, &file);
        }
    }
    Ok(meta)
}
