use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::storage::{get_index_id, schema_info, Counts, FileReader, MetadataTracker, SchemaInfo};
use crate::types::{DbError, GLOBAL_DEVICE_ID, LOCAL_DEVICE_ID};

use crate::admin::options::AdminOpenOptions;
use crate::admin::util::{count_folder, open_lowlevel};
use crate::admin::Result;

/// Database-wide statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    /// Database file.
    pub filesystem: FilesystemStats,
    /// Stored schema version.
    pub schema: SchemaInfo,
    /// One entry per folder.
    pub folders: Vec<FolderStats>,
}

/// File-level facts.
#[derive(Debug, Clone, Serialize)]
pub struct FilesystemStats {
    /// Database path.
    pub db_path: String,
    /// Size of the database file.
    pub db_size_bytes: u64,
}

/// Counters of one folder.
#[derive(Debug, Clone, Serialize)]
pub struct FolderStats {
    /// Folder id.
    pub folder: String,
    /// Counters were computed from the records because none could be read.
    pub recomputed: bool,
    /// Counters of the global records.
    pub global: Counts,
    /// Per-device counters.
    pub devices: Vec<DeviceStats>,
}

/// Counters of one device in one folder.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStats {
    /// Device id, or `local`.
    pub device: String,
    /// Highest sequence seen.
    pub sequence: i64,
    /// Index id, `0x0000000000000000` when unset.
    pub index_id: String,
    /// Non-empty counter buckets.
    pub counts: Vec<Counts>,
}

/// Reports counters of every folder of the database at `path` without writing.
pub fn stats(path: impl AsRef<Path>, opts: &AdminOpenOptions) -> Result<StatsReport> {
    let path = path.as_ref();
    let mut opts = opts.clone();
    opts.db.migrate_on_open = false;
    let db = open_lowlevel(path, &opts)?;
    let db_meta = fs::metadata(path)?;
    let schema = schema_info(&db)?;

    let txn = db.begin_read()?;
    let mut folders = Vec::new();
    for folder in db.list_folders()? {
        let (meta, recomputed) = match MetadataTracker::from_db(&txn, &folder) {
            Ok(Some(meta)) => (meta, false),
            Ok(None) | Err(DbError::Corruption(_)) => (count_folder(&txn, &folder)?, true),
            Err(err) => return Err(err.into()),
        };
        let mut devices = Vec::new();
        let mut ids = meta.devices();
        ids.extend(txn.list_devices(&folder)?);
        ids.push(LOCAL_DEVICE_ID);
        ids.sort();
        ids.dedup();
        for device in ids {
            let counts: Vec<Counts> = meta
                .all_counts()
                .into_iter()
                .filter(|c| c.device == device)
                .collect();
            devices.push(DeviceStats {
                device: device.to_string(),
                sequence: meta.sequence(device),
                index_id: get_index_id(&txn, &folder, &device)?.to_string(),
                counts,
            });
        }
        folders.push(FolderStats {
            global: meta.counts(GLOBAL_DEVICE_ID, 0),
            folder,
            recomputed,
            devices,
        });
    }

    Ok(StatsReport {
        filesystem: FilesystemStats {
            db_path: path.display().to_string(),
            db_size_bytes: db_meta.len(),
        },
        schema,
        folders,
    })
}
