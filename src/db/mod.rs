//! Per-folder dataset façade over the shared [`Lowlevel`] handle.
//!
//! A [`FileSet`] owns the counters of one folder. Updates stage their counter
//! changes on a copy and publish it only once the transaction has committed,
//! so a [`Snapshot`] always pairs a database view with the counters of exactly
//! that view.

mod snapshot;

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::protocol::FileInfo;
use crate::storage::{
    get_index_id, load_metadata_tracker, set_index_id, FileReader, IndexId, Lowlevel,
    MetadataTracker, ReadWriteTransaction,
};
use crate::types::{DeviceId, Result, LOCAL_DEVICE_ID};

pub use snapshot::Snapshot;

/// All devices' records of one folder.
pub struct FileSet {
    folder: String,
    db: Arc<Lowlevel>,
    meta: RwLock<MetadataTracker>,
    // Serializes staged-counter updates; the backend serializes the rest.
    update_lock: Mutex<()>,
}

impl FileSet {
    /// Opens `folder`, loading (or recomputing) its counters.
    pub fn new(folder: impl Into<String>, db: Arc<Lowlevel>) -> Result<Self> {
        let folder = folder.into();
        let meta = load_metadata_tracker(&db, &folder)?;
        debug!(folder, seq = meta.sequence(LOCAL_DEVICE_ID), "syncdb.fileset.opened");
        Ok(Self {
            folder,
            db,
            meta: RwLock::new(meta),
            update_lock: Mutex::new(()),
        })
    }

    /// Folder id.
    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// The shared database handle.
    pub fn db(&self) -> &Arc<Lowlevel> {
        &self.db
    }

    /// Stores `device`'s records. Local records get fresh sequence numbers.
    ///
    /// When a name appears more than once the last record wins. Returns the
    /// number of records that differed from what was stored.
    pub fn update(&self, device: DeviceId, files: Vec<FileInfo>) -> Result<u64> {
        let files = drop_duplicate_names(files);
        let folder = self.folder.as_str();
        self.apply(|txn, meta| {
            if device == LOCAL_DEVICE_ID {
                txn.update_local_files(folder, files, meta)
            } else {
                txn.update_remote_files(folder, device, files, meta)
            }
        })
    }

    /// Removes every record of `device`.
    ///
    /// The local sequence survives so that later local records keep counting
    /// up from where they were; a remote device's sequence is forgotten.
    pub fn drop_device(&self, device: DeviceId) -> Result<u64> {
        let folder = self.folder.as_str();
        let dropped = self.apply(|txn, meta| {
            let n = txn.drop_device_folder(folder, device, meta)?;
            if device == LOCAL_DEVICE_ID {
                meta.reset_counts(device);
            } else {
                meta.reset_device(device);
            }
            Ok(n)
        })?;
        info!(folder, device = %device, dropped, "syncdb.fileset.device_dropped");
        Ok(dropped)
    }

    // Runs `op` against a staged copy of the counters and publishes the copy
    // under the write lock in the same step as the commit.
    fn apply(
        &self,
        op: impl FnOnce(&mut ReadWriteTransaction, &mut MetadataTracker) -> Result<u64>,
    ) -> Result<u64> {
        let _serial = self.update_lock.lock();
        let mut staged = self.meta.read().clone();
        let mut txn = self.db.begin_write()?;
        let changed = op(&mut txn, &mut staged)?;
        if !staged.dirty() {
            txn.abort()?;
            return Ok(changed);
        }
        staged.to_db(&mut txn, &self.folder)?;
        let mut published = self.meta.write();
        txn.commit()?;
        *published = staged;
        Ok(changed)
    }

    /// A consistent view of the folder and its counters.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let meta = self.meta.read();
        let txn = self.db.begin_read()?;
        Ok(Snapshot::new(self.folder.clone(), txn, meta.clone()))
    }

    /// Highest sequence seen for `device`.
    pub fn sequence(&self, device: DeviceId) -> i64 {
        self.meta.read().sequence(device)
    }

    /// The index id of `device`; the local one is created on first use.
    pub fn index_id(&self, device: DeviceId) -> Result<IndexId> {
        let txn = self.db.begin_read()?;
        let id = get_index_id(&txn, &self.folder, &device)?;
        txn.release();
        if !id.is_zero() || device != LOCAL_DEVICE_ID {
            return Ok(id);
        }

        let _serial = self.update_lock.lock();
        let mut txn = self.db.begin_write()?;
        let existing = get_index_id(&txn, &self.folder, &device)?;
        if !existing.is_zero() {
            return Ok(existing);
        }
        let id = IndexId::random();
        set_index_id(&mut txn, &self.folder, &device, id)?;
        txn.commit()?;
        info!(folder = %self.folder, index_id = %id, "syncdb.fileset.index_id_created");
        Ok(id)
    }

    /// Records the index id announced for `device`.
    pub fn set_index_id(&self, device: DeviceId, id: IndexId) -> Result<()> {
        let mut txn = self.db.begin_write()?;
        set_index_id(&mut txn, &self.folder, &device, id)?;
        txn.commit()
    }

    /// Devices with at least one record in the folder.
    pub fn list_devices(&self) -> Result<Vec<DeviceId>> {
        self.db.begin_read()?.list_devices(&self.folder)
    }
}

fn drop_duplicate_names(files: Vec<FileInfo>) -> Vec<FileInfo> {
    let mut seen = rustc_hash::FxHashSet::default();
    let mut kept: Vec<FileInfo> = files
        .into_iter()
        .rev()
        .filter(|f| seen.insert(f.name.clone()))
        .collect();
    kept.reverse();
    kept
}
