//! The database handle every folder shares.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info};

use super::backend::{Backend, RedbBackend};
use super::keys::{self, KeyType};
use super::meta::MetadataTracker;
use super::misc;
use super::options::DbOptions;
use super::schema;
use super::transactions::{FileReader, ReadOnlyTransaction, ReadWriteTransaction};
use crate::primitives::concurrency::GcLock;
use crate::protocol::FileInfo;
use crate::types::{DbError, DeviceId, Result, LOCAL_DEVICE_ID};

/// What a [`Lowlevel::garbage_collect`] pass removed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    /// Folders whose leftovers were removed.
    pub folders: Vec<String>,
    /// Keys deleted.
    pub keys_deleted: u64,
}

/// Shared access to one database: transactions, migrations and maintenance.
pub struct Lowlevel {
    backend: Box<dyn Backend>,
    gc: GcLock,
    options: DbOptions,
}

impl Lowlevel {
    /// Wraps an open backend. No migration runs.
    pub fn new(backend: impl Backend, options: DbOptions) -> Self {
        Self {
            backend: Box::new(backend),
            gc: GcLock::new(),
            options,
        }
    }

    /// Opens the database `options` describe and, unless disabled, migrates it.
    pub fn open(options: DbOptions) -> Result<Self> {
        let backend = if options.in_memory {
            RedbBackend::memory()?
        } else {
            let path = options
                .path
                .as_deref()
                .ok_or(DbError::Invalid("database path required unless in_memory"))?;
            RedbBackend::open(path)?
        };
        let db = Self::new(backend, options);
        if db.options.migrate_on_open {
            schema::update_schema(&db)?;
        }
        Ok(db)
    }

    /// An empty in-memory database; `options.path` is ignored.
    pub fn open_memory(options: DbOptions) -> Result<Self> {
        Self::open(DbOptions {
            in_memory: true,
            ..options
        })
    }

    /// Options the database was opened with.
    pub fn options(&self) -> &DbOptions {
        &self.options
    }

    /// Lock separating counter recomputation from maintenance passes.
    pub fn gc_lock(&self) -> &GcLock {
        &self.gc
    }

    /// Opens a snapshot.
    pub fn begin_read(&self) -> Result<ReadOnlyTransaction> {
        Ok(ReadOnlyTransaction::new(self.backend.begin_read()?))
    }

    /// Opens the writer, waiting for the current one to finish.
    pub fn begin_write(&self) -> Result<ReadWriteTransaction> {
        Ok(ReadWriteTransaction::new(self.backend.begin_write()?))
    }

    /// Every folder with any folder-scoped key.
    pub fn list_folders(&self) -> Result<BTreeSet<String>> {
        let txn = self.begin_read()?;
        let mut folders = BTreeSet::new();
        for kind in KeyType::ALL.into_iter().filter(|k| k.is_folder_scoped()) {
            folders.extend(txn.list_folders_of(kind)?);
        }
        Ok(folders)
    }

    /// Removes every key of `folder`, including its index ids.
    pub fn drop_folder(&self, folder: &str) -> Result<u64> {
        let mut txn = self.begin_write()?;
        let mut deleted = 0;
        for kind in KeyType::ALL.into_iter().filter(|k| k.is_folder_scoped()) {
            deleted += txn.delete_prefix(&keys::folder_prefix(kind, folder))?;
        }
        deleted += misc::drop_index_ids(&mut txn, folder)?;
        misc::drop_local_sequence_floor(&mut txn, folder)?;
        txn.commit()?;
        info!(folder, deleted, "syncdb.lowlevel.folder_dropped");
        Ok(deleted)
    }

    /// Deletes folder-scoped leftovers of folders that have no device records.
    ///
    /// Takes the GC lock exclusively, so no counter recomputation overlaps it.
    /// The local sequence of a collected folder survives as its sequence floor.
    pub fn garbage_collect(&self) -> Result<GcReport> {
        let guard = self.gc.maintenance();
        let mut txn = self.begin_write()?;
        let live = txn.list_folders_of(KeyType::DeviceFile)?;
        let mut report = GcReport::default();
        let mut stale = BTreeSet::new();
        for kind in [KeyType::GlobalVersion, KeyType::Sequence, KeyType::FolderMeta] {
            stale.extend(txn.list_folders_of(kind)?.into_iter().filter(|f| !live.contains(f)));
        }
        for folder in &stale {
            let persisted = match MetadataTracker::from_db(&txn, folder) {
                Ok(Some(meta)) => meta.sequence(LOCAL_DEVICE_ID),
                Ok(None) | Err(DbError::Corruption(_)) => 0,
                Err(err) => return Err(err),
            };
            misc::raise_local_sequence_floor(&mut txn, folder, persisted)?;
            for kind in [KeyType::GlobalVersion, KeyType::Sequence, KeyType::FolderMeta] {
                report.keys_deleted += txn.delete_prefix(&keys::folder_prefix(kind, folder))?;
            }
        }
        txn.commit()?;
        guard.finish();
        report.folders = stale.into_iter().collect();
        info!(
            folders = report.folders.len(),
            keys = report.keys_deleted,
            "syncdb.lowlevel.gc_completed"
        );
        Ok(report)
    }
}

impl ReadWriteTransaction {
    /// Applies records for the local device, assigning each a fresh sequence.
    ///
    /// Records equivalent to what is stored are skipped. Returns how many were written.
    pub fn update_local_files(
        &mut self,
        folder: &str,
        files: Vec<FileInfo>,
        meta: &mut MetadataTracker,
    ) -> Result<u64> {
        let mut written = 0;
        for mut file in files {
            let dk = keys::device_file_key(folder, &LOCAL_DEVICE_ID, file.name.as_bytes());
            let existing = self.get_file_by_key(&dk)?;
            if existing.as_ref().is_some_and(|ef| ef.is_equivalent(&file)) {
                continue;
            }
            let previous_head = self.get_global(folder, &file.name)?;
            if let Some(ef) = &existing {
                meta.remove_file(LOCAL_DEVICE_ID, ef);
            }
            self.assign_local_sequence(folder, &dk, &mut file, existing.map(|ef| ef.sequence), meta)?;
            meta.add_file(LOCAL_DEVICE_ID, &file);
            self.put_file(&dk, &file)?;
            self.update_global(folder, LOCAL_DEVICE_ID, &file, previous_head.as_ref(), meta)?;
            debug!(folder, name = %file.name, seq = file.sequence, "syncdb.lowlevel.local_updated");
            written += 1;
        }
        Ok(written)
    }

    /// Applies records announced by a remote device; their sequences are kept.
    pub fn update_remote_files(
        &mut self,
        folder: &str,
        device: DeviceId,
        files: Vec<FileInfo>,
        meta: &mut MetadataTracker,
    ) -> Result<u64> {
        let mut written = 0;
        for file in files {
            let dk = keys::device_file_key(folder, &device, file.name.as_bytes());
            let existing = self.get_file_by_key(&dk)?;
            if existing.as_ref().is_some_and(|ef| ef.is_equivalent(&file)) {
                continue;
            }
            let previous_head = self.get_global(folder, &file.name)?;
            if let Some(ef) = &existing {
                meta.remove_file(device, ef);
            }
            meta.add_file(device, &file);
            self.put_file(&dk, &file)?;
            self.update_global(folder, device, &file, previous_head.as_ref(), meta)?;
            written += 1;
        }
        if written > 0 {
            debug!(folder, device = %device, written, "syncdb.lowlevel.remote_updated");
        }
        Ok(written)
    }

    /// Removes every record of `device` in `folder` together with its global
    /// entries and, for the local device, its sequence index.
    pub fn drop_device_folder(
        &mut self,
        folder: &str,
        device: DeviceId,
        meta: &mut MetadataTracker,
    ) -> Result<u64> {
        let records = self.collect_prefix(&keys::device_file_prefix(folder, &device))?;
        for (dk, value) in &records {
            let file = super::record::decode_file(value)?;
            self.remove_from_global(folder, device, &file.name, &file, meta)?;
            meta.remove_file(device, &file);
            self.delete(dk)?;
        }
        if device == LOCAL_DEVICE_ID {
            self.delete_prefix(&keys::folder_prefix(KeyType::Sequence, folder))?;
        }
        info!(folder, device = %device, records = records.len(), "syncdb.lowlevel.device_dropped");
        Ok(records.len() as u64)
    }
}
