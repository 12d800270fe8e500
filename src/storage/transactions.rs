//! Typed transactions over the raw backend.
//!
//! [`ReadOnlyTransaction`] is a snapshot. [`ReadWriteTransaction`] is the one
//! writer; dropping it without [`ReadWriteTransaction::commit`] aborts it.
//! Both read through [`FileReader`].

use std::collections::BTreeSet;

use tracing::{debug, warn};

use super::backend::{ReadTransaction, WriteTransaction};
use super::globals::{self, VersionList};
use super::keys::{self, KeyType};
use super::record;
use crate::protocol::FileInfo;
use crate::types::{DeviceId, Result};

/// Whether `name` lies at or below the directory `prefix`; the empty prefix matches all.
pub(crate) fn has_unslashed_prefix(name: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    match name.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Typed reads shared by both transaction kinds.
pub trait FileReader {
    /// The underlying backend transaction.
    fn raw(&self) -> &dyn ReadTransaction;

    /// Raw value under `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.raw().get(key)
    }

    /// Every key/value pair under `prefix`, materialized.
    fn collect_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        self.raw().scan(prefix, prefix, &mut |k, v| {
            out.push((k.to_vec(), v.to_vec()));
            Ok(true)
        })?;
        Ok(out)
    }

    /// Number of keys under `prefix`.
    fn count_prefix(&self, prefix: &[u8]) -> Result<u64> {
        let mut n = 0u64;
        self.raw().scan(prefix, prefix, &mut |_, _| {
            n += 1;
            Ok(true)
        })?;
        Ok(n)
    }

    /// The file record stored under a DeviceFile key.
    fn get_file_by_key(&self, key: &[u8]) -> Result<Option<FileInfo>> {
        match self.get(key)? {
            Some(bytes) => record::decode_file(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// `device`'s record for `name` in `folder`.
    fn get_file(&self, folder: &str, device: &DeviceId, name: &str) -> Result<Option<FileInfo>> {
        self.get_file_by_key(&keys::device_file_key(folder, device, name.as_bytes()))
    }

    /// The version list stored under a GlobalVersion key.
    fn get_version_list_by_key(&self, key: &[u8]) -> Result<Option<VersionList>> {
        match self.get(key)? {
            Some(bytes) => record::decode_version_list(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Ranked versions of `name` in `folder`.
    fn get_global_versions(&self, folder: &str, name: &str) -> Result<Option<VersionList>> {
        self.get_version_list_by_key(&keys::global_version_key(folder, name.as_bytes()))
    }

    /// The record of the device holding the global version of `name`.
    fn get_global(&self, folder: &str, name: &str) -> Result<Option<FileInfo>> {
        let Some(list) = self.get_global_versions(folder, name)? else {
            return Ok(None);
        };
        let Some(head) = list.head() else {
            return Ok(None);
        };
        let file = self.get_file(folder, &head.device, name)?;
        if file.is_none() {
            warn!(folder, name, device = %head.device, "syncdb.globals.head_missing");
        }
        Ok(file)
    }

    /// Devices holding a valid copy of the global version of `name`.
    fn availability(&self, folder: &str, name: &str) -> Result<Vec<DeviceId>> {
        Ok(self
            .get_global_versions(folder, name)?
            .map(|list| list.availability())
            .unwrap_or_default())
    }

    /// Visits `device`'s records at or below `prefix`, in name order.
    fn with_have(
        &self,
        folder: &str,
        device: &DeviceId,
        prefix: &str,
        mut visit: impl FnMut(FileInfo) -> bool,
    ) -> Result<()> {
        let mut scan_prefix = keys::device_file_prefix(folder, device);
        scan_prefix.extend_from_slice(prefix.as_bytes());
        self.raw().scan(&scan_prefix, &scan_prefix, &mut |_, v| {
            let file = record::decode_file(v)?;
            if !has_unslashed_prefix(&file.name, prefix) {
                return Ok(true);
            }
            Ok(visit(file))
        })
    }

    /// Visits local records in sequence order, starting at `from`.
    ///
    /// Index entries that do not point back at a record with the same sequence
    /// are skipped; repair removes them.
    fn with_have_sequence(
        &self,
        folder: &str,
        from: i64,
        mut visit: impl FnMut(FileInfo) -> bool,
    ) -> Result<()> {
        let prefix = keys::folder_prefix(KeyType::Sequence, folder);
        let start = keys::sequence_key(folder, from.max(0));
        let mut entries = Vec::new();
        self.raw().scan(&prefix, &start, &mut |k, v| {
            entries.push((keys::sequence_from_sequence_key(k), v.to_vec()));
            Ok(true)
        })?;
        for (seq, dk) in entries {
            let Some(file) = self.get_file_by_key(&dk)? else {
                debug!(folder, seq, "syncdb.sequence.dangling");
                continue;
            };
            if file.sequence != seq {
                debug!(folder, seq, actual = file.sequence, name = %file.name, "syncdb.sequence.mismatch");
                continue;
            }
            if !visit(file) {
                break;
            }
        }
        Ok(())
    }

    /// Visits the global record of every name at or below `prefix`.
    fn with_global(
        &self,
        folder: &str,
        prefix: &str,
        mut visit: impl FnMut(FileInfo) -> bool,
    ) -> Result<()> {
        let mut scan_prefix = keys::folder_prefix(KeyType::GlobalVersion, folder);
        scan_prefix.extend_from_slice(prefix.as_bytes());
        for (gk, value) in self.collect_prefix(&scan_prefix)? {
            let name = String::from_utf8_lossy(keys::name_from_global_version_key(&gk)).into_owned();
            if !has_unslashed_prefix(&name, prefix) {
                continue;
            }
            let list = record::decode_version_list(&value)?;
            let Some(head) = list.head() else { continue };
            let Some(file) = self.get_file(folder, &head.device, &name)? else {
                warn!(folder, name, device = %head.device, "syncdb.globals.head_missing");
                continue;
            };
            if !visit(file) {
                break;
            }
        }
        Ok(())
    }

    /// Visits the global record of every name `device` needs.
    fn with_need(
        &self,
        folder: &str,
        device: &DeviceId,
        mut visit: impl FnMut(FileInfo) -> bool,
    ) -> Result<()> {
        let prefix = keys::folder_prefix(KeyType::GlobalVersion, folder);
        for (gk, value) in self.collect_prefix(&prefix)? {
            let list = record::decode_version_list(&value)?;
            let Some(head) = list.head() else { continue };
            if !globals::need(head, list.get(device)) {
                continue;
            }
            let name = String::from_utf8_lossy(keys::name_from_global_version_key(&gk)).into_owned();
            let Some(file) = self.get_file(folder, &head.device, &name)? else {
                warn!(folder, name, device = %head.device, "syncdb.globals.head_missing");
                continue;
            };
            if !visit(file) {
                break;
            }
        }
        Ok(())
    }

    /// Visits every device record of `folder`.
    fn with_all_folder(
        &self,
        folder: &str,
        mut visit: impl FnMut(DeviceId, FileInfo) -> Result<bool>,
    ) -> Result<()> {
        let prefix = keys::folder_prefix(KeyType::DeviceFile, folder);
        self.raw().scan(&prefix, &prefix, &mut |k, v| {
            let device = keys::device_from_device_file_key(k);
            visit(device, record::decode_file(v)?)
        })
    }

    /// Devices with at least one record in `folder`.
    fn list_devices(&self, folder: &str) -> Result<Vec<DeviceId>> {
        let prefix = keys::folder_prefix(KeyType::DeviceFile, folder);
        let mut devices = Vec::new();
        let mut start = prefix.clone();
        loop {
            let mut found = None;
            self.raw().scan(&prefix, &start, &mut |k, _| {
                found = Some(keys::device_from_device_file_key(k));
                Ok(false)
            })?;
            let Some(device) = found else { break };
            devices.push(device);
            match keys::prefix_end(&keys::device_file_prefix(folder, &device)) {
                Some(next) => start = next,
                None => break,
            }
        }
        Ok(devices)
    }

    /// Folders with any key of `kind`.
    fn list_folders_of(&self, kind: KeyType) -> Result<BTreeSet<String>> {
        let prefix = keys::tag_prefix(kind);
        let mut folders = BTreeSet::new();
        let mut start = prefix.clone();
        loop {
            let mut found = None;
            self.raw().scan(&prefix, &start, &mut |k, _| {
                found = Some(keys::folder_from_key(k).to_owned());
                Ok(false)
            })?;
            let Some(folder) = found else { break };
            let next = keys::prefix_end(&keys::folder_prefix(kind, &folder));
            folders.insert(folder);
            match next {
                Some(next) => start = next,
                None => break,
            }
        }
        Ok(folders)
    }
}

/// A consistent point-in-time view; released on drop.
pub struct ReadOnlyTransaction {
    inner: Box<dyn ReadTransaction>,
}

impl ReadOnlyTransaction {
    pub(crate) fn new(inner: Box<dyn ReadTransaction>) -> Self {
        Self { inner }
    }

    /// Releases the snapshot.
    pub fn release(self) {}
}

impl FileReader for ReadOnlyTransaction {
    fn raw(&self) -> &dyn ReadTransaction {
        self.inner.as_ref()
    }
}

/// The serialized writer.
pub struct ReadWriteTransaction {
    inner: Option<Box<dyn WriteTransaction>>,
}

impl ReadWriteTransaction {
    pub(crate) fn new(inner: Box<dyn WriteTransaction>) -> Self {
        Self { inner: Some(inner) }
    }

    fn writer(&mut self) -> &mut dyn WriteTransaction {
        match self.inner.as_deref_mut() {
            Some(txn) => txn,
            None => unreachable!("transaction used after completion"),
        }
    }

    /// Stores a raw value.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.writer().put(key, value)
    }

    /// Removes a raw key.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.writer().delete(key)
    }

    /// Stores `file` under a DeviceFile key.
    pub fn put_file(&mut self, key: &[u8], file: &FileInfo) -> Result<()> {
        self.put(key, &record::encode_file(file))
    }

    /// Removes every key under `prefix` and returns how many there were.
    pub fn delete_prefix(&mut self, prefix: &[u8]) -> Result<u64> {
        let doomed = self.collect_prefix(prefix)?;
        for (key, _) in &doomed {
            self.delete(key)?;
        }
        Ok(doomed.len() as u64)
    }

    /// Makes every write visible.
    pub fn commit(mut self) -> Result<()> {
        match self.inner.take() {
            Some(txn) => txn.commit(),
            None => Ok(()),
        }
    }

    /// Discards every write.
    pub fn abort(mut self) -> Result<()> {
        match self.inner.take() {
            Some(txn) => txn.abort(),
            None => Ok(()),
        }
    }
}

impl FileReader for ReadWriteTransaction {
    fn raw(&self) -> &dyn ReadTransaction {
        match self.inner.as_deref() {
            Some(txn) => txn.as_read(),
            None => unreachable!("transaction used after completion"),
        }
    }
}

impl Drop for ReadWriteTransaction {
    fn drop(&mut self) {
        if let Some(txn) = self.inner.take() {
            debug!("syncdb.txn.rollback");
            if let Err(err) = txn.abort() {
                warn!(error = %err, "syncdb.txn.rollback_failed");
            }
        }
    }
}
