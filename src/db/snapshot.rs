use crate::protocol::{FileInfo, FLAG_LOCAL_RECEIVE_ONLY};
use crate::storage::{Counts, FileReader, MetadataTracker, ReadOnlyTransaction};
use crate::types::{DeviceId, Result, GLOBAL_DEVICE_ID, LOCAL_DEVICE_ID};

/// A point-in-time view of one folder together with its counters.
///
/// Holds a read transaction until released or dropped.
pub struct Snapshot {
    folder: String,
    txn: ReadOnlyTransaction,
    meta: MetadataTracker,
}

impl Snapshot {
    pub(super) fn new(folder: String, txn: ReadOnlyTransaction, meta: MetadataTracker) -> Self {
        Self { folder, txn, meta }
    }

    /// `device`'s record for `name`.
    pub fn get(&self, device: DeviceId, name: &str) -> Result<Option<FileInfo>> {
        self.txn.get_file(&self.folder, &device, name)
    }

    /// The global record for `name`.
    pub fn get_global(&self, name: &str) -> Result<Option<FileInfo>> {
        self.txn.get_global(&self.folder, name)
    }

    /// Devices holding a valid copy of the global version of `name`.
    pub fn availability(&self, name: &str) -> Result<Vec<DeviceId>> {
        self.txn.availability(&self.folder, name)
    }

    /// Visits every record of `device` in name order until `visit` returns false.
    pub fn with_have(&self, device: DeviceId, visit: impl FnMut(FileInfo) -> bool) -> Result<()> {
        self.txn.with_have(&self.folder, &device, "", visit)
    }

    /// Like [`Snapshot::with_have`], limited to `prefix` and the names below it.
    pub fn with_prefixed_have(
        &self,
        device: DeviceId,
        prefix: &str,
        visit: impl FnMut(FileInfo) -> bool,
    ) -> Result<()> {
        self.txn.with_have(&self.folder, &device, prefix, visit)
    }

    /// Visits local records with sequence `from` or later, in sequence order.
    pub fn with_have_sequence(&self, from: i64, visit: impl FnMut(FileInfo) -> bool) -> Result<()> {
        self.txn.with_have_sequence(&self.folder, from, visit)
    }

    /// Visits the global record of every name.
    pub fn with_global(&self, visit: impl FnMut(FileInfo) -> bool) -> Result<()> {
        self.txn.with_global(&self.folder, "", visit)
    }

    /// Like [`Snapshot::with_global`], limited to `prefix` and the names below it.
    pub fn with_prefixed_global(&self, prefix: &str, visit: impl FnMut(FileInfo) -> bool) -> Result<()> {
        self.txn.with_global(&self.folder, prefix, visit)
    }

    /// Visits the global record of every name `device` needs.
    pub fn with_need(&self, device: DeviceId, visit: impl FnMut(FileInfo) -> bool) -> Result<()> {
        self.txn.with_need(&self.folder, &device, visit)
    }

    /// Counters of unflagged local records.
    pub fn local_size(&self) -> Counts {
        self.meta.counts(LOCAL_DEVICE_ID, 0)
    }

    /// Counters of local records changed in a receive-only folder.
    pub fn receive_only_changed_size(&self) -> Counts {
        self.meta.counts(LOCAL_DEVICE_ID, FLAG_LOCAL_RECEIVE_ONLY)
    }

    /// Counters of the global records.
    pub fn global_size(&self) -> Counts {
        self.meta.counts(GLOBAL_DEVICE_ID, 0)
    }

    /// Counters of everything `device` needs.
    pub fn need_size(&self, device: DeviceId) -> Result<Counts> {
        let mut need = Counts {
            device,
            ..Counts::default()
        };
        self.with_need(device, |file| {
            need.add(&file);
            true
        })?;
        Ok(need)
    }

    /// Highest sequence seen for `device` as of this snapshot.
    pub fn sequence(&self, device: DeviceId) -> i64 {
        self.meta.sequence(device)
    }

    /// Releases the read transaction.
    pub fn release(self) {
        self.txn.release();
    }
}
