//! Global version index: one ranked [`VersionList`] per (folder, name).
//!
//! Ranking is a function of the set of entries only, never of insertion order:
//! the list is rebuilt by repeatedly taking the best remaining entry.
//!
//! 1. An entry dominated by another remaining entry is never taken before it.
//! 2. Among undominated entries the lowest device id wins, except that an entry
//!    with an equal version and no invalid flag is preferred over an invalid one.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::keys::{self, KeyType};
use super::lowlevel::Lowlevel;
use super::meta::MetadataTracker;
use super::record;
use super::transactions::{FileReader, ReadWriteTransaction};
use crate::protocol::{FileInfo, Vector, VectorOrdering};
use crate::types::{DbError, DeviceId, Result, GLOBAL_DEVICE_ID};

/// One device's version of a file, as seen by the global index.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct FileVersion {
    /// Owning device.
    pub device: DeviceId,
    /// The device's version vector.
    pub version: Vector,
    /// The device's record is invalid or ignored.
    pub invalid: bool,
    /// The device's record is a tombstone.
    pub deleted: bool,
}

impl FileVersion {
    /// Summarizes `file` as held by `device`.
    pub fn of(device: DeviceId, file: &FileInfo) -> Self {
        Self {
            device,
            version: file.version.clone(),
            invalid: file.is_invalid(),
            deleted: file.is_deleted(),
        }
    }
}

/// Ranked versions of one file across devices; the head is the global version.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct VersionList {
    versions: Vec<FileVersion>,
}

/// Result of [`VersionList::update`] and [`VersionList::remove`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlobalChange {
    /// The list differs from before.
    pub changed: bool,
    /// Head before the change.
    pub old_head: Option<FileVersion>,
}

impl GlobalChange {
    fn unchanged(old_head: Option<FileVersion>) -> Self {
        Self {
            changed: false,
            old_head,
        }
    }
}

impl VersionList {
    /// An empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ranks arbitrary entries. Later duplicates of a device replace earlier ones.
    pub fn from_entries(entries: impl IntoIterator<Item = FileVersion>) -> Self {
        let mut pool: Vec<FileVersion> = Vec::new();
        for entry in entries {
            match pool.iter_mut().find(|e| e.device == entry.device) {
                Some(slot) => *slot = entry,
                None => pool.push(entry),
            }
        }
        Self {
            versions: rank(pool),
        }
    }

    /// Wraps entries that are already in ranked order, as read back from storage.
    pub(crate) fn from_ranked(versions: Vec<FileVersion>) -> Self {
        Self { versions }
    }

    /// Entries in rank order.
    pub fn versions(&self) -> &[FileVersion] {
        &self.versions
    }

    /// The global version.
    pub fn head(&self) -> Option<&FileVersion> {
        self.versions.first()
    }

    /// `device`'s entry, if any.
    pub fn get(&self, device: &DeviceId) -> Option<&FileVersion> {
        self.versions.iter().find(|v| v.device == *device)
    }

    /// Number of devices holding the file.
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Whether no device holds the file.
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Whether the stored order matches the ranking rule.
    pub fn is_ranked(&self) -> bool {
        rank(self.versions.clone()) == self.versions
    }

    /// Replaces or inserts `device`'s entry for `file` and re-ranks.
    pub fn update(&mut self, device: DeviceId, file: &FileInfo) -> GlobalChange {
        let old_head = self.head().cloned();
        let entry = FileVersion::of(device, file);
        if self.get(&device) == Some(&entry) {
            return GlobalChange::unchanged(old_head);
        }
        let mut pool = std::mem::take(&mut self.versions);
        pool.retain(|v| v.device != device);
        pool.push(entry);
        self.versions = rank(pool);
        GlobalChange {
            changed: true,
            old_head,
        }
    }

    /// Drops `device`'s entry and re-ranks.
    pub fn remove(&mut self, device: &DeviceId) -> GlobalChange {
        let old_head = self.head().cloned();
        let before = self.versions.len();
        self.versions.retain(|v| v.device != *device);
        if self.versions.len() == before {
            return GlobalChange::unchanged(old_head);
        }
        self.versions = rank(std::mem::take(&mut self.versions));
        GlobalChange {
            changed: true,
            old_head,
        }
    }

    /// Devices holding a valid copy of the global version.
    pub fn availability(&self) -> Vec<DeviceId> {
        let Some(head) = self.head() else {
            return Vec::new();
        };
        self.versions
            .iter()
            .filter(|v| !v.invalid && v.version == head.version)
            .map(|v| v.device)
            .collect()
    }
}

fn rank(mut pool: Vec<FileVersion>) -> Vec<FileVersion> {
    let mut out = Vec::with_capacity(pool.len());
    while !pool.is_empty() {
        let idx = best_index(&pool);
        out.push(pool.remove(idx));
    }
    out
}

fn best_index(pool: &[FileVersion]) -> usize {
    let dominated = |i: usize| {
        pool.iter()
            .enumerate()
            .any(|(j, other)| j != i && pool[i].version.compare(&other.version) == VectorOrdering::Lesser)
    };
    let first = (0..pool.len())
        .filter(|&i| !dominated(i))
        .min_by_key(|&i| pool[i].device)
        .unwrap_or(0);
    (0..pool.len())
        .filter(|&i| pool[i].version == pool[first].version)
        .min_by_key(|&i| (pool[i].invalid, pool[i].device))
        .unwrap_or(first)
}

/// Whether a device holding `have` (or nothing) needs the global version `global`.
///
/// Invalid or unversioned globals are never needed. A missing file is needed
/// unless the global is a tombstone; a present file only when strictly dominated.
pub fn need(global: &FileVersion, have: Option<&FileVersion>) -> bool {
    if global.invalid || global.version.is_empty() {
        return false;
    }
    match have {
        None => !global.deleted,
        Some(have) => have.version.compare(&global.version) == VectorOrdering::Lesser,
    }
}

impl ReadWriteTransaction {
    /// Records `file` as `device`'s version in the global list of its name.
    ///
    /// `previous_head` must be the global record as it was before `device`'s
    /// record was overwritten; it is needed to keep the global counters right.
    /// Returns whether the list changed.
    pub fn update_global(
        &mut self,
        folder: &str,
        device: DeviceId,
        file: &FileInfo,
        previous_head: Option<&FileInfo>,
        meta: &mut MetadataTracker,
    ) -> Result<bool> {
        let gk = keys::global_version_key(folder, file.name.as_bytes());
        let mut list = self.get_version_list_by_key(&gk)?.unwrap_or_default();
        let change = list.update(device, file);
        if !change.changed {
            return Ok(false);
        }
        let new_head = list
            .head()
            .cloned()
            .ok_or(DbError::Invalid("global list empty after insert"))?;
        if change.old_head.as_ref() != Some(&new_head) {
            if let Some(old) = previous_head {
                meta.remove_file(GLOBAL_DEVICE_ID, old);
            }
            if new_head.device == device {
                meta.add_file(GLOBAL_DEVICE_ID, file);
            } else if let Some(head_file) = self.head_record(folder, &new_head.device, &file.name)? {
                meta.add_file(GLOBAL_DEVICE_ID, &head_file);
            }
        }
        debug!(folder, name = %file.name, head = %new_head.device, "syncdb.globals.updated");
        self.put(&gk, &record::encode_version_list(&list))?;
        Ok(true)
    }

    /// Removes `device`'s entry for `name`; `removed` is the device's record as it was.
    pub fn remove_from_global(
        &mut self,
        folder: &str,
        device: DeviceId,
        name: &str,
        removed: &FileInfo,
        meta: &mut MetadataTracker,
    ) -> Result<()> {
        let gk = keys::global_version_key(folder, name.as_bytes());
        let Some(mut list) = self.get_version_list_by_key(&gk)? else {
            return Ok(());
        };
        let change = list.remove(&device);
        if !change.changed {
            return Ok(());
        }
        let was_head = change
            .old_head
            .as_ref()
            .is_some_and(|head| head.device == device);
        if was_head {
            meta.remove_file(GLOBAL_DEVICE_ID, removed);
        }
        match list.head() {
            None => self.delete(&gk)?,
            Some(head) => {
                if was_head {
                    if let Some(head_file) = self.head_record(folder, &head.device, name)? {
                        meta.add_file(GLOBAL_DEVICE_ID, &head_file);
                    }
                }
                self.put(&gk, &record::encode_version_list(&list))?;
            }
        }
        debug!(folder, name, device = %device, "syncdb.globals.removed");
        Ok(())
    }

    // A list entry without a record is left for `check_globals` to drop.
    fn head_record(&self, folder: &str, device: &DeviceId, name: &str) -> Result<Option<FileInfo>> {
        let file = self.get_file(folder, device, name)?;
        if file.is_none() {
            warn!(folder, name, device = %device, "syncdb.globals.head_missing");
        }
        Ok(file)
    }

    /// Rebuilds the version lists of `folder`, or of every folder, from the
    /// device records.
    ///
    /// Records missing from their list are added first; a list that cannot be
    /// decoded is replaced by one built from its name's records. Then every
    /// entry is checked against its record. `on_head` sees the record of each
    /// surviving list's head.
    pub(crate) fn reconcile_globals(
        &mut self,
        folder: Option<&str>,
        mut on_head: impl FnMut(&FileInfo),
    ) -> Result<GlobalsCheck> {
        let (records, lists) = match folder {
            Some(folder) => (
                keys::folder_prefix(KeyType::DeviceFile, folder),
                keys::folder_prefix(KeyType::GlobalVersion, folder),
            ),
            None => (
                keys::tag_prefix(KeyType::DeviceFile),
                keys::tag_prefix(KeyType::GlobalVersion),
            ),
        };
        let mut stats = GlobalsCheck::default();
        self.add_unlisted_records(&records, &mut stats)?;
        for (gk, value) in self.collect_prefix(&lists)? {
            stats.lists += 1;
            let folder = keys::folder_from_key(&gk).to_owned();
            let name = keys::name_from_global_version_key(&gk).to_vec();
            let list = match record::decode_version_list(&value) {
                Ok(list) if !list.is_empty() => list,
                Ok(_) => {
                    stats.deleted_lists += 1;
                    self.delete(&gk)?;
                    continue;
                }
                Err(err) => {
                    warn!(folder, error = %err, "syncdb.globals.undecodable");
                    stats.deleted_lists += 1;
                    self.delete(&gk)?;
                    continue;
                }
            };
            let mut kept = Vec::with_capacity(list.len());
            for entry in list.versions() {
                let dk = keys::device_file_key(&folder, &entry.device, &name);
                let Some(file) = self.get_file_by_key(&dk)? else {
                    stats.dropped += 1;
                    continue;
                };
                let actual = FileVersion::of(entry.device, &file);
                if actual != *entry {
                    stats.refreshed += 1;
                }
                kept.push((actual, file));
            }
            let rebuilt = VersionList::from_entries(kept.iter().map(|(v, _)| v.clone()));
            let Some(head) = rebuilt.head() else {
                stats.deleted_lists += 1;
                self.delete(&gk)?;
                continue;
            };
            if let Some((_, file)) = kept.iter().find(|(v, _)| v.device == head.device) {
                on_head(file);
            }
            if rebuilt != list {
                self.put(&gk, &record::encode_version_list(&rebuilt))?;
            }
        }
        Ok(stats)
    }

    fn add_unlisted_records(&mut self, prefix: &[u8], stats: &mut GlobalsCheck) -> Result<()> {
        for (dk, value) in self.collect_prefix(prefix)? {
            let folder = keys::folder_from_key(&dk).to_owned();
            let device = keys::device_from_device_file_key(&dk);
            let gk = keys::global_version_key(&folder, keys::name_from_device_file_key(&dk));
            let file = record::decode_file(&value)?;
            let mut list = match self.get(&gk)? {
                None => VersionList::new(),
                Some(bytes) => match record::decode_version_list(&bytes) {
                    Ok(list) => list,
                    Err(err) => {
                        warn!(folder, name = %file.name, error = %err, "syncdb.globals.undecodable");
                        stats.rebuilt += 1;
                        VersionList::new()
                    }
                },
            };
            if list.get(&device).is_some() {
                continue;
            }
            list.update(device, &file);
            debug!(folder, name = %file.name, device = %device, "syncdb.globals.unlisted");
            stats.added += 1;
            self.put(&gk, &record::encode_version_list(&list))?;
        }
        Ok(())
    }

    /// Reconciles every version list of `folder` with the device records.
    ///
    /// The head of every surviving list is accounted into `meta`'s global counters.
    pub fn check_globals(&mut self, folder: &str, meta: &mut MetadataTracker) -> Result<GlobalsCheck> {
        let stats = self.reconcile_globals(Some(folder), |head| meta.add_file(GLOBAL_DEVICE_ID, head))?;
        if stats.total() > 0 {
            info!(
                folder,
                lists = stats.lists,
                added = stats.added,
                rebuilt = stats.rebuilt,
                dropped = stats.dropped,
                refreshed = stats.refreshed,
                deleted_lists = stats.deleted_lists,
                "syncdb.globals.check_repaired"
            );
        } else {
            debug!(folder, lists = stats.lists, "syncdb.globals.check_clean");
        }
        Ok(stats)
    }
}

/// Outcome of a [`Lowlevel::check_globals`] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GlobalsCheck {
    /// Version lists examined.
    pub lists: u64,
    /// Entries added for records their list did not mention.
    pub added: u64,
    /// Undecodable lists rebuilt from their records.
    pub rebuilt: u64,
    /// Entries dropped because their device record is gone.
    pub dropped: u64,
    /// Entries refreshed from a record that disagreed with them.
    pub refreshed: u64,
    /// Lists deleted because no entry remained.
    pub deleted_lists: u64,
}

impl GlobalsCheck {
    /// Number of fixes applied.
    pub fn total(&self) -> u64 {
        self.added + self.rebuilt + self.dropped + self.refreshed + self.deleted_lists
    }
}

impl Lowlevel {
    /// Reconciles every version list of `folder` with the device records in
    /// its own transaction.
    ///
    /// Records missing from their list are added, entries whose record no
    /// longer exists are dropped, entries whose record disagrees are
    /// refreshed, and each surviving list is re-ranked. The head of every
    /// surviving list is accounted into `meta`'s global counters.
    pub fn check_globals(&self, folder: &str, meta: &mut MetadataTracker) -> Result<GlobalsCheck> {
        let mut txn = self.begin_write()?;
        let stats = txn.check_globals(folder, meta)?;
        txn.commit()?;
        Ok(stats)
    }
}
