//! Per-folder aggregate counters.
//!
//! Counters are bucketed by `(device, local flag)`: records without local
//! flags land in bucket `0`, flagged records in one bucket per set flag bit.
//! The pseudo device [`GLOBAL_DEVICE_ID`] accounts the global version of
//! every name. Remote invalid records only move their device's sequence.

use std::time::Duration;

use rustc_hash::FxHashMap;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::globals::GlobalsCheck;
use super::keys::{self, KeyType};
use super::lowlevel::Lowlevel;
use super::misc;
use super::record;
use super::sequence::SequenceRepair;
use super::transactions::{FileReader, ReadWriteTransaction};
use crate::protocol::{FileInfo, LOCAL_FLAG_BITS};
use crate::types::{DbError, DeviceId, Result, GLOBAL_DEVICE_ID, LOCAL_DEVICE_ID};

/// Aggregates over the records of one `(device, flag)` bucket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    /// Owning device.
    #[serde(skip)]
    pub device: DeviceId,
    /// Local flag bit of the bucket, `0` for unflagged records.
    pub local_flags: u32,
    /// Regular files.
    pub files: i64,
    /// Directories.
    pub directories: i64,
    /// Symlinks.
    pub symlinks: i64,
    /// Tombstones.
    pub deleted: i64,
    /// Bytes of non-deleted records.
    pub bytes: i64,
}

impl Counts {
    /// Accounts `file`.
    pub fn add(&mut self, file: &FileInfo) {
        self.adjust(file, 1);
    }

    /// Reverses [`Counts::add`].
    pub fn sub(&mut self, file: &FileInfo) {
        self.adjust(file, -1);
    }

    fn adjust(&mut self, file: &FileInfo, sign: i64) {
        if file.is_deleted() {
            self.deleted += sign;
        } else if file.is_symlink() {
            self.symlinks += sign;
        } else if file.is_directory() {
            self.directories += sign;
        } else {
            self.files += sign;
        }
        self.bytes += sign * file.file_size();
    }

    /// Files, directories, symlinks and tombstones together.
    pub fn total_items(&self) -> i64 {
        self.files + self.directories + self.symlinks + self.deleted
    }

    fn is_negative(&self) -> bool {
        self.files < 0 || self.directories < 0 || self.symlinks < 0 || self.deleted < 0 || self.bytes < 0
    }

    fn is_empty(&self) -> bool {
        self.total_items() == 0 && self.bytes == 0
    }

    fn same_totals(&self, other: &Counts) -> bool {
        self.files == other.files
            && self.directories == other.directories
            && self.symlinks == other.symlinks
            && self.deleted == other.deleted
            && self.bytes == other.bytes
    }
}

/// The persisted form of a [`MetadataTracker`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CountsSet {
    /// Non-empty buckets, sorted by device and flag.
    pub counts: Vec<Counts>,
    /// Highest sequence seen per device, sorted by device.
    pub sequences: Vec<(DeviceId, i64)>,
    /// Creation time in Unix nanoseconds.
    pub created: i64,
}

/// Incrementally maintained folder counters.
#[derive(Clone, Debug)]
pub struct MetadataTracker {
    counts: FxHashMap<(DeviceId, u32), Counts>,
    sequences: FxHashMap<DeviceId, i64>,
    created: i64,
    dirty: bool,
}

impl Default for MetadataTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn now_nanos() -> i64 {
    i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos()).unwrap_or(i64::MAX)
}

impl MetadataTracker {
    /// Empty counters created now.
    pub fn new() -> Self {
        Self {
            counts: FxHashMap::default(),
            sequences: FxHashMap::default(),
            created: now_nanos(),
            dirty: false,
        }
    }

    /// Whether there are changes not yet written with [`MetadataTracker::to_db`].
    pub fn dirty(&self) -> bool {
        self.dirty
    }

    /// Creation time in Unix nanoseconds.
    pub fn created(&self) -> i64 {
        self.created
    }

    /// Time since the counters were last computed from scratch.
    pub fn age(&self) -> Duration {
        let nanos = now_nanos().saturating_sub(self.created);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(0))
    }

    #[cfg(test)]
    pub(crate) fn set_created(&mut self, created: i64) {
        self.created = created;
    }

    /// Accounts a record that `device` now holds.
    pub fn add_file(&mut self, device: DeviceId, file: &FileInfo) {
        self.dirty = true;
        self.update_sequence(device, file);
        if !self.accounted(device, file) {
            return;
        }
        for flag in flag_buckets(file.local_flags) {
            self.bucket_mut(device, flag).add(file);
        }
    }

    /// Reverses [`MetadataTracker::add_file`]; sequences never move backwards.
    pub fn remove_file(&mut self, device: DeviceId, file: &FileInfo) {
        self.dirty = true;
        if !self.accounted(device, file) {
            return;
        }
        for flag in flag_buckets(file.local_flags) {
            let bucket = self.bucket_mut(device, flag);
            bucket.sub(file);
            if bucket.is_negative() {
                warn!(device = %device, flag, name = %file.name, "syncdb.meta.negative_counts");
                *bucket = Counts {
                    device,
                    local_flags: flag,
                    ..Counts::default()
                };
            }
        }
    }

    // Remote invalid records and invalid globals are bookkeeping only.
    fn accounted(&self, device: DeviceId, file: &FileInfo) -> bool {
        !(file.is_invalid() && (file.local_flags == 0 || device == GLOBAL_DEVICE_ID))
    }

    fn update_sequence(&mut self, device: DeviceId, file: &FileInfo) {
        if device == GLOBAL_DEVICE_ID {
            return;
        }
        let seq = self.sequences.entry(device).or_insert(0);
        if file.sequence > *seq {
            *seq = file.sequence;
        }
    }

    fn bucket_mut(&mut self, device: DeviceId, flag: u32) -> &mut Counts {
        self.counts.entry((device, flag)).or_insert(Counts {
            device,
            local_flags: flag,
            ..Counts::default()
        })
    }

    /// Counters of one bucket.
    pub fn counts(&self, device: DeviceId, flag: u32) -> Counts {
        self.counts.get(&(device, flag)).copied().unwrap_or(Counts {
            device,
            local_flags: flag,
            ..Counts::default()
        })
    }

    /// Every non-empty bucket, sorted by device and flag.
    pub fn all_counts(&self) -> Vec<Counts> {
        let mut all: Vec<Counts> = self.counts.values().filter(|c| !c.is_empty()).copied().collect();
        all.sort_by_key(|c| (c.device, c.local_flags));
        all
    }

    /// Highest sequence seen for `device`.
    pub fn sequence(&self, device: DeviceId) -> i64 {
        self.sequences.get(&device).copied().unwrap_or(0)
    }

    /// Raises `device`'s sequence to at least `sequence`.
    pub fn raise_sequence(&mut self, device: DeviceId, sequence: i64) {
        let seq = self.sequences.entry(device).or_insert(0);
        if sequence > *seq {
            *seq = sequence;
            self.dirty = true;
        }
    }

    /// Allocates the next local sequence number.
    pub fn next_local_sequence(&mut self) -> i64 {
        self.dirty = true;
        let seq = self.sequences.entry(LOCAL_DEVICE_ID).or_insert(0);
        *seq += 1;
        *seq
    }

    /// Devices with counters or a sequence, excluding the global pseudo device.
    pub fn devices(&self) -> Vec<DeviceId> {
        let mut devices: Vec<DeviceId> = self
            .counts
            .keys()
            .map(|(d, _)| *d)
            .chain(self.sequences.keys().copied())
            .filter(|d| *d != GLOBAL_DEVICE_ID)
            .collect();
        devices.sort();
        devices.dedup();
        devices
    }

    /// Forgets `device`'s counters but keeps its sequence.
    pub fn reset_counts(&mut self, device: DeviceId) {
        self.dirty = true;
        self.counts.retain(|(d, _), _| *d != device);
    }

    /// Forgets `device`'s counters and sequence.
    pub fn reset_device(&mut self, device: DeviceId) {
        self.reset_counts(device);
        self.sequences.remove(&device);
    }

    /// Whether both trackers hold the same counters and sequences.
    pub fn same_counts(&self, other: &MetadataTracker) -> bool {
        let a = self.all_counts();
        let b = other.all_counts();
        a.len() == b.len()
            && a.iter().zip(&b).all(|(x, y)| {
                x.device == y.device && x.local_flags == y.local_flags && x.same_totals(y)
            })
            && self.sorted_sequences() == other.sorted_sequences()
    }

    fn sorted_sequences(&self) -> Vec<(DeviceId, i64)> {
        let mut seqs: Vec<(DeviceId, i64)> = self
            .sequences
            .iter()
            .filter(|(_, s)| **s != 0)
            .map(|(d, s)| (*d, *s))
            .collect();
        seqs.sort();
        seqs
    }

    /// The persisted form.
    pub fn to_counts_set(&self) -> CountsSet {
        CountsSet {
            counts: self.all_counts(),
            sequences: self.sorted_sequences(),
            created: self.created,
        }
    }

    /// Inverse of [`MetadataTracker::to_counts_set`].
    pub fn from_counts_set(set: CountsSet) -> Self {
        let mut meta = Self {
            counts: FxHashMap::default(),
            sequences: set.sequences.into_iter().collect(),
            created: set.created,
            dirty: false,
        };
        for c in set.counts {
            meta.counts.insert((c.device, c.local_flags), c);
        }
        meta
    }

    /// Writes the counters of `folder` inside `txn` and clears the dirty flag.
    pub fn to_db(&mut self, txn: &mut ReadWriteTransaction, folder: &str) -> Result<()> {
        txn.put(
            &keys::folder_meta_key(folder),
            &record::encode_counts(&self.to_counts_set()),
        )?;
        self.dirty = false;
        Ok(())
    }

    /// Reads the counters of `folder`; a checksum failure is [`DbError::Corruption`].
    pub fn from_db(txn: &impl FileReader, folder: &str) -> Result<Option<Self>> {
        match txn.get(&keys::folder_meta_key(folder))? {
            Some(bytes) => Ok(Some(Self::from_counts_set(record::decode_counts(&bytes)?))),
            None => Ok(None),
        }
    }
}

fn flag_buckets(local_flags: u32) -> impl Iterator<Item = u32> {
    let unflagged = (local_flags == 0).then_some(0);
    unflagged
        .into_iter()
        .chain(LOCAL_FLAG_BITS.into_iter().filter(move |bit| local_flags & bit != 0))
}

/// Why persisted counters were not trusted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecalcReason {
    /// Nothing persisted.
    Missing,
    /// Undecodable or failed its checksum.
    Corrupt,
    /// A local record is newer than the persisted sequence.
    SequenceAhead,
    /// Older than the configured recheck interval.
    Stale,
    /// Requested by an operator.
    Forced,
}

impl RecalcReason {
    fn as_str(self) -> &'static str {
        match self {
            RecalcReason::Missing => "missing",
            RecalcReason::Corrupt => "corrupt",
            RecalcReason::SequenceAhead => "sequence_ahead",
            RecalcReason::Stale => "stale",
            RecalcReason::Forced => "forced",
        }
    }
}

/// Loads the counters of `folder`, recomputing them when they cannot be trusted.
pub fn load_metadata_tracker(db: &Lowlevel, folder: &str) -> Result<MetadataTracker> {
    let txn = db.begin_read()?;
    let reason = match MetadataTracker::from_db(&txn, folder) {
        Ok(None) => RecalcReason::Missing,
        Ok(Some(meta)) => {
            let checked = db.options().repair_on_load;
            if checked && meta.age() > db.options().recheck_interval_duration() {
                RecalcReason::Stale
            } else if checked && local_sequence_ahead(&txn, folder, meta.sequence(LOCAL_DEVICE_ID))? {
                RecalcReason::SequenceAhead
            } else {
                debug!(folder, "syncdb.meta.loaded");
                return Ok(meta);
            }
        }
        Err(DbError::Corruption(msg)) => {
            warn!(folder, error = %msg, "syncdb.meta.corrupt");
            RecalcReason::Corrupt
        }
        Err(err) => return Err(err),
    };
    txn.release();
    db.recalc_meta(folder, reason)
}

fn local_sequence_ahead(txn: &impl FileReader, folder: &str, stored: i64) -> Result<bool> {
    let prefix = keys::folder_prefix(KeyType::Sequence, folder);
    let start = keys::sequence_key(folder, stored.max(0).saturating_add(1));
    let mut ahead = false;
    txn.raw().scan(&prefix, &start, &mut |_, _| {
        ahead = true;
        Ok(false)
    })?;
    Ok(ahead)
}

// Highest local sequence ever handed out in `folder`, as far as it survives:
// the persisted counters when readable, and the floor garbage collection leaves.
fn persisted_local_sequence(txn: &ReadWriteTransaction, folder: &str) -> Result<i64> {
    let counters = match MetadataTracker::from_db(txn, folder) {
        Ok(Some(meta)) => meta.sequence(LOCAL_DEVICE_ID),
        Ok(None) | Err(DbError::Corruption(_)) => 0,
        Err(err) => return Err(err),
    };
    Ok(counters.max(misc::get_local_sequence_floor(txn, folder)?))
}

/// What a counter recomputation found and fixed.
#[derive(Clone, Debug)]
pub struct Recalc {
    /// The fresh counters, already persisted.
    pub meta: MetadataTracker,
    /// Device records counted.
    pub records: u64,
    /// Global list fixes.
    pub globals: GlobalsCheck,
    /// Sequence index fixes.
    pub sequences: SequenceRepair,
}

impl Lowlevel {
    /// Recomputes the counters of `folder` from scratch and repairs its indexes.
    pub fn recalc_meta(&self, folder: &str, reason: RecalcReason) -> Result<MetadataTracker> {
        self.recalc_meta_report(folder, reason).map(|r| r.meta)
    }

    /// Like [`Lowlevel::recalc_meta`], returning what was repaired.
    ///
    /// Holds the GC lock shared for the whole pass, and does all of it in one
    /// write transaction: global lists are reconciled, every device record is
    /// re-counted, the sequence index is repaired and the result persisted.
    /// The local sequence never drops below what was persisted before.
    pub fn recalc_meta_report(&self, folder: &str, reason: RecalcReason) -> Result<Recalc> {
        let _guard = self.gc_lock().recalc();
        let mut txn = self.begin_write()?;
        let floor = persisted_local_sequence(&txn, folder)?;
        let mut meta = MetadataTracker::new();
        let globals = txn.check_globals(folder, &mut meta)?;

        let mut records = 0u64;
        txn.with_all_folder(folder, |device, file| {
            meta.add_file(device, &file);
            records += 1;
            Ok(true)
        })?;
        meta.raise_sequence(LOCAL_DEVICE_ID, floor);
        let sequences = txn.repair_sequence(folder, &mut meta)?;
        meta.to_db(&mut txn, folder)?;
        txn.commit()?;
        info!(
            folder,
            reason = reason.as_str(),
            records,
            globals_fixed = globals.total(),
            sequences_fixed = sequences.total(),
            "syncdb.meta.recalculated"
        );
        Ok(Recalc {
            meta,
            records,
            globals,
            sequences,
        })
    }
}
