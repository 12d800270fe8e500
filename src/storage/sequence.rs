//! Local sequence index: `Sequence(folder, seq) -> DeviceFile key`.
//!
//! Every local record with sequence `S` has exactly one entry `S` pointing
//! back at it. Entries pointing at a missing record, or at a record whose
//! sequence is no longer `S`, are orphans.

use serde::Serialize;
use tracing::{debug, info};

use super::keys::{self, KeyType};
use super::lowlevel::Lowlevel;
use super::meta::MetadataTracker;
use super::record;
use super::transactions::{FileReader, ReadWriteTransaction};
use crate::protocol::FileInfo;
use crate::types::{Result, LOCAL_DEVICE_ID};

/// What a sequence repair changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SequenceRepair {
    /// Local records examined.
    pub records: u64,
    /// Entries created for records that had none.
    pub created: u64,
    /// Entries rewritten that pointed at a record with another sequence.
    pub overwritten: u64,
    /// Records moved to a fresh sequence because theirs was taken.
    pub renumbered: u64,
    /// Entries deleted as orphans.
    pub orphans: u64,
}

impl SequenceRepair {
    /// Number of fixes applied.
    pub fn total(&self) -> u64 {
        self.created + self.overwritten + self.renumbered + self.orphans
    }
}

impl ReadWriteTransaction {
    /// Gives the local record under `dk` a fresh sequence and indexes it.
    ///
    /// `file` is updated in place and must then be written by the caller.
    /// The entry of `previous`, the sequence the record had so far, is removed.
    pub fn assign_local_sequence(
        &mut self,
        folder: &str,
        dk: &[u8],
        file: &mut FileInfo,
        previous: Option<i64>,
        meta: &mut MetadataTracker,
    ) -> Result<()> {
        if let Some(old) = previous.filter(|s| *s >= 0) {
            self.delete(&keys::sequence_key(folder, old))?;
        }
        file.sequence = meta.next_local_sequence();
        self.put(&keys::sequence_key(folder, file.sequence), dk)
    }

    /// Restores the sequence index of `folder`; running it twice changes nothing.
    ///
    /// A record whose entry is missing gets one at its stored sequence. If that
    /// sequence is held by another record that really carries it, the record
    /// moves to a fresh number from `meta`. Entries left pointing nowhere, or at
    /// a record with a different sequence, are deleted afterwards.
    pub fn repair_sequence(&mut self, folder: &str, meta: &mut MetadataTracker) -> Result<SequenceRepair> {
        let mut stats = SequenceRepair::default();
        let local_prefix = keys::device_file_prefix(folder, &LOCAL_DEVICE_ID);
        for (dk, value) in self.collect_prefix(&local_prefix)? {
            stats.records += 1;
            let mut file = record::decode_file(&value)?;
            if file.sequence < 0 {
                self.renumber(folder, &dk, &mut file, meta)?;
                stats.renumbered += 1;
                continue;
            }
            let sk = keys::sequence_key(folder, file.sequence);
            let Some(target) = self.get(&sk)? else {
                debug!(folder, name = %file.name, seq = file.sequence, "syncdb.sequence.missing");
                self.put(&sk, &dk)?;
                stats.created += 1;
                continue;
            };
            if target == dk {
                continue;
            }
            if self.claims(&local_prefix, &target, file.sequence)? {
                self.renumber(folder, &dk, &mut file, meta)?;
                stats.renumbered += 1;
            } else {
                self.put(&sk, &dk)?;
                stats.overwritten += 1;
            }
        }

        let seq_prefix = keys::folder_prefix(KeyType::Sequence, folder);
        for (sk, target) in self.collect_prefix(&seq_prefix)? {
            let seq = keys::sequence_from_sequence_key(&sk);
            if !self.claims(&local_prefix, &target, seq)? {
                self.delete(&sk)?;
                stats.orphans += 1;
            }
        }

        if stats.total() > 0 {
            info!(
                folder,
                records = stats.records,
                created = stats.created,
                overwritten = stats.overwritten,
                renumbered = stats.renumbered,
                orphans = stats.orphans,
                "syncdb.sequence.repaired"
            );
        }
        Ok(stats)
    }

    fn renumber(
        &mut self,
        folder: &str,
        dk: &[u8],
        file: &mut FileInfo,
        meta: &mut MetadataTracker,
    ) -> Result<()> {
        let old = file.sequence;
        file.sequence = meta.next_local_sequence();
        self.put_file(dk, file)?;
        self.put(&keys::sequence_key(folder, file.sequence), dk)?;
        debug!(folder, name = %file.name, old, new = file.sequence, "syncdb.sequence.renumbered");
        Ok(())
    }

    // Whether the value of a sequence entry names a local record carrying `seq`.
    fn claims(&self, local_prefix: &[u8], target: &[u8], seq: i64) -> Result<bool> {
        if !target.starts_with(local_prefix) {
            return Ok(false);
        }
        Ok(self
            .get_file_by_key(target)?
            .is_some_and(|f| f.sequence == seq))
    }
}

impl Lowlevel {
    /// Repairs the sequence index of `folder` in its own transaction and
    /// persists `meta`, which may have handed out fresh sequences.
    pub fn repair_sequence(&self, folder: &str, meta: &mut MetadataTracker) -> Result<SequenceRepair> {
        let mut txn = self.begin_write()?;
        let stats = txn.repair_sequence(folder, meta)?;
        if stats.renumbered > 0 {
            meta.to_db(&mut txn, folder)?;
        }
        txn.commit()?;
        Ok(stats)
    }
}
