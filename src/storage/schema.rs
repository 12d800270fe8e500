//! On-disk schema versions and the forward-only migrator.
//!
//! | version | change |
//! |---------|--------|
//! | 0 → 1   | non-canonical names dropped, old symlink kinds folded, invalid records enter global lists |
//! | 1 → 2   | local sequence index built |
//! | 2 → 3   | global lists re-ranked, entries without records dropped |
//! | 3 → 4   | local invalid records carry the ignored flag instead |
//!
//! Each step is one write transaction that also bumps the stored version, so
//! an interrupted migration resumes at the first step that did not commit.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use super::keys::{self, KeyType};
use super::lowlevel::Lowlevel;
use super::meta::MetadataTracker;
use super::misc::MiscNamespace;
use super::record;
use super::transactions::{FileReader, ReadWriteTransaction};
use crate::protocol::{is_canonical_name, FileType, FLAG_LOCAL_IGNORED};
use crate::types::{DbError, Result, LOCAL_DEVICE_ID};

/// Schema version written by this build.
pub const DB_VERSION: i64 = 4;
/// Oldest software version able to read [`DB_VERSION`].
pub const DB_MIN_COMPATIBLE_VERSION: &str = "0.4.0";

const VERSION_KEY: &str = "dbVersion";
const MIN_VERSION_KEY: &str = "dbMinVersion";

type StepFn = fn(&mut ReadWriteTransaction) -> Result<BTreeSet<String>>;

struct Step {
    to: i64,
    name: &'static str,
    run: StepFn,
}

const STEPS: [Step; 4] = [
    Step {
        to: 1,
        name: "canonical_names",
        run: update_0_to_1,
    },
    Step {
        to: 2,
        name: "sequence_index",
        run: update_1_to_2,
    },
    Step {
        to: 3,
        name: "rerank_globals",
        run: update_2_to_3,
    },
    Step {
        to: 4,
        name: "local_ignored_flag",
        run: update_3_to_4,
    },
];

/// Schema version and minimum software version found in a database.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct SchemaInfo {
    /// Stored schema version, `0` for databases that predate versioning.
    pub version: i64,
    /// Stored minimum software version, if any.
    pub min_version: Option<String>,
    /// Version this build migrates to.
    pub supported: i64,
}

/// Reads the stored schema version without changing anything.
pub fn schema_info(db: &Lowlevel) -> Result<SchemaInfo> {
    let txn = db.begin_read()?;
    let misc = MiscNamespace::root();
    Ok(SchemaInfo {
        version: misc.get_i64(&txn, VERSION_KEY)?.unwrap_or(0),
        min_version: misc.get_string(&txn, MIN_VERSION_KEY)?,
        supported: DB_VERSION,
    })
}

/// Brings the database to [`DB_VERSION`].
///
/// Fails with [`DbError::Downgrade`] and writes nothing when the stored version
/// is newer than this build understands.
pub fn update_schema(db: &Lowlevel) -> Result<()> {
    update_schema_to(db, DB_VERSION)
}

/// Applies the steps up to and including `target`.
pub fn update_schema_to(db: &Lowlevel, target: i64) -> Result<()> {
    let info = schema_info(db)?;
    if info.version > DB_VERSION {
        return Err(DbError::Downgrade {
            stored: info.version,
            supported: DB_VERSION,
            min_version: info.min_version.unwrap_or_default(),
        });
    }
    if target > DB_VERSION {
        return Err(DbError::Invalid("migration target beyond supported schema"));
    }
    let misc = MiscNamespace::root();
    for step in STEPS.iter().filter(|s| s.to > info.version && s.to <= target) {
        let mut txn = db.begin_write()?;
        let folders = (step.run)(&mut txn)?;
        for folder in &folders {
            txn.delete(&keys::folder_meta_key(folder))?;
        }
        misc.put_i64(&mut txn, VERSION_KEY, step.to)?;
        txn.commit()?;
        info!(
            from = step.to - 1,
            to = step.to,
            step = step.name,
            folders = folders.len(),
            "syncdb.schema.migrated"
        );
    }
    if target == DB_VERSION && info.min_version.as_deref() != Some(DB_MIN_COMPATIBLE_VERSION) {
        let mut txn = db.begin_write()?;
        misc.put_string(&mut txn, MIN_VERSION_KEY, DB_MIN_COMPATIBLE_VERSION)?;
        txn.commit()?;
    }
    debug!(version = target.max(info.version), "syncdb.schema.current");
    Ok(())
}

/// Forces the stored version, for tests and operators restoring old dumps.
pub fn set_stored_version(db: &Lowlevel, version: i64) -> Result<()> {
    let mut txn = db.begin_write()?;
    MiscNamespace::root().put_i64(&mut txn, VERSION_KEY, version)?;
    txn.commit()
}

fn update_0_to_1(txn: &mut ReadWriteTransaction) -> Result<BTreeSet<String>> {
    let mut folders = BTreeSet::new();
    // Counters are thrown away with the folder meta at the end of the step.
    let mut scratch = MetadataTracker::new();
    let (mut dropped, mut symlinks, mut invalid) = (0u64, 0u64, 0u64);
    for (dk, value) in txn.collect_prefix(&keys::tag_prefix(KeyType::DeviceFile))? {
        let folder = keys::folder_from_key(&dk).to_owned();
        let device = keys::device_from_device_file_key(&dk);
        let mut file = record::decode_file(&value)?;
        folders.insert(folder.clone());

        if !is_canonical_name(&file.name) {
            warn!(folder, name = %file.name, device = %device, "syncdb.schema.noncanonical_dropped");
            txn.remove_from_global(&folder, device, &file.name, &file, &mut scratch)?;
            txn.delete(&dk)?;
            dropped += 1;
            continue;
        }
        if file.file_type.is_deprecated() {
            file.file_type = FileType::Symlink;
            txn.put_file(&dk, &file)?;
            symlinks += 1;
        }
        if file.is_invalid() && txn.update_global(&folder, device, &file, None, &mut scratch)? {
            invalid += 1;
        }
    }
    debug!(dropped, symlinks, invalid, "syncdb.schema.step0");
    Ok(folders)
}

fn update_1_to_2(txn: &mut ReadWriteTransaction) -> Result<BTreeSet<String>> {
    let mut folders = BTreeSet::new();
    for (dk, value) in txn.collect_prefix(&keys::tag_prefix(KeyType::DeviceFile))? {
        if keys::device_from_device_file_key(&dk) != LOCAL_DEVICE_ID {
            continue;
        }
        let folder = keys::folder_from_key(&dk).to_owned();
        let file = record::decode_file(&value)?;
        // Left for the sequence repair that follows the migration to renumber.
        if file.sequence >= 0 {
            txn.put(&keys::sequence_key(&folder, file.sequence), &dk)?;
        }
        folders.insert(folder);
    }
    Ok(folders)
}

fn update_2_to_3(txn: &mut ReadWriteTransaction) -> Result<BTreeSet<String>> {
    let folders = txn.list_folders_of(KeyType::GlobalVersion)?;
    let stats = txn.reconcile_globals(None, |_| {})?;
    debug!(lists = stats.lists, dropped = stats.dropped, "syncdb.schema.step2");
    Ok(folders)
}

fn update_3_to_4(txn: &mut ReadWriteTransaction) -> Result<BTreeSet<String>> {
    let mut folders = BTreeSet::new();
    for (dk, value) in txn.collect_prefix(&keys::tag_prefix(KeyType::DeviceFile))? {
        if keys::device_from_device_file_key(&dk) != LOCAL_DEVICE_ID {
            continue;
        }
        let mut file = record::decode_file(&value)?;
        if !file.raw_invalid {
            continue;
        }
        file.raw_invalid = false;
        file.local_flags |= FLAG_LOCAL_IGNORED;
        txn.put_file(&dk, &file)?;
        folders.insert(keys::folder_from_key(&dk).to_owned());
    }
    Ok(folders)
}
