use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Serialize;

use crate::storage::keys::{self, KeyType};
use crate::storage::{
    record, schema_info, FileReader, FileVersion, MetadataTracker, ReadOnlyTransaction, DB_VERSION,
};
use crate::types::{DbError, LOCAL_DEVICE_ID};

use crate::admin::options::AdminOpenOptions;
use crate::admin::util::{count_folder, open_lowlevel};
use crate::admin::Result;

const MAX_FINDINGS: usize = 32;

/// Specifies the depth of verification checks to perform.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyLevel {
    /// Schema version and the presence of folder counters only.
    Fast,
    /// Also cross-checks device records, the sequence index, global lists and counters.
    Full,
}

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Informational message about the verification process.
    Info,
    /// Harmless on its own; fixed on next load.
    Warning,
    /// The indexes disagree with the device records.
    Error,
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Folder the finding belongs to, if any.
    pub folder: Option<String>,
    /// Human-readable description of the issue.
    pub message: String,
}

/// Statistics collected during the verification process.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    /// Folders examined.
    pub folders: u64,
    /// Device records examined.
    pub records: u64,
    /// Global version lists examined.
    pub global_lists: u64,
    /// Sequence index entries examined.
    pub sequence_entries: u64,
}

/// Complete report of a verification operation.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// The verification level that was performed.
    pub level: VerifyLevel,
    /// Whether verification found no errors.
    pub success: bool,
    /// Issues discovered, capped at a fixed number.
    pub findings: Vec<VerifyFinding>,
    /// Statistics about the data examined.
    pub counts: VerifyCounts,
}

struct Findings {
    items: Vec<VerifyFinding>,
    errors: u64,
}

impl Findings {
    fn push(&mut self, severity: VerifySeverity, folder: Option<&str>, message: impl Into<String>) {
        if severity == VerifySeverity::Error {
            self.errors += 1;
        }
        if self.items.len() < MAX_FINDINGS {
            self.items.push(VerifyFinding {
                severity,
                folder: folder.map(str::to_owned),
                message: message.into(),
            });
        }
    }

    fn error(&mut self, folder: &str, message: impl Into<String>) {
        self.push(VerifySeverity::Error, Some(folder), message);
    }
}

/// Checks the database at `path` without modifying it.
///
/// The schema is not migrated, so an outdated database is reported rather
/// than upgraded.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or a read fails.
pub fn verify(
    path: impl AsRef<Path>,
    opts: &AdminOpenOptions,
    level: VerifyLevel,
) -> Result<VerifyReport> {
    let mut opts = opts.clone();
    opts.db.migrate_on_open = false;
    let db = open_lowlevel(path.as_ref(), &opts)?;
    let mut findings = Findings {
        items: Vec::new(),
        errors: 0,
    };
    let mut counts = VerifyCounts::default();

    let schema = schema_info(&db)?;
    if schema.version > DB_VERSION {
        findings.push(
            VerifySeverity::Error,
            None,
            format!("schema version {} is newer than supported {DB_VERSION}", schema.version),
        );
    } else if schema.version < DB_VERSION {
        findings.push(
            VerifySeverity::Warning,
            None,
            format!("schema version {} is pending migration to {DB_VERSION}", schema.version),
        );
    }

    let txn = db.begin_read()?;
    for folder in db.list_folders()? {
        counts.folders += 1;
        let stored = match MetadataTracker::from_db(&txn, &folder) {
            Ok(Some(meta)) => Some(meta),
            Ok(None) => {
                findings.push(VerifySeverity::Warning, Some(&folder), "no persisted counters");
                None
            }
            Err(DbError::Corruption(msg)) => {
                findings.error(&folder, format!("counters unreadable: {msg}"));
                None
            }
            Err(err) => return Err(err.into()),
        };
        if matches!(level, VerifyLevel::Full) {
            check_sequences(&txn, &folder, &mut findings, &mut counts)?;
            check_globals(&txn, &folder, &mut findings, &mut counts)?;
            if let Some(stored) = stored {
                check_counters(&txn, &folder, &stored, &mut findings)?;
            }
        }
    }

    Ok(VerifyReport {
        level,
        success: findings.errors == 0,
        findings: findings.items,
        counts,
    })
}

fn check_sequences(
    txn: &ReadOnlyTransaction,
    folder: &str,
    findings: &mut Findings,
    counts: &mut VerifyCounts,
) -> Result<()> {
    let mut index: BTreeMap<i64, Vec<u8>> = BTreeMap::new();
    for (sk, dk) in txn.collect_prefix(&keys::folder_prefix(KeyType::Sequence, folder))? {
        counts.sequence_entries += 1;
        let seq = keys::sequence_from_sequence_key(&sk);
        match txn.get_file_by_key(&dk)? {
            None => findings.error(folder, format!("sequence {seq} points at a missing record")),
            Some(file) if file.sequence != seq => findings.error(
                folder,
                format!("sequence {seq} points at {:?} which has sequence {}", file.name, file.sequence),
            ),
            Some(_) => {}
        }
        index.insert(seq, dk);
    }

    let mut owners: HashMap<i64, String> = HashMap::new();
    for (dk, value) in txn.collect_prefix(&keys::device_file_prefix(folder, &LOCAL_DEVICE_ID))? {
        let file = record::decode_file(&value)?;
        if let Some(other) = owners.insert(file.sequence, file.name.clone()) {
            findings.error(
                folder,
                format!("{:?} and {other:?} share sequence {}", file.name, file.sequence),
            );
        }
        if index.get(&file.sequence) != Some(&dk) {
            findings.error(
                folder,
                format!("{:?} (sequence {}) is missing from the sequence index", file.name, file.sequence),
            );
        }
    }
    Ok(())
}

fn check_globals(
    txn: &ReadOnlyTransaction,
    folder: &str,
    findings: &mut Findings,
    counts: &mut VerifyCounts,
) -> Result<()> {
    for (gk, value) in txn.collect_prefix(&keys::folder_prefix(KeyType::GlobalVersion, folder))? {
        counts.global_lists += 1;
        let name = String::from_utf8_lossy(keys::name_from_global_version_key(&gk)).into_owned();
        let list = match record::decode_version_list(&value) {
            Ok(list) => list,
            Err(err) => {
                findings.error(folder, format!("global list of {name:?} unreadable: {err}"));
                continue;
            }
        };
        if list.is_empty() {
            findings.error(folder, format!("global list of {name:?} is empty"));
        }
        if !list.is_ranked() {
            findings.error(folder, format!("global list of {name:?} is out of order"));
        }
        for entry in list.versions() {
            match txn.get_file(folder, &entry.device, &name)? {
                None => findings.error(
                    folder,
                    format!("global entry of {name:?} for {} has no record", entry.device),
                ),
                Some(file) if FileVersion::of(entry.device, &file) != *entry => findings.error(
                    folder,
                    format!("global entry of {name:?} for {} disagrees with its record", entry.device),
                ),
                Some(_) => {}
            }
        }
    }

    txn.with_all_folder(folder, |device, file| {
        counts.records += 1;
        let listed = txn
            .get_global_versions(folder, &file.name)?
            .is_some_and(|list| list.get(&device).is_some());
        if !listed {
            findings.error(
                folder,
                format!("{:?} of {device} is missing from its global list", file.name),
            );
        }
        Ok(true)
    })?;
    Ok(())
}

fn check_counters(
    txn: &ReadOnlyTransaction,
    folder: &str,
    stored: &MetadataTracker,
    findings: &mut Findings,
) -> Result<()> {
    let actual = count_folder(txn, folder)?;
    if stored.all_counts() != actual.all_counts() {
        findings.error(folder, "persisted counters disagree with the records");
    }
    let stored_seq = stored.sequence(LOCAL_DEVICE_ID);
    let actual_seq = actual.sequence(LOCAL_DEVICE_ID);
    if actual_seq > stored_seq {
        findings.error(
            folder,
            format!("local sequence {actual_seq} is ahead of the persisted {stored_seq}"),
        );
    }
    Ok(())
}
