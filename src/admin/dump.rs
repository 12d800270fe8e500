//! Raw keyspace dumps as JSON lines: `{"k":"<hex>","v":"<hex>"}` per key,
//! in key order. Loading writes the pairs verbatim, so a dump of an old
//! schema stays old until the database is next opened with migration on.

use std::io::{BufRead, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::storage::keys::Key;
use crate::storage::FileReader;

use crate::admin::error::AdminError;
use crate::admin::options::AdminOpenOptions;
use crate::admin::util::open_lowlevel;
use crate::admin::Result;

#[derive(Serialize, Deserialize)]
struct DumpLine {
    k: String,
    v: String,
}

/// Outcome of a dump or load.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DumpReport {
    /// Key/value pairs written.
    pub pairs: u64,
}

/// Writes every key of the database at `path` to `out`.
pub fn export_jsonl(
    path: impl AsRef<Path>,
    opts: &AdminOpenOptions,
    mut out: impl Write,
) -> Result<DumpReport> {
    let mut opts = opts.clone();
    opts.db.migrate_on_open = false;
    let db = open_lowlevel(path.as_ref(), &opts)?;
    let txn = db.begin_read()?;
    let mut report = DumpReport::default();
    for (k, v) in txn.collect_prefix(&[])? {
        let line = DumpLine {
            k: hex::encode(k),
            v: hex::encode(v),
        };
        serde_json::to_writer(&mut out, &line).map_err(crate::types::DbError::from)?;
        out.write_all(b"\n")?;
        report.pairs += 1;
    }
    out.flush()?;
    Ok(report)
}

/// Reads pairs written by [`export_jsonl`] into the database at `path`.
///
/// All pairs are written in one transaction; a malformed line or key aborts
/// it. Blank lines are skipped.
pub fn import_jsonl(
    path: impl AsRef<Path>,
    opts: &AdminOpenOptions,
    input: impl BufRead,
) -> Result<DumpReport> {
    let mut opts = opts.clone();
    opts.db.migrate_on_open = false;
    let db = open_lowlevel(path.as_ref(), &opts)?;
    let mut txn = db.begin_write()?;
    let mut report = DumpReport::default();
    for (idx, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let bad = |message: String| AdminError::BadDumpLine {
            line: idx + 1,
            message,
        };
        let parsed: DumpLine = serde_json::from_str(&line).map_err(|err| bad(err.to_string()))?;
        let k = hex::decode(&parsed.k).map_err(|err| bad(format!("key: {err}")))?;
        let v = hex::decode(&parsed.v).map_err(|err| bad(format!("value: {err}")))?;
        Key::decode(&k).map_err(|err| bad(err.to_string()))?;
        txn.put(&k, &v)?;
        report.pairs += 1;
    }
    txn.commit()?;
    info!(pairs = report.pairs, "syncdb.admin.loaded");
    Ok(report)
}
