#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use syncdb::protocol::{BlockInfo, FileInfo, Vector};
use syncdb::storage::keys;
use syncdb::storage::{
    schema_info, set_stored_version, update_schema, update_schema_to, DbOptions, FileReader,
    Lowlevel, MetadataTracker, DB_MIN_COMPATIBLE_VERSION, DB_VERSION,
};
use syncdb::types::{DbError, DeviceId, LOCAL_DEVICE_ID};
use syncdb::FileSet;
use tempfile::TempDir;

const FOLDER: &str = "UpdateSchema0to3";
const MY_ID: u64 = 1;
const REMOTE1_ID: u64 = 0x20;

fn remote0() -> DeviceId {
    DeviceId::with_first_byte(0x10)
}

fn remote1() -> DeviceId {
    DeviceId::with_first_byte(0x20)
}

fn blocks(n: usize) -> Vec<BlockInfo> {
    (0..n)
        .map(|i| BlockInfo {
            size: 128 << 10,
            hash: vec![i as u8; 32],
        })
        .collect()
}

fn file(name: &str, counter: u64, nblocks: usize, invalid: bool) -> FileInfo {
    FileInfo {
        blocks: blocks(nblocks),
        raw_invalid: invalid,
        size: (nblocks as i64) * (128 << 10),
        ..FileInfo::new(name, Vector::from_pairs(&[(MY_ID, counter)]))
    }
}

fn fixture() -> Vec<(DeviceId, Vec<FileInfo>)> {
    vec![
        (
            LOCAL_DEVICE_ID,
            vec![
                FileInfo {
                    sequence: 1,
                    ..file("a", 1000, 1, false)
                },
                FileInfo {
                    sequence: 2,
                    ..file("/notgood", 1000, 1, false)
                },
                FileInfo {
                    sequence: 3,
                    ..file("e", 1000, 1, false)
                },
            ],
        ),
        (
            remote0(),
            vec![
                file("b", 1001, 2, false),
                file("c", 1002, 5, true),
                file("d", 1003, 7, false),
            ],
        ),
        (
            remote1(),
            vec![
                file("c", 1002, 7, false),
                file("d", 1003, 5, true),
                file("invalid", 1004, 5, true),
                // Concurrent with the local "e": neither side saw the other's change.
                FileInfo {
                    version: Vector::from_pairs(&[(REMOTE1_ID, 1)]),
                    ..file("e", 1000, 2, false)
                },
            ],
        ),
    ]
}

// Schema 0: device records plus global lists of valid records only, no
// sequence index and no version stamp.
fn write_v0(path: &Path) -> syncdb::Result<()> {
    let db = Lowlevel::open(DbOptions::at(path).migrate_on_open(false))?;
    let mut txn = db.begin_write()?;
    let mut scratch = MetadataTracker::new();
    for (device, files) in fixture() {
        for f in files {
            let dk = keys::device_file_key(FOLDER, &device, f.name.as_bytes());
            txn.put_file(&dk, &f)?;
            if !f.is_invalid() {
                txn.update_global(FOLDER, device, &f, None, &mut scratch)?;
            }
        }
    }
    txn.commit()
}

#[test]
fn steps_apply_in_order() -> syncdb::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("v0.redb");
    write_v0(&path)?;
    let db = Lowlevel::open(DbOptions::at(&path).migrate_on_open(false))?;
    assert_eq!(schema_info(&db)?.version, 0);

    update_schema_to(&db, 1)?;
    {
        let txn = db.begin_read()?;
        assert!(
            txn.get_file(FOLDER, &LOCAL_DEVICE_ID, "/notgood")?.is_none(),
            "non-canonical name survived"
        );
        assert!(txn.get_global_versions(FOLDER, "/notgood")?.is_none());
        let list = txn
            .get_global_versions(FOLDER, "invalid")?
            .expect("invalid record joins the global list");
        assert!(list.head().is_some_and(|h| h.invalid));
    }

    update_schema_to(&db, 2)?;
    {
        let txn = db.begin_read()?;
        let mut seen = Vec::new();
        txn.with_have_sequence(FOLDER, 0, |f| {
            seen.push((f.name, f.sequence));
            true
        })?;
        assert_eq!(seen, vec![("a".to_string(), 1), ("e".to_string(), 3)]);
    }

    update_schema_to(&db, 3)?;
    let txn = db.begin_read()?;
    let mut need = BTreeSet::new();
    txn.with_need(FOLDER, &LOCAL_DEVICE_ID, |f| {
        assert!(!f.is_invalid(), "{} offered from an invalid copy", f.name);
        need.insert(f.name);
        true
    })?;
    // "e" conflicts with the remote copy instead of trailing it, so it is not needed.
    let expected: BTreeSet<String> = ["b", "c", "d"].into_iter().map(String::from).collect();
    assert_eq!(need, expected);

    let e = txn.get_global_versions(FOLDER, "e")?.expect("global list of e");
    assert_eq!(e.len(), 2);
    assert_eq!(e.head().map(|h| h.device), Some(remote1()), "lowest device wins a conflict");
    assert_eq!(txn.get_global(FOLDER, "e")?.map(|f| f.blocks.len()), Some(2));
    let mut remote_need = BTreeSet::new();
    txn.with_need(FOLDER, &remote1(), |f| {
        remote_need.insert(f.name);
        true
    })?;
    assert!(!remote_need.contains("e"));

    let c = txn.get_global(FOLDER, "c")?.expect("global c");
    assert_eq!(c.blocks.len(), 7, "valid copy of c wins over the invalid one");
    assert_eq!(txn.availability(FOLDER, "d")?, vec![remote0()]);
    Ok(())
}

#[test]
fn open_migrates_and_counters_follow() -> syncdb::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("v0.redb");
    write_v0(&path)?;

    let db = Arc::new(Lowlevel::open(DbOptions::at(&path))?);
    let info = schema_info(&db)?;
    assert_eq!(info.version, DB_VERSION);
    assert_eq!(info.min_version.as_deref(), Some(DB_MIN_COMPATIBLE_VERSION));

    let fs = FileSet::new(FOLDER, Arc::clone(&db))?;
    let snap = fs.snapshot()?;
    assert_eq!(snap.local_size().files, 2);
    assert_eq!(snap.sequence(LOCAL_DEVICE_ID), 3);
    // a, b, c, d and e; "invalid" is only held invalid.
    assert_eq!(snap.global_size().files, 5);
    let need = snap.need_size(LOCAL_DEVICE_ID)?;
    assert_eq!(need.files, 3);
    assert_eq!(need.bytes, (2 + 7 + 7) * (128 << 10));
    Ok(())
}

#[test]
fn local_invalid_records_become_ignored() -> syncdb::Result<()> {
    let db = Arc::new(Lowlevel::open_memory(DbOptions::default())?);
    let remote = DeviceId::with_first_byte(42);
    {
        let mut meta = MetadataTracker::new();
        let mut txn = db.begin_write()?;
        txn.update_local_files(
            "test",
            vec![file("foo", 1000, 1, true), file("bar", 1001, 1, false)],
            &mut meta,
        )?;
        txn.update_remote_files(
            "test",
            remote,
            vec![file("baz", 1000, 1, true), file("quux", 1002, 1, false)],
            &mut meta,
        )?;
        meta.to_db(&mut txn, "test")?;
        txn.commit()?;
    }
    set_stored_version(&db, 3)?;
    update_schema(&db)?;

    let fs = FileSet::new("test", Arc::clone(&db))?;
    let snap = fs.snapshot()?;
    let foo = snap.get(LOCAL_DEVICE_ID, "foo")?.expect("foo exists");
    assert!(foo.is_invalid() && foo.is_ignored());
    assert!(!foo.raw_invalid);
    let bar = snap.get(LOCAL_DEVICE_ID, "bar")?.expect("bar exists");
    assert!(!bar.is_invalid() && !bar.is_ignored());

    let baz = snap.get(remote, "baz")?.expect("baz exists");
    assert!(baz.is_invalid() && !baz.is_ignored());
    let quux = snap.get(remote, "quux")?.expect("quux exists");
    assert!(!quux.is_invalid());
    Ok(())
}

#[test]
fn newer_schema_refuses_to_open() -> syncdb::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("future.redb");
    {
        let db = Lowlevel::open(DbOptions::at(&path))?;
        set_stored_version(&db, DB_VERSION + 1)?;
    }

    match Lowlevel::open(DbOptions::at(&path)) {
        Err(DbError::Downgrade {
            stored,
            supported,
            min_version,
        }) => {
            assert_eq!(stored, DB_VERSION + 1);
            assert_eq!(supported, DB_VERSION);
            assert_eq!(min_version, DB_MIN_COMPATIBLE_VERSION);
        }
        Ok(_) => panic!("opened a database from the future"),
        Err(other) => panic!("expected downgrade, got {other}"),
    }

    let db = Lowlevel::open(DbOptions::at(&path).migrate_on_open(false))?;
    assert_eq!(schema_info(&db)?.version, DB_VERSION + 1);
    Ok(())
}
