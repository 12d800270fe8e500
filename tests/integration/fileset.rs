#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use syncdb::protocol::{BlockInfo, FileInfo, FileType, Vector, FLAG_LOCAL_RECEIVE_ONLY};
use syncdb::storage::keys;
use syncdb::storage::{DbOptions, Lowlevel};
use syncdb::types::{DeviceId, LOCAL_DEVICE_ID};
use syncdb::{FileSet, Snapshot};
use tempfile::TempDir;

const BLOCK: i64 = 128 << 10;

fn remote() -> DeviceId {
    DeviceId::with_first_byte(1)
}

fn file(name: &str, counter: u64, nblocks: usize) -> FileInfo {
    FileInfo {
        size: nblocks as i64 * BLOCK,
        blocks: (0..nblocks)
            .map(|i| BlockInfo {
                size: BLOCK as u32,
                hash: vec![i as u8; 32],
            })
            .collect(),
        ..FileInfo::new(name, Vector::from_pairs(&[(1, counter)]))
    }
}

fn memory_set(folder: &str) -> syncdb::Result<FileSet> {
    let db = Arc::new(Lowlevel::open_memory(DbOptions::default())?);
    FileSet::new(folder, db)
}

fn local_files() -> Vec<FileInfo> {
    vec![
        file("a", 1000, 1),
        file("b", 1000, 2),
        file("c", 1000, 3),
        file("d", 1000, 4),
        file("z", 1000, 8),
    ]
}

fn remote_files() -> Vec<FileInfo> {
    vec![
        file("a", 1000, 1),
        file("b", 1001, 2),
        file("c", 1002, 5),
        file("e", 1000, 1),
    ]
}

type Visitor<'a> = &'a mut dyn FnMut(FileInfo) -> bool;

fn names(scan: impl FnOnce(Visitor<'_>) -> syncdb::Result<()>) -> syncdb::Result<Vec<String>> {
    let mut out = Vec::new();
    scan(&mut |f| {
        out.push(f.name);
        true
    })?;
    Ok(out)
}

fn need_names(snap: &Snapshot, device: DeviceId) -> syncdb::Result<BTreeSet<String>> {
    Ok(names(|v| snap.with_need(device, v))?.into_iter().collect())
}

fn set_of(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn global_and_need_follow_updates() -> syncdb::Result<()> {
    let fs = memory_set("default")?;
    fs.update(LOCAL_DEVICE_ID, local_files())?;
    fs.update(remote(), remote_files())?;

    let snap = fs.snapshot()?;
    let global = names(|v| snap.with_global(v))?;
    assert_eq!(global, ["a", "b", "c", "d", "e", "z"]);
    assert_eq!(snap.get_global("c")?.map(|f| f.blocks.len()), Some(5));
    assert_eq!(snap.get_global("d")?.map(|f| f.blocks.len()), Some(4));

    assert_eq!(need_names(&snap, LOCAL_DEVICE_ID)?, set_of(&["b", "c", "e"]));
    assert_eq!(need_names(&snap, remote())?, set_of(&["d", "z"]));

    let local = snap.local_size();
    assert_eq!((local.files, local.bytes), (5, 18 * BLOCK));
    let global = snap.global_size();
    assert_eq!((global.files, global.bytes), (6, 21 * BLOCK));
    let need = snap.need_size(LOCAL_DEVICE_ID)?;
    assert_eq!((need.files, need.bytes), (3, 8 * BLOCK));
    snap.release();

    // Catch up on c; the global stays the same but it is no longer needed.
    fs.update(LOCAL_DEVICE_ID, vec![file("c", 1002, 5)])?;
    let snap = fs.snapshot()?;
    assert_eq!(need_names(&snap, LOCAL_DEVICE_ID)?, set_of(&["b", "e"]));
    let available: BTreeSet<DeviceId> = snap.availability("c")?.into_iter().collect();
    assert_eq!(available, [remote(), LOCAL_DEVICE_ID].into_iter().collect());
    assert_eq!(snap.global_size().bytes, 21 * BLOCK);
    Ok(())
}

#[test]
fn availability_lists_holders_of_the_global_version() -> syncdb::Result<()> {
    let fs = memory_set("default")?;
    fs.update(LOCAL_DEVICE_ID, local_files())?;
    fs.update(remote(), remote_files())?;
    let snap = fs.snapshot()?;

    assert_eq!(snap.availability("b")?, vec![remote()]);
    assert_eq!(snap.availability("d")?, vec![LOCAL_DEVICE_ID]);
    assert_eq!(snap.availability("a")?.len(), 2);
    assert!(snap.availability("missing")?.is_empty());
    Ok(())
}

#[test]
fn invalid_and_deleted_globals_are_not_needed() -> syncdb::Result<()> {
    let fs = memory_set("default")?;
    let mut invalid = file("invalid", 1000, 1);
    invalid.raw_invalid = true;
    let mut gone = file("gone", 1001, 0);
    gone.deleted = true;
    fs.update(remote(), vec![invalid, gone, file("wanted", 1000, 2)])?;

    let snap = fs.snapshot()?;
    assert_eq!(need_names(&snap, LOCAL_DEVICE_ID)?, set_of(&["wanted"]));
    assert!(snap.availability("invalid")?.is_empty());
    let global = snap.global_size();
    assert_eq!((global.files, global.deleted), (1, 1));
    snap.release();

    // Once we hold an older copy, the tombstone is needed.
    fs.update(LOCAL_DEVICE_ID, vec![file("gone", 1000, 1)])?;
    let snap = fs.snapshot()?;
    assert_eq!(need_names(&snap, LOCAL_DEVICE_ID)?, set_of(&["gone", "wanted"]));
    Ok(())
}

#[test]
fn prefixed_iteration_stays_below_the_directory() -> syncdb::Result<()> {
    let fs = memory_set("default")?;
    let mut dir = file("dir", 1, 0);
    dir.file_type = FileType::Directory;
    fs.update(
        LOCAL_DEVICE_ID,
        vec![
            dir,
            file("dir/x", 1, 1),
            file("dir/y/z", 1, 1),
            file("dirx", 1, 1),
            file("other", 1, 1),
        ],
    )?;
    let snap = fs.snapshot()?;
    let have = names(|v| snap.with_prefixed_have(LOCAL_DEVICE_ID, "dir", v))?;
    assert_eq!(have, ["dir", "dir/x", "dir/y/z"]);
    let global = names(|v| snap.with_prefixed_global("dir/y", v))?;
    assert_eq!(global, ["dir/y/z"]);
    assert_eq!(names(|v| snap.with_have(LOCAL_DEVICE_ID, v))?.len(), 5);
    Ok(())
}

#[test]
fn have_sequence_follows_assignment_order() -> syncdb::Result<()> {
    let fs = memory_set("default")?;
    fs.update(LOCAL_DEVICE_ID, local_files())?;
    fs.update(LOCAL_DEVICE_ID, vec![file("c", 1001, 3)])?;
    assert_eq!(fs.sequence(LOCAL_DEVICE_ID), 6);

    let snap = fs.snapshot()?;
    let from3 = names(|v| snap.with_have_sequence(3, v))?;
    assert_eq!(from3, ["d", "z", "c"]);
    let mut first = Vec::new();
    snap.with_have_sequence(0, |f| {
        first.push(f.sequence);
        first.len() < 2
    })?;
    assert_eq!(first, [1, 2]);
    Ok(())
}

#[test]
fn receive_only_changes_have_their_own_counters() -> syncdb::Result<()> {
    let fs = memory_set("default")?;
    let mut changed = file("changed", 1, 2);
    changed.local_flags = FLAG_LOCAL_RECEIVE_ONLY;
    fs.update(LOCAL_DEVICE_ID, vec![changed, file("plain", 1, 1)])?;
    let snap = fs.snapshot()?;
    assert_eq!(snap.local_size().files, 1);
    let ro = snap.receive_only_changed_size();
    assert_eq!((ro.files, ro.bytes), (1, 2 * BLOCK));
    Ok(())
}

#[test]
fn dropping_a_device_restores_the_other_view() -> syncdb::Result<()> {
    let fs = memory_set("default")?;
    fs.update(LOCAL_DEVICE_ID, local_files())?;
    fs.update(
        remote(),
        remote_files()
            .into_iter()
            .map(|f| FileInfo { sequence: 7, ..f })
            .collect(),
    )?;
    assert_eq!(fs.sequence(remote()), 7);
    assert_eq!(fs.list_devices()?.len(), 2);

    assert_eq!(fs.drop_device(remote())?, 4);
    assert_eq!(fs.sequence(remote()), 0);
    assert_eq!(fs.list_devices()?, vec![LOCAL_DEVICE_ID]);
    let snap = fs.snapshot()?;
    assert!(need_names(&snap, LOCAL_DEVICE_ID)?.is_empty());
    let (global, local) = (snap.global_size(), snap.local_size());
    assert_eq!((global.files, global.bytes), (local.files, local.bytes));
    assert!(snap.get_global("e")?.is_none());
    snap.release();

    fs.drop_device(LOCAL_DEVICE_ID)?;
    assert_eq!(fs.sequence(LOCAL_DEVICE_ID), 5);
    let snap = fs.snapshot()?;
    assert_eq!(snap.local_size().files, 0);
    assert_eq!(snap.global_size().files, 0);
    snap.release();

    fs.update(LOCAL_DEVICE_ID, vec![file("new", 1, 1)])?;
    assert_eq!(fs.sequence(LOCAL_DEVICE_ID), 6);
    Ok(())
}

#[test]
fn counters_survive_reopen() -> syncdb::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("index.redb");
    {
        let db = Arc::new(Lowlevel::open(DbOptions::at(&path))?);
        let fs = FileSet::new("default", db)?;
        fs.update(LOCAL_DEVICE_ID, local_files())?;
        fs.update(remote(), remote_files())?;
    }

    let db = Arc::new(Lowlevel::open(DbOptions::at(&path))?);
    let fs = FileSet::new("default", db)?;
    assert_eq!(fs.sequence(LOCAL_DEVICE_ID), 5);
    let snap = fs.snapshot()?;
    assert_eq!(snap.local_size().bytes, 18 * BLOCK);
    assert_eq!(snap.global_size().bytes, 21 * BLOCK);
    Ok(())
}

#[test]
fn local_sequence_survives_collection_of_an_emptied_folder() -> syncdb::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("index.redb");
    {
        let db = Arc::new(Lowlevel::open(DbOptions::at(&path))?);
        let fs = FileSet::new("default", Arc::clone(&db))?;
        fs.update(LOCAL_DEVICE_ID, vec![file("a", 1, 1)])?;
        fs.update(LOCAL_DEVICE_ID, vec![file("a", 2, 1)])?;
        fs.drop_device(LOCAL_DEVICE_ID)?;
        assert_eq!(db.garbage_collect()?.folders, ["default"]);
    }

    let db = Arc::new(Lowlevel::open(DbOptions::at(&path))?);
    let fs = FileSet::new("default", db)?;
    assert_eq!(fs.sequence(LOCAL_DEVICE_ID), 2);
    fs.update(LOCAL_DEVICE_ID, vec![file("b", 1, 1)])?;
    let b = fs.snapshot()?.get(LOCAL_DEVICE_ID, "b")?.expect("b written");
    assert_eq!(b.sequence, 3);
    Ok(())
}

#[test]
fn stale_counters_are_recomputed() -> syncdb::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("index.redb");
    let expected = {
        let db = Arc::new(Lowlevel::open(DbOptions::at(&path))?);
        let fs = FileSet::new("default", db)?;
        fs.update(LOCAL_DEVICE_ID, local_files())?;
        fs.update(remote(), remote_files())?;
        let snap = fs.snapshot()?;
        (snap.local_size(), snap.global_size())
    };
    std::thread::sleep(Duration::from_millis(5));

    let opts = DbOptions::at(&path).recheck_interval(Duration::ZERO);
    let db = Arc::new(Lowlevel::open(opts)?);
    let fs = FileSet::new("default", db)?;
    let snap = fs.snapshot()?;
    assert_eq!((snap.local_size(), snap.global_size()), expected);
    assert_eq!(snap.sequence(LOCAL_DEVICE_ID), 5);
    Ok(())
}

#[test]
fn local_sequence_ahead_of_counters_triggers_recount() -> syncdb::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("index.redb");
    {
        let db = Arc::new(Lowlevel::open(DbOptions::at(&path))?);
        let fs = FileSet::new("default", Arc::clone(&db))?;
        fs.update(LOCAL_DEVICE_ID, local_files())?;

        // A record written without its counters, as after a crash between
        // the two.
        let mut extra = file("extra", 1000, 2);
        extra.sequence = 6;
        let dk = keys::device_file_key("default", &LOCAL_DEVICE_ID, b"extra");
        let mut txn = db.begin_write()?;
        txn.put_file(&dk, &extra)?;
        txn.put(&keys::sequence_key("default", 6), &dk)?;
        txn.commit()?;
    }

    let db = Arc::new(Lowlevel::open(DbOptions::at(&path))?);
    let fs = FileSet::new("default", db)?;
    assert_eq!(fs.sequence(LOCAL_DEVICE_ID), 6);
    let snap = fs.snapshot()?;
    assert_eq!(snap.local_size().files, 6);
    assert_eq!(snap.local_size().bytes, 20 * BLOCK);
    Ok(())
}

#[test]
fn without_load_checks_stale_counters_are_trusted() -> syncdb::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("index.redb");
    {
        let db = Arc::new(Lowlevel::open(DbOptions::at(&path))?);
        let fs = FileSet::new("default", Arc::clone(&db))?;
        fs.update(LOCAL_DEVICE_ID, vec![file("a", 1, 1)])?;
        let dk = keys::device_file_key("default", &LOCAL_DEVICE_ID, b"b");
        let mut txn = db.begin_write()?;
        txn.put_file(&dk, &FileInfo { sequence: 2, ..file("b", 1, 1) })?;
        txn.put(&keys::sequence_key("default", 2), &dk)?;
        txn.commit()?;
    }

    let db = Arc::new(Lowlevel::open(DbOptions::at(&path).repair_on_load(false))?);
    let fs = FileSet::new("default", db)?;
    assert_eq!(fs.sequence(LOCAL_DEVICE_ID), 1);
    assert_eq!(fs.snapshot()?.local_size().files, 1);
    Ok(())
}

#[test]
fn snapshots_do_not_see_later_updates() -> syncdb::Result<()> {
    let fs = memory_set("default")?;
    fs.update(LOCAL_DEVICE_ID, vec![file("a", 1, 1)])?;
    let before = fs.snapshot()?;
    fs.update(LOCAL_DEVICE_ID, vec![file("b", 1, 1)])?;

    assert_eq!(before.local_size().files, 1);
    assert!(before.get(LOCAL_DEVICE_ID, "b")?.is_none());
    assert_eq!(before.sequence(LOCAL_DEVICE_ID), 1);
    let after = fs.snapshot()?;
    assert_eq!(after.local_size().files, 2);
    assert!(after.get(LOCAL_DEVICE_ID, "b")?.is_some());
    Ok(())
}

#[test]
fn folders_are_isolated() -> syncdb::Result<()> {
    let db = Arc::new(Lowlevel::open_memory(DbOptions::default())?);
    let one = FileSet::new("one", Arc::clone(&db))?;
    let two = FileSet::new("two", Arc::clone(&db))?;
    one.update(LOCAL_DEVICE_ID, local_files())?;
    two.update(remote(), vec![file("a", 1, 1)])?;

    assert_eq!(two.sequence(LOCAL_DEVICE_ID), 0);
    let snap = two.snapshot()?;
    assert_eq!(snap.local_size().files, 0);
    assert_eq!(need_names(&snap, LOCAL_DEVICE_ID)?, set_of(&["a"]));
    snap.release();

    db.drop_folder("one")?;
    assert_eq!(db.list_folders()?.into_iter().collect::<Vec<_>>(), ["two"]);
    Ok(())
}
