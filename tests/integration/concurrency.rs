#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use syncdb::protocol::{FileInfo, Vector};
use syncdb::storage::{DbOptions, Lowlevel, RecalcReason};
use syncdb::types::{DeviceId, GLOBAL_DEVICE_ID, LOCAL_DEVICE_ID};
use syncdb::FileSet;

const ROUNDS: u64 = 40;

fn file(name: String, counter: u64, size: i64) -> FileInfo {
    FileInfo {
        size,
        ..FileInfo::new(name, Vector::from_pairs(&[(1, counter)]))
    }
}

#[test]
fn writers_on_separate_folders_do_not_interfere() -> syncdb::Result<()> {
    let db = Arc::new(Lowlevel::open_memory(DbOptions::default())?);
    let barrier = Arc::new(Barrier::new(4));
    let mut handles = Vec::new();
    for t in 0..4u8 {
        let db = Arc::clone(&db);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || -> syncdb::Result<()> {
            let fs = FileSet::new(format!("folder-{t}"), db)?;
            let remote = DeviceId::with_first_byte(t + 1);
            barrier.wait();
            for i in 0..ROUNDS {
                fs.update(LOCAL_DEVICE_ID, vec![file(format!("f{i}"), 1, 10)])?;
                fs.update(remote, vec![file(format!("f{i}"), 2, 20)])?;
            }
            Ok(())
        }));
    }
    for h in handles {
        h.join().expect("writer panicked")?;
    }

    assert_eq!(db.list_folders()?.len(), 4);
    for t in 0..4u8 {
        let fs = FileSet::new(format!("folder-{t}"), Arc::clone(&db))?;
        assert_eq!(fs.sequence(LOCAL_DEVICE_ID), ROUNDS as i64);
        let snap = fs.snapshot()?;
        assert_eq!(snap.global_size().files, ROUNDS as i64);
        assert_eq!(snap.global_size().bytes, ROUNDS as i64 * 20);
        assert_eq!(snap.need_size(LOCAL_DEVICE_ID)?.files, ROUNDS as i64);
    }
    Ok(())
}

#[test]
fn snapshots_pair_counters_with_their_view() -> syncdb::Result<()> {
    let db = Arc::new(Lowlevel::open_memory(DbOptions::default())?);
    let fs = Arc::new(FileSet::new("default", db)?);
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let fs = Arc::clone(&fs);
        let done = Arc::clone(&done);
        thread::spawn(move || -> syncdb::Result<()> {
            for i in 0..ROUNDS {
                fs.update(LOCAL_DEVICE_ID, vec![file(format!("f{i}"), 1, i as i64 + 1)])?;
                if i % 5 == 4 {
                    fs.update(LOCAL_DEVICE_ID, vec![file(format!("f{}", i - 2), 2, 1)])?;
                }
            }
            done.store(true, Ordering::Release);
            Ok(())
        })
    };

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let fs = Arc::clone(&fs);
            let done = Arc::clone(&done);
            thread::spawn(move || -> syncdb::Result<u64> {
                let mut checked = 0;
                loop {
                    let finished = done.load(Ordering::Acquire);
                    let snap = fs.snapshot()?;
                    let (mut files, mut bytes, mut top) = (0i64, 0i64, 0i64);
                    snap.with_have(LOCAL_DEVICE_ID, |f| {
                        files += 1;
                        bytes += f.size;
                        top = top.max(f.sequence);
                        true
                    })?;
                    let counted = snap.local_size();
                    assert_eq!((counted.files, counted.bytes), (files, bytes));
                    assert_eq!(snap.sequence(LOCAL_DEVICE_ID), top);
                    assert_eq!(snap.global_size().files, files);
                    checked += 1;
                    if finished {
                        return Ok(checked);
                    }
                }
            })
        })
        .collect();

    writer.join().expect("writer panicked")?;
    for r in readers {
        assert!(r.join().expect("reader panicked")? > 0);
    }
    Ok(())
}

#[test]
fn garbage_collection_waits_for_recalculation() -> syncdb::Result<()> {
    let db = Arc::new(Lowlevel::open_memory(DbOptions::default())?);
    let live = FileSet::new("live", Arc::clone(&db))?;
    for i in 0..ROUNDS {
        live.update(LOCAL_DEVICE_ID, vec![file(format!("f{i}"), 1, 1)])?;
    }
    let dead = FileSet::new("dead", Arc::clone(&db))?;
    dead.update(LOCAL_DEVICE_ID, vec![file("x".into(), 1, 1)])?;
    dead.drop_device(LOCAL_DEVICE_ID)?;

    let barrier = Arc::new(Barrier::new(2));
    let recalc = {
        let db = Arc::clone(&db);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || -> syncdb::Result<i64> {
            barrier.wait();
            let mut files = 0;
            for _ in 0..10 {
                let meta = db.recalc_meta("live", RecalcReason::Forced)?;
                files = meta.counts(GLOBAL_DEVICE_ID, 0).files;
            }
            Ok(files)
        })
    };
    let gc = {
        let db = Arc::clone(&db);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || -> syncdb::Result<Vec<String>> {
            barrier.wait();
            let mut folders = Vec::new();
            for _ in 0..10 {
                folders.extend(db.garbage_collect()?.folders);
            }
            Ok(folders)
        })
    };

    assert_eq!(recalc.join().expect("recalc panicked")?, ROUNDS as i64);
    let collected = gc.join().expect("gc panicked")?;
    assert!(collected.iter().all(|f| f == "dead"));
    assert!(collected.iter().any(|f| f == "dead"));
    assert_eq!(db.gc_lock().snapshot().passes, 10);
    assert_eq!(db.list_folders()?.into_iter().collect::<Vec<_>>(), ["live"]);
    Ok(())
}
