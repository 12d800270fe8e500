#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use syncdb::protocol::{FileInfo, Vector};
use syncdb::storage::keys::{self, KeyType};
use syncdb::storage::{DbOptions, Lowlevel, DB_VERSION};
use syncdb::types::{DeviceId, LOCAL_DEVICE_ID};
use syncdb::FileSet;
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    db: PathBuf,
    config: PathBuf,
}

impl Fixture {
    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

fn setup_db() -> Fixture {
    let dir = TempDir::new().expect("tempdir");
    let db = dir.path().join("index.redb");
    let config = dir.path().join("cli.toml");
    fs::write(&config, "").expect("write config");
    seed(&db).expect("seed database");
    Fixture { dir, db, config }
}

fn seed(path: &Path) -> syncdb::Result<()> {
    let db = Arc::new(Lowlevel::open(DbOptions::at(path))?);
    let fs = FileSet::new("default", Arc::clone(&db))?;
    let mut local = Vec::new();
    for i in 0..5 {
        let mut f = FileInfo::new(format!("file{i}"), Vector::from_pairs(&[(1, 1)]));
        f.size = 1000 * (i + 1);
        local.push(f);
    }
    fs.update(LOCAL_DEVICE_ID, local)?;
    fs.update(
        DeviceId::with_first_byte(7),
        vec![FileInfo::new("file9", Vector::from_pairs(&[(7, 1)]))],
    )?;
    fs.index_id(LOCAL_DEVICE_ID)?;
    Ok(())
}

fn json_stdout(cmd: &mut assert_cmd::Command) -> Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).expect("json output")
}

#[test]
fn stats_reports_folder_counters() {
    let fx = setup_db();
    let json = json_stdout(
        cargo_bin_cmd!("syncdb")
            .arg("--config")
            .arg(&fx.config)
            .args(["--format", "json", "stats"])
            .arg(&fx.db),
    );
    assert_eq!(json["schema"]["version"], DB_VERSION);
    let folders = json["folders"].as_array().expect("folders");
    assert_eq!(folders.len(), 1);
    let folder = &folders[0];
    assert_eq!(folder["folder"], "default");
    assert_eq!(folder["recomputed"], false);
    assert_eq!(folder["global"]["files"], 6);
    assert_eq!(folder["global"]["bytes"], 15000);

    let devices = folder["devices"].as_array().expect("devices");
    let local = devices
        .iter()
        .find(|d| d["device"] == "local")
        .expect("local device");
    assert_eq!(local["sequence"], 5);
    assert_ne!(local["index_id"], "0x0000000000000000");
    assert_eq!(devices.len(), 2);
}

#[test]
fn stats_text_output() {
    let fx = setup_db();
    let output = cargo_bin_cmd!("syncdb")
        .arg("--config")
        .arg(&fx.config)
        .arg("stats")
        .arg(&fx.db)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.contains("Folder \"default\""));
    assert!(text.contains("local seq=5"));
}

#[test]
fn verify_passes_on_a_healthy_database() {
    let fx = setup_db();
    let json = json_stdout(
        cargo_bin_cmd!("syncdb")
            .arg("--config")
            .arg(&fx.config)
            .args(["--format", "json", "verify", "--level", "full"])
            .arg(&fx.db),
    );
    assert_eq!(json["success"], true);
    assert_eq!(json["counts"]["records"], 6);
    assert_eq!(json["counts"]["global_lists"], 6);
    assert_eq!(json["counts"]["sequence_entries"], 5);
}

#[test]
fn verify_fails_then_repair_fixes_the_sequence_index() -> syncdb::Result<()> {
    let fx = setup_db();
    {
        let db = Lowlevel::open(DbOptions::at(&fx.db))?;
        let mut txn = db.begin_write()?;
        txn.delete_prefix(&keys::folder_prefix(KeyType::Sequence, "default"))?;
        txn.commit()?;
    }

    let output = cargo_bin_cmd!("syncdb")
        .arg("--config")
        .arg(&fx.config)
        .args(["--format", "json", "verify"])
        .arg(&fx.db)
        .assert()
        .code(2)
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("json output");
    assert_eq!(json["success"], false);
    assert!(!json["findings"].as_array().expect("findings").is_empty());

    let repair = json_stdout(
        cargo_bin_cmd!("syncdb")
            .arg("--config")
            .arg(&fx.config)
            .args(["--format", "json", "repair"])
            .arg(&fx.db),
    );
    assert_eq!(repair["folders"][0]["sequences"]["created"], 5);

    let json = json_stdout(
        cargo_bin_cmd!("syncdb")
            .arg("--config")
            .arg(&fx.config)
            .args(["--format", "json", "verify"])
            .arg(&fx.db),
    );
    assert_eq!(json["success"], true);
    Ok(())
}

#[test]
fn fast_verify_skips_the_index_checks() {
    let fx = setup_db();
    let json = json_stdout(
        cargo_bin_cmd!("syncdb")
            .arg("--config")
            .arg(&fx.config)
            .args(["--format", "json", "verify", "--level", "fast"])
            .arg(&fx.db),
    );
    assert_eq!(json["level"], "fast");
    assert_eq!(json["success"], true);
    assert_eq!(json["counts"]["records"], 0);
}

#[test]
fn dump_then_load_reproduces_the_database() {
    let fx = setup_db();
    let dump = fx.path("dump.jsonl");
    cargo_bin_cmd!("syncdb")
        .arg("--config")
        .arg(&fx.config)
        .arg("dump")
        .arg(&fx.db)
        .arg("--out")
        .arg(&dump)
        .assert()
        .success();
    let lines = fs::read_to_string(&dump).expect("read dump");
    assert!(lines.lines().count() > 10);
    let first: Value = serde_json::from_str(lines.lines().next().expect("line")).expect("json");
    assert!(first["k"].is_string() && first["v"].is_string());

    let copy = fx.path("nested/copy.redb");
    cargo_bin_cmd!("syncdb")
        .arg("--config")
        .arg(&fx.config)
        .arg("load")
        .arg(&copy)
        .arg("--input")
        .arg(&dump)
        .arg("--create")
        .assert()
        .success();

    let stats = |db: &Path| {
        let mut json = json_stdout(
            cargo_bin_cmd!("syncdb")
                .arg("--config")
                .arg(&fx.config)
                .args(["--format", "json", "stats"])
                .arg(db),
        );
        json["filesystem"] = Value::Null;
        json
    };
    assert_eq!(stats(&fx.db), stats(&copy));
}

#[test]
fn load_refuses_a_missing_database_without_create() {
    let fx = setup_db();
    let dump = fx.path("dump.jsonl");
    fs::write(&dump, "").expect("write dump");
    cargo_bin_cmd!("syncdb")
        .arg("--config")
        .arg(&fx.config)
        .arg("load")
        .arg(fx.path("absent.redb"))
        .arg("--input")
        .arg(&dump)
        .assert()
        .failure();
}

#[test]
fn load_rejects_malformed_lines() {
    let fx = setup_db();
    let dump = fx.path("bad.jsonl");
    fs::write(&dump, "{\"k\":\"00\",\"v\":\"zz\"}\n").expect("write dump");
    let output = cargo_bin_cmd!("syncdb")
        .arg("--config")
        .arg(&fx.config)
        .arg("load")
        .arg(&fx.db)
        .arg("--input")
        .arg(&dump)
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("line 1"));
}

#[test]
fn schema_reports_and_migrates() -> syncdb::Result<()> {
    let fx = setup_db();
    {
        let db = Lowlevel::open(DbOptions::at(&fx.db))?;
        syncdb::storage::set_stored_version(&db, 2)?;
    }
    let json = json_stdout(
        cargo_bin_cmd!("syncdb")
            .arg("--config")
            .arg(&fx.config)
            .args(["--format", "json", "schema"])
            .arg(&fx.db),
    );
    assert_eq!(json["version"], 2);
    assert_eq!(json["supported"], DB_VERSION);

    let json = json_stdout(
        cargo_bin_cmd!("syncdb")
            .arg("--config")
            .arg(&fx.config)
            .args(["--format", "json", "schema", "--migrate"])
            .arg(&fx.db),
    );
    assert_eq!(json["version"], DB_VERSION);
    Ok(())
}

#[test]
fn configured_default_database_is_used() {
    let fx = setup_db();
    fs::write(
        &fx.config,
        format!("[database]\ndefault = {:?}\n", fx.db.display().to_string()),
    )
    .expect("write config");
    let json = json_stdout(
        cargo_bin_cmd!("syncdb")
            .arg("--config")
            .arg(&fx.config)
            .args(["--format", "json", "stats"]),
    );
    assert_eq!(json["folders"][0]["folder"], "default");
}

#[test]
fn missing_database_is_an_error() {
    let fx = setup_db();
    cargo_bin_cmd!("syncdb")
        .arg("--config")
        .arg(&fx.config)
        .arg("stats")
        .arg(fx.path("nope.redb"))
        .assert()
        .failure();
}
