use std::fs;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::tempdir;

/// push rbp; mov rbp, rsp; ret
const PROLOGUE: [u8; 5] = [0x55, 0x48, 0x89, 0xE5, 0xC3];

fn write_sample(path: &Path, bytes: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

#[test]
fn export_mnemonics_writes_pretty_json() {
    let temp = tempdir().unwrap();
    let sample = temp.path().join("sample.bin");
    write_sample(&sample, &PROLOGUE);
    let out = temp.path().join("out.json");

    cargo_bin_cmd!("bintag")
        .env("BINTAG_HOME", temp.path().join("home"))
        .arg("export-mnemonics")
        .arg(&sample)
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 1 functions"));

    let body = fs::read_to_string(&out).unwrap();
    assert!(body.starts_with("{\n    \"arch\": {\n        \"is_32bit\": true,"));
    assert!(body.ends_with("}\n"));
    let value: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(value["histogram"]["sub_0"]["mov"], 1);
    assert_eq!(value["histogram"]["sub_0"]["push"], 1);
    assert_eq!(value["imports"], serde_json::json!([]));
}

#[test]
fn export_mnemonics_fails_for_missing_binary_and_unknown_backend() {
    let temp = tempdir().unwrap();
    cargo_bin_cmd!("bintag")
        .env("BINTAG_HOME", temp.path())
        .arg("export-mnemonics")
        .arg(temp.path().join("missing.bin"))
        .arg(temp.path().join("out.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Binary not found"));

    let sample = temp.path().join("sample.bin");
    write_sample(&sample, &PROLOGUE);
    cargo_bin_cmd!("bintag")
        .env("BINTAG_HOME", temp.path())
        .arg("export-mnemonics")
        .arg(&sample)
        .arg(temp.path().join("out.json"))
        .arg("--backend")
        .arg("ida")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown backend 'ida'"));
    assert!(!temp.path().join("out.json").exists());
}

#[test]
fn read_metadata_prints_compact_json() {
    let temp = tempdir().unwrap();
    let sample = temp.path().join("repo/win.fam/2021-01-01/sample");
    write_sample(&sample, b"MZ");
    fs::write(
        temp.path().join("repo/win.fam/win.fam.json"),
        "{\n  \"common_name\": \"Fam\",\n  \"alt_names\": [\"F\u{e9}\"]\n}\n",
    )
    .unwrap();

    cargo_bin_cmd!("bintag")
        .arg("read-metadata")
        .arg(&sample)
        .assert()
        .success()
        .stdout("{\"common_name\": \"Fam\", \"alt_names\": [\"F\\u00e9\"]}\n");
}

#[test]
fn read_metadata_rejects_ambiguous_directory() {
    let temp = tempdir().unwrap();
    let sample = temp.path().join("fam/sample");
    write_sample(&sample, b"MZ");
    fs::write(temp.path().join("fam/a.json"), "{}").unwrap();
    fs::write(temp.path().join("fam/b.json"), "{}").unwrap();

    cargo_bin_cmd!("bintag")
        .arg("read-metadata")
        .arg(&sample)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Expected exactly one JSON file"));
}

#[test]
fn add_tag_then_match_finds_the_family() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    let sample = temp.path().join("repo/win.fam/2021-01-01/sample");
    write_sample(&sample, &PROLOGUE);

    cargo_bin_cmd!("bintag").arg("--home").arg(&home).arg("init").assert().success();

    cargo_bin_cmd!("bintag")
        .arg("--home")
        .arg(&home)
        .arg("add-tag")
        .arg(&sample)
        .arg("--description")
        .arg("family loader\nsecond line")
        .assert()
        .success()
        .stdout(predicate::str::contains("Added tag: win.fam"));

    let stored: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(home.join("tags/win.fam")).unwrap()).unwrap();
    assert_eq!(stored["tag"], "win.fam");
    assert_eq!(stored["sha256"].as_str().unwrap().len(), 64);
    assert!(stored["created_at"].as_str().unwrap().ends_with('Z'));

    cargo_bin_cmd!("bintag")
        .arg("--home")
        .arg(&home)
        .arg("match")
        .arg(&sample)
        .assert()
        .success()
        .stdout(predicate::str::contains("win.fam (0.000000)"))
        .stdout(predicate::str::contains("* imports match"))
        .stdout(predicate::str::contains("second line"));

    let output = cargo_bin_cmd!("bintag")
        .arg("--home")
        .arg(&home)
        .arg("list-tags")
        .arg("--json")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let body: serde_json::Value = serde_json::from_slice(&output).expect("list-tags json");
    assert_eq!(body[0]["tag"], "win.fam");
    assert_eq!(body[0]["functions"], 1);
}

#[test]
fn add_tag_refuses_to_overwrite_without_force() {
    let temp = tempdir().unwrap();
    let sample = temp.path().join("sample.bin");
    write_sample(&sample, &PROLOGUE);

    let add = |force: bool| {
        let mut cmd = cargo_bin_cmd!("bintag");
        cmd.env("BINTAG_HOME", temp.path().join("home"))
            .arg("add-tag")
            .arg(&sample)
            .arg("--name")
            .arg("dup");
        if force {
            cmd.arg("--force");
        }
        cmd.assert()
    };

    add(false).success();
    add(false).failure().stderr(predicate::str::contains("already exists"));
    add(true).success();
}

#[test]
fn match_json_reports_no_matches_without_tags() {
    let temp = tempdir().unwrap();
    let sample = temp.path().join("sample.bin");
    write_sample(&sample, &PROLOGUE);

    let output = cargo_bin_cmd!("bintag")
        .env("BINTAG_HOME", temp.path().join("empty-home"))
        .arg("match")
        .arg(&sample)
        .arg("--json")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let body: serde_json::Value = serde_json::from_slice(&output).expect("match json");
    assert_eq!(body["tags_checked"], 0);
    assert_eq!(body["matches"], serde_json::json!([]));
}

#[test]
fn config_info_reports_defaults_and_overrides() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    fs::write(home.join("config.json"), r#"{"max_distance": 1.5}"#).unwrap();

    let output = cargo_bin_cmd!("bintag")
        .env("BINTAG_HOME", &home)
        .arg("config-info")
        .arg("--json")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let body: serde_json::Value = serde_json::from_slice(&output).expect("config-info json");
    assert_eq!(body["config"]["max_distance"], 1.5);
    assert_eq!(body["config"]["default_backend"], "capstone");
    assert_eq!(body["config_file_exists"], true);
    assert_eq!(body["tag_count"], 0);
}

#[test]
fn list_backends_names_capstone() {
    cargo_bin_cmd!("bintag")
        .arg("list-backends")
        .assert()
        .success()
        .stdout(predicate::str::contains("- capstone:"));
}

#[test]
fn verbose_logs_go_to_stderr_only() {
    let temp = tempdir().unwrap();
    let sample = temp.path().join("sample.bin");
    write_sample(&sample, &PROLOGUE);
    let out = temp.path().join("out.json");

    cargo_bin_cmd!("bintag")
        .env("BINTAG_HOME", temp.path())
        .env_remove("RUST_LOG")
        .arg("-vv")
        .arg("export-mnemonics")
        .arg(&sample)
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("analysis complete").not())
        .stderr(predicate::str::contains("analysis complete"));
}
