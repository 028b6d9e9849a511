use std::fs;
use std::path::Path;

use bintag::{canonicalize_or_current, infer_tag_name, sha256_file};
use tempfile::tempdir;

#[test]
fn canonicalize_or_current_resolves_existing_path() {
    let tmp = tempdir().expect("tempdir");
    let nested = tmp.path().join("nested");
    fs::create_dir_all(&nested).expect("create nested");

    let result = canonicalize_or_current(&nested).expect("canonicalize nested");
    assert_eq!(result, nested.canonicalize().expect("canonicalize nested"));
}

#[test]
fn canonicalize_or_current_keeps_missing_absolute_path() {
    let tmp = tempdir().expect("tempdir");
    let missing = tmp.path().join("does-not-exist");
    assert_eq!(canonicalize_or_current(&missing).unwrap(), missing);
}

#[test]
fn canonicalize_or_current_joins_missing_relative_path_onto_cwd() {
    let cwd = std::env::current_dir().expect("cwd");
    let result = canonicalize_or_current(Path::new("no-such-relative-dir")).unwrap();
    assert_eq!(result, cwd.join("no-such-relative-dir"));
}

#[test]
fn infer_tag_name_prefers_family_directory() {
    assert_eq!(infer_tag_name(Path::new("/repo/win.fam/2021-01-01/sample")), "win.fam");
    assert_eq!(infer_tag_name(Path::new("/sample.bin")), "sample.bin");
    assert_eq!(infer_tag_name(Path::new("sample.bin")), "sample.bin");
}

#[test]
fn sha256_file_matches_known_digest() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("abc");
    fs::write(&path, b"abc").unwrap();
    assert_eq!(
        sha256_file(&path).unwrap(),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
    assert!(sha256_file(&tmp.path().join("missing")).is_err());
}
