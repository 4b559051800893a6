//! CLI end-to-end tests
//!
//! Tests for the imgbatch command-line interface. Conversions use `cat` or
//! `false` as the converter so they do not depend on ImageMagick.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the imgbatch binary
#[allow(deprecated)]
fn imgbatch_cmd() -> Command {
    Command::cargo_bin("imgbatch").unwrap()
}

fn write_config(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("imgbatch.toml");
    fs::write(&path, body).unwrap();
    path
}

fn identity_config(dir: &Path) -> PathBuf {
    write_config(
        dir,
        r#"
[converter]
program = "cat"
args = []
"#,
    )
}

fn write_inputs(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            fs::write(&path, format!("image data for {name}")).unwrap();
            path
        })
        .collect()
}

fn entry_names(archive: &[u8]) -> Vec<String> {
    let mut zip = zip::ZipArchive::new(std::io::Cursor::new(archive)).unwrap();
    let mut names: Vec<String> = (0..zip.len())
        .map(|i| {
            let mut file = zip.by_index(i).unwrap();
            let mut sink = Vec::new();
            file.read_to_end(&mut sink).unwrap();
            file.name().to_string()
        })
        .collect();
    names.sort();
    names
}

#[test]
fn test_cli_no_args_shows_help() {
    let mut cmd = imgbatch_cmd();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_help_flag() {
    let mut cmd = imgbatch_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("imgbatch"))
        .stdout(predicate::str::contains("convert"));
}

#[test]
fn test_cli_version_command() {
    let mut cmd = imgbatch_cmd();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_check_tools_command() {
    let dir = tempdir().unwrap();
    let config = identity_config(dir.path());

    let mut cmd = imgbatch_cmd();
    cmd.arg("check-tools")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("magick"))
        .stdout(predicate::str::contains("Converter 'cat' is available"));
}

#[test]
fn test_cli_validate_valid_config() {
    let dir = tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
[limits]
max_files = 5

[defaults]
format = "webp"
quality = 70
"#,
    );

    let mut cmd = imgbatch_cmd();
    cmd.arg("validate")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("5 files"))
        .stdout(predicate::str::contains("format webp, quality 70"));
}

#[test]
fn test_cli_validate_invalid_config() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path(), "[archive]\ncompression_level = 12\n");

    let mut cmd = imgbatch_cmd();
    cmd.arg("validate")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("compression_level"));
}

#[test]
fn test_cli_convert_writes_archive() {
    let dir = tempdir().unwrap();
    let config = identity_config(dir.path());
    let inputs = write_inputs(dir.path(), &["a.png", "b.jpg", "c.webp"]);
    let output = dir.path().join("out.zip");

    let mut cmd = imgbatch_cmd();
    cmd.arg("--config")
        .arg(&config)
        .arg("convert")
        .args(&inputs)
        .args(["--format", "png", "--quality", "75", "--output"])
        .arg(&output)
        .assert()
        .success()
        .stderr(predicate::str::contains("finalized"));

    let archive = fs::read(&output).unwrap();
    assert_eq!(entry_names(&archive), vec!["a.png", "b.png", "c.png"]);
}

#[test]
fn test_cli_convert_to_stdout() {
    let dir = tempdir().unwrap();
    let config = identity_config(dir.path());
    let inputs = write_inputs(dir.path(), &["photo.png"]);

    let output = imgbatch_cmd()
        .arg("--config")
        .arg(&config)
        .arg("convert")
        .args(&inputs)
        .args(["-f", "jpg", "-o", "-"])
        .output()
        .unwrap();

    assert!(output.status.success());
    assert_eq!(entry_names(&output.stdout), vec!["photo.jpg"]);
}

#[test]
fn test_cli_convert_failure_removes_partial_archive() {
    let dir = tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
[converter]
program = "false"
args = []
"#,
    );
    let inputs = write_inputs(dir.path(), &["a.png", "b.png"]);
    let output = dir.path().join("out.zip");

    let mut cmd = imgbatch_cmd();
    cmd.arg("--config")
        .arg(&config)
        .arg("convert")
        .args(&inputs)
        .arg("-o")
        .arg(&output)
        .assert()
        .failure()
        .stderr(predicate::str::contains("aborted"));

    assert!(!output.exists());
}

#[test]
fn test_cli_convert_rejects_too_many_files() {
    let dir = tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
[converter]
program = "cat"
args = []

[limits]
max_files = 1
"#,
    );
    let inputs = write_inputs(dir.path(), &["a.png", "b.png"]);
    let output = dir.path().join("out.zip");

    // The count is checked before any input is opened, so a missing third
    // file is never reached.
    let mut cmd = imgbatch_cmd();
    cmd.arg("--config")
        .arg(&config)
        .arg("convert")
        .args(&inputs)
        .arg(dir.path().join("missing.png"))
        .arg("-o")
        .arg(&output)
        .assert()
        .failure()
        .stderr(predicate::str::contains("too many files"))
        .stderr(predicate::str::contains("Failed to read input file").not());

    assert!(!output.exists());
}

#[test]
fn test_cli_convert_rejects_oversized_file() {
    let dir = tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
[converter]
program = "cat"
args = []

[limits]
max_file_bytes = 8
"#,
    );
    let small = write_inputs(dir.path(), &["a.png"]);
    let big = dir.path().join("big.png");
    fs::write(&big, vec![0u8; 4096]).unwrap();
    let output = dir.path().join("out.zip");

    let mut cmd = imgbatch_cmd();
    cmd.arg("--config")
        .arg(&config)
        .arg("convert")
        .args(&small)
        .arg(&big)
        .arg("-o")
        .arg(&output)
        .assert()
        .failure()
        .stderr(predicate::str::contains("big.png is 4096 bytes, limit is 8"));

    assert!(!output.exists());
}

#[test]
fn test_cli_convert_rejects_bad_quality() {
    let dir = tempdir().unwrap();
    let config = identity_config(dir.path());
    let inputs = write_inputs(dir.path(), &["a.png"]);

    let mut cmd = imgbatch_cmd();
    cmd.arg("--config")
        .arg(&config)
        .arg("convert")
        .args(&inputs)
        .args(["-q", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("quality"));
}

#[test]
fn test_cli_convert_missing_input() {
    let dir = tempdir().unwrap();
    let config = identity_config(dir.path());

    let mut cmd = imgbatch_cmd();
    cmd.arg("--config")
        .arg(&config)
        .arg("convert")
        .arg(dir.path().join("nope.png"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read input file"));
}
