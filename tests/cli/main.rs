// volsnap backup system.
// Copyright 2016-2024 Martin Pool.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Run the volsnap CLI as a subprocess and test it.

use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use indoc::indoc;
use predicates::prelude::*;

const CONTENTS_BLAKE2B: &str = "9063990e5c5b2184877f92adace7c801a549b00c39cd7549877f06d5dd0d3a6ca6eee42d5896bdac64831c8114c55cee664078bd105dc691270c92644ccb2ce7";

fn run_volsnap() -> Command {
    Command::cargo_bin("volsnap").expect("locate volsnap binary")
}

/// Run a command against a backup directory.
fn in_backup(backup_dir: &Path) -> Command {
    let mut command = run_volsnap();
    command.arg("-b").arg(backup_dir);
    command
}

/// A source tree with one file, and an initialized backup directory for it.
///
/// Snapshots are left writable so the temporary directories can be cleaned up.
fn setup() -> (TempDir, TempDir) {
    let src = TempDir::new().unwrap();
    src.child("hello").write_str("contents").unwrap();
    let backup = TempDir::new().unwrap();
    in_backup(backup.path())
        .arg("init")
        .arg("--no-write-protect")
        .arg(src.path())
        .assert()
        .success();
    (src, backup)
}

#[test]
fn no_args() {
    run_volsnap()
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn help() {
    run_volsnap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("add-snapshot"))
        .stdout(predicate::str::contains("verify-all"));
}

#[test]
fn init_twice_fails() {
    let (src, backup) = setup();
    in_backup(backup.path())
        .arg("init")
        .arg(src.path())
        .assert()
        .failure()
        .code(1);
    backup.child("config.json").assert(predicate::path::exists());
}

#[test]
fn open_non_backup_directory_fails() {
    let dir = TempDir::new().unwrap();
    in_backup(dir.path())
        .arg("stats")
        .assert()
        .failure()
        .code(1);
}

#[test]
fn backup_verify_and_restore() {
    let (src, backup) = setup();
    in_backup(backup.path())
        .arg("add-snapshot")
        .assert()
        .success()
        .stdout(predicate::str::contains("Added snapshot"))
        .stdout(predicate::str::contains("new or changed"));

    in_backup(backup.path()).arg("verify").assert().success();
    in_backup(backup.path()).arg("verify-all").assert().success();

    in_backup(backup.path())
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("files"))
        .stdout(predicate::str::contains("volumes"));

    let restore = TempDir::new().unwrap();
    in_backup(backup.path())
        .arg("restore-snapshot")
        .arg(restore.path())
        .assert()
        .success();
    restore.child("hello").assert("contents");
    drop(src);
}

#[test]
fn named_snapshots_and_diff() {
    let (src, backup) = setup();
    in_backup(backup.path())
        .args(["add-snapshot", "--name", "2024-01-01T00-00-00Z"])
        .assert()
        .success();
    src.child("added").write_str("new file").unwrap();
    src.child("another").write_str("another new file").unwrap();
    in_backup(backup.path())
        .args(["add-snapshot", "--name", "2024-01-02T00-00-00Z"])
        .assert()
        .success();

    in_backup(backup.path())
        .args([
            "diff",
            "--src",
            "2024-01-01T00-00-00Z",
            "--dst",
            "2024-01-02T00-00-00Z",
        ])
        .assert()
        .success()
        .stdout(indoc! {"
            + /added
            + /another
        "});

    src.child("hello").write_str("different contents").unwrap();
    in_backup(backup.path())
        .arg("diff")
        .assert()
        .success()
        .stdout("* /hello\n");

    // Names must increase along the chain.
    in_backup(backup.path())
        .args(["add-snapshot", "--name", "2023-12-31T00-00-00Z"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn hashes_of_snapshot() {
    let (src, backup) = setup();
    src.child("subdir").create_dir_all().unwrap();
    in_backup(backup.path())
        .arg("add-snapshot")
        .assert()
        .success();
    in_backup(backup.path())
        .arg("hashes")
        .assert()
        .success()
        .stdout(format!("{CONTENTS_BLAKE2B}  /hello\n"));
    in_backup(backup.path())
        .args(["hashes", "--algorithm", "sha256"])
        .assert()
        .success()
        .stdout(predicate::str::ends_with("  /hello\n"));
}

#[test]
fn mount_is_unsupported() {
    let (_src, backup) = setup();
    in_backup(backup.path())
        .arg("add-snapshot")
        .assert()
        .success();
    let mount_point = TempDir::new().unwrap();
    in_backup(backup.path())
        .arg("mount")
        .arg(mount_point.path())
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Unsupported operation"));
}

#[test]
fn commands_need_a_snapshot() {
    let (_src, backup) = setup();
    for command in ["verify", "stats", "hashes"] {
        in_backup(backup.path())
            .arg(command)
            .assert()
            .failure()
            .code(1);
    }
    in_backup(backup.path()).arg("verify-all").assert().success();
}

#[test]
fn json_log_records_the_snapshot() {
    let (_src, backup) = setup();
    let log = TempDir::new().unwrap();
    let log_path = log.path().join("log.json");
    in_backup(backup.path())
        .arg("--log-json")
        .arg(&log_path)
        .arg("add-snapshot")
        .assert()
        .success();
    let log = std::fs::read_to_string(&log_path).unwrap();
    assert!(log.contains("Added snapshot"), "{log}");
    for line in log.lines() {
        serde_json::from_str::<serde_json::Value>(line).unwrap();
    }
}

#[test]
fn restore_into_non_empty_directory_fails() {
    let (_src, backup) = setup();
    in_backup(backup.path())
        .arg("add-snapshot")
        .assert()
        .success();
    let dest = TempDir::new().unwrap();
    dest.child("existing").write_str("x").unwrap();
    in_backup(backup.path())
        .arg("restore-snapshot")
        .arg(dest.path())
        .assert()
        .failure()
        .code(1);
    dest.child("existing").assert("x");
}
