// Copyright 2015-2024 Martin Pool.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Restoring snapshots, including data stored by earlier snapshots.

use std::fs;

use assert_matches::assert_matches;
use tempfile::TempDir;

use volsnap::test_fixtures::{ScratchStore, TreeFixture};
use volsnap::*;

#[test]
fn restore_follows_references_back_along_the_chain() {
    let src = TreeFixture::new();
    src.create_file_with_contents("a", b"one");
    src.create_dir("d");
    src.create_file_with_contents("d/b", b"two");
    let mut store = ScratchStore::new(src.path());
    store.backup_named("2024-05-01T00-00-00Z").unwrap();
    src.create_file_with_contents("a", b"one, revised");
    store.backup_named("2024-05-02T00-00-00Z").unwrap();
    store.backup_named("2024-05-03T00-00-00Z").unwrap();

    let dest = TempDir::new().unwrap();
    let newest = dest.path().join("newest");
    let failures = store.manager().restore(None, &newest).unwrap();
    assert!(failures.is_empty(), "{failures:?}");
    assert_eq!(fs::read(newest.join("a")).unwrap(), b"one, revised");
    assert_eq!(fs::read(newest.join("d/b")).unwrap(), b"two");

    let oldest = dest.path().join("oldest");
    store
        .manager()
        .restore(Some("2024-05-01T00-00-00Z"), &oldest)
        .unwrap();
    assert_eq!(fs::read(oldest.join("a")).unwrap(), b"one");
}

#[test]
fn restored_tree_matches_source() {
    let src = TreeFixture::new();
    src.create_dir("testdir");
    src.create_file_with_contents("testdir/nested", b"test");
    src.create_file_with_contents("test", b"test");
    src.create_file_with_contents("empty", b"");
    src.create_symlink("testlink", "test");
    let mut store = ScratchStore::new(src.path());
    store.backup().unwrap();

    let dest = TempDir::new().unwrap();
    let failures = store.manager().restore(None, dest.path()).unwrap();
    assert!(failures.is_empty());
    for name in ["test", "testdir/nested", "empty"] {
        assert_eq!(
            fs::read(dest.path().join(name)).unwrap(),
            fs::read(src.path().join(name)).unwrap(),
            "content of {name}"
        );
    }
    if SYMLINKS_SUPPORTED {
        assert_eq!(
            fs::read_link(dest.path().join("testlink")).unwrap(),
            fs::read_link(src.path().join("testlink")).unwrap()
        );
    }
    // Restoring again over the same tree isn't allowed.
    let err = store.manager().restore(None, dest.path()).unwrap_err();
    assert_matches!(err, Error::DestinationNotEmpty { .. });
}

#[cfg(unix)]
#[test]
fn restore_keeps_file_modes() {
    use std::os::unix::fs::PermissionsExt;

    let src = TreeFixture::new();
    let script = src.create_file("script");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o750)).unwrap();
    let mut store = ScratchStore::new(src.path());
    store.backup().unwrap();

    let dest = TempDir::new().unwrap();
    store.manager().restore(None, dest.path()).unwrap();
    let mode = fs::metadata(dest.path().join("script")).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o750);
}

#[test]
fn restore_of_unknown_snapshot_fails() {
    let src = TreeFixture::new();
    let mut store = ScratchStore::new(src.path());
    store.backup_named("2024-05-01T00-00-00Z").unwrap();
    let dest = TempDir::new().unwrap();
    let err = store
        .manager()
        .restore(Some("2023-01-01T00-00-00Z"), dest.path())
        .unwrap_err();
    assert_matches!(err, Error::SnapshotNotFound { .. });
}
