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

//! Stores with damaged files.

use std::fs;

use assert_matches::assert_matches;

use volsnap::index_io::index_path;
use volsnap::protect::unprotect;
use volsnap::test_fixtures::{ScratchStore, TreeFixture};
use volsnap::*;

#[test]
fn damaged_index_is_refused() {
    let src = TreeFixture::new();
    src.create_file("a");
    let mut store = ScratchStore::new(src.path());
    let report = store.backup().unwrap();

    let index_dir = store.path().join("index");
    unprotect(&index_dir).unwrap();
    let path = index_path(&index_dir, &report.name);
    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&path, bytes).unwrap();

    let err = store.reopen().unwrap_err();
    assert_matches!(err, Error::IndexCorrupt { .. });
}

#[test]
fn missing_index_hash_is_refused() {
    let src = TreeFixture::new();
    let mut store = ScratchStore::new(src.path());
    let report = store.backup().unwrap();

    let index_dir = store.path().join("index");
    unprotect(&index_dir).unwrap();
    fs::remove_file(volsnap::index_io::hash_path(&index_dir, &report.name)).unwrap();

    assert_matches!(store.reopen(), Err(Error::IndexCorrupt { .. }));
}

#[test]
fn truncated_volume_fails_restore_of_that_file_only() {
    let src = TreeFixture::new();
    src.create_file_with_contents("big", &[1u8; 5000]);
    let mut config = Config::new(src.path());
    config.compression.kind = None;
    let mut store = ScratchStore::with_config(config);
    let report = store.backup().unwrap();
    src.create_file_with_contents("later", b"stored in a later snapshot");
    let second = store.backup().unwrap();
    assert_eq!(second.newly_owned, 1);

    super::truncate_volumes(store.path(), report.name.as_str(), 100);
    store.reopen().unwrap();

    let dest = tempfile::TempDir::new().unwrap();
    let failures = store.manager().restore(None, dest.path()).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].apath, Apath::from("/big"));
    assert_eq!(
        fs::read(dest.path().join("later")).unwrap(),
        b"stored in a later snapshot"
    );
}
