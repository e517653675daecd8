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

//! Verifying stored snapshots.

use volsnap::test_fixtures::{ScratchStore, TreeFixture};
use volsnap::*;

use super::truncate_volumes;

#[test]
fn clean_store_verifies() {
    let src = TreeFixture::new();
    src.create_file("a");
    let mut store = ScratchStore::new(src.path());
    store.backup_named("2024-06-01T00-00-00Z").unwrap();
    src.create_file_with_contents("b", b"more");
    store.backup_named("2024-06-02T00-00-00Z").unwrap();

    assert!(store.manager().verify(None, true).unwrap().is_empty());
    let all = store.manager().verify_all();
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|(_, failures)| failures.is_empty()));
}

#[test]
fn damaged_old_volume_fails_full_verify_of_later_snapshot() {
    let src = TreeFixture::new();
    src.create_file_with_contents("a", b"some content that will be lost");
    let mut store = ScratchStore::new(src.path());
    store.backup_named("2024-06-01T00-00-00Z").unwrap();
    src.create_file_with_contents("b", b"more");
    store.backup_named("2024-06-02T00-00-00Z").unwrap();

    truncate_volumes(store.path(), "2024-06-01T00-00-00Z", 3);
    store.reopen().unwrap();

    // The newest snapshot stores only /b itself, so a local check passes.
    assert!(store.manager().verify(None, false).unwrap().is_empty());
    let failures = store.manager().verify(None, true).unwrap();
    let paths: Vec<String> = failures.iter().map(|f| f.apath.to_string()).collect();
    assert_eq!(paths, ["/a"]);

    let all = store.manager().verify_all();
    assert_eq!(all[0].1.len(), 1);
    assert!(all[1].1.is_empty());
}
