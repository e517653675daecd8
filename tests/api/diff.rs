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

//! Comparing snapshots with each other and with the source.

use std::fs;

use pretty_assertions::assert_eq;

use volsnap::test_fixtures::{ScratchStore, TreeFixture};

fn lines(entries: &[volsnap::DiffEntry]) -> Vec<String> {
    entries.iter().map(ToString::to_string).collect()
}

#[test]
fn diff_between_snapshots() {
    let src = TreeFixture::new();
    src.create_file_with_contents("keep", b"kept");
    src.create_file_with_contents("edit", b"before");
    src.create_file_with_contents("old", b"moving content");
    src.create_file_with_contents("gone", b"deleted content");
    let mut store = ScratchStore::new(src.path());
    store.backup_named("2024-07-01T00-00-00Z").unwrap();

    src.create_file_with_contents("edit", b"after the edit");
    fs::rename(src.path().join("old"), src.path().join("new")).unwrap();
    fs::remove_file(src.path().join("gone")).unwrap();
    src.create_file_with_contents("added", b"fresh");
    store.backup_named("2024-07-02T00-00-00Z").unwrap();

    let entries = store
        .manager()
        .diff_snapshots(Some("2024-07-01T00-00-00Z"), "2024-07-02T00-00-00Z")
        .unwrap();
    assert_eq!(
        lines(&entries),
        ["+ /added", "* /edit", "- /gone", "> /new (from /old)"]
    );
}

#[test]
fn diff_against_live_tree() {
    let src = TreeFixture::new();
    src.create_file_with_contents("a", b"alpha");
    let mut store = ScratchStore::new(src.path());
    store.backup().unwrap();

    assert!(store.manager().diff_live(None).unwrap().is_empty());

    src.create_file_with_contents("b", b"beta");
    assert_eq!(lines(&store.manager().diff_live(None).unwrap()), ["+ /b"]);
}

#[test]
fn diff_with_no_snapshots_lists_everything() {
    let src = TreeFixture::new();
    src.create_file("x");
    src.create_dir("y");
    let store = ScratchStore::new(src.path());
    let entries = store.manager().diff_live(None).unwrap();
    let lines = lines(&entries);
    assert!(lines.contains(&"+ /x".to_owned()), "{lines:?}");
    assert!(lines.contains(&"+ /y".to_owned()), "{lines:?}");
}
