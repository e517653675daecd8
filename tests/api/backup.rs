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

//! Adding snapshots of a changing tree.

use std::fs;

use pretty_assertions::assert_eq;
use tracing_test::traced_test;

use volsnap::counters::Counter;
use volsnap::test_fixtures::{ScratchStore, TreeFixture};
use volsnap::*;

fn link_count() -> usize {
    SYMLINKS_SUPPORTED as usize
}

#[test]
fn only_changed_data_is_stored_again() {
    let src = TreeFixture::new();
    src.create_dir("testdir");
    src.create_file_with_contents("testdir/nested", b"test");
    src.create_file_with_contents("test", b"test");
    src.create_symlink("testlink", "test");
    let mut store = ScratchStore::new(src.path());

    let first = store.backup_named("2024-01-01T00-00-00Z").unwrap();
    assert!(!first.has_failures(), "{first:?}");
    assert_eq!(first.newly_owned, 2 + link_count());
    store.monitor().assert_no_errors();

    let unchanged = store.backup_named("2024-01-01T00-00-01Z").unwrap();
    assert_eq!(unchanged.newly_owned, 0);
    assert_eq!(unchanged.summary.different_data, 0);
    assert_eq!(unchanged.summary.deleted, 0);

    src.create_file_with_contents("test", b"new content for test");
    let changed = store.backup_named("2024-01-01T00-00-02Z").unwrap();
    assert_eq!(changed.newly_owned, 1);
    assert_eq!(changed.summary.different_data, 1);

    fs::remove_file(src.path().join("test")).unwrap();
    src.create_file_with_contents("changed", b"test");
    let moved = store.backup_named("2024-01-01T00-00-03Z").unwrap();
    assert_eq!(moved.newly_owned, 0);
    assert_eq!(moved.summary.moved, 1);
    assert_eq!(moved.summary.deleted, 1);
    assert!(!moved.has_failures());

    assert_eq!(store.manager().chain().len(), 4);
    let nodes = store.manager().newest().unwrap().index().nodes();
    let changed_id = nodes.id_of(&Apath::from("/changed")).unwrap();
    assert_eq!(
        nodes.attributes(changed_id).back_reference,
        Some(Apath::from("/testdir/nested"))
    );
}

#[test]
fn rewrite_keeping_size_and_mtime_is_stored() {
    let src = TreeFixture::new();
    let path = src.create_file_with_contents("f", b"aaaa");
    let mtime = filetime::FileTime::from_unix_time(1_700_000_000, 0);
    filetime::set_file_mtime(&path, mtime).unwrap();
    let mut store = ScratchStore::new(src.path());
    store.backup_named("2024-01-01T00-00-00Z").unwrap();

    fs::write(&path, b"bbbb").unwrap();
    filetime::set_file_mtime(&path, mtime).unwrap();
    let report = store.backup_named("2024-01-01T00-00-01Z").unwrap();
    assert!(!report.has_failures(), "{report:?}");
    assert_eq!(report.summary.different_data, 1);
    assert_eq!(report.newly_owned, 1);

    let manager = store.manager();
    let pos = manager.chain().newest_position().unwrap();
    let id = manager.newest().unwrap().index().nodes().id_of(&Apath::from("/f")).unwrap();
    assert_eq!(manager.chain().read_content(pos, id, true).unwrap(), b"bbbb");
    assert!(manager.verify(None, true).unwrap().is_empty());
}

#[test]
fn new_snapshot_is_verified_and_counted() {
    let src = TreeFixture::new();
    src.create_file_with_contents("hello", b"hello world");
    src.create_dir("sub");
    src.create_file("sub/a");
    let mut store = ScratchStore::new(src.path());

    let report = store.backup().unwrap();
    assert!(report.verify_failures.is_empty());
    assert_eq!(report.stats.files, 2);
    assert_eq!(report.stats.dirs, 2);
    assert_eq!(report.stats.owned_nodes, 2);
    assert_eq!(report.stats.logical_bytes, 11 + 8);
    let monitor = store.monitor();
    assert_eq!(monitor.get_counter(Counter::NodesStored), 2);
    assert_eq!(monitor.get_counter(Counter::NodesVerified), 2);
    assert!(monitor.get_counter(Counter::VolumesCreated) >= 1);
}

#[test]
fn excluded_paths_are_not_stored() {
    let src = TreeFixture::new();
    src.create_file("keep");
    src.create_file("skip.tmp");
    src.create_dir("cache");
    src.create_file("cache/junk");
    let mut config = Config::new(src.path());
    config.exclude = vec!["*.tmp".to_owned(), "/cache".to_owned()];
    let mut store = ScratchStore::with_config(config);

    store.backup().unwrap();

    let nodes = store.manager().newest().unwrap().index().nodes();
    let paths: Vec<String> = nodes.iter().map(|(_, apath, _)| apath.to_string()).collect();
    assert_eq!(paths, ["/", "/keep"]);
}

#[test]
fn uncompressed_store_round_trips() {
    let src = TreeFixture::new();
    src.create_file_with_contents("data", &[7u8; 10_000]);
    let mut config = Config::new(src.path());
    config.compression.kind = None;
    let mut store = ScratchStore::with_config(config);

    let report = store.backup().unwrap();
    assert_eq!(report.stats.stored_bytes, 10_000);
    let manager = store.manager();
    let pos = manager.resolve(None).unwrap();
    let id = manager.newest().unwrap().index().nodes().id_of(&Apath::from("/data")).unwrap();
    assert_eq!(manager.chain().read_content(pos, id, true).unwrap(), vec![7u8; 10_000]);
}

#[test]
fn small_volumes_spread_data_over_many_files() {
    let src = TreeFixture::new();
    for i in 0..10 {
        src.create_file_with_contents(&format!("f{i}"), format!("content of file {i}").as_bytes());
    }
    let mut config = Config::new(src.path());
    config.volume_size = 32;
    config.compression.kind = None;
    let mut store = ScratchStore::with_config(config);

    let report = store.backup().unwrap();
    assert!(!report.has_failures());
    assert!(report.stats.volumes > 1, "{:?}", report.stats);
    assert!(store.manager().verify(None, true).unwrap().is_empty());
}

#[test]
fn reopened_store_continues_the_chain() {
    let src = TreeFixture::new();
    src.create_file_with_contents("a", b"first");
    let mut store = ScratchStore::new(src.path());
    store.backup_named("2024-03-01T10-00-00Z").unwrap();

    store.reopen().unwrap();
    assert_eq!(store.manager().chain().len(), 1);
    src.create_file_with_contents("b", b"second");
    let report = store.backup_named("2024-03-01T10-00-05Z").unwrap();
    assert_eq!(report.newly_owned, 1);

    let names: Vec<String> = store
        .manager()
        .chain()
        .iter()
        .map(|s| s.name().to_string())
        .collect();
    assert_eq!(names, ["2024-03-01T10-00-00Z", "2024-03-01T10-00-05Z"]);
}

#[test]
#[traced_test]
fn adding_snapshot_is_logged() {
    let src = TreeFixture::new();
    src.create_file("a");
    let mut store = ScratchStore::new(src.path());
    store.backup().unwrap();
    assert!(logs_contain("Compared with previous snapshot"));
    assert!(logs_contain("Added snapshot"));
}
