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

/// Utilities to set up test environments.
///
/// Fixtures that create directories will be automatically deleted when the object
/// is deleted.
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use crate::config::Config;
use crate::manager::{AddSnapshotOptions, AddSnapshotReport, SnapshotManager};
use crate::monitor::test::TestMonitor;
use crate::protect::unprotect;
use crate::Result;

/// A temporary backup directory, deleted when it goes out of scope.
pub struct ScratchStore {
    _tempdir: TempDir, // held only for cleanup
    root: PathBuf,
    monitor: Arc<TestMonitor>,
    manager: SnapshotManager,
}

impl ScratchStore {
    /// Make a backup directory for the given source, with default settings.
    pub fn new(source: &Path) -> ScratchStore {
        ScratchStore::with_config(Config::new(source))
    }

    pub fn with_config(config: Config) -> ScratchStore {
        let tempdir = TempDir::new().unwrap();
        let root = tempdir.path().join("backup");
        let monitor = TestMonitor::arc();
        let manager = SnapshotManager::init(&root, config, monitor.clone()).unwrap();
        ScratchStore {
            _tempdir: tempdir,
            root,
            monitor,
            manager,
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn manager(&self) -> &SnapshotManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut SnapshotManager {
        &mut self.manager
    }

    pub fn monitor(&self) -> &TestMonitor {
        &self.monitor
    }

    /// Add a snapshot of the source, named for the current time.
    pub fn backup(&mut self) -> Result<AddSnapshotReport> {
        self.manager.add_snapshot(AddSnapshotOptions::default())
    }

    pub fn backup_named(&mut self, name: &str) -> Result<AddSnapshotReport> {
        self.manager.add_snapshot(AddSnapshotOptions {
            name: Some(name.parse()?),
        })
    }

    /// Open the backup directory again from disk, with a fresh monitor.
    pub fn reopen(&mut self) -> Result<()> {
        self.monitor = TestMonitor::arc();
        self.manager = SnapshotManager::open(&self.root, self.monitor.clone())?;
        Ok(())
    }
}

impl Drop for ScratchStore {
    fn drop(&mut self) {
        // Snapshots are write-protected; make them deletable.
        let _ = unprotect(&self.root);
    }
}

/// A temporary tree for running a test.
///
/// Created in a temporary directory and automatically disposed when done.
pub struct TreeFixture {
    pub root: PathBuf,
    _tempdir: TempDir, // held only for cleanup
}

impl TreeFixture {
    pub fn new() -> TreeFixture {
        let tempdir = TempDir::new().unwrap();
        let root = tempdir.path().to_path_buf();
        TreeFixture {
            _tempdir: tempdir,
            root,
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Make a file in the tree, with arbitrary contents. Returns the full path.
    pub fn create_file(&self, relative_path: &str) -> PathBuf {
        self.create_file_with_contents(relative_path, b"contents")
    }

    /// Make a file in the tree, with given contents. Returns the full path.
    pub fn create_file_with_contents(&self, relative_path: &str, contents: &[u8]) -> PathBuf {
        let full_path = self.root.join(relative_path);
        let mut f = fs::File::create(&full_path).unwrap();
        f.write_all(contents).unwrap();
        full_path
    }

    pub fn create_dir(&self, relative_path: &str) {
        fs::create_dir(self.root.join(relative_path)).unwrap();
    }

    #[cfg(unix)]
    pub fn create_symlink(&self, relative_path: &str, target: &str) {
        use std::os::unix::fs as unix_fs;

        unix_fs::symlink(target, self.root.join(relative_path)).unwrap();
    }

    /// Symlinks are just not present on Windows.
    #[cfg(windows)]
    pub fn create_symlink(&self, _relative_path: &str, _target: &str) {}

    #[cfg(unix)]
    pub fn make_file_unreadable(&self, relative_path: &str) {
        use std::os::unix::fs::PermissionsExt;
        let p = self.root.join(relative_path);
        fs::set_permissions(&p, fs::Permissions::from_mode(0)).unwrap();
    }
}

impl Default for TreeFixture {
    fn default() -> Self {
        Self::new()
    }
}
