// volsnap backup system.
// Copyright 2024 Martin Pool.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Write-protect finished parts of the backup directory, so that a stray
//! process can't easily damage snapshots that later ones depend on.

use std::fs;
use std::path::Path;

use tracing::trace;

use crate::unix_mode::UnixMode;
use crate::{Error, Result};

/// Remove write permission from `path` and, if it's a directory, everything
/// below it.
pub fn write_protect(path: &Path) -> Result<()> {
    walk(path, &|p| set_writable(p, false), false)
}

/// Give the owner write permission on `path` and everything below it.
pub fn unprotect(path: &Path) -> Result<()> {
    walk(path, &|p| set_writable(p, true), true)
}

/// Change the write permission of just `path`.
pub fn set_writable(path: &Path, writable: bool) -> Result<()> {
    let map_err = |source| Error::WriteProtect {
        path: path.to_owned(),
        source,
    };
    let metadata = fs::symlink_metadata(path).map_err(map_err)?;
    if metadata.file_type().is_symlink() {
        return Ok(());
    }
    let mode = UnixMode::from(metadata.permissions());
    let new_mode = if writable {
        mode.with_owner_write()
    } else {
        mode.without_write()
    };
    if new_mode == mode {
        return Ok(());
    }
    trace!(?path, %new_mode, "Set write permission");
    fs::set_permissions(path, permissions_for(metadata.permissions(), new_mode)).map_err(map_err)
}

#[cfg(unix)]
fn permissions_for(_old: fs::Permissions, mode: UnixMode) -> fs::Permissions {
    mode.into()
}

#[cfg(not(unix))]
fn permissions_for(mut old: fs::Permissions, mode: UnixMode) -> fs::Permissions {
    old.set_readonly(mode.readonly());
    old
}

/// Apply `f` to `path` and its descendants.
///
/// A directory must be writable before its children can be listed and
/// changed on some systems, and must stay readable, so when making things
/// writable the directory goes first; when protecting, last.
fn walk(path: &Path, f: &dyn Fn(&Path) -> Result<()>, parent_first: bool) -> Result<()> {
    let metadata = fs::symlink_metadata(path).map_err(|source| Error::WriteProtect {
        path: path.to_owned(),
        source,
    })?;
    if !metadata.is_dir() {
        return f(path);
    }
    if parent_first {
        f(path)?;
    }
    let entries = fs::read_dir(path).map_err(|source| Error::ListDirectory {
        path: path.to_owned(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| Error::ListDirectory {
            path: path.to_owned(),
            source,
        })?;
        walk(&entry.path(), f, parent_first)?;
    }
    if !parent_first {
        f(path)?;
    }
    Ok(())
}
