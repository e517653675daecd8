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

//! Tests for the volsnap library API.

use std::fs;
use std::path::Path;

mod backup;
mod damaged;
mod diff;
mod restore;
mod verify;

/// Make every volume file of a snapshot writable and cut it short.
fn truncate_volumes(backup_dir: &Path, snapshot: &str, len: u64) {
    let dir = backup_dir.join("data").join(snapshot);
    volsnap::protect::unprotect(&dir).unwrap();
    for entry in fs::read_dir(&dir).unwrap() {
        let path = entry.unwrap().path();
        let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len).unwrap();
    }
}
