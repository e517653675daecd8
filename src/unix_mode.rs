// volsnap backup system.
// Copyright 2022 Stephanie Aelmore.
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

//! Unix permission bits of a node.
//!
//! The mode has 12 significant bits: the setuid, setgid and sticky bits, and
//! read, write and execute for the owner, group, and others classes. Bits
//! describing the file type are dropped.
//!
//! On Windows, files are only read-only or writable. The mode is still kept
//! in the unix format, with read-only state carried by the owner write bit.

use std::fmt;
use std::fs::Permissions;

use serde::{Deserialize, Serialize};

const PERMISSION_BITS: u32 = 0o7777;
const WRITE_BITS: u32 = 0o222;
const OWNER_WRITE: u32 = 0o200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnixMode(u32);

impl UnixMode {
    pub fn new(mode: u32) -> UnixMode {
        UnixMode(mode & PERMISSION_BITS)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// True if the owner can't write to it.
    pub fn readonly(self) -> bool {
        self.0 & OWNER_WRITE == 0
    }

    /// The same mode with every write bit removed.
    pub fn without_write(self) -> UnixMode {
        UnixMode(self.0 & !WRITE_BITS)
    }

    /// The same mode with the owner write bit set.
    pub fn with_owner_write(self) -> UnixMode {
        UnixMode(self.0 | OWNER_WRITE)
    }
}

impl Default for UnixMode {
    fn default() -> Self {
        // Directories need the execute bit to be searched after restore.
        UnixMode(0o775)
    }
}

impl fmt::Display for UnixMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Don't print the file type; it's not stored.
        write!(f, "{}", unix_mode::to_string(self.0).trim_start_matches('?'))
    }
}

impl From<u32> for UnixMode {
    fn from(mode: u32) -> Self {
        UnixMode::new(mode)
    }
}

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

#[cfg(unix)]
impl From<Permissions> for UnixMode {
    fn from(p: Permissions) -> Self {
        UnixMode::new(p.mode())
    }
}

#[cfg(unix)]
impl From<UnixMode> for Permissions {
    fn from(mode: UnixMode) -> Self {
        Permissions::from_mode(mode.0)
    }
}

#[cfg(not(unix))]
impl From<Permissions> for UnixMode {
    fn from(p: Permissions) -> Self {
        if p.readonly() {
            UnixMode(0o555)
        } else {
            UnixMode(0o775)
        }
    }
}
