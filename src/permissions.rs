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

//! Access control of a node: ownership plus permission bits.
//!
//! Only the POSIX scheme exists today; it's a tagged enum in the index so other
//! schemes (such as Windows ACLs) can be added without breaking old snapshots.

use std::fmt;
use std::fs::{self, Metadata};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::owner::{set_owner, Owner};
use crate::unix_mode::UnixMode;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "lowercase")]
pub enum Permissions {
    Posix { owner: Owner, mode: UnixMode },
}

impl Permissions {
    pub fn posix(owner: Owner, mode: UnixMode) -> Permissions {
        Permissions::Posix { owner, mode }
    }

    pub fn from_metadata(metadata: &Metadata) -> Permissions {
        Permissions::Posix {
            owner: Owner::from(metadata),
            mode: UnixMode::from(metadata.permissions()),
        }
    }

    pub fn mode(&self) -> UnixMode {
        match self {
            Permissions::Posix { mode, .. } => *mode,
        }
    }

    pub fn owner(&self) -> &Owner {
        match self {
            Permissions::Posix { owner, .. } => owner,
        }
    }

    /// Apply the permission bits to a file or directory.
    ///
    /// Symlinks have no permissions of their own, so this should not be
    /// called on them.
    pub fn apply_mode(&self, path: &Path) -> Result<()> {
        fs::set_permissions(path, self.mode().into()).map_err(|source| {
            Error::RestorePermissions {
                path: path.to_owned(),
                source,
            }
        })
    }

    /// Try to restore ownership; lacking the privilege to do so is not an error.
    pub fn apply_owner(&self, path: &Path) -> Result<()> {
        set_owner(self.owner(), path)
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Permissions::Posix {
            owner: Owner::default(),
            mode: UnixMode::default(),
        }
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permissions::Posix { owner, mode } => write!(f, "{mode} {owner}"),
        }
    }
}
