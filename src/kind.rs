// volsnap backup system.
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

//! The kind of a node: file, directory, or symlink.

use std::fmt;
use std::fs::FileType;

use serde::{Deserialize, Serialize};

/// Kind of node that can be stored in a snapshot.
///
/// Other filesystem objects (sockets, devices, fifos) are not indexed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    File,
    #[serde(rename = "directory")]
    Dir,
    #[serde(rename = "link")]
    Symlink,
}

impl Kind {
    pub fn is_file(&self) -> bool {
        matches!(self, Kind::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Kind::Dir)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, Kind::Symlink)
    }

    /// The kind of a file type as seen by `symlink_metadata`, or None if it's
    /// something that can't be backed up.
    pub fn from_file_type(ft: FileType) -> Option<Kind> {
        if ft.is_file() {
            Some(Kind::File)
        } else if ft.is_dir() {
            Some(Kind::Dir)
        } else if ft.is_symlink() {
            Some(Kind::Symlink)
        } else {
            None
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Kind::File => "file",
            Kind::Dir => "directory",
            Kind::Symlink => "link",
        })
    }
}
