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

//! "Apaths" (for archive paths) are platform-independent paths of nodes
//! inside a snapshot, relative to the root of the backed-up tree.
//!
//! Apaths are:
//!
//!  * Case-sensitive.
//!  * Components are separated by `/`.
//!  * UTF-8, without consideration of normalization.
//!  * Do not contain `.`, `..`, or empty components.
//!  * Start with `/`, which alone denotes the root of the tree.
//!
//! There is a total ordering of apaths such that all the direct children of a
//! directory sort before its subdirectories, and the contents of a directory
//! are sorted in UTF-8 order.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// An Apath is a `/`-separated path of a node within a snapshot.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Apath(String);

impl Apath {
    /// True if this string is a well-formed apath.
    ///
    /// Rust strings are by contract always valid UTF-8, so to meet that
    /// requirement for apaths it's enough to use a checked conversion from
    /// bytes or an `OsString`.
    pub fn is_valid(a: &str) -> bool {
        if !a.starts_with('/') {
            return false;
        } else if a.len() == 1 {
            return true;
        }
        for part in a[1..].split('/') {
            if part.is_empty() || part == "." || part == ".." || part.contains('\0') {
                return false;
            }
        }
        true
    }

    /// The apath of the root of the tree.
    pub fn root() -> Apath {
        Apath("/".to_owned())
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Return the apath of a child of this directory.
    ///
    /// `name` must be a single component without slashes.
    pub fn append(&self, name: &str) -> Apath {
        debug_assert!(!name.contains('/'));
        let mut s = String::with_capacity(self.0.len() + 1 + name.len());
        s.push_str(&self.0);
        if !s.ends_with('/') {
            s.push('/');
        }
        s.push_str(name);
        Apath(s)
    }

    /// The apath of the parent directory, or None for the root.
    pub fn parent(&self) -> Option<Apath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Apath::root()),
            Some(i) => Some(Apath(self.0[..i].to_owned())),
            None => None,
        }
    }

    /// The last component of the path; empty for the root.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// The lowercased filename extension, or an empty string if there is none.
    ///
    /// Dotfiles like `.bashrc` have no extension.
    pub fn extension(&self) -> String {
        let name = self.file_name();
        match name.rfind('.') {
            Some(0) | None => String::new(),
            Some(i) => name[i + 1..].to_lowercase(),
        }
    }

    /// Number of components below the root.
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.matches('/').count()
        }
    }

    /// True if `self` is `other` or a directory containing it.
    pub fn is_prefix_of(&self, other: &Apath) -> bool {
        if self.is_root() {
            return true;
        }
        other.0.starts_with(&self.0)
            && (other.0.len() == self.0.len() || other.0.as_bytes()[self.0.len()] == b'/')
    }

    /// The filesystem path of this apath relative to a base directory.
    pub fn below<P: AsRef<Path>>(&self, base: P) -> PathBuf {
        let mut buf = base.as_ref().to_path_buf();
        if !self.is_root() {
            buf.extend(self.0[1..].split('/'));
        }
        buf
    }
}

impl FromStr for Apath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Apath> {
        if Apath::is_valid(s) {
            Ok(Apath(s.to_owned()))
        } else {
            Err(Error::InvalidApath { apath: s.to_owned() })
        }
    }
}

impl TryFrom<String> for Apath {
    type Error = Error;

    fn try_from(s: String) -> Result<Apath> {
        if Apath::is_valid(&s) {
            Ok(Apath(s))
        } else {
            Err(Error::InvalidApath { apath: s })
        }
    }
}

impl From<Apath> for String {
    fn from(a: Apath) -> String {
        a.0
    }
}

impl From<&str> for Apath {
    /// Construct an apath from a literal string.
    ///
    /// Panics if the string is not a valid apath.
    fn from(s: &str) -> Apath {
        assert!(Apath::is_valid(s), "invalid apath: {s:?}");
        Apath(s.to_owned())
    }
}

impl AsRef<str> for Apath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Apath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Apath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Apath({:?})", self.0)
    }
}

impl Ord for Apath {
    fn cmp(&self, other: &Apath) -> Ordering {
        let a = &self.0;
        let b = &other.0;
        if a == b {
            return Ordering::Equal;
        }
        let mut ait = a.split('/');
        let mut bit = b.split('/');
        let mut oa = ait.next().unwrap_or_default();
        let mut ob = bit.next().unwrap_or_default();
        loop {
            match (ait.next(), bit.next(), oa.cmp(ob)) {
                // Both are in the same directory: compare the last components.
                (None, None, cmp) => return cmp,
                // `a` is a file in a directory that `b` descends into.
                (None, Some(_), _) => return Ordering::Less,
                (Some(_), None, _) => return Ordering::Greater,
                (Some(an), Some(bn), Ordering::Equal) => {
                    oa = an;
                    ob = bn;
                }
                (Some(_), Some(_), cmp) => return cmp,
            }
        }
    }
}

impl PartialOrd for Apath {
    fn partial_cmp(&self, other: &Apath) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
