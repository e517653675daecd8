// volsnap backup system.
// Copyright 2017 Julian Raufelder.
// Copyright 2020-2024 Martin Pool.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Decide which entries of a source tree are not backed up.
//!
//! Glob patterns are matched against [Apath]s. Patterns that start with a
//! slash match only against full paths from the top of the tree. Patterns that
//! do not start with a slash match the suffix of the path.
//!
//! Independently of the patterns, files that operating systems scatter into
//! directories to hold their own metadata are recognized by name and, where
//! there is one, by their magic number, and cache directories tagged with a
//! `CACHEDIR.TAG` are skipped.

use std::borrow::Cow;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::{Apath, Error, Kind, Result};

/// Decides whether an entry found while scanning is left out of the index.
pub trait IgnoreFilter: Send + Sync {
    /// `path` is the entry's location on the filesystem.
    fn ignore(&self, apath: &Apath, kind: Kind, path: &Path) -> bool;
}

/// Files written by desktop environments to describe a directory.
const OS_METADATA_NAMES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini", "ehthumbs.db"];

/// Magic number at the start of AppleDouble `._name` resource fork files.
const APPLE_DOUBLE_MAGIC: [u8; 4] = [0x00, 0x05, 0x16, 0x07];

/// True if this is a file that only carries operating system metadata.
pub fn is_os_metadata_file(name: &str, path: &Path) -> bool {
    if OS_METADATA_NAMES.contains(&name) {
        return true;
    }
    if name.starts_with("._") {
        let mut magic = [0u8; 4];
        return File::open(path)
            .and_then(|mut f| f.read_exact(&mut magic))
            .is_ok_and(|()| magic == APPLE_DOUBLE_MAGIC);
    }
    false
}

/// The standard filter: glob patterns, OS metadata files, and tagged cache
/// directories.
#[derive(Debug, Clone)]
pub struct Exclude {
    globs: GlobSet,
    skip_os_metadata: bool,
    skip_cache_dirs: bool,
}

impl Exclude {
    /// Exclude nothing, not even OS metadata.
    pub fn nothing() -> Exclude {
        Exclude {
            globs: GlobSet::empty(),
            skip_os_metadata: false,
            skip_cache_dirs: false,
        }
    }

    /// Exclude paths matching any of the patterns, plus OS metadata files and
    /// cache directories.
    pub fn from_patterns<I: IntoIterator<Item = S>, S: AsRef<str>>(patterns: I) -> Result<Exclude> {
        let mut builder = ExcludeBuilder::new();
        for p in patterns {
            builder.add(p.as_ref())?;
        }
        builder.build()
    }
}

impl IgnoreFilter for Exclude {
    fn ignore(&self, apath: &Apath, kind: Kind, path: &Path) -> bool {
        if self.globs.is_match(apath.as_ref()) {
            return true;
        }
        match kind {
            Kind::File => self.skip_os_metadata && is_os_metadata_file(apath.file_name(), path),
            Kind::Dir => self.skip_cache_dirs && cachedir::is_tagged(path).unwrap_or(false),
            Kind::Symlink => false,
        }
    }
}

pub struct ExcludeBuilder {
    gsb: GlobSetBuilder,
    skip_os_metadata: bool,
    skip_cache_dirs: bool,
}

impl ExcludeBuilder {
    pub fn new() -> ExcludeBuilder {
        ExcludeBuilder {
            gsb: GlobSetBuilder::new(),
            skip_os_metadata: true,
            skip_cache_dirs: true,
        }
    }

    pub fn build(&self) -> Result<Exclude> {
        let globs = self.gsb.build().map_err(|source| Error::ParseGlob {
            pattern: String::new(),
            source,
        })?;
        Ok(Exclude {
            globs,
            skip_os_metadata: self.skip_os_metadata,
            skip_cache_dirs: self.skip_cache_dirs,
        })
    }

    pub fn add(&mut self, pat: &str) -> Result<&mut ExcludeBuilder> {
        let full: Cow<str> = if pat.starts_with('/') {
            Cow::Borrowed(pat)
        } else {
            Cow::Owned(format!("**/{pat}"))
        };
        let glob = GlobBuilder::new(&full)
            .literal_separator(true)
            .build()
            .map_err(|source| Error::ParseGlob {
                pattern: pat.to_owned(),
                source,
            })?;
        self.gsb.add(glob);
        Ok(self)
    }

    pub fn skip_os_metadata(&mut self, skip: bool) -> &mut ExcludeBuilder {
        self.skip_os_metadata = skip;
        self
    }

    pub fn skip_cache_dirs(&mut self, skip: bool) -> &mut ExcludeBuilder {
        self.skip_cache_dirs = skip;
        self
    }
}

impl Default for ExcludeBuilder {
    fn default() -> Self {
        ExcludeBuilder::new()
    }
}
