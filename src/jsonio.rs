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

//! Read and write small JSON files.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::{Error, Result};

/// Atomically write a JSON file, replacing any existing file.
pub(crate) fn write_json<T: Serialize>(path: &Path, obj: &T) -> Result<()> {
    let mut s = serde_json::to_string_pretty(obj).map_err(|source| Error::WriteJson {
        path: path.to_owned(),
        source: source.into(),
    })?;
    s.push('\n');
    let dir = path.parent().unwrap_or(Path::new("."));
    let write = || -> std::io::Result<()> {
        let mut f = NamedTempFile::new_in(dir)?;
        f.write_all(s.as_bytes())?;
        f.as_file().sync_all()?;
        f.persist(path).map_err(|err| err.error)?;
        Ok(())
    };
    write().map_err(|source| Error::WriteJson {
        path: path.to_owned(),
        source,
    })
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let s = fs::read_to_string(path).map_err(|source| Error::ReadJson {
        path: path.to_owned(),
        source,
    })?;
    serde_json::from_str(&s).map_err(|source| Error::ParseJson {
        path: path.to_owned(),
        source,
    })
}
