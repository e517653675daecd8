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

//! Volsnap error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::hash::HashAlgorithm;
use crate::Apath;

/// Volsnap specific error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Failed to read config file {path:?}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config file {path:?}")]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write config file {path:?}")]
    WriteConfig {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read JSON file {path:?}")]
    ReadJson {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse JSON file {path:?}")]
    ParseJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write JSON file {path:?}")]
    WriteJson {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("Not a backup directory (no config.json): {path:?}")]
    NotABackupDirectory { path: PathBuf },

    #[error("Backup directory {path:?} is already initialized")]
    BackupDirectoryExists { path: PathBuf },

    #[error("Failed to create directory {path:?}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to list directory {path:?}")]
    ListDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Index of snapshot {name} is corrupt: {details}")]
    IndexCorrupt { name: String, details: String },

    #[error("Failed to read index of snapshot {name}")]
    ReadIndex {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write index of snapshot {name}")]
    WriteIndex {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize index of snapshot {name}")]
    SerializeIndex {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Snapshot {name} already exists")]
    SnapshotExists { name: String },

    #[error("Snapshot {name} not found")]
    SnapshotNotFound { name: String },

    #[error("Backup directory contains no snapshots")]
    NoSnapshots,

    #[error("Invalid snapshot name {name:?}")]
    InvalidSnapshotName { name: String },

    #[error("Invalid path {apath:?}")]
    InvalidApath { apath: String },

    #[error("Duplicate path {apath} in node index")]
    DuplicatePath { apath: Apath },

    #[error("Node index is full")]
    IndexFull,

    #[error("Path {apath} not found in snapshot {snapshot}")]
    NodeNotFound { apath: Apath, snapshot: String },

    #[error("No snapshot holds data for {apath}")]
    DataNotFound { apath: Apath },

    #[error("Stored {actual} bytes for {apath} but expected {expected}")]
    StreamPipingFailed {
        apath: Apath,
        expected: u64,
        actual: u64,
    },

    #[error("Content of {apath} does not match its {algorithm} hash: expected {expected}, found {actual}")]
    HashMismatch {
        apath: Apath,
        algorithm: HashAlgorithm,
        expected: String,
        actual: String,
    },

    #[error("Snapshot {name} does not match its source after writing: {details}")]
    InconsistentSnapshot { name: String, details: String },

    #[error("Symlink {apath} target {target:?} escapes the source tree")]
    SymlinkEscapesRoot { apath: Apath, target: String },

    #[error("Unsupported operation: {details}")]
    Unsupported { details: String },

    #[error("Source directory {path:?} is not a directory")]
    SourceNotADirectory { path: PathBuf },

    #[error("Failed to read source file {path:?}")]
    ReadSourceFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read metadata of {path:?}")]
    ReadMetadata {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write volume {volume} in {dir:?}")]
    WriteVolume {
        dir: PathBuf,
        volume: u64,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read volume {volume} in {dir:?}")]
    ReadVolume {
        dir: PathBuf,
        volume: u64,
        #[source]
        source: io::Error,
    },

    #[error("Block at offset {offset} of volume {volume} is truncated: expected {expected} bytes, found {actual}")]
    BlockTruncated {
        volume: u64,
        offset: u64,
        expected: u64,
        actual: u64,
    },

    #[error("Failed to read stored content of {apath}")]
    ReadContent {
        apath: Apath,
        #[source]
        source: io::Error,
    },

    #[error("Restore destination {path:?} is not empty")]
    DestinationNotEmpty { path: PathBuf },

    #[error("Failed to restore file {path:?}")]
    RestoreFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to restore symlink {path:?}")]
    RestoreSymlink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to restore permissions on {path:?}")]
    RestorePermissions {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to restore modification time on {path:?}")]
    RestoreModificationTime {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to set owner of {path:?}")]
    SetOwner {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to change write protection of {path:?}")]
    WriteProtect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read compression statistics {path:?}")]
    ReadCompressionStats {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write compression statistics {path:?}")]
    WriteCompressionStats {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid exclusion pattern {pattern:?}")]
    ParseGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("Failed to start worker threads")]
    ThreadPool {
        #[source]
        source: rayon::ThreadPoolBuildError,
    },

    #[error(transparent)]
    Io {
        #[from]
        source: io::Error,
    },
}

impl Error {
    /// Recover an error that was carried through an `io::Error` by one of the
    /// streams in this crate, or otherwise describe it as a failure to read the
    /// stored content of `apath`.
    pub(crate) fn from_content_io(apath: &Apath, err: io::Error) -> Error {
        if !err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            return Error::ReadContent {
                apath: apath.clone(),
                source: err,
            };
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(inner)) => Error::ReadContent {
                apath: apath.clone(),
                source: io::Error::new(kind, inner),
            },
            None => Error::ReadContent {
                apath: apath.clone(),
                source: kind.into(),
            },
        }
    }

    /// Wrap this error so it can travel through an `io::Read` or `io::Write`.
    pub(crate) fn into_io(self) -> io::Error {
        io::Error::other(self)
    }

    /// True if this error means stored content failed an integrity check,
    /// rather than failing to be read at all.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::HashMismatch { .. }
                | Error::StreamPipingFailed { .. }
                | Error::BlockTruncated { .. }
                | Error::IndexCorrupt { .. }
        )
    }
}
