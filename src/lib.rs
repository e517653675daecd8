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

//! Volsnap: a deduplicating snapshot backup engine.
//!
//! Each snapshot records the whole source tree in an index, but stores in
//! its own volume files only the content that changed since the previous
//! snapshot. Everything else refers back along the chain.

pub mod apath;
pub mod attributes;
pub mod backup_index;
pub mod chain;
pub mod compress;
pub mod compression_stats;
pub mod config;
pub mod context;
pub mod counters;
pub mod diff;
pub mod errors;
pub mod excludes;
pub mod hash;
pub mod index_io;
mod jsonio;
pub mod kind;
pub mod manager;
pub mod monitor;
pub mod node_index;
pub mod os_index;
pub mod owner;
pub mod permissions;
pub mod protect;
pub mod restore;
pub mod snapshot;
pub mod stats;
pub mod test_fixtures;
pub mod unix_mode;
mod unix_time;
pub mod verify;
pub mod volume;

pub use crate::apath::Apath;
pub use crate::attributes::{BackupNodeAttributes, Block, BlockList, NodeAttributes};
pub use crate::backup_index::BackupNodeIndex;
pub use crate::chain::SnapshotChain;
pub use crate::compress::{Compression, CompressionKind};
pub use crate::config::Config;
pub use crate::context::BackupContext;
pub use crate::counters::Counter;
pub use crate::diff::{DiffEntry, DiffKind, DiffSummary, NodeIndexDifferences};
pub use crate::errors::Error;
pub use crate::excludes::{Exclude, ExcludeBuilder, IgnoreFilter};
pub use crate::hash::HashAlgorithm;
pub use crate::kind::Kind;
pub use crate::manager::{AddSnapshotOptions, AddSnapshotReport, SnapshotManager};
pub use crate::monitor::Monitor;
pub use crate::node_index::{ContentHashSource, NodeId, NodeIndex};
pub use crate::os_index::OsDirectoryIndex;
pub use crate::snapshot::{Snapshot, SnapshotName};
pub use crate::stats::SnapshotStats;
pub use crate::verify::NodeFailure;
pub use crate::volume::VolumeStore;

pub type Result<T> = std::result::Result<T, Error>;

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    VERSION
}

/// True if symlinks are supported on this platform.
pub const SYMLINKS_SUPPORTED: bool = cfg!(target_family = "unix");
