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

use std::fmt;

use derive_more::{Add, AddAssign};
use thousands::Separable;

use crate::chain::SnapshotChain;
use crate::{Kind, Result};

pub fn mb_string(s: u64) -> String {
    (s / 1_000_000).separate_with_commas()
}

/// Describe the compression ratio: higher is better.
fn ratio(uncompressed: u64, compressed: u64) -> f64 {
    if compressed > 0 {
        uncompressed as f64 / compressed as f64
    } else {
        0f64
    }
}

/// Sizes and counts of one snapshot.
#[derive(Add, AddAssign, Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SnapshotStats {
    pub nodes: usize,
    pub files: usize,
    pub dirs: usize,
    pub symlinks: usize,
    /// Nodes whose data is stored in this snapshot's own volumes.
    pub owned_nodes: usize,
    /// Nodes that refer to a path in the previous snapshot.
    pub referencing_nodes: usize,
    /// Total size of file and symlink content.
    pub logical_bytes: u64,
    /// Uncompressed size of the content this snapshot stores itself.
    pub owned_bytes: u64,
    /// Bytes this snapshot wrote to its volumes.
    pub stored_bytes: u64,
    pub volumes: usize,
}

impl SnapshotStats {
    pub fn of(chain: &SnapshotChain, pos: usize) -> Result<SnapshotStats> {
        let snapshot = chain.get(pos);
        let mut stats = SnapshotStats {
            volumes: snapshot.volumes().volume_numbers()?.len(),
            ..SnapshotStats::default()
        };
        for (_id, _apath, attrs) in snapshot.index().nodes().iter() {
            stats.nodes += 1;
            match attrs.kind() {
                Kind::Dir => {
                    stats.dirs += 1;
                    continue;
                }
                Kind::File => stats.files += 1,
                Kind::Symlink => stats.symlinks += 1,
            }
            stats.logical_bytes += attrs.size();
            if attrs.owns_blocks {
                stats.owned_nodes += 1;
                stats.owned_bytes += attrs.size();
                stats.stored_bytes += attrs.blocks.stored_size();
            } else if attrs.back_reference.is_some() {
                stats.referencing_nodes += 1;
            }
        }
        Ok(stats)
    }
}

impl fmt::Display for SnapshotStats {
    fn fmt(&self, w: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(w, "{:>12}      nodes:", self.nodes.separate_with_commas())?;
        writeln!(w, "{:>12}        files", self.files.separate_with_commas())?;
        writeln!(w, "{:>12}        directories", self.dirs.separate_with_commas())?;
        writeln!(w, "{:>12}        symlinks", self.symlinks.separate_with_commas())?;
        writeln!(
            w,
            "{:>12}      nodes stored in this snapshot",
            self.owned_nodes.separate_with_commas()
        )?;
        writeln!(
            w,
            "{:>12}      nodes referring to earlier snapshots",
            self.referencing_nodes.separate_with_commas()
        )?;
        writeln!(w)?;
        writeln!(w, "{:>12} MB   total content", mb_string(self.logical_bytes))?;
        writeln!(w, "{:>12} MB   stored here, uncompressed", mb_string(self.owned_bytes))?;
        writeln!(
            w,
            "{:>12} MB   after {:.1}x compression",
            mb_string(self.stored_bytes),
            ratio(self.owned_bytes, self.stored_bytes)
        )?;
        writeln!(w, "{:>12}      volumes", self.volumes.separate_with_commas())?;
        Ok(())
    }
}
