// volsnap backup system.
// Copyright 2023-2024 Martin Pool.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Track counters of the number of nodes, bytes, volumes, etc, processed.
//!
//! Library code sets counters through the [crate::monitor::Monitor] interface.

#![warn(missing_docs)]

use std::fmt::{self, Debug};
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::Relaxed;

use itertools::Itertools;
use strum::{EnumCount, IntoEnumIterator};
use strum_macros::{EnumCount, EnumIter};

/// Counters of events or bytes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, EnumCount, EnumIter)]
pub enum Counter {
    /// Number of files found in the source tree.
    Files,
    /// Total bytes in files found in the source tree.
    FileBytes,
    /// Number of directories found in the source tree.
    Dirs,
    /// Number of symlinks found in the source tree.
    Symlinks,
    /// Entries skipped by an exclusion or ignore filter.
    Excluded,
    /// Nodes whose data is new or changed since the previous snapshot.
    NodesDifferentData,
    /// Nodes with the same content but different metadata.
    NodesDifferentMetadata,
    /// Nodes whose content was found at another path in the previous snapshot.
    NodesMoved,
    /// Nodes of the previous snapshot that no longer exist.
    NodesDeleted,
    /// Nodes identical to the previous snapshot.
    NodesUnchanged,
    /// Nodes whose data was written into volumes.
    NodesStored,
    /// Uncompressed bytes of node data written into volumes.
    StoredUncompressedBytes,
    /// Bytes written into volumes, after compression.
    StoredBytes,
    /// Blocks recorded for stored nodes, after coalescing.
    Blocks,
    /// Volume files created.
    VolumesCreated,
    /// Volume file handles opened for reading.
    VolumeReadOpens,
    /// Idle volume read handles closed to limit open files.
    VolumeReadCloses,
    /// Uncompressed bytes of index written.
    IndexWriteUncompressedBytes,
    /// Compressed bytes of index written.
    IndexWriteCompressedBytes,
    /// Nodes checked by verification.
    NodesVerified,
    /// Nodes restored.
    NodesRestored,
    /// Bytes of file content restored.
    RestoredBytes,
}

/// Counter values, identified by a [Counter].
#[derive(Default)]
pub struct Counters {
    counters: [AtomicUsize; Counter::COUNT],
}

impl Counters {
    /// Increase the value for a given counter by an amount.
    pub fn count(&self, counter: Counter, increment: usize) {
        self.counters[counter as usize].fetch_add(increment, Relaxed);
    }

    /// Set the absolute value of a counter.
    pub fn set(&self, counter: Counter, value: usize) {
        self.counters[counter as usize].store(value, Relaxed);
    }

    /// Get the current value of a counter.
    pub fn get(&self, counter: Counter) -> usize {
        self.counters[counter as usize].load(Relaxed)
    }

    /// Return an iterator over counter, value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Counter, usize)> {
        Counter::iter()
            .map(move |c| (c, self.counters[c as usize].load(Relaxed)))
            .collect_vec()
            .into_iter()
    }
}

impl Debug for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Counters");
        for i in Counter::iter() {
            s.field(&format!("{i:?}"), &self.counters[i as usize].load(Relaxed));
        }
        s.finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn count_then_set() {
        let counters = Counters::default();
        counters.count(Counter::NodesStored, 4);
        counters.count(Counter::NodesStored, 1);
        counters.set(Counter::StoredBytes, 4096);
        counters.set(Counter::StoredBytes, 512);
        assert_eq!(counters.get(Counter::NodesStored), 5);
        assert_eq!(counters.get(Counter::StoredBytes), 512);
        assert_eq!(counters.get(Counter::NodesDeleted), 0);
    }

    #[test]
    fn iter_counters() {
        let counters = Counters::default();
        counters.count(Counter::NodesMoved, 2);
        assert_eq!(counters.iter().count(), Counter::COUNT);
        assert!(counters
            .iter()
            .all(|(c, v)| (c == Counter::NodesMoved) == (v == 2)));
    }

    #[test]
    fn debug_form() {
        let counters = Counters::default();
        counters.count(Counter::VolumesCreated, 3);
        let d = format!("{counters:#?}");
        assert!(d.contains("VolumesCreated: 3"), "{d}");
        assert!(d.contains("NodesRestored: 0"), "{d}");
    }
}
