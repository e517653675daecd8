// volsnap backup system.
// Copyright 2024 Martin Pool.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! All the snapshots in a backup directory, oldest first.
//!
//! Each snapshot's `previous` is the position of the one before it, and a
//! node that didn't store its own data refers to a path in that previous
//! snapshot. Following those references finds the snapshot that holds a
//! node's bytes.

use std::io::{self, Read};

use tracing::{debug, warn};

use crate::compress::decompress_reader;
use crate::context::BackupContext;
use crate::hash::VerifyingReader;
use crate::index_io::{list_indexes, read_index};
use crate::node_index::NodeId;
use crate::snapshot::{Snapshot, SnapshotName};
use crate::volume::VolumeStore;
use crate::{Apath, Error, Kind, Result};

#[derive(Debug, Default)]
pub struct SnapshotChain {
    snapshots: Vec<Snapshot>,
}

impl SnapshotChain {
    /// Load every snapshot in the backup directory.
    ///
    /// A corrupt index stops the load, because every later snapshot may
    /// depend on it.
    pub fn load(ctx: &BackupContext) -> Result<SnapshotChain> {
        let index_dir = ctx.index_dir();
        let data_dir = ctx.data_dir();
        let mut snapshots = Vec::new();
        for name in list_indexes(&index_dir)? {
            let index = read_index(&index_dir, &name)?;
            let volumes = VolumeStore::open(
                &data_dir.join(name.as_str()),
                ctx.config().volume_size,
                ctx.monitor_arc(),
            )?;
            let previous = snapshots.len().checked_sub(1);
            snapshots.push(Snapshot::new(name, index, volumes, previous));
        }
        debug!(snapshots = snapshots.len(), "Loaded snapshot chain");
        Ok(SnapshotChain { snapshots })
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Panics if the position is out of range.
    pub fn get(&self, pos: usize) -> &Snapshot {
        &self.snapshots[pos]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter()
    }

    pub fn newest(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    pub fn newest_position(&self) -> Option<usize> {
        self.snapshots.len().checked_sub(1)
    }

    pub fn position_of(&self, name: &SnapshotName) -> Option<usize> {
        self.snapshots.iter().position(|s| s.name() == name)
    }

    /// Find the snapshot whose volumes hold the data of `apath` in the
    /// snapshot at `pos`, and the node's path in that snapshot.
    pub fn find_data_snapshot(&self, pos: usize, apath: &Apath) -> Result<(usize, Apath)> {
        let mut pos = pos;
        let mut path = apath.clone();
        loop {
            let snapshot = &self.snapshots[pos];
            let nodes = snapshot.index().nodes();
            let id = nodes.id_of(&path).ok_or_else(|| Error::NodeNotFound {
                apath: path.clone(),
                snapshot: snapshot.name().to_string(),
            })?;
            let attrs = nodes.attributes(id);
            if attrs.has_data() {
                return Ok((pos, path));
            }
            // Positions strictly decrease, so this ends.
            match (&attrs.back_reference, snapshot.previous()) {
                (Some(target), Some(previous)) => {
                    path = target.clone();
                    pos = previous;
                }
                _ => {
                    return Err(Error::DataNotFound {
                        apath: apath.clone(),
                    })
                }
            }
        }
    }

    /// Open the content of a node in the snapshot at `pos`.
    ///
    /// With `verify`, the returned stream fails at its end if the content
    /// doesn't match the recorded hash.
    pub fn open_content(
        &self,
        pos: usize,
        id: NodeId,
        verify: bool,
    ) -> Result<Box<dyn Read + Send + '_>> {
        let snapshot = &self.snapshots[pos];
        let nodes = snapshot.index().nodes();
        let apath = nodes.path(id);
        let attrs = nodes.attributes(id);
        if attrs.kind() == Kind::Dir {
            return Ok(Box::new(io::empty()));
        }
        let (data_pos, data_path) = self.find_data_snapshot(pos, apath)?;
        let data_snapshot = &self.snapshots[data_pos];
        let data_nodes = data_snapshot.index().nodes();
        let data_attrs = data_nodes
            .id_of(&data_path)
            .map(|id| data_nodes.attributes(id))
            .ok_or_else(|| Error::NodeNotFound {
                apath: data_path.clone(),
                snapshot: data_snapshot.name().to_string(),
            })?;
        let raw = data_snapshot.volumes().open_reader(&data_attrs.blocks);
        let reader = decompress_reader(raw, data_attrs.compression)
            .map_err(|err| Error::from_content_io(apath, err))?;
        if !verify {
            return Ok(reader);
        }
        let algorithm = snapshot.index().algorithm();
        match attrs.hash(algorithm) {
            Some(expected) => Ok(Box::new(VerifyingReader::new(
                reader,
                apath.clone(),
                algorithm,
                expected.to_owned(),
            ))),
            None => {
                warn!(%apath, %algorithm, "No hash recorded; content can't be verified");
                Ok(reader)
            }
        }
    }

    /// Read the whole content of a node.
    pub fn read_content(&self, pos: usize, id: NodeId, verify: bool) -> Result<Vec<u8>> {
        let apath = self.snapshots[pos].index().nodes().path(id);
        let mut buf = Vec::new();
        self.open_content(pos, id, verify)?
            .read_to_end(&mut buf)
            .map_err(|err| Error::from_content_io(apath, err))?;
        Ok(buf)
    }
}
