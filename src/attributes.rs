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

//! Metadata of nodes, in a live tree or in a snapshot.

use std::collections::BTreeMap;
use std::fs::Metadata;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::compress::Compression;
use crate::hash::HashAlgorithm;
use crate::permissions::Permissions;
use crate::unix_time::mtime_of;
use crate::{Apath, Kind};

/// Metadata common to every node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAttributes {
    pub kind: Kind,
    /// Length of a file's content or a symlink's target; zero for directories.
    pub size: u64,
    pub mtime: Option<OffsetDateTime>,
    pub permissions: Permissions,
}

impl NodeAttributes {
    /// Attributes from `symlink_metadata`; `size` for a symlink is the length
    /// of its target and must be passed in.
    pub fn from_metadata(kind: Kind, metadata: &Metadata, symlink_len: u64) -> NodeAttributes {
        let size = match kind {
            Kind::File => metadata.len(),
            Kind::Dir => 0,
            Kind::Symlink => symlink_len,
        };
        NodeAttributes {
            kind,
            size,
            mtime: mtime_of(metadata),
            permissions: Permissions::from_metadata(metadata),
        }
    }

    pub fn dir(permissions: Permissions, mtime: Option<OffsetDateTime>) -> NodeAttributes {
        NodeAttributes {
            kind: Kind::Dir,
            size: 0,
            mtime,
            permissions,
        }
    }
}

impl AsRef<NodeAttributes> for NodeAttributes {
    fn as_ref(&self) -> &NodeAttributes {
        self
    }
}

/// True if two nodes are the same for the purpose of finding differences.
///
/// Digests are compared only when both sides have one for the same algorithm.
/// Directories have no content and their mtime changes whenever a child is
/// added or removed, so only their kind and permissions are compared.
pub fn attributes_match(
    a: &NodeAttributes,
    a_hash: Option<&str>,
    b: &NodeAttributes,
    b_hash: Option<&str>,
) -> bool {
    if a.kind != b.kind || a.permissions != b.permissions {
        return false;
    }
    if a.kind == Kind::Dir {
        return true;
    }
    if a.size != b.size || a.mtime != b.mtime {
        return false;
    }
    match (a_hash, b_hash) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

/// A node in a tree scanned from the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveAttributes {
    pub node: NodeAttributes,
    /// Target of a symlink, as stored in the link.
    pub symlink_target: Option<String>,
}

impl AsRef<NodeAttributes> for LiveAttributes {
    fn as_ref(&self) -> &NodeAttributes {
        &self.node
    }
}

/// A contiguous range of bytes within one volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Block {
    pub volume: u64,
    pub offset: u64,
    pub size: u64,
}

/// The blocks holding a node's stored data, in order.
///
/// A block that starts exactly where the previous one ended in the same volume
/// is merged into it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockList(Vec<Block>);

impl BlockList {
    pub fn new() -> BlockList {
        BlockList::default()
    }

    /// Append a block, merging it with the last one if they're adjacent.
    ///
    /// Empty blocks are ignored.
    pub fn push(&mut self, block: Block) {
        if block.size == 0 {
            return;
        }
        if let Some(last) = self.0.last_mut() {
            if last.volume == block.volume && last.offset + last.size == block.offset {
                last.size += block.size;
                return;
            }
        }
        self.0.push(block);
    }

    /// Total stored bytes.
    pub fn stored_size(&self) -> u64 {
        self.0.iter().map(|b| b.size).sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Block> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Block] {
        &self.0
    }
}

impl FromIterator<Block> for BlockList {
    fn from_iter<I: IntoIterator<Item = Block>>(iter: I) -> Self {
        let mut list = BlockList::new();
        for block in iter {
            list.push(block);
        }
        list
    }
}

/// A node in a snapshot.
///
/// The node's data is either held in blocks it owns, or found by following
/// `back_reference` into the previous snapshot. Empty files and directories
/// need neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupNodeAttributes {
    pub node: NodeAttributes,
    pub hashes: BTreeMap<HashAlgorithm, String>,
    pub blocks: BlockList,
    pub owns_blocks: bool,
    pub compression: Option<Compression>,
    /// Path of the node holding the same content in the previous snapshot.
    pub back_reference: Option<Apath>,
}

impl BackupNodeAttributes {
    /// A directory: it has no content so always has its data.
    pub fn directory(node: NodeAttributes) -> BackupNodeAttributes {
        BackupNodeAttributes {
            node,
            hashes: BTreeMap::new(),
            blocks: BlockList::new(),
            owns_blocks: false,
            compression: None,
            back_reference: None,
        }
    }

    /// A node whose data was just written into this snapshot's volumes.
    pub fn stored(
        node: NodeAttributes,
        algorithm: HashAlgorithm,
        hash: String,
        blocks: BlockList,
        compression: Option<Compression>,
    ) -> BackupNodeAttributes {
        BackupNodeAttributes {
            node,
            hashes: BTreeMap::from([(algorithm, hash)]),
            blocks,
            owns_blocks: true,
            compression,
            back_reference: None,
        }
    }

    /// A node with fresh attributes whose content is the same as `old`, found
    /// at `old_path` in the previous snapshot.
    ///
    /// Hashes and the compression setting are carried over. Empty nodes need
    /// no reference.
    pub fn referencing(
        node: NodeAttributes,
        old_path: &Apath,
        old: &BackupNodeAttributes,
    ) -> BackupNodeAttributes {
        if node.kind == Kind::Dir {
            return BackupNodeAttributes::directory(node);
        }
        let back_reference = (node.size > 0).then(|| old_path.clone());
        BackupNodeAttributes {
            node,
            hashes: old.hashes.clone(),
            blocks: BlockList::new(),
            owns_blocks: false,
            compression: old.compression,
            back_reference,
        }
    }

    pub fn kind(&self) -> Kind {
        self.node.kind
    }

    pub fn size(&self) -> u64 {
        self.node.size
    }

    /// True if this node's content can be read without looking at older snapshots.
    pub fn has_data(&self) -> bool {
        self.owns_blocks || self.node.size == 0
    }

    pub fn hash(&self, algorithm: HashAlgorithm) -> Option<&str> {
        self.hashes.get(&algorithm).map(String::as_str)
    }
}

impl AsRef<NodeAttributes> for BackupNodeAttributes {
    fn as_ref(&self) -> &NodeAttributes {
        &self.node
    }
}
