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

//! The index of one snapshot: node attributes plus where their data is.

use std::collections::HashMap;

use crate::attributes::BackupNodeAttributes;
use crate::hash::HashAlgorithm;
use crate::node_index::{ContentHashSource, NodeId, NodeIndex};
use crate::{Apath, Kind, Result};

#[derive(Debug, Clone)]
pub struct BackupNodeIndex {
    nodes: NodeIndex<BackupNodeAttributes>,
    /// Primary algorithm: the one used to find moved content.
    algorithm: HashAlgorithm,
    /// Nodes by kind and primary hash, so that a symlink is never taken to be
    /// a move of a file whose content happens to be the link's target.
    hash_lookup: HashMap<(Kind, String), NodeId>,
}

impl BackupNodeIndex {
    pub fn new(algorithm: HashAlgorithm) -> BackupNodeIndex {
        BackupNodeIndex {
            nodes: NodeIndex::new(),
            algorithm,
            hash_lookup: HashMap::new(),
        }
    }

    /// Add a node while building the index.
    ///
    /// [BackupNodeIndex::build_hash_lookup] must be called after the last one.
    pub fn add_node(&mut self, apath: Apath, attrs: BackupNodeAttributes) -> Result<NodeId> {
        self.nodes.add_node(apath, attrs)
    }

    /// Index the nodes by their primary hash.
    ///
    /// Nodes are visited in apath order and the first one wins, so when
    /// several nodes have the same content the lookup finds the earliest path.
    pub fn build_hash_lookup(&mut self) {
        let mut lookup = HashMap::with_capacity(self.nodes.len());
        for (id, _apath, attrs) in self.nodes.iter() {
            if let Some(hash) = attrs.hash(self.algorithm) {
                lookup
                    .entry((attrs.kind(), hash.to_owned()))
                    .or_insert(id);
            }
        }
        self.hash_lookup = lookup;
    }

    /// Find a node of the given kind with this primary hash.
    pub fn find_by_hash(&self, kind: Kind, hash: &str) -> Option<NodeId> {
        self.hash_lookup.get(&(kind, hash.to_owned())).copied()
    }

    pub fn nodes(&self) -> &NodeIndex<BackupNodeAttributes> {
        &self.nodes
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True if the node's data is in this snapshot, without following a
    /// back-reference.
    pub fn has_node_data(&self, id: NodeId) -> bool {
        self.nodes.attributes(id).has_data()
    }

    /// Number of nodes whose data is stored in this snapshot's own volumes.
    pub fn count_owned(&self) -> usize {
        self.nodes
            .iter()
            .filter(|(_, _, attrs)| attrs.owns_blocks)
            .count()
    }
}

impl ContentHashSource for BackupNodeIndex {
    type Attributes = BackupNodeAttributes;

    fn nodes(&self) -> &NodeIndex<BackupNodeAttributes> {
        &self.nodes
    }

    fn known_hash(&self, id: NodeId, algorithm: HashAlgorithm) -> Option<&str> {
        self.nodes.attributes(id).hash(algorithm)
    }

    fn content_hash(&self, id: NodeId, algorithm: HashAlgorithm) -> Result<Option<String>> {
        Ok(self.known_hash(id, algorithm).map(str::to_owned))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::attributes::{Block, BlockList, NodeAttributes};
    use crate::permissions::Permissions;

    fn stored(kind: Kind, content: &[u8]) -> BackupNodeAttributes {
        BackupNodeAttributes::stored(
            NodeAttributes {
                kind,
                size: content.len() as u64,
                mtime: None,
                permissions: Permissions::default(),
            },
            HashAlgorithm::Blake2b,
            HashAlgorithm::Blake2b.hash_bytes(content),
            BlockList::from_iter([Block {
                volume: 0,
                offset: 0,
                size: content.len() as u64,
            }]),
            None,
        )
    }

    #[test]
    fn earliest_path_wins_hash_lookup() {
        let mut index = BackupNodeIndex::new(HashAlgorithm::Blake2b);
        index
            .add_node(
                Apath::root(),
                BackupNodeAttributes::directory(NodeAttributes::dir(Permissions::default(), None)),
            )
            .unwrap();
        let z = index.add_node("/z".into(), stored(Kind::File, b"same")).unwrap();
        let b = index.add_node("/b".into(), stored(Kind::File, b"same")).unwrap();
        let link = index
            .add_node("/link".into(), stored(Kind::Symlink, b"target"))
            .unwrap();
        index.build_hash_lookup();

        let same = HashAlgorithm::Blake2b.hash_bytes(b"same");
        assert_eq!(index.find_by_hash(Kind::File, &same), Some(b));
        assert_ne!(index.find_by_hash(Kind::File, &same), Some(z));

        let target = HashAlgorithm::Blake2b.hash_bytes(b"target");
        assert_eq!(index.find_by_hash(Kind::Symlink, &target), Some(link));
        assert_eq!(index.find_by_hash(Kind::File, &target), None);
        assert_eq!(index.count_owned(), 3);
        assert!(index.has_node_data(z));
    }

    #[test]
    fn backup_index_hashes_are_recorded() {
        let mut index = BackupNodeIndex::new(HashAlgorithm::Blake2b);
        let id = index.add_node("/f".into(), stored(Kind::File, b"x")).unwrap();
        assert_eq!(
            index.content_hash(id, HashAlgorithm::Blake2b).unwrap(),
            Some(HashAlgorithm::Blake2b.hash_bytes(b"x"))
        );
        assert_eq!(index.content_hash(id, HashAlgorithm::Sha256).unwrap(), None);
    }
}
