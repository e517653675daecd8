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

//! An in-memory index of the nodes of a tree, addressable by id or path.
//!
//! An index is built once, by scanning a directory or loading a snapshot, and
//! is read-only afterwards, so it can be shared between worker threads.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use crate::attributes::NodeAttributes;
use crate::hash::HashAlgorithm;
use crate::{Apath, Error, Result};

/// Identifies a node within one index.
pub type NodeId = u32;

#[derive(Debug, Clone)]
pub struct NodeIndex<A> {
    paths: Vec<Apath>,
    ids: BTreeMap<Apath, NodeId>,
    attrs: Vec<A>,
    /// Children of each directory, by the directory's path.
    children: HashMap<Apath, Vec<NodeId>>,
}

impl<A> Default for NodeIndex<A> {
    fn default() -> Self {
        NodeIndex {
            paths: Vec::new(),
            ids: BTreeMap::new(),
            attrs: Vec::new(),
            children: HashMap::new(),
        }
    }
}

impl<A> NodeIndex<A> {
    pub fn new() -> NodeIndex<A> {
        NodeIndex::default()
    }

    /// Add a node, returning its new id.
    pub fn add_node(&mut self, apath: Apath, attrs: A) -> Result<NodeId> {
        if self.ids.contains_key(&apath) {
            return Err(Error::DuplicatePath { apath });
        }
        let id = NodeId::try_from(self.paths.len()).map_err(|_| Error::IndexFull)?;
        if let Some(parent) = apath.parent() {
            self.children.entry(parent).or_default().push(id);
        }
        self.ids.insert(apath.clone(), id);
        self.paths.push(apath);
        self.attrs.push(attrs);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Panics if the id is not from this index.
    pub fn path(&self, id: NodeId) -> &Apath {
        &self.paths[id as usize]
    }

    /// Panics if the id is not from this index.
    pub fn attributes(&self, id: NodeId) -> &A {
        &self.attrs[id as usize]
    }

    pub fn id_of(&self, apath: &Apath) -> Option<NodeId> {
        self.ids.get(apath).copied()
    }

    pub fn contains(&self, apath: &Apath) -> bool {
        self.ids.contains_key(apath)
    }

    /// Direct children of a directory, in the order they were added.
    pub fn children_of(&self, dir: NodeId) -> &[NodeId] {
        self.children
            .get(self.path(dir))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// All ids, in the order they were added.
    pub fn ids(&self) -> Range<NodeId> {
        // Ids are dense and add_node refuses to exceed NodeId::MAX.
        0..(self.paths.len() as NodeId)
    }

    /// Nodes in apath order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Apath, &A)> {
        self.ids
            .iter()
            .map(|(apath, &id)| (id, apath, &self.attrs[id as usize]))
    }
}

impl<A: AsRef<NodeAttributes>> NodeIndex<A> {
    /// Total size of all files and symlinks.
    pub fn compute_total_size(&self) -> u64 {
        self.attrs
            .iter()
            .map(AsRef::as_ref)
            .filter(|a| !a.kind.is_dir())
            .map(|a| a.size)
            .sum()
    }

    /// Total size of the files and symlinks among some nodes.
    pub fn compute_total_size_of<'a, I>(&self, subset: I) -> u64
    where
        I: IntoIterator<Item = &'a NodeId>,
    {
        subset
            .into_iter()
            .map(|&id| self.attributes(id).as_ref())
            .filter(|a| !a.kind.is_dir())
            .map(|a| a.size)
            .sum()
    }

    pub fn node(&self, id: NodeId) -> &NodeAttributes {
        self.attributes(id).as_ref()
    }
}

/// An index whose nodes' content hashes can be found.
///
/// A live tree computes hashes by reading files, and caches them; a snapshot
/// returns the hashes it recorded.
pub trait ContentHashSource: Sync {
    type Attributes: AsRef<NodeAttributes> + Sync;

    fn nodes(&self) -> &NodeIndex<Self::Attributes>;

    /// The hash, if it's known without reading any content.
    fn known_hash(&self, id: NodeId, algorithm: HashAlgorithm) -> Option<&str>;

    /// Compute or retrieve the hash of a node's content.
    ///
    /// Returns None for directories, and for stored nodes that have no hash
    /// for this algorithm.
    fn content_hash(&self, id: NodeId, algorithm: HashAlgorithm) -> Result<Option<String>>;
}
