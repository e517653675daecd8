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

//! Find the differences between a snapshot and a newer tree.
//!
//! The left side is a stored snapshot (or an empty one); the right side is
//! anything whose content hashes can be found, usually a live tree. Every
//! right node that isn't identical to the left node at the same path is
//! classified by looking up its content hash: the same content at the same
//! path means only metadata changed, the same content elsewhere means it
//! moved, and otherwise the data is new.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::attributes::attributes_match;
use crate::backup_index::BackupNodeIndex;
use crate::context::BackupContext;
use crate::counters::Counter;
use crate::node_index::{ContentHashSource, NodeId};
use crate::{Apath, Kind};

/// How the nodes of a right index differ from a left index.
///
/// `deleted` holds left ids; the other sets hold right ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeIndexDifferences {
    pub deleted: BTreeSet<NodeId>,
    pub different_data: BTreeSet<NodeId>,
    pub different_metadata: BTreeSet<NodeId>,
    /// Right id to the left id with the same content at another path.
    pub moved: BTreeMap<NodeId, NodeId>,
}

/// Counts of each kind of difference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub deleted: usize,
    pub different_data: usize,
    pub different_metadata: usize,
    pub moved: usize,
}

impl fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} new or changed, {} metadata only, {} moved, {} deleted",
            self.different_data, self.different_metadata, self.moved, self.deleted
        )
    }
}

/// How one path differs, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub apath: Apath,
    pub kind: DiffKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffKind {
    Added,
    Changed,
    Metadata,
    Moved { from: Apath },
    Deleted,
}

impl fmt::Display for DiffEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DiffKind::Added => write!(f, "+ {}", self.apath),
            DiffKind::Changed => write!(f, "* {}", self.apath),
            DiffKind::Metadata => write!(f, "m {}", self.apath),
            DiffKind::Moved { from } => write!(f, "> {} (from {from})", self.apath),
            DiffKind::Deleted => write!(f, "- {}", self.apath),
        }
    }
}

impl NodeIndexDifferences {
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty()
            && self.different_data.is_empty()
            && self.different_metadata.is_empty()
            && self.moved.is_empty()
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            deleted: self.deleted.len(),
            different_data: self.different_data.len(),
            different_metadata: self.different_metadata.len(),
            moved: self.moved.len(),
        }
    }

    /// Describe every difference, sorted by path.
    pub fn entries<R: ContentHashSource>(&self, left: &BackupNodeIndex, right: &R) -> Vec<DiffEntry> {
        let left = left.nodes();
        let right = right.nodes();
        let mut entries = Vec::with_capacity(
            self.deleted.len()
                + self.different_data.len()
                + self.different_metadata.len()
                + self.moved.len(),
        );
        for &id in &self.deleted {
            entries.push(DiffEntry {
                apath: left.path(id).clone(),
                kind: DiffKind::Deleted,
            });
        }
        for &id in &self.different_data {
            let apath = right.path(id);
            let kind = if left.contains(apath) {
                DiffKind::Changed
            } else {
                DiffKind::Added
            };
            entries.push(DiffEntry {
                apath: apath.clone(),
                kind,
            });
        }
        for &id in &self.different_metadata {
            entries.push(DiffEntry {
                apath: right.path(id).clone(),
                kind: DiffKind::Metadata,
            });
        }
        for (&right_id, &left_id) in &self.moved {
            entries.push(DiffEntry {
                apath: right.path(right_id).clone(),
                kind: DiffKind::Moved {
                    from: left.path(left_id).clone(),
                },
            });
        }
        entries.sort_by(|a, b| a.apath.cmp(&b.apath));
        entries
    }
}

/// How a right node that isn't identical to the left differs.
enum Classification {
    Data,
    Metadata,
    Moved(NodeId),
}

/// Classify every node of `right` against `left`.
///
/// Hashes are compared in the left index's primary algorithm. A right node
/// whose hash can't be computed is logged and classified as new data, so
/// that the error is met again, and reported, when it's stored.
pub fn resolve_differences<R: ContentHashSource>(
    ctx: &BackupContext,
    left: &BackupNodeIndex,
    right: &R,
) -> NodeIndexDifferences {
    let left_nodes = left.nodes();
    let right_nodes = right.nodes();

    let (mut deleted, right_to_left) = ctx.install(|| {
        rayon::join(
            || {
                left_nodes
                    .ids()
                    .into_par_iter()
                    .filter(|&lid| !right_nodes.contains(left_nodes.path(lid)))
                    .collect::<BTreeSet<NodeId>>()
            },
            || {
                right_nodes
                    .ids()
                    .into_par_iter()
                    .filter(|&rid| match left_nodes.id_of(right_nodes.path(rid)) {
                        None => true,
                        Some(lid) => !same_node(left, lid, right, rid),
                    })
                    .collect::<Vec<NodeId>>()
            },
        )
    });

    let classified: Vec<(NodeId, Classification)> = ctx.install(|| {
        right_to_left
            .into_par_iter()
            .map(|rid| (rid, classify(left, right, rid)))
            .collect()
    });

    let mut differences = NodeIndexDifferences::default();
    for (rid, classification) in classified {
        match classification {
            Classification::Data => {
                differences.different_data.insert(rid);
            }
            Classification::Metadata => {
                differences.different_metadata.insert(rid);
            }
            Classification::Moved(lid) => {
                differences.moved.insert(rid, lid);
            }
        }
    }
    for lid in differences.moved.values() {
        deleted.remove(lid);
    }
    differences.deleted = deleted;

    let monitor = ctx.monitor();
    let summary = differences.summary();
    monitor.count(Counter::NodesDifferentData, summary.different_data);
    monitor.count(Counter::NodesDifferentMetadata, summary.different_metadata);
    monitor.count(Counter::NodesMoved, summary.moved);
    monitor.count(Counter::NodesDeleted, summary.deleted);
    monitor.count(
        Counter::NodesUnchanged,
        right_nodes.len() - summary.different_data - summary.different_metadata - summary.moved,
    );
    debug!(%summary, "Resolved differences");
    differences
}

/// True if the right node has the same metadata and content as the left.
///
/// When the left node records a hash, the right node's content is hashed
/// too, so a rewrite that keeps the size and mtime is still seen.
fn same_node<R: ContentHashSource>(
    left: &BackupNodeIndex,
    lid: NodeId,
    right: &R,
    rid: NodeId,
) -> bool {
    let algorithm = left.algorithm();
    let left_node = left.nodes().node(lid);
    let right_node = right.nodes().node(rid);
    if !attributes_match(left_node, None, right_node, None) {
        return false;
    }
    let Some(left_hash) = left.known_hash(lid, algorithm) else {
        return true;
    };
    if right_node.kind == Kind::Dir {
        return true;
    }
    match right.content_hash(rid, algorithm) {
        Ok(Some(right_hash)) => left_hash == right_hash,
        Ok(None) => true,
        Err(err) => {
            debug!("Failed to hash {}: {err}", right.nodes().path(rid));
            false
        }
    }
}

fn classify<R: ContentHashSource>(
    left: &BackupNodeIndex,
    right: &R,
    rid: NodeId,
) -> Classification {
    let right_nodes = right.nodes();
    let apath = right_nodes.path(rid);
    let kind = right_nodes.node(rid).kind;
    if kind == Kind::Dir {
        return Classification::Data;
    }
    let algorithm = left.algorithm();
    let hash = match right.content_hash(rid, algorithm) {
        Ok(Some(hash)) => hash,
        Ok(None) => return Classification::Data,
        Err(err) => {
            warn!("Failed to hash {apath}: {err}");
            return Classification::Data;
        }
    };
    let left_nodes = left.nodes();
    if let Some(lid) = left_nodes.id_of(apath) {
        let old = left_nodes.attributes(lid);
        if old.kind() == kind && old.hash(algorithm) == Some(hash.as_str()) {
            return Classification::Metadata;
        }
    }
    match left.find_by_hash(kind, &hash) {
        Some(lid) if left_nodes.path(lid) == apath => Classification::Metadata,
        Some(lid) => Classification::Moved(lid),
        None => Classification::Data,
    }
}
