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

//! Check that stored content can be read back and matches its hashes.

use std::fmt;
use std::io;

use rayon::prelude::*;
use tracing::{info, instrument, warn};

use crate::chain::SnapshotChain;
use crate::context::BackupContext;
use crate::counters::Counter;
use crate::node_index::NodeId;
use crate::{Apath, Error, Kind, Result};

/// One node that couldn't be backed up, verified, or restored.
#[derive(Debug)]
pub struct NodeFailure {
    pub id: NodeId,
    pub apath: Apath,
    pub error: Error,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.apath, self.error)
    }
}

/// Read back and check one node of the snapshot at `pos`.
pub fn verify_node(chain: &SnapshotChain, pos: usize, id: NodeId) -> Result<u64> {
    let nodes = chain.get(pos).index().nodes();
    let apath = nodes.path(id);
    let expected = nodes.node(id).size;
    let mut reader = chain.open_content(pos, id, true)?;
    let actual = io::copy(&mut reader, &mut io::sink())
        .map_err(|err| Error::from_content_io(apath, err))?;
    if actual != expected {
        return Err(Error::StreamPipingFailed {
            apath: apath.clone(),
            expected,
            actual,
        });
    }
    Ok(actual)
}

/// Verify the snapshot at `pos`, returning the nodes that failed.
///
/// With `full`, every node is read, following references into older
/// snapshots. Otherwise only nodes whose data this snapshot stores itself
/// are checked.
#[instrument(skip(ctx, chain))]
pub fn verify_snapshot(
    ctx: &BackupContext,
    chain: &SnapshotChain,
    pos: usize,
    full: bool,
) -> Vec<NodeFailure> {
    let snapshot = chain.get(pos);
    let nodes = snapshot.index().nodes();
    let selected: Vec<NodeId> = nodes
        .ids()
        .filter(|&id| {
            let attrs = nodes.attributes(id);
            attrs.kind() != Kind::Dir && (full || attrs.owns_blocks)
        })
        .collect();
    let monitor = ctx.monitor();
    let task = monitor.start_task(format!("Verify {}", snapshot.name()));
    task.set_totals(selected.len(), nodes.compute_total_size_of(&selected));

    let mut failures: Vec<NodeFailure> = ctx.install(|| {
        selected
            .par_iter()
            .filter_map(|&id| {
                task.inc_file_count();
                let result = verify_node(chain, pos, id);
                monitor.count(Counter::NodesVerified, 1);
                task.inc_finished_count();
                match result {
                    Ok(size) => {
                        task.add_finished_size(size);
                        None
                    }
                    Err(error) => {
                        let apath = nodes.path(id).clone();
                        warn!(%apath, "Verification failed: {error}");
                        Some(NodeFailure { id, apath, error })
                    }
                }
            })
            .collect()
    });
    task.finished();
    failures.sort_by_key(|failure| failure.id);
    info!(
        snapshot = %snapshot.name(),
        checked = selected.len(),
        failures = failures.len(),
        "Verified snapshot"
    );
    failures
}
