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

//! Operations on a whole backup directory: creating it, adding snapshots,
//! and reading them back.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::attributes::BackupNodeAttributes;
use crate::backup_index::BackupNodeIndex;
use crate::chain::SnapshotChain;
use crate::config::{Config, CONFIG_FILENAME};
use crate::context::BackupContext;
use crate::diff::{resolve_differences, DiffEntry, DiffSummary};
use crate::excludes::Exclude;
use crate::hash::{HashAlgorithm, HashingReader};
use crate::index_io::{index_path, write_index};
use crate::monitor::Monitor;
use crate::node_index::NodeId;
use crate::os_index::OsDirectoryIndex;
use crate::protect::{set_writable, write_protect};
use crate::restore::restore_snapshot;
use crate::snapshot::{backup_node, Snapshot, SnapshotName};
use crate::stats::SnapshotStats;
use crate::verify::{verify_snapshot, NodeFailure};
use crate::volume::VolumeStore;
use crate::{Apath, Error, Kind, Result};

/// Options for [SnapshotManager::add_snapshot].
#[derive(Debug, Clone, Default)]
pub struct AddSnapshotOptions {
    /// Name for the new snapshot; by default, the current time.
    pub name: Option<SnapshotName>,
}

/// What happened while adding a snapshot.
#[derive(Debug)]
pub struct AddSnapshotReport {
    pub name: SnapshotName,
    /// Differences from the previous snapshot.
    pub summary: DiffSummary,
    /// Nodes whose data was stored in the new snapshot's volumes.
    pub newly_owned: usize,
    /// Nodes that couldn't be stored, and are missing from the snapshot.
    pub failures: Vec<NodeFailure>,
    /// Nodes that failed when the new snapshot was read back.
    pub verify_failures: Vec<NodeFailure>,
    pub stats: SnapshotStats,
}

impl AddSnapshotReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty() || !self.verify_failures.is_empty()
    }
}

/// A backup directory with its loaded chain of snapshots.
pub struct SnapshotManager {
    ctx: BackupContext,
    chain: SnapshotChain,
}

impl std::fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotManager")
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

impl SnapshotManager {
    /// Create a new, empty backup directory.
    ///
    /// The directory may already exist if it's empty.
    pub fn init(root: &Path, config: Config, monitor: Arc<dyn Monitor>) -> Result<SnapshotManager> {
        config.validate()?;
        if root.join(CONFIG_FILENAME).exists() {
            return Err(Error::BackupDirectoryExists {
                path: root.to_owned(),
            });
        }
        let ctx = BackupContext::new(root, config, monitor)?;
        for dir in [root.to_owned(), ctx.index_dir(), ctx.data_dir()] {
            match fs::create_dir(&dir) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists && dir == root => {}
                Err(source) => return Err(Error::CreateDirectory { path: dir, source }),
            }
        }
        ctx.config().save(root)?;
        info!(root = ?root, source = ?ctx.config().source, "Initialized backup directory");
        Ok(SnapshotManager {
            ctx,
            chain: SnapshotChain::default(),
        })
    }

    /// Open an existing backup directory and load all its snapshots.
    pub fn open(root: &Path, monitor: Arc<dyn Monitor>) -> Result<SnapshotManager> {
        let config = Config::load(root)?;
        let ctx = BackupContext::new(root, config, monitor)?;
        let chain = SnapshotChain::load(&ctx)?;
        Ok(SnapshotManager { ctx, chain })
    }

    pub fn context(&self) -> &BackupContext {
        &self.ctx
    }

    pub fn chain(&self) -> &SnapshotChain {
        &self.chain
    }

    pub fn newest(&self) -> Option<&Snapshot> {
        self.chain.newest()
    }

    pub fn snapshot_by_name(&self, name: &str) -> Result<&Snapshot> {
        self.resolve(Some(name)).map(|pos| self.chain.get(pos))
    }

    /// Find the position of a named snapshot, or of the newest if no name is
    /// given.
    pub fn resolve(&self, name: Option<&str>) -> Result<usize> {
        match name {
            None => self.chain.newest_position().ok_or(Error::NoSnapshots),
            Some(name) => {
                let name: SnapshotName = name.parse()?;
                self.chain
                    .position_of(&name)
                    .ok_or_else(|| Error::SnapshotNotFound {
                        name: name.to_string(),
                    })
            }
        }
    }

    /// Scan the configured source directory.
    pub fn scan_source(&self) -> Result<OsDirectoryIndex> {
        let config = self.ctx.config();
        let exclude = Exclude::from_patterns(&config.exclude)?;
        OsDirectoryIndex::scan(
            &config.source,
            &exclude,
            config.hash_algorithm,
            self.ctx.monitor(),
        )
    }

    /// Scan the source and store a new snapshot of it.
    pub fn add_snapshot(&mut self, options: AddSnapshotOptions) -> Result<AddSnapshotReport> {
        let live = self.scan_source()?;
        self.add_snapshot_of(&live, options)
    }

    /// Store a snapshot of an already-scanned tree.
    ///
    /// Only data that differs from the newest snapshot is stored; everything
    /// else refers back to it. Afterwards the whole chain is reloaded from
    /// disk, compared to `live`, and the new snapshot is fully verified.
    pub fn add_snapshot_of(
        &mut self,
        live: &OsDirectoryIndex,
        options: AddSnapshotOptions,
    ) -> Result<AddSnapshotReport> {
        let name = self.choose_name(options.name)?;
        let ctx = &self.ctx;
        let config = ctx.config();
        let monitor = ctx.monitor();
        info!(%name, source = ?live.root(), "Add snapshot");

        let empty = BackupNodeIndex::new(config.hash_algorithm);
        let left = self.chain.newest().map_or(&empty, Snapshot::index);
        let differences = resolve_differences(ctx, left, live);
        let summary = differences.summary();
        info!(%summary, "Compared with previous snapshot");

        let data_dir = ctx.data_dir();
        set_writable(&data_dir, true)?;
        let volume_dir = data_dir.join(name.as_str());
        let volumes = VolumeStore::create(&volume_dir, config.volume_size, ctx.monitor_arc())?;

        let live_nodes = live.index();
        let to_store: Vec<NodeId> = differences
            .different_data
            .iter()
            .copied()
            .filter(|&id| live_nodes.node(id).kind != Kind::Dir)
            .collect();
        let task = monitor.start_task(format!("Back up {name}"));
        task.set_totals(to_store.len(), live_nodes.compute_total_size_of(&to_store));
        let results: Vec<(NodeId, Result<BackupNodeAttributes>)> = ctx.install(|| {
            to_store
                .par_iter()
                .map(|&id| {
                    task.inc_file_count();
                    let result = backup_node(ctx, &volumes, live, id);
                    task.inc_finished_count();
                    task.add_finished_size(live_nodes.node(id).size);
                    (id, result)
                })
                .collect()
        });
        task.finished();
        volumes.finish()?;

        let mut stored: HashMap<NodeId, BackupNodeAttributes> = HashMap::new();
        let mut failures: Vec<NodeFailure> = Vec::new();
        for (id, result) in results {
            match result {
                Ok(attrs) => {
                    stored.insert(id, attrs);
                }
                Err(error) => {
                    let apath = live_nodes.path(id).clone();
                    warn!(%apath, "Failed to back up: {error}");
                    failures.push(NodeFailure { id, apath, error });
                }
            }
        }
        let failed: BTreeSet<NodeId> = failures.iter().map(|f| f.id).collect();

        let left_nodes = left.nodes();
        let mut index = BackupNodeIndex::new(config.hash_algorithm);
        for (id, apath, attrs) in live_nodes.iter() {
            let node = attrs.node.clone();
            let backup = if node.kind == Kind::Dir {
                BackupNodeAttributes::directory(node)
            } else if let Some(attrs) = stored.remove(&id) {
                attrs
            } else if failed.contains(&id) {
                continue;
            } else if let Some(&old_id) = differences.moved.get(&id) {
                BackupNodeAttributes::referencing(
                    node,
                    left_nodes.path(old_id),
                    left_nodes.attributes(old_id),
                )
            } else if let Some(old_id) = left_nodes.id_of(apath) {
                BackupNodeAttributes::referencing(node, apath, left_nodes.attributes(old_id))
            } else {
                // Nothing stored it and nothing earlier holds it.
                error!(%apath, "Node has no data source");
                failures.push(NodeFailure {
                    id,
                    apath: apath.clone(),
                    error: Error::DataNotFound {
                        apath: apath.clone(),
                    },
                });
                continue;
            };
            index.add_node(apath.clone(), backup)?;
        }
        index.build_hash_lookup();
        let newly_owned = index.count_owned();
        let failed: BTreeSet<NodeId> = failures.iter().map(|f| f.id).collect();
        drop(volumes);

        if config.write_protect {
            write_protect(&volume_dir)?;
            set_writable(&data_dir, false)?;
        }
        let index_dir = ctx.index_dir();
        set_writable(&index_dir, true)?;
        write_index(&index_dir, &name, &index, monitor)?;
        if config.write_protect {
            write_protect(&index_dir)?;
        }
        ctx.save_compression_stats()?;
        debug!(%name, newly_owned, "Wrote snapshot");

        self.chain = SnapshotChain::load(&self.ctx)?;
        let pos = self
            .chain
            .position_of(&name)
            .ok_or_else(|| Error::SnapshotNotFound {
                name: name.to_string(),
            })?;
        self.check_consistent(pos, live, &failed)?;
        let verify_failures = verify_snapshot(&self.ctx, &self.chain, pos, true);
        let stats = SnapshotStats::of(&self.chain, pos)?;
        info!(
            %name,
            newly_owned,
            failures = failures.len(),
            verify_failures = verify_failures.len(),
            "Added snapshot"
        );
        Ok(AddSnapshotReport {
            name,
            summary,
            newly_owned,
            failures,
            verify_failures,
            stats,
        })
    }

    fn choose_name(&self, requested: Option<SnapshotName>) -> Result<SnapshotName> {
        let newest = self.chain.newest().map(Snapshot::name);
        let name = match (requested, newest) {
            (Some(name), _) => name,
            (None, Some(newest)) if *newest >= SnapshotName::now() => {
                newest.successor().ok_or_else(|| Error::InvalidSnapshotName {
                    name: newest.to_string(),
                })?
            }
            (None, _) => SnapshotName::now(),
        };
        if let Some(newest) = newest {
            if *newest == name || index_path(&self.ctx.index_dir(), &name).exists() {
                return Err(Error::SnapshotExists {
                    name: name.to_string(),
                });
            }
            if *newest > name {
                return Err(Error::InvalidSnapshotName {
                    name: name.to_string(),
                });
            }
        }
        Ok(name)
    }

    /// Check that the snapshot read back from disk describes the same tree
    /// that was backed up, apart from nodes that failed.
    fn check_consistent(
        &self,
        pos: usize,
        live: &OsDirectoryIndex,
        failed: &BTreeSet<NodeId>,
    ) -> Result<()> {
        let snapshot = self.chain.get(pos);
        let mut remaining = resolve_differences(&self.ctx, snapshot.index(), live);
        remaining.different_data.retain(|id| !failed.contains(id));
        remaining.different_metadata.retain(|id| !failed.contains(id));
        remaining.moved.retain(|id, _| !failed.contains(id));
        if remaining.is_empty() {
            return Ok(());
        }
        let details = remaining
            .entries(snapshot.index(), live)
            .iter()
            .take(10)
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        error!(name = %snapshot.name(), %details, "Snapshot differs from its source");
        Err(Error::InconsistentSnapshot {
            name: snapshot.name().to_string(),
            details,
        })
    }

    /// Verify one snapshot, by default the newest.
    ///
    /// With `full`, nodes stored in earlier snapshots are read too.
    pub fn verify(&self, snapshot: Option<&str>, full: bool) -> Result<Vec<NodeFailure>> {
        let pos = self.resolve(snapshot)?;
        Ok(verify_snapshot(&self.ctx, &self.chain, pos, full))
    }

    /// Verify the data owned by every snapshot, which together covers
    /// everything in the chain once.
    pub fn verify_all(&self) -> Vec<(SnapshotName, Vec<NodeFailure>)> {
        (0..self.chain.len())
            .map(|pos| {
                (
                    self.chain.get(pos).name().clone(),
                    verify_snapshot(&self.ctx, &self.chain, pos, false),
                )
            })
            .collect()
    }

    pub fn restore(&self, snapshot: Option<&str>, destination: &Path) -> Result<Vec<NodeFailure>> {
        let pos = self.resolve(snapshot)?;
        restore_snapshot(&self.ctx, &self.chain, pos, destination)
    }

    /// Describe how snapshot `dst` differs from `src`, by default the newest.
    pub fn diff_snapshots(&self, src: Option<&str>, dst: &str) -> Result<Vec<DiffEntry>> {
        let left = self.chain.get(self.resolve(src)?).index();
        let right = self.chain.get(self.resolve(Some(dst))?).index();
        Ok(resolve_differences(&self.ctx, left, right).entries(left, right))
    }

    /// Describe how the source tree differs from snapshot `src`, by default
    /// the newest, or from nothing if there are no snapshots.
    pub fn diff_live(&self, src: Option<&str>) -> Result<Vec<DiffEntry>> {
        let live = self.scan_source()?;
        let empty = BackupNodeIndex::new(self.ctx.config().hash_algorithm);
        let left = match (src, self.chain.newest()) {
            (None, None) => &empty,
            _ => self.chain.get(self.resolve(src)?).index(),
        };
        Ok(resolve_differences(&self.ctx, left, &live).entries(left, &live))
    }

    /// Content hashes of every file and symlink in a snapshot.
    ///
    /// Hashes that weren't recorded in this algorithm are computed by reading
    /// the content, which is checked against the recorded hash as it's read.
    pub fn hashes(
        &self,
        snapshot: Option<&str>,
        algorithm: HashAlgorithm,
    ) -> Result<Vec<(Apath, String)>> {
        let pos = self.resolve(snapshot)?;
        let nodes = self.chain.get(pos).index().nodes();
        let ids: Vec<NodeId> = nodes
            .ids()
            .filter(|&id| nodes.node(id).kind != Kind::Dir)
            .collect();
        self.ctx.install(|| {
            ids.par_iter()
                .map(|&id| {
                    let apath = nodes.path(id);
                    let hash = match nodes.attributes(id).hash(algorithm) {
                        Some(hash) => hash.to_owned(),
                        None => {
                            let mut reader = HashingReader::new(
                                self.chain.open_content(pos, id, true)?,
                                algorithm,
                            );
                            io::copy(&mut reader, &mut io::sink())
                                .map_err(|err| Error::from_content_io(apath, err))?;
                            reader.finish().0
                        }
                    };
                    Ok((apath.clone(), hash))
                })
                .collect()
        })
    }

    pub fn stats(&self, snapshot: Option<&str>) -> Result<SnapshotStats> {
        SnapshotStats::of(&self.chain, self.resolve(snapshot)?)
    }

    /// Mounting snapshots as a filesystem isn't supported.
    pub fn mount(&self, snapshot: Option<&str>, mount_point: &Path) -> Result<()> {
        let pos = self.resolve(snapshot)?;
        Err(Error::Unsupported {
            details: format!(
                "can't mount snapshot {} on {}",
                self.chain.get(pos).name(),
                mount_point.display()
            ),
        })
    }
}
