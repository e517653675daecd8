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

//! Restore a snapshot into an empty directory.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use filetime::{set_file_handle_times, set_symlink_file_times};
use rayon::prelude::*;
use tracing::{info, instrument, trace, warn};

use crate::attributes::NodeAttributes;
use crate::chain::SnapshotChain;
use crate::context::BackupContext;
use crate::counters::Counter;
use crate::monitor::Monitor;
use crate::node_index::NodeId;
use crate::unix_time::ToFileTime;
use crate::verify::NodeFailure;
use crate::{Error, Kind, Result};

/// Restore the snapshot at `pos` into `destination`, which must be empty or
/// not yet exist.
///
/// Content is verified against its hashes as it's written. Nodes that can't
/// be restored are returned; failing to create the directory structure stops
/// the restore.
#[instrument(skip(ctx, chain))]
pub fn restore_snapshot(
    ctx: &BackupContext,
    chain: &SnapshotChain,
    pos: usize,
    destination: &Path,
) -> Result<Vec<NodeFailure>> {
    prepare_destination(destination)?;
    let snapshot = chain.get(pos);
    let nodes = snapshot.index().nodes();
    let monitor = ctx.monitor();

    // Ids in path order put every directory before its contents.
    let mut dirs: Vec<DirDeferral> = Vec::new();
    let mut contents: Vec<NodeId> = Vec::new();
    for (id, apath, attrs) in nodes.iter() {
        if attrs.kind() != Kind::Dir {
            contents.push(id);
            continue;
        }
        let path = apath.below(destination);
        if !apath.is_root() {
            fs::create_dir(&path).map_err(|source| Error::CreateDirectory {
                path: path.clone(),
                source,
            })?;
        }
        dirs.push(DirDeferral {
            path,
            depth: apath.depth(),
            node: attrs.node.clone(),
        });
    }

    let task = monitor.start_task(format!("Restore {}", snapshot.name()));
    task.set_totals(contents.len(), nodes.compute_total_size_of(&contents));
    let mut failures: Vec<NodeFailure> = ctx.install(|| {
        contents
            .par_iter()
            .filter_map(|&id| {
                task.inc_file_count();
                let apath = nodes.path(id);
                let path = apath.below(destination);
                let node = nodes.node(id);
                let result = match node.kind {
                    Kind::Symlink => restore_symlink(chain, pos, id, &path, node),
                    _ => restore_file(chain, pos, id, &path, node),
                };
                task.inc_finished_count();
                match result {
                    Ok(()) => {
                        task.add_finished_size(node.size);
                        monitor.count(Counter::NodesRestored, 1);
                        monitor.count(Counter::RestoredBytes, node.size as usize);
                        None
                    }
                    Err(error) => {
                        warn!(%apath, "Failed to restore: {error}");
                        Some(NodeFailure {
                            id,
                            apath: apath.clone(),
                            error,
                        })
                    }
                }
            })
            .collect()
    });
    task.finished();

    // Deepest first, so that setting a directory's mtime isn't undone by
    // changes to its children, and so read-only directories come last.
    dirs.sort_by(|a, b| b.depth.cmp(&a.depth));
    for dir in &dirs {
        dir.apply(monitor);
    }
    monitor.count(Counter::NodesRestored, dirs.len());
    failures.sort_by_key(|failure| failure.id);
    info!(
        snapshot = %snapshot.name(),
        destination = ?destination,
        nodes = nodes.len(),
        failures = failures.len(),
        "Restored snapshot"
    );
    Ok(failures)
}

fn prepare_destination(destination: &Path) -> Result<()> {
    match fs::read_dir(destination) {
        Ok(mut entries) => {
            if entries.next().is_some() {
                return Err(Error::DestinationNotEmpty {
                    path: destination.to_owned(),
                });
            }
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(destination).map_err(|source| Error::CreateDirectory {
                path: destination.to_owned(),
                source,
            })
        }
        Err(source) => Err(Error::ListDirectory {
            path: destination.to_owned(),
            source,
        }),
    }
}

/// Changes to apply to directories after all their contents have been
/// written.
struct DirDeferral {
    path: PathBuf,
    depth: usize,
    node: NodeAttributes,
}

impl DirDeferral {
    fn apply(&self, monitor: &dyn Monitor) {
        if let Err(err) = self.node.permissions.apply_owner(&self.path) {
            monitor.error(err);
        }
        if let Err(err) = self.node.permissions.apply_mode(&self.path) {
            monitor.error(err);
        }
        if let Some(mtime) = self.node.mtime {
            if let Err(source) = filetime::set_file_mtime(&self.path, mtime.to_file_time()) {
                monitor.error(Error::RestoreModificationTime {
                    path: self.path.clone(),
                    source,
                });
            }
        }
    }
}

/// Write one file from the snapshot, verifying its content.
fn restore_file(
    chain: &SnapshotChain,
    pos: usize,
    id: NodeId,
    path: &Path,
    node: &NodeAttributes,
) -> Result<()> {
    let apath = chain.get(pos).index().nodes().path(id);
    let restore_error = |source| Error::RestoreFile {
        path: path.to_owned(),
        source,
    };
    let mut out = File::create(path).map_err(restore_error)?;
    let mut reader = chain.open_content(pos, id, true)?;
    let mut buf = vec![0; 1 << 16];
    let mut written = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(Error::from_content_io(apath, err)),
        };
        out.write_all(&buf[..n]).map_err(restore_error)?;
        written += n as u64;
    }
    out.flush().map_err(restore_error)?;
    if written != node.size {
        return Err(Error::StreamPipingFailed {
            apath: apath.clone(),
            expected: node.size,
            actual: written,
        });
    }
    if let Some(mtime) = node.mtime {
        let mtime = Some(mtime.to_file_time());
        set_file_handle_times(&out, mtime, mtime).map_err(|source| {
            Error::RestoreModificationTime {
                path: path.to_owned(),
                source,
            }
        })?;
    }
    drop(out);
    node.permissions.apply_owner(path)?;
    node.permissions.apply_mode(path)?;
    trace!(%apath, "Restored file");
    Ok(())
}

#[cfg(unix)]
fn restore_symlink(
    chain: &SnapshotChain,
    pos: usize,
    id: NodeId,
    path: &Path,
    node: &NodeAttributes,
) -> Result<()> {
    use std::os::unix::fs as unix_fs;

    let symlink_error = |source| Error::RestoreSymlink {
        path: path.to_owned(),
        source,
    };
    let target = String::from_utf8(chain.read_content(pos, id, true)?)
        .map_err(|err| symlink_error(io::Error::new(io::ErrorKind::InvalidData, err)))?;
    unix_fs::symlink(&target, path).map_err(symlink_error)?;
    node.permissions.apply_owner(path)?;
    if let Some(mtime) = node.mtime {
        let mtime = mtime.to_file_time();
        set_symlink_file_times(path, mtime, mtime).map_err(|source| {
            Error::RestoreModificationTime {
                path: path.to_owned(),
                source,
            }
        })?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn restore_symlink(
    chain: &SnapshotChain,
    pos: usize,
    id: NodeId,
    _path: &Path,
    _node: &NodeAttributes,
) -> Result<()> {
    warn!(
        "Can't restore symlinks on non-Unix: {}",
        chain.get(pos).index().nodes().path(id)
    );
    Ok(())
}
