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

//! Index a "live" on-disk tree as the source of a snapshot.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{Cursor, ErrorKind, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use tracing::{debug, trace, warn};

use crate::attributes::{LiveAttributes, NodeAttributes};
use crate::counters::Counter;
use crate::excludes::IgnoreFilter;
use crate::hash::{hash_stream, HashAlgorithm};
use crate::monitor::Monitor;
use crate::node_index::{ContentHashSource, NodeId, NodeIndex};
use crate::{Apath, Error, Kind, Result};

/// A snapshot of the metadata of a real directory tree.
///
/// Content hashes of files are computed when first asked for, and then
/// remembered.
#[derive(Debug)]
pub struct OsDirectoryIndex {
    root: PathBuf,
    index: NodeIndex<LiveAttributes>,
    algorithm: HashAlgorithm,
    hashes: Vec<OnceLock<String>>,
}

impl OsDirectoryIndex {
    /// Scan everything below `root` that's not ignored by the filter.
    ///
    /// Children of a directory are visited in name order before descending
    /// into its subdirectories. Entries that can't be read are logged and
    /// skipped. A symlink whose target points outside the tree aborts the scan.
    pub fn scan(
        root: &Path,
        filter: &dyn IgnoreFilter,
        algorithm: HashAlgorithm,
        monitor: &dyn Monitor,
    ) -> Result<OsDirectoryIndex> {
        let root_metadata = fs::metadata(root).map_err(|source| Error::ReadMetadata {
            path: root.to_owned(),
            source,
        })?;
        if !root_metadata.is_dir() {
            return Err(Error::SourceNotADirectory {
                path: root.to_owned(),
            });
        }
        let task = monitor.start_task(format!("Scan {}", root.display()));
        let mut index = NodeIndex::new();
        index.add_node(
            Apath::root(),
            LiveAttributes {
                node: NodeAttributes::from_metadata(Kind::Dir, &root_metadata, 0),
                symlink_target: None,
            },
        )?;
        monitor.count(Counter::Dirs, 1);
        let mut dir_deque: VecDeque<Apath> = [Apath::root()].into();
        while let Some(dir_apath) = dir_deque.pop_front() {
            let children = read_children(root, &dir_apath, filter, monitor)?;
            let mut subdir_apaths = Vec::new();
            for (apath, attrs) in children {
                task.inc_file_count();
                if attrs.node.kind == Kind::Dir {
                    subdir_apaths.push(apath.clone());
                }
                index.add_node(apath, attrs)?;
            }
            // Visit the new subdirectories, in order, before any that were
            // already pending.
            for apath in subdir_apaths.into_iter().rev() {
                dir_deque.push_front(apath);
            }
        }
        let hashes: Vec<OnceLock<String>> = index
            .ids()
            .map(|id| {
                let cell = OnceLock::new();
                if let Some(target) = &index.attributes(id).symlink_target {
                    let _ = cell.set(algorithm.hash_bytes(target.as_bytes()));
                }
                cell
            })
            .collect();
        task.finished();
        debug!(root = ?root, nodes = index.len(), "Scanned source tree");
        Ok(OsDirectoryIndex {
            root: root.to_owned(),
            index,
            algorithm,
            hashes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The primary hash algorithm, whose hashes are cached.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn index(&self) -> &NodeIndex<LiveAttributes> {
        &self.index
    }

    /// Location of a node on the filesystem.
    pub fn source_path(&self, id: NodeId) -> PathBuf {
        self.index.path(id).below(&self.root)
    }

    pub fn symlink_target(&self, id: NodeId) -> Option<&str> {
        self.index.attributes(id).symlink_target.as_deref()
    }

    /// Record a hash computed while the content was read for some other
    /// purpose, such as storing it.
    pub fn remember_hash(&self, id: NodeId, algorithm: HashAlgorithm, hash: &str) {
        if algorithm == self.algorithm {
            let _ = self.hashes[id as usize].set(hash.to_owned());
        }
    }

    /// Open the content of a file, or the target of a symlink as bytes.
    pub fn open_source(&self, id: NodeId) -> Result<Box<dyn Read + Send>> {
        match self.index.node(id).kind {
            Kind::File => {
                let path = self.source_path(id);
                let file =
                    File::open(&path).map_err(|source| Error::ReadSourceFile { path, source })?;
                Ok(Box::new(file))
            }
            Kind::Symlink => {
                let target = self.symlink_target(id).unwrap_or_default().to_owned();
                Ok(Box::new(Cursor::new(target.into_bytes())))
            }
            Kind::Dir => Ok(Box::new(std::io::empty())),
        }
    }
}

impl ContentHashSource for OsDirectoryIndex {
    type Attributes = LiveAttributes;

    fn nodes(&self) -> &NodeIndex<LiveAttributes> {
        &self.index
    }

    fn known_hash(&self, id: NodeId, algorithm: HashAlgorithm) -> Option<&str> {
        if algorithm == self.algorithm {
            self.hashes[id as usize].get().map(String::as_str)
        } else {
            None
        }
    }

    fn content_hash(&self, id: NodeId, algorithm: HashAlgorithm) -> Result<Option<String>> {
        if let Some(hash) = self.known_hash(id, algorithm) {
            return Ok(Some(hash.to_owned()));
        }
        let hash = match self.index.node(id).kind {
            Kind::Dir => return Ok(None),
            Kind::Symlink => {
                algorithm.hash_bytes(self.symlink_target(id).unwrap_or_default().as_bytes())
            }
            Kind::File => {
                let path = self.source_path(id);
                trace!(?path, "Hash source file");
                let file = File::open(&path).map_err(|source| Error::ReadSourceFile {
                    path: path.clone(),
                    source,
                })?;
                hash_stream(file, algorithm)
                    .map_err(|source| Error::ReadSourceFile { path, source })?
                    .0
            }
        };
        self.remember_hash(id, algorithm, &hash);
        Ok(Some(hash))
    }
}

/// Read the indexable children of one directory, sorted by name.
///
/// Only a symlink escaping the tree is returned as an error; other problems
/// are reported to the monitor and the entry is skipped.
fn read_children(
    root: &Path,
    dir_apath: &Apath,
    filter: &dyn IgnoreFilter,
    monitor: &dyn Monitor,
) -> Result<Vec<(Apath, LiveAttributes)>> {
    let dir_path = dir_apath.below(root);
    let dir_iter = match fs::read_dir(&dir_path) {
        Ok(i) => i,
        Err(source) => {
            warn!("Error reading directory {dir_path:?}: {source}");
            monitor.error(Error::ListDirectory {
                path: dir_path,
                source,
            });
            return Ok(Vec::new());
        }
    };
    let mut children = Vec::new();
    for dir_entry in dir_iter {
        let dir_entry = match dir_entry {
            Ok(dir_entry) => dir_entry,
            Err(source) => {
                warn!("Error reading next entry from directory {dir_path:?}: {source}");
                monitor.error(Error::ListDirectory {
                    path: dir_path.clone(),
                    source,
                });
                continue;
            }
        };
        let child_osstr = dir_entry.file_name();
        let Some(child_name) = child_osstr.to_str() else {
            warn!("Couldn't decode filename {child_osstr:?} in {dir_path:?}");
            continue;
        };
        let child_apath = dir_apath.append(child_name);
        let child_path = dir_entry.path();
        let metadata = match fs::symlink_metadata(&child_path) {
            Ok(metadata) => metadata,
            Err(source) if source.kind() == ErrorKind::NotFound => {
                debug!("File disappeared during scan: {child_apath}");
                continue;
            }
            Err(source) => {
                warn!("Failed to read source metadata from {child_apath}: {source}");
                monitor.error(Error::ReadMetadata {
                    path: child_path,
                    source,
                });
                continue;
            }
        };
        let Some(kind) = Kind::from_file_type(metadata.file_type()) else {
            debug!("Skip special file {child_apath}");
            continue;
        };
        if filter.ignore(&child_apath, kind, &child_path) {
            trace!("Exclude {child_apath}");
            monitor.count(Counter::Excluded, 1);
            continue;
        }
        let symlink_target = if kind == Kind::Symlink {
            let target = match fs::read_link(&child_path) {
                Ok(t) => t,
                Err(source) => {
                    warn!("Failed to read target of symlink {child_apath}: {source}");
                    monitor.error(Error::ReadMetadata {
                        path: child_path,
                        source,
                    });
                    continue;
                }
            };
            let Ok(target) = target.into_os_string().into_string() else {
                warn!("Couldn't decode target of symlink {child_apath}");
                continue;
            };
            if symlink_escapes(root, &child_apath, &target) {
                return Err(Error::SymlinkEscapesRoot {
                    apath: child_apath,
                    target,
                });
            }
            Some(target)
        } else {
            None
        };
        match kind {
            Kind::File => {
                monitor.count(Counter::Files, 1);
                monitor.count(Counter::FileBytes, metadata.len() as usize);
            }
            Kind::Dir => monitor.count(Counter::Dirs, 1),
            Kind::Symlink => monitor.count(Counter::Symlinks, 1),
        }
        let symlink_len = symlink_target.as_ref().map_or(0, |t| t.len() as u64);
        children.push((
            child_apath,
            LiveAttributes {
                node: NodeAttributes::from_metadata(kind, &metadata, symlink_len),
                symlink_target,
            },
        ));
    }
    children.sort_unstable_by(|a, b| a.0.file_name().cmp(b.0.file_name()));
    Ok(children)
}

/// True if a symlink at `link` with this target would point outside the tree.
///
/// Relative targets are resolved lexically from the link's directory.
/// Absolute targets must be within the root.
fn symlink_escapes(root: &Path, link: &Apath, target: &str) -> bool {
    let target_path = Path::new(target);
    if target_path.is_absolute() {
        let canonical_root = root.canonicalize().unwrap_or_else(|_| root.to_owned());
        return !(target_path.starts_with(root) || target_path.starts_with(canonical_root));
    }
    let mut depth = link.depth().saturating_sub(1);
    for component in target_path.components() {
        match component {
            Component::ParentDir => {
                if depth == 0 {
                    return true;
                }
                depth -= 1;
            }
            Component::Normal(_) => depth += 1,
            _ => (),
        }
    }
    false
}
