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

//! Read and write snapshot indexes.
//!
//! An index is one JSON document listing every node, compressed as a Snappy
//! frame stream into `index/<name>.json.sz`. The hash of the compressed file
//! is kept in `index/<name>_hash.json` and checked whenever the index is
//! loaded, so a damaged index is refused rather than misread.

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::attributes::{BackupNodeAttributes, BlockList, NodeAttributes};
use crate::backup_index::BackupNodeIndex;
use crate::compress::{snappy, Compression};
use crate::counters::Counter;
use crate::hash::{HashAlgorithm, HashingReader};
use crate::jsonio::{read_json, write_json};
use crate::monitor::Monitor;
use crate::permissions::Permissions;
use crate::snapshot::SnapshotName;
use crate::unix_time::FromUnixAndNanos;
use crate::{Apath, Error, Kind, Result};

/// Version of the index document layout.
const INDEX_FORMAT: u32 = 1;

const INDEX_SUFFIX: &str = ".json.sz";
const HASH_SUFFIX: &str = "_hash.json";

pub fn index_path(index_dir: &Path, name: &SnapshotName) -> PathBuf {
    index_dir.join(format!("{name}{INDEX_SUFFIX}"))
}

pub fn hash_path(index_dir: &Path, name: &SnapshotName) -> PathBuf {
    index_dir.join(format!("{name}{HASH_SUFFIX}"))
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexDocument {
    format: u32,
    algorithm: HashAlgorithm,
    nodes: Vec<NodeEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeEntry {
    kind: Kind,
    path: Apath,
    /// Seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mtime: Option<i64>,
    #[serde(default, skip_serializing_if = "is_zero")]
    mtime_nanos: u32,
    permissions: Permissions,
    /// Absent for directories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    blocks: Option<BlocksEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    hashes: Vec<HashEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BlocksEntry {
    owned: bool,
    /// Path of the node in the previous snapshot that holds the data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    owner: Option<Apath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    compression: Option<Compression>,
    #[serde(default, skip_serializing_if = "BlockList::is_empty")]
    list: BlockList,
}

#[derive(Debug, Serialize, Deserialize)]
struct HashEntry {
    algorithm: HashAlgorithm,
    value: String,
}

/// Contents of the hash sidecar file.
#[derive(Debug, Serialize, Deserialize)]
struct IndexHash {
    algorithm: HashAlgorithm,
    hash: String,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl NodeEntry {
    fn new(apath: &Apath, attrs: &BackupNodeAttributes) -> NodeEntry {
        let node = &attrs.node;
        let is_dir = node.kind == Kind::Dir;
        NodeEntry {
            kind: node.kind,
            path: apath.clone(),
            mtime: node.mtime.map(OffsetDateTime::unix_timestamp),
            mtime_nanos: node.mtime.map_or(0, OffsetDateTime::nanosecond),
            permissions: node.permissions.clone(),
            size: (!is_dir).then_some(node.size),
            blocks: (!is_dir).then(|| BlocksEntry {
                owned: attrs.owns_blocks,
                owner: attrs.back_reference.clone(),
                compression: attrs.compression,
                list: attrs.blocks.clone(),
            }),
            hashes: attrs
                .hashes
                .iter()
                .map(|(algorithm, value)| HashEntry {
                    algorithm: *algorithm,
                    value: value.clone(),
                })
                .collect(),
        }
    }

    fn into_attributes(self, name: &SnapshotName) -> Result<(Apath, BackupNodeAttributes)> {
        let corrupt = |details: String| Error::IndexCorrupt {
            name: name.to_string(),
            details,
        };
        let mtime = match self.mtime {
            None => None,
            Some(secs) => Some(
                OffsetDateTime::from_unix_seconds_and_nanos(secs, self.mtime_nanos)
                    .ok_or_else(|| corrupt(format!("invalid mtime on {}", self.path)))?,
            ),
        };
        let size = if self.kind == Kind::Dir {
            0
        } else {
            self.size
                .ok_or_else(|| corrupt(format!("no size for {}", self.path)))?
        };
        let node = NodeAttributes {
            kind: self.kind,
            size,
            mtime,
            permissions: self.permissions,
        };
        let mut attrs = BackupNodeAttributes::directory(node);
        attrs.hashes = self
            .hashes
            .into_iter()
            .map(|h| (h.algorithm, h.value))
            .collect();
        if let Some(blocks) = self.blocks {
            attrs.owns_blocks = blocks.owned;
            attrs.back_reference = blocks.owner;
            attrs.compression = blocks.compression;
            attrs.blocks = blocks.list;
        }
        if self.kind != Kind::Dir && !attrs.has_data() && attrs.back_reference.is_none() {
            return Err(corrupt(format!("{} has neither data nor a reference", self.path)));
        }
        Ok((self.path, attrs))
    }
}

/// Write the index of a new snapshot and its hash.
///
/// Fails if an index of that name already exists.
pub fn write_index(
    index_dir: &Path,
    name: &SnapshotName,
    index: &BackupNodeIndex,
    monitor: &dyn Monitor,
) -> Result<()> {
    let path = index_path(index_dir, name);
    if path.exists() {
        return Err(Error::SnapshotExists {
            name: name.to_string(),
        });
    }
    let doc = IndexDocument {
        format: INDEX_FORMAT,
        algorithm: index.algorithm(),
        nodes: index
            .nodes()
            .iter()
            .map(|(_, apath, attrs)| NodeEntry::new(apath, attrs))
            .collect(),
    };
    let json = serde_json::to_vec(&doc).map_err(|source| Error::SerializeIndex {
        name: name.to_string(),
        source,
    })?;
    let write_error = |source: io::Error| Error::WriteIndex {
        name: name.to_string(),
        source,
    };
    let mut encoder = snappy::encoder(Vec::with_capacity(json.len() / 2));
    encoder.write_all(&json).map_err(write_error)?;
    let compressed = snappy::finish(encoder).map_err(write_error)?;
    monitor.count(Counter::IndexWriteUncompressedBytes, json.len());
    monitor.count(Counter::IndexWriteCompressedBytes, compressed.len());

    let write = || -> io::Result<()> {
        let mut file = NamedTempFile::new_in(index_dir)?;
        file.write_all(&compressed)?;
        file.as_file().sync_all()?;
        file.persist_noclobber(&path).map_err(|err| err.error)?;
        Ok(())
    };
    write().map_err(write_error)?;
    let algorithm = index.algorithm();
    write_json(
        &hash_path(index_dir, name),
        &IndexHash {
            algorithm,
            hash: algorithm.hash_bytes(&compressed),
        },
    )?;
    debug!(
        %name,
        nodes = index.len(),
        compressed_bytes = compressed.len(),
        "Wrote index"
    );
    Ok(())
}

/// Load and check the index of a snapshot.
pub fn read_index(index_dir: &Path, name: &SnapshotName) -> Result<BackupNodeIndex> {
    let corrupt = |details: String| Error::IndexCorrupt {
        name: name.to_string(),
        details,
    };
    let expected: IndexHash = read_json(&hash_path(index_dir, name)).map_err(|err| match err {
        Error::ParseJson { source, .. } => corrupt(format!("unreadable hash file: {source}")),
        Error::ReadJson { source, .. } if source.kind() == io::ErrorKind::NotFound => {
            corrupt("hash file is missing".to_owned())
        }
        Error::ReadJson { source, .. } => Error::ReadIndex {
            name: name.to_string(),
            source,
        },
        other => other,
    })?;
    let file = File::open(index_path(index_dir, name)).map_err(|source| Error::ReadIndex {
        name: name.to_string(),
        source,
    })?;
    let mut hashing = HashingReader::new(BufReader::new(file), expected.algorithm);
    let parsed: serde_json::Result<IndexDocument> =
        serde_json::from_reader(BufReader::new(snappy::decoder(&mut hashing)));
    // Hash whatever the parser didn't need, so a damaged tail is also noticed.
    let drained = io::copy(&mut hashing, &mut io::sink());
    let (actual, _len) = hashing.finish();
    if actual != expected.hash {
        return Err(corrupt(format!(
            "{} hash is {actual} but expected {}",
            expected.algorithm, expected.hash
        )));
    }
    drained.map_err(|source| Error::ReadIndex {
        name: name.to_string(),
        source,
    })?;
    let doc = parsed.map_err(|err| corrupt(format!("failed to parse: {err}")))?;
    if doc.format != INDEX_FORMAT {
        return Err(corrupt(format!("unsupported format {}", doc.format)));
    }
    let mut index = BackupNodeIndex::new(doc.algorithm);
    for entry in doc.nodes {
        let (apath, attrs) = entry.into_attributes(name)?;
        index.add_node(apath, attrs).map_err(|err| match err {
            Error::DuplicatePath { apath } => corrupt(format!("duplicate path {apath}")),
            other => other,
        })?;
    }
    index.build_hash_lookup();
    debug!(%name, nodes = index.len(), "Loaded index");
    Ok(index)
}

/// Names of all snapshots with an index in the directory, oldest first.
///
/// Files that don't look like an index are ignored.
pub fn list_indexes(index_dir: &Path) -> Result<Vec<SnapshotName>> {
    let list_error = |source| Error::ListDirectory {
        path: index_dir.to_owned(),
        source,
    };
    let mut names = Vec::new();
    for entry in fs::read_dir(index_dir).map_err(list_error)? {
        let entry = entry.map_err(list_error)?;
        let file_name = entry.file_name();
        let Some(stem) = file_name
            .to_str()
            .and_then(|n| n.strip_suffix(INDEX_SUFFIX))
        else {
            continue;
        };
        match stem.parse::<SnapshotName>() {
            Ok(name) => names.push(name),
            Err(_) => warn!(?file_name, "Ignoring unexpected file in index directory"),
        }
    }
    names.sort_unstable();
    Ok(names)
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;
    use crate::attributes::Block;
    use crate::compress::CompressionKind;
    use crate::monitor::test::TestMonitor;
    use crate::owner::Owner;
    use crate::unix_mode::UnixMode;

    fn name() -> SnapshotName {
        "2024-03-01T10-20-30Z".parse().unwrap()
    }

    fn node(kind: Kind, size: u64) -> NodeAttributes {
        NodeAttributes {
            kind,
            size,
            mtime: OffsetDateTime::from_unix_seconds_and_nanos(1_700_000_000, 123_000),
            permissions: Permissions::posix(
                Owner {
                    user: Some("alice".into()),
                    group: None,
                },
                UnixMode::new(0o640),
            ),
        }
    }

    fn sample_index() -> BackupNodeIndex {
        let mut index = BackupNodeIndex::new(HashAlgorithm::Blake2b);
        index
            .add_node(Apath::root(), BackupNodeAttributes::directory(node(Kind::Dir, 0)))
            .unwrap();
        let data = BackupNodeAttributes::stored(
            node(Kind::File, 10),
            HashAlgorithm::Blake2b,
            "abcd".into(),
            BlockList::from_iter([
                Block {
                    volume: 0,
                    offset: 0,
                    size: 4,
                },
                Block {
                    volume: 2,
                    offset: 7,
                    size: 3,
                },
            ]),
            Some(Compression {
                kind: CompressionKind::Zstd,
                level: 3,
            }),
        );
        let moved = BackupNodeAttributes::referencing(node(Kind::File, 10), &"/old".into(), &data);
        index.add_node("/data".into(), data).unwrap();
        index.add_node("/moved".into(), moved).unwrap();
        let mut empty = BackupNodeAttributes::directory(node(Kind::File, 0));
        empty.node.mtime = None;
        index.add_node("/empty".into(), empty).unwrap();
        index.build_hash_lookup();
        index
    }

    fn assert_same(a: &BackupNodeIndex, b: &BackupNodeIndex) {
        let a: Vec<_> = a.nodes().iter().collect();
        let b: Vec<_> = b.nodes().iter().collect();
        assert_eq!(a.len(), b.len());
        for ((_, pa, aa), (_, pb, ab)) in a.into_iter().zip(b) {
            assert_eq!(pa, pb);
            assert_eq!(aa, ab);
        }
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = TestMonitor::arc();
        let index = sample_index();
        write_index(dir.path(), &name(), &index, monitor.as_ref()).unwrap();
        assert!(monitor.get_counter(Counter::IndexWriteCompressedBytes) > 0);

        let loaded = read_index(dir.path(), &name()).unwrap();
        assert_same(&index, &loaded);
        assert_eq!(loaded.algorithm(), HashAlgorithm::Blake2b);
        assert_eq!(
            loaded.find_by_hash(Kind::File, "abcd"),
            loaded.nodes().id_of(&"/data".into())
        );
        assert_eq!(list_indexes(dir.path()).unwrap(), [name()]);
    }

    #[test]
    fn refuse_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = TestMonitor::arc();
        write_index(dir.path(), &name(), &sample_index(), monitor.as_ref()).unwrap();
        let err = write_index(dir.path(), &name(), &sample_index(), monitor.as_ref()).unwrap_err();
        assert!(matches!(err, Error::SnapshotExists { .. }));
    }

    #[test]
    fn damaged_index_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        write_index(dir.path(), &name(), &sample_index(), TestMonitor::arc().as_ref()).unwrap();
        let path = index_path(dir.path(), &name());
        let mut bytes = fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x01;
        fs::write(&path, bytes).unwrap();
        let err = read_index(dir.path(), &name()).unwrap_err();
        assert!(matches!(err, Error::IndexCorrupt { .. }), "{err:?}");
    }

    #[test]
    fn missing_hash_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        write_index(dir.path(), &name(), &sample_index(), TestMonitor::arc().as_ref()).unwrap();
        fs::remove_file(hash_path(dir.path(), &name())).unwrap();
        let err = read_index(dir.path(), &name()).unwrap_err();
        assert!(matches!(err, Error::IndexCorrupt { .. }), "{err:?}");
    }

    #[test]
    fn nodes_without_data_are_corrupt() {
        let entry = NodeEntry {
            kind: Kind::File,
            path: "/lost".into(),
            mtime: None,
            mtime_nanos: 0,
            permissions: Permissions::default(),
            size: Some(5),
            blocks: None,
            hashes: Vec::new(),
        };
        let err = entry.into_attributes(&name()).unwrap_err();
        assert!(matches!(err, Error::IndexCorrupt { .. }));
    }

    #[test]
    fn list_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "hi").unwrap();
        fs::write(dir.path().join("garbage.json.sz"), "").unwrap();
        fs::write(dir.path().join("2024-01-02T03-04-05Z.json.sz"), "").unwrap();
        fs::write(dir.path().join("2023-01-02T03-04-05Z.json.sz"), "").unwrap();
        let names: Vec<String> = list_indexes(dir.path())
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(names, ["2023-01-02T03-04-05Z", "2024-01-02T03-04-05Z"]);
    }

    proptest! {
        #[test]
        fn arbitrary_files_survive_serialization(
            files in prop::collection::btree_map("[a-z]{1,8}", (0u64..100_000, 0u64..4, any::<bool>()), 1..20)
        ) {
            let mut index = BackupNodeIndex::new(HashAlgorithm::Sha256);
            index.add_node(Apath::root(), BackupNodeAttributes::directory(node(Kind::Dir, 0))).unwrap();
            let mut expected_sizes = BTreeMap::new();
            for (name, (size, volume, owned)) in &files {
                let apath = Apath::root().append(name);
                let attrs = if *owned || *size == 0 {
                    BackupNodeAttributes::stored(
                        node(Kind::File, *size),
                        HashAlgorithm::Sha256,
                        format!("{name}{size}"),
                        BlockList::from_iter([Block { volume: *volume, offset: *size, size: *size }]),
                        None,
                    )
                } else {
                    let old = BackupNodeAttributes::directory(node(Kind::File, *size));
                    BackupNodeAttributes::referencing(node(Kind::File, *size), &apath, &old)
                };
                expected_sizes.insert(apath.clone(), *size);
                index.add_node(apath, attrs).unwrap();
            }
            let dir = tempfile::tempdir().unwrap();
            write_index(dir.path(), &name(), &index, TestMonitor::arc().as_ref()).unwrap();
            let loaded = read_index(dir.path(), &name()).unwrap();
            prop_assert_eq!(loaded.len(), files.len() + 1);
            for (apath, size) in expected_sizes {
                let id = loaded.nodes().id_of(&apath).unwrap();
                prop_assert_eq!(loaded.nodes().node(id).size, size);
            }
            prop_assert_eq!(index.nodes().compute_total_size(), loaded.nodes().compute_total_size());
        }
    }
}
