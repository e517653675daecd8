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

//! A snapshot binds the index of one backup to the volumes holding the data
//! it stored, and knows how to store the data of one node.

use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::str::FromStr;

use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};
use tracing::{instrument, trace};

use crate::attributes::BackupNodeAttributes;
use crate::backup_index::BackupNodeIndex;
use crate::compress::CompressWriter;
use crate::compression_stats::DEFAULT_COMPRESSION_RATE;
use crate::context::BackupContext;
use crate::counters::Counter;
use crate::hash::HashingReader;
use crate::node_index::NodeId;
use crate::os_index::OsDirectoryIndex;
use crate::volume::VolumeStore;
use crate::{Error, Kind, Result};

/// Symlink targets up to this length are stored uncompressed.
const MAX_UNCOMPRESSED_SYMLINK: u64 = 100;

/// Name of a snapshot: the UTC time it was taken, to the second.
///
/// For example `2024-03-01T10-20-30Z`. Names sort chronologically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotName(String);

impl SnapshotName {
    pub fn now() -> SnapshotName {
        SnapshotName::from_time(OffsetDateTime::now_utc())
    }

    pub fn from_time(time: OffsetDateTime) -> SnapshotName {
        let t = time.to_offset(UtcOffset::UTC);
        SnapshotName(format!(
            "{:04}-{:02}-{:02}T{:02}-{:02}-{:02}Z",
            t.year(),
            u8::from(t.month()),
            t.day(),
            t.hour(),
            t.minute(),
            t.second()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn time(&self) -> Option<OffsetDateTime> {
        PrimitiveDateTime::parse(
            &self.0,
            format_description!("[year]-[month]-[day]T[hour]-[minute]-[second]Z"),
        )
        .ok()
        .map(PrimitiveDateTime::assume_utc)
    }

    /// The name one second later.
    pub fn successor(&self) -> Option<SnapshotName> {
        self.time()
            .map(|t| SnapshotName::from_time(t + time::Duration::SECOND))
    }
}

impl FromStr for SnapshotName {
    type Err = Error;

    fn from_str(s: &str) -> Result<SnapshotName> {
        let name = SnapshotName(s.to_owned());
        match name.time() {
            Some(t) if SnapshotName::from_time(t) == name => Ok(name),
            _ => Err(Error::InvalidSnapshotName { name: s.to_owned() }),
        }
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One backup in a chain.
#[derive(Debug)]
pub struct Snapshot {
    name: SnapshotName,
    index: BackupNodeIndex,
    volumes: VolumeStore,
    /// Position of the previous snapshot in the chain.
    previous: Option<usize>,
}

impl Snapshot {
    pub fn new(
        name: SnapshotName,
        index: BackupNodeIndex,
        volumes: VolumeStore,
        previous: Option<usize>,
    ) -> Snapshot {
        Snapshot {
            name,
            index,
            volumes,
            previous,
        }
    }

    pub fn name(&self) -> &SnapshotName {
        &self.name
    }

    pub fn index(&self) -> &BackupNodeIndex {
        &self.index
    }

    pub fn volumes(&self) -> &VolumeStore {
        &self.volumes
    }

    pub fn previous(&self) -> Option<usize> {
        self.previous
    }
}

/// Counts bytes on their way to the inner writer.
struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Store the content of one live node into `volumes`.
///
/// The content is hashed as it's read and compressed according to what's
/// known about similar files. Directories have no content and are recorded
/// as they are.
#[instrument(skip(ctx, volumes, live))]
pub fn backup_node(
    ctx: &BackupContext,
    volumes: &VolumeStore,
    live: &OsDirectoryIndex,
    id: NodeId,
) -> Result<BackupNodeAttributes> {
    let apath = live.index().path(id);
    let node = live.index().node(id).clone();
    if node.kind == Kind::Dir {
        return Ok(BackupNodeAttributes::directory(node));
    }
    let config = ctx.config();
    let extension = apath.extension();
    let compression = if node.size == 0 {
        None
    } else if node.kind == Kind::Symlink {
        if node.size <= MAX_UNCOMPRESSED_SYMLINK {
            None
        } else {
            config.compression.choose(DEFAULT_COMPRESSION_RATE)
        }
    } else {
        ctx.choose_compression(&extension)
    };
    trace!(%apath, ?compression, "Store node");

    let algorithm = config.hash_algorithm;
    let mut reader = HashingReader::new(live.open_source(id)?, algorithm);
    let counting = CountingWriter {
        inner: volumes.create_writer(),
        count: 0,
    };
    let write_error = |err| Error::from_content_io(apath, err);
    let mut compressor = CompressWriter::new(counting, compression).map_err(write_error)?;
    let mut buf = vec![0; config.block_size as usize];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(Error::ReadSourceFile {
                    path: live.source_path(id),
                    source,
                })
            }
        };
        compressor.write_all(&buf[..n]).map_err(write_error)?;
    }
    let counting = compressor.finish().map_err(write_error)?;
    let stored_bytes = counting.count;
    let blocks = counting.inner.close();
    let (hash, read_bytes) = reader.finish();
    if read_bytes != node.size {
        return Err(Error::StreamPipingFailed {
            apath: apath.clone(),
            expected: node.size,
            actual: read_bytes,
        });
    }
    if node.kind == Kind::File && compression.is_some() {
        ctx.record_compression_rate(&extension, stored_bytes as f64 / node.size as f64);
    }
    live.remember_hash(id, algorithm, &hash);

    let monitor = ctx.monitor();
    monitor.count(Counter::NodesStored, 1);
    monitor.count(Counter::StoredUncompressedBytes, read_bytes as usize);
    monitor.count(Counter::StoredBytes, stored_bytes as usize);
    monitor.count(Counter::Blocks, blocks.len());
    Ok(BackupNodeAttributes::stored(
        node,
        algorithm,
        hash,
        blocks,
        compression,
    ))
}
