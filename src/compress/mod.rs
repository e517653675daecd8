// volsnap backup system.
// Copyright 2017-2024 Martin Pool.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Stream compression of node data.
//!
//! Each node's data is compressed as one stream, so a file's blocks can only
//! be decompressed together, from the start.

use std::fmt;
use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

pub mod snappy;
pub mod zstd;

/// Compression format of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CompressionKind {
    Snappy,
    Zstd,
}

/// How one node's data was compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Compression {
    pub kind: CompressionKind,
    /// Level chosen for this node; not needed to decompress.
    pub level: i32,
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.level)
    }
}

/// Writes through to `W`, compressing if asked.
pub enum CompressWriter<W: Write> {
    Plain(W),
    Snappy(snappy::Encoder<W>),
    Zstd(zstd::Encoder<W>),
}

impl<W: Write> CompressWriter<W> {
    pub fn new(inner: W, compression: Option<Compression>) -> io::Result<Self> {
        match compression {
            None => Ok(CompressWriter::Plain(inner)),
            Some(Compression {
                kind: CompressionKind::Snappy,
                ..
            }) => Ok(CompressWriter::Snappy(snappy::encoder(inner))),
            Some(Compression {
                kind: CompressionKind::Zstd,
                level,
            }) => Ok(CompressWriter::Zstd(zstd::encoder(inner, level)?)),
        }
    }

    /// Flush any trailing compressed data and return the inner writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            CompressWriter::Plain(mut w) => {
                w.flush()?;
                Ok(w)
            }
            CompressWriter::Snappy(e) => snappy::finish(e),
            CompressWriter::Zstd(e) => e.finish(),
        }
    }
}

impl<W: Write> Write for CompressWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            CompressWriter::Plain(w) => w.write(buf),
            CompressWriter::Snappy(e) => e.write(buf),
            CompressWriter::Zstd(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            CompressWriter::Plain(w) => w.flush(),
            CompressWriter::Snappy(e) => e.flush(),
            CompressWriter::Zstd(e) => e.flush(),
        }
    }
}

/// Wrap a stream of stored bytes so that it yields the original data.
pub fn decompress_reader<'a, R: Read + Send + 'a>(
    inner: R,
    compression: Option<Compression>,
) -> io::Result<Box<dyn Read + Send + 'a>> {
    Ok(match compression.map(|c| c.kind) {
        None => Box::new(inner),
        Some(CompressionKind::Snappy) => Box::new(snappy::decoder(inner)),
        Some(CompressionKind::Zstd) => Box::new(zstd::decoder(inner)?),
    })
}
