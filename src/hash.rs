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

//! Content hashes of node data, and streams that compute or check them.
//!
//! Hashes are kept as lowercase hex strings, which is how they're compared,
//! looked up, and written into the index.

use std::io::{self, Read};

use blake2_rfc::blake2b::Blake2b;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum_macros::{Display, EnumIter, EnumString};

use crate::{Apath, Error};

/// Length of the BLAKE2b hashes used by volsnap, in bytes.
pub const BLAKE_HASH_SIZE_BYTES: usize = 64;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Blake2b,
    Sha256,
}

impl HashAlgorithm {
    pub fn hasher(self) -> ContentHasher {
        match self {
            HashAlgorithm::Blake2b => {
                ContentHasher::Blake2b(Box::new(Blake2b::new(BLAKE_HASH_SIZE_BYTES)))
            }
            HashAlgorithm::Sha256 => ContentHasher::Sha256(Sha256::new()),
        }
    }

    /// Hash a complete buffer.
    pub fn hash_bytes(self, bytes: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(bytes);
        hasher.finish()
    }
}

/// An in-progress hash of a stream.
pub enum ContentHasher {
    Blake2b(Box<Blake2b>),
    Sha256(Sha256),
}

impl ContentHasher {
    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            ContentHasher::Blake2b(h) => h.update(bytes),
            ContentHasher::Sha256(h) => Digest::update(h, bytes),
        }
    }

    pub fn finish(self) -> String {
        match self {
            ContentHasher::Blake2b(h) => hex::encode(h.finalize().as_bytes()),
            ContentHasher::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Hashes everything read through it.
pub struct HashingReader<R> {
    inner: R,
    hasher: ContentHasher,
    len: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R, algorithm: HashAlgorithm) -> Self {
        HashingReader {
            inner,
            hasher: algorithm.hasher(),
            len: 0,
        }
    }

    /// Number of bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.len
    }

    /// Return the hash of everything read, and its length.
    pub fn finish(self) -> (String, u64) {
        (self.hasher.finish(), self.len)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.len += n as u64;
        Ok(n)
    }
}

/// Hash everything in a stream, returning the hash and the length.
pub fn hash_stream<R: Read>(source: R, algorithm: HashAlgorithm) -> io::Result<(String, u64)> {
    let mut reader = HashingReader::new(source, algorithm);
    io::copy(&mut reader, &mut io::sink())?;
    Ok(reader.finish())
}

/// Checks that the stream it wraps has the expected hash when it reaches the end.
///
/// A mismatch is reported as an `io::Error` carrying [Error::HashMismatch],
/// returned by the read that hits the end of the stream.
pub struct VerifyingReader<R> {
    inner: R,
    apath: Apath,
    algorithm: HashAlgorithm,
    expected: String,
    hasher: Option<ContentHasher>,
}

impl<R: Read> VerifyingReader<R> {
    pub fn new(inner: R, apath: Apath, algorithm: HashAlgorithm, expected: String) -> Self {
        VerifyingReader {
            inner,
            apath,
            algorithm,
            expected,
            hasher: Some(algorithm.hasher()),
        }
    }
}

impl<R: Read> Read for VerifyingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 || buf.is_empty() {
            if let Some(hasher) = self.hasher.as_mut() {
                hasher.update(&buf[..n]);
            }
            return Ok(n);
        }
        if let Some(hasher) = self.hasher.take() {
            let actual = hasher.finish();
            if actual != self.expected {
                return Err(Error::HashMismatch {
                    apath: self.apath.clone(),
                    algorithm: self.algorithm,
                    expected: self.expected.clone(),
                    actual,
                }
                .into_io());
            }
        }
        Ok(0)
    }
}
