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

//! Snappy framed compression.
//!
//! The frame format checksums each chunk, so damaged data is detected while
//! decompressing.

use std::io::{self, Read, Write};

pub type Encoder<W> = snap::write::FrameEncoder<W>;

pub fn encoder<W: Write>(inner: W) -> Encoder<W> {
    snap::write::FrameEncoder::new(inner)
}

pub fn finish<W: Write>(encoder: Encoder<W>) -> io::Result<W> {
    encoder
        .into_inner()
        .map_err(|err| io::Error::new(err.error().kind(), err.error().to_string()))
}

pub fn decoder<R: Read>(inner: R) -> snap::read::FrameDecoder<R> {
    snap::read::FrameDecoder::new(inner)
}
