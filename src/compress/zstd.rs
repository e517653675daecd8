// volsnap backup system.
// Copyright 2019-2024 Martin Pool.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! zstd compression, at a level chosen per node.

use std::io::{self, BufReader, Read, Write};

pub type Encoder<W> = zstd::stream::write::Encoder<'static, W>;

/// Highest level zstd accepts.
pub const MAX_LEVEL: i32 = 22;

pub fn encoder<W: Write>(inner: W, level: i32) -> io::Result<Encoder<W>> {
    zstd::stream::write::Encoder::new(inner, level.clamp(1, MAX_LEVEL))
}

pub fn decoder<R: Read>(inner: R) -> io::Result<zstd::stream::read::Decoder<'static, BufReader<R>>> {
    zstd::stream::read::Decoder::new(inner)
}
