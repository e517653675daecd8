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

//! Learned compression rates per filename extension.
//!
//! The rate is stored size divided by original size, so 1.0 means the data
//! didn't compress at all. Rates are persisted in a small CSV file in the
//! backup directory and refined after every compressed file.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{trace, warn};

use crate::{Error, Result};

/// Name of the statistics file in the backup directory.
pub const COMPRESSION_STATS_FILENAME: &str = "compression_stats.csv";

/// Estimated rate for extensions never seen before.
pub const DEFAULT_COMPRESSION_RATE: f64 = 0.5;

const HEADER: &str = "File extension,Compression rate";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompressionStats {
    rates: BTreeMap<String, f64>,
}

impl CompressionStats {
    /// Load stats from a directory, or start empty if there are none yet.
    ///
    /// Malformed lines are skipped with a warning.
    pub fn load(dir: &Path) -> Result<CompressionStats> {
        let path = dir.join(COMPRESSION_STATS_FILENAME);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(CompressionStats::default())
            }
            Err(source) => return Err(Error::ReadCompressionStats { path, source }),
        };
        let mut rates = BTreeMap::new();
        for (i, line) in text.lines().enumerate() {
            if (i == 0 && line == HEADER) || line.trim().is_empty() {
                continue;
            }
            match line
                .rsplit_once(',')
                .and_then(|(ext, rate)| Some((ext, rate.trim().parse::<f64>().ok()?)))
            {
                Some((ext, rate)) if (0.0..=1.0).contains(&rate) => {
                    rates.insert(ext.to_owned(), rate);
                }
                _ => warn!(?path, line = i + 1, "Skipping malformed compression stats line"),
            }
        }
        Ok(CompressionStats { rates })
    }

    /// Atomically replace the stats file.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(COMPRESSION_STATS_FILENAME);
        let write = || -> io::Result<()> {
            let mut file = NamedTempFile::new_in(dir)?;
            writeln!(file, "{HEADER}")?;
            for (ext, rate) in &self.rates {
                writeln!(file, "{ext},{rate}")?;
            }
            file.as_file().sync_all()?;
            file.persist(&path).map_err(|err| err.error)?;
            Ok(())
        };
        write().map_err(|source| Error::WriteCompressionStats {
            path: path.clone(),
            source,
        })
    }

    /// Estimated rate for files with this extension.
    pub fn estimate(&self, extension: &str) -> f64 {
        self.rates
            .get(extension)
            .copied()
            .unwrap_or(DEFAULT_COMPRESSION_RATE)
    }

    /// Fold in the rate measured on one file.
    ///
    /// The first sample sets the rate; later samples are averaged with the
    /// current value.
    pub fn record(&mut self, extension: &str, sample: f64) {
        let sample = sample.clamp(0.0, 1.0);
        let new = match self.rates.get(extension) {
            Some(old) => ((old + sample) / 2.0).clamp(0.0, 1.0),
            None => sample,
        };
        trace!(extension, sample, new, "Update compression rate");
        self.rates.insert(extension.to_owned(), new);
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.rates.iter().map(|(ext, rate)| (ext.as_str(), *rate))
    }
}
