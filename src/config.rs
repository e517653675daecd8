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

//! Configuration of a backup directory, stored in `config.json`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::compress::{zstd, Compression, CompressionKind};
use crate::hash::HashAlgorithm;
use crate::jsonio::{read_json, write_json};
use crate::{Error, Result};

pub const CONFIG_FILENAME: &str = "config.json";

/// Default size of the chunks read from source files.
pub const DEFAULT_BLOCK_SIZE: u64 = 1 << 20;

/// Default maximum size of one volume file.
pub const DEFAULT_VOLUME_SIZE: u64 = 1 << 30;

/// Estimated rates at or above this don't justify compressing.
const INCOMPRESSIBLE_RATE: f64 = 0.95;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory to back up.
    pub source: PathBuf,
    /// Size of the chunks read from source files and passed to the compressor.
    pub block_size: u64,
    /// Maximum size of one volume file.
    pub volume_size: u64,
    pub compression: CompressionConfig,
    /// Primary hash algorithm, used for change and move detection.
    pub hash_algorithm: HashAlgorithm,
    /// Worker threads; by default, the available parallelism.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
    /// Glob patterns of paths not to back up.
    pub exclude: Vec<String>,
    /// Remove write permission from finished snapshots.
    pub write_protect: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            source: PathBuf::new(),
            block_size: DEFAULT_BLOCK_SIZE,
            volume_size: DEFAULT_VOLUME_SIZE,
            compression: CompressionConfig::default(),
            hash_algorithm: HashAlgorithm::default(),
            threads: None,
            exclude: Vec::new(),
            write_protect: true,
        }
    }
}

impl Config {
    pub fn new(source: &Path) -> Config {
        Config {
            source: source.to_owned(),
            ..Config::default()
        }
    }

    /// Read and validate the config of a backup directory.
    pub fn load(backup_dir: &Path) -> Result<Config> {
        let path = backup_dir.join(CONFIG_FILENAME);
        if !path.exists() {
            return Err(Error::NotABackupDirectory {
                path: backup_dir.to_owned(),
            });
        }
        let config: Config = read_json(&path).map_err(|err| match err {
            Error::ReadJson { path, source } => Error::ReadConfig { path, source },
            Error::ParseJson { path, source } => Error::ParseConfig { path, source },
            other => other,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, backup_dir: &Path) -> Result<()> {
        let path = backup_dir.join(CONFIG_FILENAME);
        write_json(&path, self).map_err(|err| match err {
            Error::WriteJson { path, source } => Error::WriteConfig { path, source },
            other => other,
        })
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |details: &str| -> Result<()> {
            Err(Error::InvalidConfig {
                details: details.to_owned(),
            })
        };
        if self.source.as_os_str().is_empty() {
            return invalid("source directory is not set");
        }
        if self.block_size == 0 {
            return invalid("block_size must be positive");
        }
        if self.volume_size == 0 {
            return invalid("volume_size must be positive");
        }
        if self.block_size > self.volume_size {
            return invalid("block_size must not be larger than volume_size");
        }
        if self.threads == Some(0) {
            return invalid("threads must be positive");
        }
        if self.compression.max_level > zstd::MAX_LEVEL {
            return invalid("compression max_level is too high");
        }
        Ok(())
    }
}

/// Which compressor to use and how hard it may work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// None to store everything uncompressed.
    pub kind: Option<CompressionKind>,
    /// Level used for the most compressible data; negative disables compression.
    pub max_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        CompressionConfig {
            kind: Some(CompressionKind::Zstd),
            max_level: 9,
        }
    }
}

impl CompressionConfig {
    /// Choose how to compress data whose stored/original ratio is expected to
    /// be `estimated_rate`, or None if it's not worth compressing.
    ///
    /// The level scales with how compressible the data is expected to be:
    /// `ceil(max_level * (1 - rate))`, at least 1.
    pub fn choose(&self, estimated_rate: f64) -> Option<Compression> {
        let kind = self.kind?;
        if self.max_level < 0 || estimated_rate >= INCOMPRESSIBLE_RATE {
            return None;
        }
        let rate = estimated_rate.clamp(0.0, 1.0);
        let level = (f64::from(self.max_level) * (1.0 - rate)).ceil() as i32;
        Some(Compression {
            kind,
            level: level.clamp(1, self.max_level.max(1)),
        })
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0.0, Some(9))]
    #[case(0.5, Some(5))]
    #[case(0.9, Some(1))]
    #[case(0.94, Some(1))]
    #[case(0.95, None)]
    #[case(1.0, None)]
    fn level_follows_estimated_rate(#[case] rate: f64, #[case] level: Option<i32>) {
        let config = CompressionConfig {
            kind: Some(CompressionKind::Zstd),
            max_level: 9,
        };
        assert_eq!(config.choose(rate).map(|c| c.level), level);
    }

    #[test]
    fn negative_max_level_disables() {
        let config = CompressionConfig {
            kind: Some(CompressionKind::Zstd),
            max_level: -1,
        };
        assert_eq!(config.choose(0.1), None);
        let none = CompressionConfig {
            kind: None,
            max_level: 9,
        };
        assert_eq!(none.choose(0.1), None);
    }

    #[test]
    fn validate_rejects_bad_sizes() {
        let mut config = Config::new(Path::new("/src"));
        assert!(config.validate().is_ok());
        config.block_size = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));
        config.block_size = 2000;
        config.volume_size = 1000;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));
        assert!(matches!(
            Config::default().validate(),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(Path::new("/home/me"));
        config.exclude = vec!["*.tmp".to_owned()];
        config.hash_algorithm = HashAlgorithm::Sha256;
        config.save(dir.path()).unwrap();
        assert_eq!(Config::load(dir.path()).unwrap(), config);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILENAME), r#"{"source": "/data"}"#).unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.source, PathBuf::from("/data"));
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert!(config.write_protect);
    }

    #[test]
    fn load_from_non_backup_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(Error::NotABackupDirectory { .. })
        ));
    }

    #[test]
    fn malformed_config_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILENAME), "{ not json").unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(Error::ParseConfig { .. })
        ));
    }
}
