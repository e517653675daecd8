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

//! Services shared by everything working on one backup directory during one
//! command: configuration, the monitor, worker threads, and compression
//! statistics.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::compress::Compression;
use crate::compression_stats::CompressionStats;
use crate::config::Config;
use crate::monitor::Monitor;
use crate::{Error, Result};

pub const INDEX_DIR: &str = "index";
pub const DATA_DIR: &str = "data";

pub struct BackupContext {
    root: PathBuf,
    config: Config,
    monitor: Arc<dyn Monitor>,
    pool: ThreadPool,
    compression_stats: Mutex<CompressionStats>,
}

impl BackupContext {
    pub fn new(root: &Path, config: Config, monitor: Arc<dyn Monitor>) -> Result<BackupContext> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.threads.unwrap_or(0))
            .thread_name(|i| format!("volsnap-worker-{i}"))
            .build()
            .map_err(|source| Error::ThreadPool { source })?;
        let compression_stats = CompressionStats::load(root)?;
        debug!(
            threads = pool.current_num_threads(),
            extensions = compression_stats.len(),
            "Created backup context"
        );
        Ok(BackupContext {
            root: root.to_owned(),
            config,
            monitor,
            pool,
            compression_stats: Mutex::new(compression_stats),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn monitor(&self) -> &dyn Monitor {
        self.monitor.as_ref()
    }

    pub fn monitor_arc(&self) -> Arc<dyn Monitor> {
        Arc::clone(&self.monitor)
    }

    pub fn index_dir(&self) -> PathBuf {
        self.root.join(INDEX_DIR)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    /// Run a parallel phase on this context's worker threads.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }

    /// Choose compression for a file with this extension, from how well
    /// similar files compressed before.
    pub fn choose_compression(&self, extension: &str) -> Option<Compression> {
        let rate = self.compression_stats.lock().unwrap().estimate(extension);
        self.config.compression.choose(rate)
    }

    pub fn record_compression_rate(&self, extension: &str, rate: f64) {
        self.compression_stats
            .lock()
            .unwrap()
            .record(extension, rate);
    }

    pub fn save_compression_stats(&self) -> Result<()> {
        self.compression_stats.lock().unwrap().save(&self.root)
    }

    pub fn compression_stats(&self) -> CompressionStats {
        self.compression_stats.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::monitor::test::TestMonitor;

    #[test]
    fn learned_rates_change_the_choice() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(Path::new("/src"));
        config.threads = Some(2);
        let ctx = BackupContext::new(dir.path(), config, TestMonitor::arc()).unwrap();
        assert_eq!(ctx.install(rayon::current_num_threads), 2);
        assert_eq!(ctx.choose_compression("txt").unwrap().level, 5);
        ctx.record_compression_rate("jpg", 0.99);
        assert_eq!(ctx.choose_compression("jpg"), None);
        ctx.save_compression_stats().unwrap();

        let ctx = BackupContext::new(dir.path(), Config::new(Path::new("/src")), TestMonitor::arc())
            .unwrap();
        assert_eq!(ctx.choose_compression("jpg"), None);
        assert_eq!(ctx.compression_stats().len(), 1);
    }
}
