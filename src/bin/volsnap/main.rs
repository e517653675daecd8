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

//! Command-line entry point for volsnap backups.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn, Level};

use volsnap::config::CompressionConfig;
use volsnap::*;

use crate::monitor::TermUiMonitor;
use crate::trace::TraceTimeStyle;

mod monitor;
mod show;
mod trace;
mod trace_counter;

#[derive(Debug, Parser)]
#[command(author, about, version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Backup directory.
    #[arg(long, short = 'b', global = true, default_value = ".")]
    backup_dir: PathBuf,

    /// No progress bars.
    #[arg(long, short = 'P', global = true)]
    no_progress: bool,

    /// Show debug trace to stderr.
    #[arg(long, short = 'D', global = true)]
    debug: bool,

    /// Control timestamps prefixes on stderr.
    #[arg(long, value_enum, global = true, default_value_t = TraceTimeStyle::None)]
    trace_time: TraceTimeStyle,

    /// Append a json formatted log to this file.
    #[arg(long, global = true)]
    log_json: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a new backup directory for a source directory.
    Init {
        /// Directory to back up.
        source_dir: PathBuf,
        /// Size of the chunks read from source files.
        #[arg(long)]
        block_size: Option<u64>,
        /// Maximum size of each volume file.
        #[arg(long)]
        volume_size: Option<u64>,
        /// Compressor for stored data.
        #[arg(long, value_enum)]
        compression: Option<CompressionArg>,
        /// Highest compression level to use.
        #[arg(long)]
        max_level: Option<i32>,
        /// Primary content hash.
        #[arg(long)]
        hash: Option<HashAlgorithm>,
        /// Glob patterns of paths not to back up.
        #[arg(long, short)]
        exclude: Vec<String>,
        /// Number of worker threads.
        #[arg(long)]
        threads: Option<usize>,
        /// Leave finished snapshots writable.
        #[arg(long)]
        no_write_protect: bool,
    },

    /// Store a new snapshot of the source directory.
    AddSnapshot {
        /// Name for the snapshot, instead of the current time.
        #[arg(long, hide = true)]
        name: Option<String>,
    },

    /// Show how a snapshot differs from another, or from the source.
    Diff {
        /// Snapshot to compare from; by default the newest.
        #[arg(long, short)]
        src: Option<String>,
        /// Snapshot to compare to; by default the live source.
        #[arg(long, short)]
        dst: Option<String>,
    },

    /// Print the content hash of every file and symlink in a snapshot.
    Hashes {
        #[arg(long, short)]
        snapshot: Option<String>,
        #[arg(long, short, default_value_t = HashAlgorithm::Blake2b)]
        algorithm: HashAlgorithm,
    },

    /// Mount a snapshot as a filesystem (not supported).
    Mount {
        #[arg(long, short)]
        snapshot: Option<String>,
        mount_point: PathBuf,
    },

    /// Restore a snapshot into an empty directory.
    RestoreSnapshot {
        #[arg(long, short)]
        snapshot: Option<String>,
        restore_point: PathBuf,
    },

    /// Show sizes and counts of a snapshot.
    Stats {
        #[arg(long, short)]
        snapshot: Option<String>,
    },

    /// Check that a snapshot's content can be read and matches its hashes.
    Verify {
        #[arg(long, short)]
        snapshot: Option<String>,
        /// Only check data stored in this snapshot, not in earlier ones.
        #[arg(long, short = 'l')]
        local: bool,
    },

    /// Check the data stored by every snapshot.
    VerifyAll,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CompressionArg {
    None,
    Snappy,
    Zstd,
}

enum ExitCode {
    Success = 0,
    Failure = 1,
    NodeFailures = 2,
}

impl std::process::Termination for ExitCode {
    fn report(self) -> std::process::ExitCode {
        (self as u8).into()
    }
}

impl Command {
    fn run(&self, backup_dir: &Path, monitor: Arc<TermUiMonitor>) -> Result<ExitCode> {
        let open = || SnapshotManager::open(backup_dir, monitor.clone());
        let mut stdout = std::io::stdout().lock();
        match self {
            Command::Init {
                source_dir,
                block_size,
                volume_size,
                compression,
                max_level,
                hash,
                exclude,
                threads,
                no_write_protect,
            } => {
                let source = source_dir
                    .canonicalize()
                    .map_err(|source| Error::ReadMetadata {
                        path: source_dir.clone(),
                        source,
                    })?;
                let mut config = Config::new(&source);
                if let Some(block_size) = block_size {
                    config.block_size = *block_size;
                }
                if let Some(volume_size) = volume_size {
                    config.volume_size = *volume_size;
                }
                config.compression = CompressionConfig {
                    kind: match compression {
                        None => config.compression.kind,
                        Some(CompressionArg::None) => None,
                        Some(CompressionArg::Snappy) => Some(CompressionKind::Snappy),
                        Some(CompressionArg::Zstd) => Some(CompressionKind::Zstd),
                    },
                    max_level: max_level.unwrap_or(config.compression.max_level),
                };
                if let Some(hash) = hash {
                    config.hash_algorithm = *hash;
                }
                config.exclude.clone_from(exclude);
                config.threads = *threads;
                config.write_protect = !no_write_protect;
                SnapshotManager::init(backup_dir, config, monitor.clone())?;
                info!("Created new backup directory in {backup_dir:?}");
            }
            Command::AddSnapshot { name } => {
                let options = AddSnapshotOptions {
                    name: name
                        .as_deref()
                        .map(str::parse::<SnapshotName>)
                        .transpose()?,
                };
                let report = open()?.add_snapshot(options)?;
                monitor.clear_progress();
                show::show_add_report(&report, &mut stdout)?;
                if report.has_failures() {
                    return Ok(ExitCode::NodeFailures);
                }
            }
            Command::Diff { src, dst } => {
                let manager = open()?;
                let entries = match dst {
                    Some(dst) => manager.diff_snapshots(src.as_deref(), dst)?,
                    None => manager.diff_live(src.as_deref())?,
                };
                monitor.clear_progress();
                show::show_diff(&entries, &mut stdout)?;
            }
            Command::Hashes {
                snapshot,
                algorithm,
            } => {
                let hashes = open()?.hashes(snapshot.as_deref(), *algorithm)?;
                monitor.clear_progress();
                show::show_hashes(&hashes, &mut stdout)?;
            }
            Command::Mount {
                snapshot,
                mount_point,
            } => {
                open()?.mount(snapshot.as_deref(), mount_point)?;
            }
            Command::RestoreSnapshot {
                snapshot,
                restore_point,
            } => {
                let failures = open()?.restore(snapshot.as_deref(), restore_point)?;
                monitor.clear_progress();
                if !failures.is_empty() {
                    show::show_failures(&failures);
                    return Ok(ExitCode::NodeFailures);
                }
                info!("Restore complete");
            }
            Command::Stats { snapshot } => {
                let stats = open()?.stats(snapshot.as_deref())?;
                monitor.clear_progress();
                show::show_stats(&stats, &mut stdout)?;
            }
            Command::Verify { snapshot, local } => {
                let failures = open()?.verify(snapshot.as_deref(), !local)?;
                monitor.clear_progress();
                if !failures.is_empty() {
                    show::show_failures(&failures);
                    return Ok(ExitCode::NodeFailures);
                }
                info!("Snapshot is OK");
            }
            Command::VerifyAll => {
                let results = open()?.verify_all();
                monitor.clear_progress();
                let mut ok = true;
                for (name, failures) in &results {
                    if failures.is_empty() {
                        info!("{name}: OK");
                    } else {
                        warn!("{name}: {} failures", failures.len());
                        show::show_failures(failures);
                        ok = false;
                    }
                }
                if !ok {
                    return Ok(ExitCode::NodeFailures);
                }
            }
        }
        Ok(ExitCode::Success)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let start_time = Instant::now();
    let console_level = if args.debug {
        Level::TRACE
    } else {
        Level::INFO
    };
    let monitor = Arc::new(TermUiMonitor::new(!args.no_progress && !args.debug));
    let _flush_tracing = match trace::enable_tracing(
        &monitor,
        &args.trace_time,
        console_level,
        &args.log_json,
    ) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Failed to start logging: {err}");
            return ExitCode::Failure;
        }
    };
    let result = args.command.run(&args.backup_dir, monitor.clone());
    monitor.clear_progress();
    debug!(elapsed = ?start_time.elapsed());
    match result {
        Err(err) => {
            error!("{err}");
            let mut err: &dyn std::error::Error = &err;
            while let Some(source) = err.source() {
                error!("caused by: {source}");
                err = source;
            }
            debug!(
                error_count = trace_counter::global_error_count(),
                warn_count = trace_counter::global_warn_count(),
            );
            ExitCode::Failure
        }
        Ok(exit_code) => exit_code,
    }
}

#[test]
fn verify_clap() {
    use clap::CommandFactory;
    Args::command().debug_assert()
}
