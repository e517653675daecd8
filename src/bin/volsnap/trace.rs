// volsnap backup system.
// Copyright 2023-2024 Martin Pool.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Send tracing output to the terminal and optionally a json log.

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{trace, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter;
use tracing_subscriber::fmt::time::{self, FormatTime};
use tracing_subscriber::layer::Layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::Registry;

use crate::monitor::TermUiMonitor;
use crate::trace_counter::CounterLayer;

/// Chosen style of timestamp prefix on trace lines.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum TraceTimeStyle {
    /// No timestamp on trace lines.
    None,
    /// Universal time, in RFC 3339 style.
    Utc,
    /// Local time, in RFC 3339, using the offset when the program starts.
    Local,
    /// Time since the start of the process, in seconds.
    Relative,
}

/// Install the global subscriber.
///
/// The returned guard must be held until the program exits, so that the
/// json log is flushed.
pub fn enable_tracing(
    monitor: &Arc<TermUiMonitor>,
    time_style: &TraceTimeStyle,
    console_level: Level,
    json_path: &Option<PathBuf>,
) -> io::Result<Option<WorkerGuard>> {
    fn hookup<FT>(
        monitor: &TermUiMonitor,
        timer: FT,
        console_level: Level,
        json_path: &Option<PathBuf>,
    ) -> io::Result<Option<WorkerGuard>>
    where
        FT: FormatTime + Send + Sync + 'static,
    {
        let console_layer = tracing_subscriber::fmt::Layer::default()
            .with_ansi(clicolors_control::colors_enabled())
            .with_writer(monitor.view())
            .with_timer(timer)
            .with_filter(filter::Targets::new().with_target("volsnap", console_level));
        let mut flush_guard = None;
        let mut json_layer = None;
        if let Some(json_path) = json_path {
            let file_writer = OpenOptions::new()
                .create(true)
                .append(true)
                .open(json_path)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_writer);
            flush_guard = Some(guard);
            json_layer = Some(
                tracing_subscriber::fmt::Layer::default()
                    .json()
                    .with_writer(non_blocking),
            );
        }
        Registry::default()
            .with(console_layer)
            .with(CounterLayer())
            .with(json_layer)
            .init();
        Ok(flush_guard)
    }

    let flush_guard = match time_style {
        TraceTimeStyle::None => hookup(monitor, (), console_level, json_path)?,
        TraceTimeStyle::Utc => hookup(monitor, time::UtcTime::rfc_3339(), console_level, json_path)?,
        TraceTimeStyle::Relative => hookup(monitor, time::uptime(), console_level, json_path)?,
        TraceTimeStyle::Local => {
            let timer = time::OffsetTime::local_rfc_3339()
                .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
            hookup(monitor, timer, console_level, json_path)?
        }
    };
    trace!("Tracing enabled");
    Ok(flush_guard)
}
