// volsnap backup system.
// Copyright 2018-2024 Martin Pool.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Text output formats for command results.

use std::io::{BufWriter, Write};

use tracing::error;

use volsnap::*;

pub fn show_add_report(report: &AddSnapshotReport, w: &mut dyn Write) -> Result<()> {
    writeln!(w, "Added snapshot {}", report.name)?;
    writeln!(w, "{}", report.summary)?;
    writeln!(w, "{} nodes stored in this snapshot", report.newly_owned)?;
    writeln!(w)?;
    write!(w, "{}", report.stats)?;
    show_failures(&report.failures);
    show_failures(&report.verify_failures);
    Ok(())
}

/// Print one line per difference.
pub fn show_diff(entries: &[DiffEntry], w: &mut dyn Write) -> Result<()> {
    let mut bw = BufWriter::new(w);
    for entry in entries {
        writeln!(bw, "{entry}")?;
    }
    bw.flush()?;
    Ok(())
}

/// Print `hash apath` lines, like `sha256sum`.
pub fn show_hashes(hashes: &[(Apath, String)], w: &mut dyn Write) -> Result<()> {
    let mut bw = BufWriter::new(w);
    for (apath, hash) in hashes {
        writeln!(bw, "{hash}  {apath}")?;
    }
    bw.flush()?;
    Ok(())
}

pub fn show_stats(stats: &SnapshotStats, w: &mut dyn Write) -> Result<()> {
    write!(w, "{stats}")?;
    Ok(())
}

/// Log every failed node.
pub fn show_failures(failures: &[NodeFailure]) {
    for failure in failures {
        error!("{failure}");
    }
}
