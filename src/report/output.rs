//! Measurement directory and report file handling.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local};

use crate::error::Result;
use crate::hl_warn;
use crate::report::Report;

/// Name of the measurement directory created below the output directory.
pub(crate) const MEASUREMENT_DIR: &str = "papi";

/// Decides the measurement directory below `base`.
///
/// A directory left by an earlier run is renamed with a `-YYYYMMDD-HHMMSS`
/// suffix, but only if it was last modified before `now`: with several MPI
/// ranks starting together, a directory from the current second belongs to
/// this run.
pub(crate) fn prepare_measurement_dir(base: &Path, now: SystemTime, quiet: bool) -> PathBuf {
    let dir = base.join(MEASUREMENT_DIR);
    let Ok(metadata) = fs::metadata(&dir) else {
        return dir;
    };
    if !metadata.is_dir() {
        return dir;
    }

    let modified = metadata.modified().map(unix_seconds).unwrap_or(0);
    if modified < unix_seconds(now) {
        let stamp = DateTime::<Local>::from(now).format("%Y%m%d-%H%M%S");
        let renamed = base.join(format!("{MEASUREMENT_DIR}-{stamp}"));
        log::debug!("renaming {} to {}", dir.display(), renamed.display());
        if fs::rename(&dir, &renamed).is_err() {
            hl_warn!(quiet, "Cannot rename old measurement directory.");
            hl_warn!(
                quiet,
                "If you use MPI, another process may have already renamed the directory."
            );
        }
    }
    dir
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Writes `report` as pretty JSON into `dir` and returns the file path.
///
/// The file is `rank_NNNN` when a rank is known, otherwise a freshly created
/// unique `rank_XXXXXX`.
pub(crate) fn write_report(dir: &Path, rank: Option<u32>, report: &Report) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let (file, path) = match rank {
        Some(rank) => {
            let path = dir.join(format!("rank_{rank:04}"));
            (File::create(&path)?, path)
        }
        None => tempfile::Builder::new()
            .prefix("rank_")
            .rand_bytes(6)
            .tempfile_in(dir)?
            .keep()
            .map_err(|e| e.error)?,
    };

    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(path)
}

/// Prints a written report to stdout.
#[cfg(not(feature = "table"))]
pub(crate) fn echo(_report: &Report, path: &Path) -> Result<()> {
    let text = fs::read_to_string(path)?;
    println!("\n\nPAPI-HL Output:\n{text}");
    Ok(())
}

/// Prints a written report to stdout.
#[cfg(feature = "table")]
pub(crate) fn echo(report: &Report, _path: &Path) -> Result<()> {
    let table = crate::report::table::TableRenderer::new()
        .with_title("PAPI-HL Output:")
        .render(report);
    println!("\n\n{table}");
    Ok(())
}
