//! Gzip compression of finished output files.
//!
//! Runs off the read loop on a tracked thread so a session never exits
//! halfway through compressing a file. Failures are logged and the
//! uncompressed file is left in place.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{info, warn};

use crate::shutdown::TaskGroup;

/// `<path>.gz`
pub fn compressed_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".gz");
    PathBuf::from(name)
}

/// Compress `path` into `<path>.gz` and remove `path` on success.
pub fn compress_file(path: &Path) -> Result<PathBuf> {
    let target = compressed_path(path);
    let input = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let output = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)
        .with_context(|| format!("Failed to create {}", target.display()))?;

    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
    io::copy(&mut BufReader::new(input), &mut encoder)
        .with_context(|| format!("Failed to compress {}", path.display()))?;
    let mut writer = encoder.finish()?;
    io::Write::flush(&mut writer)?;
    drop(writer);

    fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
    Ok(target)
}

/// Queue `path` for compression on its own tracked thread.
pub fn spawn_compress(tasks: &TaskGroup, path: PathBuf) -> Result<()> {
    tasks.spawn("compress", move || match compress_file(&path) {
        Ok(target) => info!("Compressed {}", target.display()),
        Err(e) => warn!("Failed to compress {}: {:#}", path.display(), e),
    })
}
