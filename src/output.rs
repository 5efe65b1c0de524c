//! Output file rotation.
//!
//! Records are appended to `<device>.<suffix>.<NNN>` and flushed one by one.
//! Once a file holds the configured number of records it is closed,
//! optionally handed off for compression, and the next sequence number is
//! opened. A filename is never opened twice.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::compress::spawn_compress;
use crate::config::{output_path, SessionConfig};
use crate::record::Record;
use crate::shutdown::TaskGroup;

pub struct OutputFile {
    dir: PathBuf,
    device: String,
    suffix: String,
    limit: u64,
    compress: bool,
    tasks: TaskGroup,

    sequence: u32,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    records_in_file: u64,
    total_records: u64,
}

impl OutputFile {
    /// Open sequence 0 for the session described by `config`. Compression
    /// threads are tracked in `tasks`.
    pub fn create(config: &SessionConfig, tasks: TaskGroup) -> Result<Self> {
        let path = config.output_path(0);
        let writer = open(&path)?;
        info!("Writing trace to {}", path.display());
        Ok(OutputFile {
            dir: config.output_dir.clone(),
            device: config.device.clone(),
            suffix: config.suffix.clone(),
            limit: config.file_limit,
            compress: config.compress,
            tasks,
            sequence: 0,
            path,
            writer: Some(writer),
            records_in_file: 0,
            total_records: 0,
        })
    }

    /// Write one record and flush it. Rotates once the current file is full;
    /// an error from here means there is nowhere left to write.
    pub fn append(&mut self, record: &Record) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .with_context(|| format!("{} is already closed", self.path.display()))?;
        writeln!(writer, "{record}")
            .and_then(|_| writer.flush())
            .with_context(|| format!("Failed to write to {}", self.path.display()))?;

        self.records_in_file += 1;
        self.total_records += 1;
        if self.records_in_file >= self.limit {
            self.rotate()?;
        }
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        self.close()?;
        self.sequence += 1;
        self.path = output_path(&self.dir, &self.device, &self.suffix, self.sequence);
        self.writer = Some(open(&self.path)?);
        self.records_in_file = 0;
        info!("Rotated trace output to {}", self.path.display());
        Ok(())
    }

    /// Flush and close the current file, queueing it for compression if
    /// enabled. Closing an already closed file does nothing.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        writer
            .flush()
            .with_context(|| format!("Failed to flush {}", self.path.display()))?;
        drop(writer);
        debug!(
            "Closed {} after {} records",
            self.path.display(),
            self.records_in_file
        );

        if self.compress {
            if let Err(e) = spawn_compress(&self.tasks, self.path.clone()) {
                warn!("Not compressing {}: {:#}", self.path.display(), e);
            }
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn records_in_file(&self) -> u64 {
        self.records_in_file
    }

    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    /// Number of files opened so far, including the current one.
    pub fn files(&self) -> u32 {
        self.sequence + 1
    }
}

fn open(path: &Path) -> Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("Failed to open trace output file {}", path.display()))?;
    Ok(BufWriter::new(file))
}
