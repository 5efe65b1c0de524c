//! Shared helpers for session tests.
//!
//! The real producers need root and a block device, so tests stand them
//! in with small shell commands: producer A prints canned `blkparse`-style
//! lines and producer B is a `cat` that ignores SIGINT and drains its
//! input to EOF.

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;
use trconv::producer::ProducerCommand;
use trconv::{Config, SessionConfig};

pub const DEVICE: &str = "sdt";

pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(dir.path().join(DEVICE), b"").expect("Failed to create fake device");
        Fixture { dir }
    }

    /// Session config with 512 byte blocks (one sector per block), so a
    /// zero-length completion at sector N yields exactly block N.
    pub fn config(&self, tracer_script: &str) -> SessionConfig {
        let mut config = Config {
            device: DEVICE.to_string(),
            dev_root: self.dir.path().to_path_buf(),
            output_dir: self.dir.path().to_path_buf(),
            block_size: 512,
            ..Default::default()
        }
        .validate()
        .expect("Invalid test config");
        config.blktrace = ProducerCommand::new("blktrace", "sh", ["-c", tracer_script]);
        // Like blkparse, keep decoding until the tracer closes the pipe
        // instead of dying on the interrupt.
        config.blkparse = ProducerCommand::new("blkparse", "sh", ["-c", "trap '' INT; exec cat"]);
        config
    }

    pub fn output(&self, sequence: u32) -> PathBuf {
        self.dir.path().join(format!("{DEVICE}.trace.{sequence:03}"))
    }

    pub fn read(&self, sequence: u32) -> String {
        fs::read_to_string(self.output(sequence)).expect("Failed to read output")
    }
}

/// A `blkparse` line for a completion event.
pub fn completion(rwbs: &str, sector: &str, sectors: &str) -> String {
    format!("  8,16   1        7     0.000412000     0  C  {rwbs} {sector} + {sectors} [0]")
}

/// Shell script printing `lines` and then exiting.
pub fn print_lines(lines: &[String]) -> String {
    let body: Vec<String> = lines.iter().map(|l| format!("'{l}'")).collect();
    format!("printf '%s\\n' {}", body.join(" "))
}
