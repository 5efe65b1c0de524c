//! Session configuration.
//!
//! [`Config`] holds the raw, already-parsed inputs. [`Config::validate`]
//! performs the pre-flight checks and produces an immutable
//! [`SessionConfig`] that the rest of the session borrows.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};

use crate::producer::ProducerCommand;

/// Size of a device sector in bytes. Block sizes are normalized to this unit.
pub const SECTOR_SIZE: u64 = 512;

/// Default block size in bytes (1 MiB).
pub const DEFAULT_BLOCK_SIZE: u64 = 1024 * 1024;

/// Default number of records written to a single output file (~1GB of text).
pub const DEFAULT_FILE_LIMIT: u64 = 100_000_000;

/// Block size expressed in sectors. Always at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSize(u64);

impl BlockSize {
    /// Build a block size from a byte count, which must be a positive
    /// multiple of [`SECTOR_SIZE`].
    pub fn from_bytes(bytes: u64) -> Result<Self> {
        if bytes == 0 || bytes % SECTOR_SIZE != 0 {
            bail!("Invalid block size: {}", bytes);
        }
        Ok(Self(bytes / SECTOR_SIZE))
    }

    pub fn from_sectors(sectors: u64) -> Result<Self> {
        if sectors == 0 {
            bail!("Invalid block size: 0 sectors");
        }
        Ok(Self(sectors))
    }

    pub fn sectors(&self) -> u64 {
        self.0
    }
}

/// Raw configuration as handed over by the command line front end.
#[derive(Debug, Clone)]
pub struct Config {
    /// Target block device name, e.g. `sdy1`
    pub device: String,
    /// Directory holding device nodes
    pub dev_root: PathBuf,
    /// Block size in bytes
    pub block_size: u64,
    /// Suffix of the output filenames
    pub suffix: String,
    /// Directory the output files are written to
    pub output_dir: PathBuf,
    /// Timeout in seconds (<= 0 = disabled)
    pub timeout: i64,
    /// Gzip every output file once it is closed
    pub compress: bool,
    /// Records per output file before rotating
    pub file_limit: u64,
    /// Program used as the raw tracer
    pub blktrace: String,
    /// Program used as the streaming decoder
    pub blkparse: String,
    /// Seconds to wait after interrupting the producers before killing them
    pub kill_after: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            device: String::new(),
            dev_root: PathBuf::from("/dev"),
            block_size: DEFAULT_BLOCK_SIZE,
            suffix: "trace".to_string(),
            output_dir: PathBuf::from("."),
            timeout: 0,
            compress: false,
            file_limit: DEFAULT_FILE_LIMIT,
            blktrace: "blktrace".to_string(),
            blkparse: "blkparse".to_string(),
            kill_after: None,
        }
    }
}

impl Config {
    /// Run the pre-flight checks. Nothing is created on disk and no process
    /// is started here, so a failure leaves no resources behind.
    pub fn validate(self) -> Result<SessionConfig> {
        let block_size = BlockSize::from_bytes(self.block_size)?;

        if self.device.is_empty() {
            bail!("Invalid device name: no device given");
        }
        let device_path = self.dev_root.join(&self.device);
        if !device_path.exists() {
            bail!("Invalid device name: {}", self.device);
        }

        if self.file_limit == 0 {
            bail!("Invalid file limit: must be at least 1 record");
        }

        let first = output_path(&self.output_dir, &self.device, &self.suffix, 0);
        if first.exists() {
            bail!("Trace output file exists: {}", first.display());
        }

        let timeout = if self.timeout > 0 {
            Some(Duration::from_secs(self.timeout as u64))
        } else {
            None
        };

        let device_arg = device_path.to_string_lossy().into_owned();
        Ok(SessionConfig {
            blktrace: ProducerCommand::new(
                "blktrace",
                &self.blktrace,
                ["-d", device_arg.as_str(), "-o", "-"],
            ),
            blkparse: ProducerCommand::new("blkparse", &self.blkparse, ["-i", "-"]),
            block_size,
            device: self.device,
            suffix: self.suffix,
            output_dir: self.output_dir,
            timeout,
            compress: self.compress,
            file_limit: self.file_limit,
            kill_after: self.kill_after.map(Duration::from_secs),
        })
    }
}

/// Validated, immutable session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub block_size: BlockSize,
    pub device: String,
    pub suffix: String,
    pub output_dir: PathBuf,
    pub timeout: Option<Duration>,
    pub compress: bool,
    pub file_limit: u64,
    pub blktrace: ProducerCommand,
    pub blkparse: ProducerCommand,
    pub kill_after: Option<Duration>,
}

impl SessionConfig {
    pub fn output_path(&self, sequence: u32) -> PathBuf {
        output_path(&self.output_dir, &self.device, &self.suffix, sequence)
    }
}

/// `<dir>/<device>.<suffix>.<NNN>`
pub fn output_path(dir: &Path, device: &str, suffix: &str, sequence: u32) -> PathBuf {
    dir.join(format!("{device}.{suffix}.{sequence:03}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        fs::write(dir.path().join("sdz1"), b"").unwrap();
        Config {
            device: "sdz1".to_string(),
            dev_root: dir.path().to_path_buf(),
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_block_size_normalized_to_sectors() {
        assert_eq!(BlockSize::from_bytes(512).unwrap().sectors(), 1);
        assert_eq!(BlockSize::from_bytes(4096).unwrap().sectors(), 8);
        assert_eq!(
            BlockSize::from_bytes(DEFAULT_BLOCK_SIZE).unwrap().sectors(),
            2048
        );
    }

    #[test]
    fn test_block_size_rejects_bad_values() {
        assert!(BlockSize::from_bytes(0).is_err());
        assert!(BlockSize::from_bytes(1000).is_err());
        assert!(BlockSize::from_sectors(0).is_err());
    }

    #[test]
    fn test_output_path_is_zero_padded() {
        let path = output_path(Path::new("/tmp"), "sdb", "trace", 7);
        assert_eq!(path, PathBuf::from("/tmp/sdb.trace.007"));
        let path = output_path(Path::new("."), "sdb", "x", 1234);
        assert_eq!(path, PathBuf::from("./sdb.x.1234"));
    }

    #[test]
    fn test_validate_ok() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.block_size = 4096;
        config.timeout = 5;
        let session = config.validate().unwrap();
        assert_eq!(session.block_size.sectors(), 8);
        assert_eq!(session.timeout, Some(Duration::from_secs(5)));
        assert_eq!(session.output_path(0), dir.path().join("sdz1.trace.000"));
        assert_eq!(session.blkparse.args, vec!["-i", "-"]);
        let device = dir.path().join("sdz1");
        assert_eq!(
            session.blktrace.args,
            vec!["-d", device.to_str().unwrap(), "-o", "-"]
        );
    }

    #[test]
    fn test_validate_non_positive_timeout_disables() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.timeout = -3;
        assert_eq!(config.validate().unwrap().timeout, None);
    }

    #[test]
    fn test_validate_rejects_bad_block_size() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.block_size = 1000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid block size"));
    }

    #[test]
    fn test_validate_rejects_missing_device() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.device = "nope".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid device name"));
    }

    #[test]
    fn test_validate_rejects_existing_output() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        fs::write(dir.path().join("sdz1.trace.000"), b"S 0x1 1\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("exists"));
    }

    #[test]
    fn test_validate_rejects_zero_file_limit() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.file_limit = 0;
        assert!(config.validate().is_err());
    }
}
