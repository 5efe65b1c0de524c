use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

use trconv::config::{DEFAULT_BLOCK_SIZE, DEFAULT_FILE_LIMIT};
use trconv::{Config, Session};

/// Converts an online blktrace of a block device into a cache simulator trace.
///
/// Example: trconv --dev=sdf1
#[derive(Debug, Parser)]
#[command(name = "trconv", version)]
struct Command {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Target block device name (e.g., sdy1)
    #[arg(long)]
    dev: String,
    /// Desired format for converting
    #[arg(long, default_value = "caffeine")]
    format: String,
    /// Suffix of output filename (e.g., sdy1.trace)
    #[arg(long, default_value = "trace")]
    output: String,
    /// Directory to write the output files to
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
    /// Terminate generating trace after the specified number of seconds
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    timeout: i64,
    /// Block size (in bytes) of the device
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
    blksize: u64,
    /// Generate gzip compressed output files
    #[arg(long)]
    compress: bool,
    /// Number of records per output file
    #[arg(long, default_value_t = DEFAULT_FILE_LIMIT)]
    file_limit: u64,
    /// blktrace binary to run
    #[arg(long, default_value = "blktrace")]
    blktrace: String,
    /// blkparse binary to run
    #[arg(long, default_value = "blkparse")]
    blkparse: String,
    /// Kill producers still running this many seconds after being interrupted
    #[arg(long)]
    kill_after: Option<u64>,
}

impl From<Command> for Config {
    fn from(cmd: Command) -> Self {
        Config {
            device: cmd.dev,
            block_size: cmd.blksize,
            suffix: cmd.output,
            output_dir: cmd.output_dir,
            timeout: cmd.timeout,
            compress: cmd.compress,
            file_limit: cmd.file_limit,
            blktrace: cmd.blktrace,
            blkparse: cmd.blkparse,
            kill_after: cmd.kill_after,
            ..Default::default()
        }
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_names(true)
        .try_init();
}

fn main() -> Result<()> {
    let cmd = Command::parse();
    init_tracing(cmd.verbose);

    if cmd.format != "caffeine" {
        bail!("Unsupported format: {}", cmd.format);
    }

    let config = Config::from(cmd).validate()?;
    let summary = Session::new(config).run()?;
    println!(
        "Captured {} records in {} files ({})",
        summary.records, summary.files, summary.trigger
    );
    Ok(())
}
