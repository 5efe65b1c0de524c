//! trconv - online block trace conversion for cache simulators.
//!
//! Runs `blktrace` against a block device, decodes its stream with
//! `blkparse` and turns every completed I/O into one `<S|L> 0x<block> 1`
//! line per touched logical block, rotating and optionally compressing
//! the output files as it goes.
//!
//! # Modules
//!
//! - [`config`] - Configuration and pre-flight validation
//! - [`blocks`] - Sector extent to logical block mapping
//! - [`record`] - Parsing of decoded trace lines into records
//! - [`output`] - Output file rotation
//! - [`compress`] - Gzip compression of finished files
//! - [`producer`] - Launching and supervising `blktrace`/`blkparse`
//! - [`shutdown`] - Fire-once shutdown signal, watcher and task tracking
//! - [`session`] - The capture session and its read loop
//!
//! # Example
//!
//! ```no_run
//! use trconv::{Config, Session};
//!
//! let config = Config {
//!     device: "sdb".to_string(),
//!     timeout: 60,
//!     ..Default::default()
//! };
//! let summary = Session::new(config.validate()?).run()?;
//! println!("{} records", summary.records);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod blocks;
pub mod compress;
pub mod config;
pub mod output;
pub mod producer;
pub mod record;
pub mod session;
pub mod shutdown;

pub use config::{BlockSize, Config, SessionConfig};
pub use session::{Session, Summary};
pub use shutdown::{SessionState, ShutdownSignal, Trigger};
