//! The online capture session.
//!
//! Wires the producers, the record transformer, the output rotator and the
//! shutdown machinery together and runs the read loop on the calling
//! thread.

use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::output::OutputFile;
use crate::producer::Pipeline;
use crate::record::parse_line;
use crate::shutdown::{
    install_signal_handler, spawn_timer, spawn_watcher, ShutdownSignal, TaskGroup, Trigger,
};

/// What a finished session did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub trigger: Trigger,
    /// Records written across all files
    pub records: u64,
    /// Output files written
    pub files: u32,
}

pub struct Session {
    config: SessionConfig,
    signal: Arc<ShutdownSignal>,
    tasks: TaskGroup,
    handle_signals: bool,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Session {
            config,
            signal: Arc::new(ShutdownSignal::new()),
            tasks: TaskGroup::new(),
            handle_signals: true,
        }
    }

    /// Do not install the SIGINT/SIGTERM handler.
    pub fn without_signal_handler(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    /// Handle to stop the session from outside.
    pub fn shutdown_signal(&self) -> Arc<ShutdownSignal> {
        self.signal.clone()
    }

    /// Run until the session stops. Errors returned from here mean the
    /// session never started; once capture is running every failure goes
    /// through the shutdown signal instead.
    pub fn run(self) -> Result<Summary> {
        let mut output = OutputFile::create(&self.config, self.tasks.clone())?;

        let pipeline = match Pipeline::launch(
            &self.config.blktrace,
            &self.config.blkparse,
            &self.tasks,
            &self.signal,
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                self.signal.fire(Trigger::ProducerFailed);
                if let Err(close_err) = output.close() {
                    warn!("{:#}", close_err);
                }
                self.tasks.wait();
                return Err(e);
            }
        };

        if let Err(e) = self.start_background(&pipeline) {
            // Without a watcher nobody would interrupt the producers.
            error!("{:#}", e);
            for producer in pipeline.targets() {
                if let Err(e) = producer.interrupt() {
                    warn!("Failed to interrupt {}: {:#}", producer.name(), e);
                }
            }
            self.signal.fire(Trigger::ProducerFailed);
        }

        if let Some(stream) = pipeline.output {
            info!("Capturing block trace of {}", self.config.device);
            self.convert(stream, &mut output);
        }

        // Make sure the watcher wakes up even if the stream just ended.
        self.signal.fire(Trigger::EndOfStream);

        if let Err(e) = output.close() {
            error!("{:#}", e);
        }
        debug!("Waiting for {} background tasks", self.tasks.pending());
        self.tasks.wait();
        self.signal.mark_stopped();

        let summary = Summary {
            trigger: self.signal.trigger().unwrap_or(Trigger::EndOfStream),
            records: output.total_records(),
            files: output.files(),
        };
        info!(
            "Stopped ({}): {} records in {} files",
            summary.trigger, summary.records, summary.files
        );
        Ok(summary)
    }

    fn start_background(&self, pipeline: &Pipeline) -> Result<()> {
        spawn_watcher(
            &self.tasks,
            self.signal.clone(),
            pipeline.targets(),
            self.config.kill_after,
        )?;
        if let Some(timeout) = self.config.timeout {
            spawn_timer(&self.tasks, self.signal.clone(), timeout)?;
        }
        if self.handle_signals {
            install_signal_handler(self.signal.clone());
        }
        Ok(())
    }

    /// The read loop. Returns on end of stream or after firing the shutdown
    /// signal for a fatal error.
    fn convert<R: Read>(&self, stream: R, output: &mut OutputFile) {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Failed to read decoded trace: {}", e);
                    break;
                }
            }
            let line = String::from_utf8_lossy(&buf);

            let event = match parse_line(&line) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    error!("Unexpected trace format: {}", e);
                    self.signal.fire(Trigger::ParseError);
                    return;
                }
            };

            for record in event.records(self.config.block_size) {
                if let Err(e) = output.append(&record) {
                    error!("{:#}", e);
                    self.signal.fire(Trigger::OutputError);
                    return;
                }
            }
        }
        debug!("Decoded trace stream ended");
    }
}
