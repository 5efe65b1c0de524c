//! Launching and supervising the two trace producers.
//!
//! Producer A (`blktrace`) streams raw binary events for one device to its
//! stdout, which is wired straight into the stdin of producer B
//! (`blkparse`). The session reads B's decoded text from its stdout.
//! Each child gets its own supervisor thread that waits for it to exit and
//! then fires the shutdown signal so the rest of the pipeline unwinds.

use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, error, info, warn};

use crate::shutdown::{Interrupt, ShutdownSignal, TaskGroup, Trigger};

/// Program and arguments of one producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerCommand {
    /// Name used in logs and thread names
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
}

impl ProducerCommand {
    pub fn new<I, S>(name: &str, program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ProducerCommand {
            name: name.to_string(),
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

/// A running producer process. The [`Child`] itself lives in the
/// supervisor thread; this handle only knows how to signal it.
#[derive(Debug)]
pub struct Producer {
    name: String,
    pid: u32,
    exited: Arc<AtomicBool>,
}

impl Producer {
    fn send(&self, sig: Signal) -> Result<()> {
        if self.has_exited() {
            return Ok(());
        }
        kill(Pid::from_raw(self.pid as i32), sig)
            .with_context(|| format!("Failed to send {:?} to {} ({})", sig, self.name, self.pid))
    }
}

impl Interrupt for Producer {
    fn name(&self) -> &str {
        &self.name
    }

    fn interrupt(&self) -> Result<()> {
        self.send(Signal::SIGINT)
    }

    fn kill(&self) -> Result<()> {
        self.send(Signal::SIGKILL)
    }

    fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }
}

/// The launched producers and the decoded stream to read from.
pub struct Pipeline {
    pub producers: Vec<Arc<Producer>>,
    /// Producer B's stdout. `None` if the pipeline could not be set up, in
    /// which case the shutdown signal has already been fired.
    pub output: Option<ChildStdout>,
}

impl Pipeline {
    /// Spawn producer A, pipe it into producer B and supervise both.
    ///
    /// A producer that fails to launch is logged and fires
    /// [`Trigger::ProducerFailed`]; it is not an error here. Errors are
    /// only returned when a supervisor thread cannot be started.
    pub fn launch(
        tracer: &ProducerCommand,
        decoder: &ProducerCommand,
        tasks: &TaskGroup,
        signal: &Arc<ShutdownSignal>,
    ) -> Result<Pipeline> {
        let mut pipeline = Pipeline {
            producers: Vec::new(),
            output: None,
        };

        let mut tracer_child = match tracer
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                launch_failed(tracer, e, signal);
                return Ok(pipeline);
            }
        };
        info!("Started {} (pid {})", tracer.name, tracer_child.id());
        let tracer_out = tracer_child.stdout.take();
        pipeline
            .producers
            .push(supervise(tracer_child, &tracer.name, tasks, signal)?);

        let Some(tracer_out) = tracer_out else {
            error!("{} has no stdout to read from", tracer.name);
            signal.fire(Trigger::ProducerFailed);
            return Ok(pipeline);
        };

        let mut decoder_child = match decoder
            .command()
            .stdin(Stdio::from(tracer_out))
            .stdout(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                launch_failed(decoder, e, signal);
                return Ok(pipeline);
            }
        };
        info!("Started {} (pid {})", decoder.name, decoder_child.id());
        pipeline.output = decoder_child.stdout.take();
        match supervise(decoder_child, &decoder.name, tasks, signal) {
            Ok(producer) => pipeline.producers.push(producer),
            Err(e) => {
                for producer in &pipeline.producers {
                    if let Err(kill_err) = producer.kill() {
                        warn!("Failed to kill {}: {:#}", producer.name, kill_err);
                    }
                }
                return Err(e);
            }
        }

        if pipeline.output.is_none() {
            error!("{} has no stdout to read from", decoder.name);
            signal.fire(Trigger::ProducerFailed);
        }
        Ok(pipeline)
    }

    /// Producers as interrupt targets for the shutdown watcher.
    pub fn targets(&self) -> Vec<Arc<dyn Interrupt>> {
        self.producers
            .iter()
            .map(|p| p.clone() as Arc<dyn Interrupt>)
            .collect()
    }
}

fn launch_failed(cmd: &ProducerCommand, err: std::io::Error, signal: &ShutdownSignal) {
    error!("Failed to run {} ({}): {}", cmd.name, cmd.program, err);
    signal.fire(Trigger::ProducerFailed);
}

/// Wait for `child` on its own thread and fire the shutdown signal once it
/// is gone, whatever the exit status.
fn supervise(
    mut child: Child,
    name: &str,
    tasks: &TaskGroup,
    signal: &Arc<ShutdownSignal>,
) -> Result<Arc<Producer>> {
    let producer = Arc::new(Producer {
        name: name.to_string(),
        pid: child.id(),
        exited: Arc::new(AtomicBool::new(false)),
    });

    let exited = producer.exited.clone();
    let signal = signal.clone();
    let thread_name = name.to_string();
    let res = tasks.spawn(name, move || {
        let trigger = match child.wait() {
            Ok(status) if status.success() => {
                info!("{} exited", thread_name);
                Trigger::ProducerExited
            }
            Ok(status) => {
                warn!("{} exited with {}", thread_name, status);
                Trigger::ProducerExited
            }
            Err(e) => {
                error!("Failed to wait for {}: {}", thread_name, e);
                Trigger::ProducerFailed
            }
        };
        exited.store(true, Ordering::Release);
        if signal.fire(trigger) {
            debug!("{} initiated shutdown", thread_name);
        }
    });

    if let Err(e) = res {
        // Nobody will reap it otherwise.
        if let Err(kill_err) = kill(Pid::from_raw(producer.pid as i32), Signal::SIGKILL) {
            warn!("Failed to kill unsupervised {}: {}", name, kill_err);
        }
        return Err(e);
    }
    Ok(producer)
}
