//! Shutdown coordination.
//!
//! Several independent sources can end a capture session: an operator
//! signal, the configured timeout, a producer exiting, a fatal parse error
//! or an output error. They all funnel into one [`ShutdownSignal`] where
//! the first fire wins and every later fire is a no-op. A watcher thread
//! turns that single event into exactly one interrupt per producer.
//!
//! Every background thread of a session is started through a
//! [`TaskGroup`] so the session can block until all of them are done.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

/// How often the watcher checks on interrupted producers while a kill
/// grace period is running.
const KILL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What caused the session to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// SIGINT or SIGTERM
    Signal,
    Timeout,
    /// A producer process returned
    ProducerExited,
    /// A producer could not be launched or waited on
    ProducerFailed,
    ParseError,
    OutputError,
    /// The decoded stream ended on its own
    EndOfStream,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Trigger::Signal => "signal",
            Trigger::Timeout => "timeout",
            Trigger::ProducerExited => "producer exited",
            Trigger::ProducerFailed => "producer failed",
            Trigger::ParseError => "parse error",
            Trigger::OutputError => "output error",
            Trigger::EndOfStream => "end of stream",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Stopping,
    Stopped,
}

#[derive(Default)]
struct SignalState {
    trigger: Option<Trigger>,
    stopped: bool,
}

/// Multi-producer, fire-once stop notification.
#[derive(Default)]
pub struct ShutdownSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fire the signal. Returns `true` only for the call that actually
    /// moved the session from running to stopping. Every call wakes the
    /// waiters.
    pub fn fire(&self, trigger: Trigger) -> bool {
        let mut state = self.lock();
        let first = state.trigger.is_none();
        if first {
            state.trigger = Some(trigger);
        }
        drop(state);
        self.cond.notify_all();
        first
    }

    pub fn is_fired(&self) -> bool {
        self.lock().trigger.is_some()
    }

    /// The trigger that won, if any.
    pub fn trigger(&self) -> Option<Trigger> {
        self.lock().trigger
    }

    /// Block until the signal has been fired.
    pub fn wait(&self) -> Trigger {
        let guard = self
            .cond
            .wait_while(self.lock(), |s| s.trigger.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        // wait_while only returns once a trigger is set
        guard.trigger.unwrap_or(Trigger::EndOfStream)
    }

    /// Block until the signal has been fired or `timeout` elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Trigger> {
        let (guard, _) = self
            .cond
            .wait_timeout_while(self.lock(), timeout, |s| s.trigger.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        guard.trigger
    }

    pub fn mark_stopped(&self) {
        self.lock().stopped = true;
    }

    pub fn state(&self) -> SessionState {
        let state = self.lock();
        match (state.trigger, state.stopped) {
            (_, true) => SessionState::Stopped,
            (Some(_), false) => SessionState::Stopping,
            (None, false) => SessionState::Running,
        }
    }
}

/// Completion wait-point for the background threads of a session.
#[derive(Clone, Default)]
pub struct TaskGroup {
    handles: Arc<Mutex<Vec<thread::JoinHandle<()>>>>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a named thread and track it.
    pub fn spawn<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(f)
            .with_context(|| format!("Failed to spawn {name} thread"))?;
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
        Ok(())
    }

    /// Number of tracked threads not yet joined.
    pub fn pending(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Join every tracked thread, including threads spawned by other
    /// tracked threads while we are waiting.
    pub fn wait(&self) {
        loop {
            let batch: Vec<_> = self
                .handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain(..)
                .collect();
            if batch.is_empty() {
                break;
            }
            for handle in batch {
                let name = handle.thread().name().unwrap_or("<unnamed>").to_string();
                if handle.join().is_err() {
                    error!("Thread {} panicked", name);
                } else {
                    debug!("Joined thread {}", name);
                }
            }
        }
    }
}

/// Something the watcher can ask to stop, normally a producer process.
pub trait Interrupt: Send + Sync {
    fn name(&self) -> &str;

    /// Ask nicely (SIGINT).
    fn interrupt(&self) -> Result<()>;

    /// Force termination (SIGKILL). Only used with a kill grace period.
    fn kill(&self) -> Result<()>;

    fn has_exited(&self) -> bool;
}

/// Start the thread that turns the first fire of `signal` into one
/// interrupt per target.
pub fn spawn_watcher(
    tasks: &TaskGroup,
    signal: Arc<ShutdownSignal>,
    targets: Vec<Arc<dyn Interrupt>>,
    kill_after: Option<Duration>,
) -> Result<()> {
    tasks.spawn("shutdown-watcher", move || {
        let trigger = signal.wait();
        info!("Stopping capture ({})", trigger);

        for target in &targets {
            if target.has_exited() {
                debug!("{} already exited", target.name());
                continue;
            }
            match target.interrupt() {
                Ok(()) => debug!("Interrupted {}", target.name()),
                Err(e) => warn!("Failed to interrupt {}: {:#}", target.name(), e),
            }
        }

        // No-op for the trigger, but wakes anything still waiting.
        signal.fire(trigger);

        if let Some(grace) = kill_after {
            escalate(&targets, grace);
        }
    })
}

fn escalate(targets: &[Arc<dyn Interrupt>], grace: Duration) {
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if targets.iter().all(|t| t.has_exited()) {
            return;
        }
        thread::sleep(KILL_POLL_INTERVAL);
    }
    for target in targets.iter().filter(|t| !t.has_exited()) {
        warn!(
            "{} still running {}s after interrupt, killing it",
            target.name(),
            grace.as_secs()
        );
        if let Err(e) = target.kill() {
            warn!("Failed to kill {}: {:#}", target.name(), e);
        }
    }
}

/// Fire [`Trigger::Timeout`] once `timeout` elapses, unless the session is
/// already stopping by then.
pub fn spawn_timer(tasks: &TaskGroup, signal: Arc<ShutdownSignal>, timeout: Duration) -> Result<()> {
    tasks.spawn("timeout", move || {
        if signal.wait_timeout(timeout).is_none() && signal.fire(Trigger::Timeout) {
            info!("Timeout of {} seconds reached", timeout.as_secs());
        }
    })
}

/// Route SIGINT and SIGTERM into `signal`.
///
/// Only one handler can exist per process. If one is already installed
/// (e.g. by an earlier session in the same test binary) this logs and
/// carries on without one.
pub fn install_signal_handler(signal: Arc<ShutdownSignal>) {
    let res = ctrlc::set_handler(move || {
        if signal.fire(Trigger::Signal) {
            info!("Caught termination signal");
        }
    });
    if let Err(e) = res {
        debug!("Not installing signal handler: {}", e);
    }
}
