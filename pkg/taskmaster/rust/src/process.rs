// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! One supervised slot: at most one live OS child at a time.
//!
//! Every live child has two detached tasks: a monitor that owns the
//! [`Child`] handle and classifies its exit, and a start-confirmation timer
//! that promotes STARTING to RUNNING after `starttime`. Both carry the
//! generation of the run they belong to and do nothing once that run has
//! been released, so a stale exit or timer can never overwrite the state of
//! a newer run or of a deliberate stop. Failures surface only through the
//! slot's status, never through the tasks themselves.
//!
//! Signals are queued to the monitor rather than sent to the raw pid. The
//! monitor only delivers them while the child is unreaped, so a pid that the
//! kernel has already recycled is never signalled.

use crate::alert::{self, Alerter};
use crate::definition::{AutoRestart, OutputTarget, ProgramDefinition};
use crate::error::ProcessError;
use crate::state::ProcessStatus;
use log::{debug, error, info, warn};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::stat::{Mode, umask};
use nix::unistd::Pid;
use std::fmt;
use std::fs::OpenOptions;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: u32 },
    AlreadyRunning { pid: u32 },
    /// A retry raced a kill or shutdown and was dropped.
    Cancelled,
    Failed { reason: String },
}

impl fmt::Display for StartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartOutcome::Started { pid } => write!(f, "started (pid {pid})"),
            StartOutcome::AlreadyRunning { pid } => write!(f, "already running (pid {pid})"),
            StartOutcome::Cancelled => write!(f, "start cancelled, restarts are disabled"),
            StartOutcome::Failed { reason } => write!(f, "failed to start: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    AlreadyStopped,
    /// Exited within `stoptime` after the stop signal.
    Stopped,
    /// Ignored the stop signal for `stoptime` and was killed.
    Killed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillOutcome {
    AlreadyStopped,
    Killed,
    /// The monitor had already finished with the child.
    AlreadyGone,
}

/// How a stop ends once `stoptime` ran out and the slot was killed.
impl From<KillOutcome> for StopOutcome {
    fn from(outcome: KillOutcome) -> Self {
        match outcome {
            KillOutcome::Killed => StopOutcome::Killed,
            // The child exited on its own between the timeout and the kill.
            KillOutcome::AlreadyStopped | KillOutcome::AlreadyGone => StopOutcome::Stopped,
        }
    }
}

/// How long a killed child may take to be reaped before we stop waiting on it.
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Point-in-time view of a slot, used for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub identity: String,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub returncode: Option<i32>,
    pub uptime: Option<Duration>,
    pub retries: u32,
}

impl ProcessInfo {
    /// A slot that has no process yet.
    pub fn stopped(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            status: ProcessStatus::Stopped,
            pid: None,
            returncode: None,
            uptime: None,
            retries: 0,
        }
    }
}

impl fmt::Display for ProcessInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.identity, self.status)?;
        if let Some(pid) = self.pid {
            write!(f, " pid {pid}")?;
        }
        if let Some(code) = self.returncode {
            write!(f, " exit {code}")?;
        }
        if let Some(uptime) = self.uptime {
            write!(f, " uptime {}", format_uptime(uptime))?;
        }
        if self.retries > 0 {
            write!(f, " retries {}", self.retries)?;
        }
        Ok(())
    }
}

pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Handle to one slot. Cloning shares the slot.
#[derive(Clone)]
pub struct Process {
    shared: Arc<Shared>,
}

struct Shared {
    identity: String,
    alerter: Arc<dyn Alerter>,
    inner: Mutex<Inner>,
}

struct Inner {
    definition: Arc<ProgramDefinition>,
    status: ProcessStatus,
    run: Option<Run>,
    generation: u64,
    retries: u32,
    /// Set by `kill`/`disable_restart`, cleared by `reset`.
    restart_disabled: bool,
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
    returncode: Option<i32>,
}

/// The live child of the current generation.
struct Run {
    pid: u32,
    generation: u64,
    /// Cancels the start-confirmation timer.
    cancel: CancellationToken,
    /// Signals for the monitor to deliver while the child is unreaped.
    signals: mpsc::UnboundedSender<Signal>,
    exited: watch::Receiver<bool>,
}

enum RetryDecision {
    Skip,
    Retry { attempt: u32, max: u32 },
    Abort { alert: bool, retries: u32 },
}

impl Inner {
    fn set_status(&mut self, identity: &str, next: ProcessStatus) {
        if self.status != next && !self.status.can_transition_to(next) {
            warn!("[{identity}] unexpected transition {} -> {next}", self.status);
        }
        self.status = next;
    }

    fn autorestart(&self) -> AutoRestart {
        if self.restart_disabled {
            AutoRestart::Never
        } else {
            self.definition.autorestart
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.run
            .as_ref()
            .is_some_and(|run| run.generation == generation)
    }

    /// Drop ownership of the live child and cancel its timer.
    fn release(&mut self) -> Option<Run> {
        let run = self.run.take()?;
        run.cancel.cancel();
        self.stopped_at = Some(Instant::now());
        Some(run)
    }
}

impl Process {
    pub fn new(
        identity: impl Into<String>,
        definition: Arc<ProgramDefinition>,
        alerter: Arc<dyn Alerter>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                identity: identity.into(),
                alerter,
                inner: Mutex::new(Inner {
                    definition,
                    status: ProcessStatus::Stopped,
                    run: None,
                    generation: 0,
                    retries: 0,
                    restart_disabled: false,
                    started_at: None,
                    stopped_at: None,
                    returncode: None,
                }),
            }),
        }
    }

    pub fn identity(&self) -> &str {
        &self.shared.identity
    }

    pub fn status(&self) -> ProcessStatus {
        self.lock().status
    }

    pub fn pid(&self) -> Option<u32> {
        self.lock().run.as_ref().map(|run| run.pid)
    }

    pub fn retries(&self) -> u32 {
        self.lock().retries
    }

    pub fn returncode(&self) -> Option<i32> {
        self.lock().returncode
    }

    pub fn definition(&self) -> Arc<ProgramDefinition> {
        Arc::clone(&self.lock().definition)
    }

    pub fn info(&self) -> ProcessInfo {
        let inner = self.lock();
        let uptime = inner.started_at.map(|started| {
            inner
                .stopped_at
                .unwrap_or_else(Instant::now)
                .saturating_duration_since(started)
        });
        ProcessInfo {
            identity: self.shared.identity.clone(),
            status: inner.status,
            pid: inner.run.as_ref().map(|run| run.pid),
            returncode: inner.returncode,
            uptime,
            retries: inner.retries,
        }
    }

    /// Spawn the child and arm the start-confirmation timer. Never blocks on
    /// `starttime`; the outcome of the run is reflected in `status()`.
    pub fn start(&self) -> StartOutcome {
        self.launch(false)
    }

    /// Ask the child to exit with `stopsignal`, escalating to `kill` after `stoptime`.
    pub async fn stop(&self) -> StopOutcome {
        let identity = self.identity();
        let (sig, stoptime, mut exited) = {
            let mut inner = self.lock();
            let Some(run) = inner.run.as_ref() else {
                info!("[{identity}] already stopped");
                return StopOutcome::AlreadyStopped;
            };
            run.cancel.cancel();
            let sig = inner.definition.stopsignal;
            info!("[{identity}] sending {sig} (pid={})", run.pid);
            if run.signals.send(sig).is_err() {
                debug!("[{identity}] monitor already finished, {sig} not sent");
            }
            let snapshot = (sig, inner.definition.stoptime, run.exited.clone());
            inner.set_status(identity, ProcessStatus::Stopping);
            snapshot
        };

        // A closed channel means the monitor is gone, which only happens after exit.
        if timeout(stoptime, exited.wait_for(|done| *done)).await.is_ok() {
            info!("[{identity}] stopped");
            return StopOutcome::Stopped;
        }
        warn!(
            "[{identity}] still running {}s after {sig}, killing",
            stoptime.as_secs_f64()
        );
        let outcome = self.kill_and_reap(REAP_TIMEOUT).await;
        if outcome != KillOutcome::Killed {
            info!("[{identity}] exited before SIGKILL");
        }
        outcome.into()
    }

    /// SIGKILL the child and mark the slot FATAL. Also disables automatic
    /// restarts so that no retry can respawn a child after a deliberate kill.
    pub fn kill(&self) -> KillOutcome {
        self.kill_run().0
    }

    /// `kill`, then wait up to `within` for the monitor to reap the child.
    pub async fn kill_and_reap(&self, within: Duration) -> KillOutcome {
        let (outcome, exited) = self.kill_run();
        if let Some(mut exited) = exited {
            if timeout(within, exited.wait_for(|done| *done)).await.is_err() {
                warn!(
                    "[{}] not reaped {}s after SIGKILL",
                    self.identity(),
                    within.as_secs_f64()
                );
            }
        }
        outcome
    }

    /// Release the run and queue SIGKILL for its monitor. Returns the run's
    /// exit watch when the signal was queued.
    fn kill_run(&self) -> (KillOutcome, Option<watch::Receiver<bool>>) {
        let identity = self.identity();
        let run = {
            let mut inner = self.lock();
            inner.restart_disabled = true;
            let Some(run) = inner.release() else {
                debug!("[{identity}] no live child to kill");
                return (KillOutcome::AlreadyStopped, None);
            };
            inner.set_status(identity, ProcessStatus::Fatal);
            run
        };

        info!("[{identity}] sending SIGKILL (pid={})", run.pid);
        match run.signals.send(Signal::SIGKILL) {
            Ok(()) => (KillOutcome::Killed, Some(run.exited)),
            Err(_) => {
                info!("[{identity}] already exited");
                (KillOutcome::AlreadyGone, None)
            }
        }
    }

    /// Clear the retry counter and re-enable automatic restarts.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.retries = 0;
        inner.restart_disabled = false;
    }

    /// Prevent any further automatic restart until `reset`.
    pub fn disable_restart(&self) {
        self.lock().restart_disabled = true;
    }

    /// Swap in a new definition without touching the live child. Only the
    /// attributes read at exit, retry and stop time take effect immediately.
    pub fn update(&self, definition: Arc<ProgramDefinition>) {
        let mut inner = self.lock();
        debug!("[{}] definition updated", self.shared.identity);
        inner.definition = definition;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn launch(&self, retrying: bool) -> StartOutcome {
        let identity = self.identity();
        let mut inner = self.lock();
        if let Some(run) = &inner.run {
            return StartOutcome::AlreadyRunning { pid: run.pid };
        }
        if retrying && inner.restart_disabled {
            debug!("[{identity}] retry dropped, restarts are disabled");
            return StartOutcome::Cancelled;
        }

        inner.set_status(identity, ProcessStatus::Starting);
        inner.generation += 1;
        let generation = inner.generation;
        inner.returncode = None;
        inner.started_at = Some(Instant::now());
        inner.stopped_at = None;
        let definition = Arc::clone(&inner.definition);

        match spawn_child(identity, &definition) {
            Ok(mut child) => {
                let pid = child.id().unwrap_or(0);
                let cancel = CancellationToken::new();
                let (signals_tx, signals_rx) = mpsc::unbounded_channel();
                let (exited_tx, exited_rx) = watch::channel(false);
                inner.run = Some(Run {
                    pid,
                    generation,
                    cancel: cancel.clone(),
                    signals: signals_tx,
                    exited: exited_rx,
                });
                drop(inner);

                info!("[{identity}] spawned (pid={pid}, cmd={})", definition.cmd);
                drain_output(identity, &mut child);
                tokio::spawn(
                    self.clone()
                        .monitor(child, generation, signals_rx, exited_tx),
                );
                tokio::spawn(
                    self.clone()
                        .confirm_start(generation, definition.starttime, cancel),
                );
                StartOutcome::Started { pid }
            }
            Err(e) => {
                inner.set_status(identity, ProcessStatus::Fatal);
                inner.stopped_at = Some(Instant::now());
                drop(inner);

                error!("{e}");
                // Detached so that a run of spawn failures retries iteratively.
                let process = self.clone();
                tokio::spawn(async move { process.evaluate_retry(false) });
                StartOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn confirm_start(self, generation: u64, starttime: Duration, cancel: CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(starttime) => {}
        }
        let mut inner = self.lock();
        if inner.is_current(generation) && inner.status == ProcessStatus::Starting {
            inner.set_status(&self.shared.identity, ProcessStatus::Running);
            info!(
                "[{}] running, up for {}s",
                self.shared.identity,
                starttime.as_secs_f64()
            );
        }
    }

    async fn monitor(
        self,
        mut child: Child,
        generation: u64,
        mut signals: mpsc::UnboundedReceiver<Signal>,
        exited: watch::Sender<bool>,
    ) {
        let identity = self.identity();
        // Exit wins over a queued signal; once reaped the pid may belong to someone else.
        let status = loop {
            let sig = tokio::select! {
                biased;
                status = child.wait() => break status,
                Some(sig) = signals.recv() => sig,
            };
            signal_child(identity, &mut child, sig);
        };
        let code = match status {
            Ok(status) => {
                info!("[{identity}] exited with {status}");
                exit_code(status)
            }
            Err(e) => {
                warn!("[{identity}] failed to wait on child: {e}");
                None
            }
        };

        let expected = {
            let mut inner = self.lock();
            if !inner.is_current(generation) {
                debug!("[{identity}] exit of released child (generation {generation})");
                None
            } else {
                inner.release();
                inner.returncode = code;
                if inner.status == ProcessStatus::Stopping {
                    inner.set_status(identity, ProcessStatus::Stopped);
                    None
                } else {
                    let expected = code.is_some_and(|c| inner.definition.is_expected_exit(c));
                    if expected {
                        inner.set_status(identity, ProcessStatus::Exited);
                    } else {
                        warn!("[{identity}] exited with unexpected code {code:?}");
                        inner.set_status(identity, ProcessStatus::Fatal);
                    }
                    Some(expected)
                }
            }
        };

        let _ = exited.send(true);
        if let Some(expected) = expected {
            self.evaluate_retry(expected);
        }
    }

    fn evaluate_retry(&self, expected: bool) {
        let identity = self.identity();
        let decision = {
            let mut inner = self.lock();
            let finished = matches!(inner.status, ProcessStatus::Exited | ProcessStatus::Fatal);
            if inner.run.is_some() || !finished || !inner.autorestart().should_retry(expected) {
                RetryDecision::Skip
            } else if inner.retries >= inner.definition.startretries {
                inner.set_status(identity, ProcessStatus::Aborted);
                RetryDecision::Abort {
                    alert: inner.definition.mail_alerting,
                    retries: inner.retries,
                }
            } else {
                inner.retries += 1;
                RetryDecision::Retry {
                    attempt: inner.retries,
                    max: inner.definition.startretries,
                }
            }
        };

        match decision {
            RetryDecision::Skip => {}
            RetryDecision::Retry { attempt, max } => {
                info!("[{identity}] retrying ({attempt}/{max})");
                self.launch(true);
            }
            RetryDecision::Abort { alert, retries } => {
                error!("[{identity}] retry limit reached after {retries} retries, aborted");
                if alert {
                    let returncode = self
                        .returncode()
                        .map_or_else(|| "none".to_string(), |c| c.to_string());
                    alert::deliver(
                        self.shared.alerter.as_ref(),
                        &format!("taskmaster: {identity} aborted"),
                        &format!(
                            "Process {identity} failed after {retries} retries and will not be \
                             restarted until an explicit restart. Last exit code: {returncode}."
                        ),
                    );
                }
            }
        }
    }
}

fn spawn_child(identity: &str, definition: &ProgramDefinition) -> Result<Child, ProcessError> {
    let argv = definition.argv();
    let Some((program, args)) = argv.split_first() else {
        return Err(ProcessError::EmptyCommand {
            identity: identity.to_string(),
        });
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .envs(&definition.env)
        .current_dir(&definition.cwd)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .stdout(open_output(identity, &definition.stdout)?)
        .stderr(open_output(identity, &definition.stderr)?);

    let mask = Mode::from_bits_truncate(definition.umask as _);
    // SAFETY: umask(2) is async-signal-safe and only touches the child's own state.
    unsafe {
        cmd.pre_exec(move || {
            umask(mask);
            Ok(())
        });
    }

    cmd.spawn().map_err(|source| ProcessError::Spawn {
        identity: identity.to_string(),
        command: definition.cmd.clone(),
        source,
    })
}

fn open_output(identity: &str, target: &OutputTarget) -> Result<Stdio, ProcessError> {
    match target {
        OutputTarget::Pipe => Ok(Stdio::piped()),
        OutputTarget::File(path) => OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map(Stdio::from)
            .map_err(|source| ProcessError::Output {
                identity: identity.to_string(),
                path: path.clone(),
                source,
            }),
    }
}

fn drain_output(identity: &str, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(drain(identity.to_string(), "stdout", stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(drain(identity.to_string(), "stderr", stderr));
    }
}

/// Forward a piped stream to the log until EOF so the child never blocks on a full pipe.
async fn drain<R: AsyncRead + Unpin>(identity: String, stream: &'static str, reader: R) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                info!("[{identity}] {stream}: {}", line.trim_end());
            }
            Err(e) => {
                debug!("[{identity}] {stream} closed: {e}");
                break;
            }
        }
    }
}

/// Deliver `sig` to a child that `wait` has not reaped yet.
fn signal_child(identity: &str, child: &mut Child, sig: Signal) {
    let Some(pid) = child.id() else {
        debug!("[{identity}] child already reaped, {sig} dropped");
        return;
    };
    let result = if sig == Signal::SIGKILL {
        child.start_kill().map_err(|e| e.to_string())
    } else {
        send_signal(pid, sig).map_err(|e| e.to_string())
    };
    if let Err(e) = result {
        warn!("[{identity}] failed to send {sig} (pid={pid}): {e}");
    }
}

fn send_signal(pid: u32, sig: Signal) -> nix::Result<()> {
    // pid 0 would signal our own process group.
    if pid == 0 {
        return Err(Errno::ESRCH);
    }
    signal::kill(Pid::from_raw(pid as i32), sig)
}

/// Exit code, or the negated signal number for a child killed by a signal.
fn exit_code(status: ExitStatus) -> Option<i32> {
    status.code().or_else(|| status.signal().map(|sig| -sig))
}
