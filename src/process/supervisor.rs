//! Supervised execution of a single package-manager script.
//!
//! A [`ProcessSupervisor`] owns exactly one child process and one
//! [`StreamDemultiplexer`] per output stream. A monitor task owns the
//! `Child` handle and waits for either natural exit or a stop request
//! (disposal, or the caller's cancellation token firing), killing the
//! process in the latter case.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, ChildStdin};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::command::ScriptInvocation;
use super::error::SupervisorError;
use super::state::ProcessState;
use crate::stream::{
    is_blank, strip_ansi_colors, StreamDemultiplexer, StreamError, StreamKind,
};

/// How long output readers may keep running after the process is killed.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How the child process is stopped on disposal or cancellation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TerminationMode {
    /// Kill immediately.
    #[default]
    Force,
    /// On Unix, send SIGTERM and kill if still alive after the timeout.
    /// Elsewhere this behaves like `Force`.
    Graceful(Duration),
}

/// Owns the lifecycle of one script process and its output streams.
#[derive(Debug)]
pub struct ProcessSupervisor {
    invocation: ScriptInvocation,
    stdout: StreamDemultiplexer,
    stderr: StreamDemultiplexer,
    state: Arc<watch::Sender<ProcessState>>,
    shutdown: CancellationToken,
    termination: TerminationMode,
    drain_timeout: Duration,
    stdin: Option<ChildStdin>,
    pid: Option<u32>,
}

impl ProcessSupervisor {
    /// Validate the invocation and prepare idle output streams.
    ///
    /// Nothing is spawned until [`launch`](Self::launch), so subscribers
    /// registered in between see all output.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::InvalidArgument` if the working directory,
    /// script name or manager command is empty.
    pub fn new(invocation: ScriptInvocation) -> Result<Self, SupervisorError> {
        invocation.validate()?;
        let (state, _) = watch::channel(ProcessState::NotStarted);

        Ok(Self {
            invocation,
            stdout: StreamDemultiplexer::new(StreamKind::Stdout),
            stderr: StreamDemultiplexer::new(StreamKind::Stderr),
            state: Arc::new(state),
            shutdown: CancellationToken::new(),
            termination: TerminationMode::default(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            stdin: None,
            pid: None,
        })
    }

    /// Validate, spawn and start streaming in one call.
    ///
    /// Output produced before the caller attaches subscribers is not replayed.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::InvalidArgument` for empty arguments and
    /// `SupervisorError::ProcessLaunch` if the process cannot be spawned.
    pub fn start(
        invocation: ScriptInvocation,
        cancel: CancellationToken,
    ) -> Result<Self, SupervisorError> {
        let mut supervisor = Self::new(invocation)?;
        supervisor.launch(cancel)?;
        Ok(supervisor)
    }

    /// Set how the process is stopped.
    #[must_use]
    pub fn with_termination(mut self, mode: TerminationMode) -> Self {
        self.termination = mode;
        self
    }

    /// Set how long readers may drain after a kill before being stopped.
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Spawn the script and start both output streams.
    ///
    /// `cancel` stays owned by the caller: when it fires the process is
    /// killed as if [`dispose`](Self::dispose) had been called. Disposing the
    /// supervisor never cancels `cancel`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::AlreadyStarted` on a second call,
    /// `SupervisorError::Disposed` after disposal,
    /// `SupervisorError::Stream` if an output stream was already started
    /// through a cloned handle, and
    /// `SupervisorError::ProcessLaunch` if the manager cannot be found or
    /// the process fails to spawn.
    pub fn launch(&mut self, cancel: CancellationToken) -> Result<(), SupervisorError> {
        if *self.state.borrow() != ProcessState::NotStarted {
            return Err(SupervisorError::AlreadyStarted);
        }
        if self.shutdown.is_cancelled() {
            return Err(SupervisorError::Disposed);
        }
        for demux in [&self.stdout, &self.stderr] {
            if demux.is_started() {
                return Err(StreamError::AlreadyStarted(demux.kind()).into());
            }
        }

        self.invocation.resolve_manager()?;

        let mut child = self
            .invocation
            .build_command()
            .spawn()
            .map_err(|e| self.invocation.launch_error(e))?;

        self.pid = child.id();
        self.stdin = child.stdin.take();

        match child.stdout.take() {
            Some(stdout) => self.stdout.start(stdout)?,
            None => self.stdout.start(tokio::io::empty())?,
        }
        match child.stderr.take() {
            Some(stderr) => self.stderr.start(stderr)?,
            None => self.stderr.start(tokio::io::empty())?,
        }

        transition(&self.state, ProcessState::Running);
        tracing::info!(
            pid = ?self.pid,
            command = %self.invocation.command_line(),
            working_dir = %self.invocation.get_working_dir().display(),
            "Script process started"
        );

        tokio::spawn(monitor(
            child,
            Monitor {
                state: Arc::clone(&self.state),
                shutdown: self.shutdown.clone(),
                cancel,
                termination: self.termination,
                drain_timeout: self.drain_timeout,
                stdout: self.stdout.clone(),
                stderr: self.stderr.clone(),
            },
        ));

        Ok(())
    }

    /// Route output to log sinks.
    ///
    /// Non-blank stdout lines go to `line_sink` and non-blank stderr lines to
    /// `error_sink`, both with ANSI colors stripped. Stderr chunks without a
    /// newline are passed unmodified to `raw_sink` as live progress output.
    pub fn attach_logger<L, E, R>(&self, line_sink: L, error_sink: E, raw_sink: R)
    where
        L: Fn(&str) + Send + Sync + 'static,
        E: Fn(&str) + Send + Sync + 'static,
        R: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.stdout.on_line(move |line| {
            let line = strip_ansi_colors(line);
            if !is_blank(&line) {
                line_sink(&line);
            }
        });

        self.stderr.on_line(move |line| {
            let line = strip_ansi_colors(line);
            if !is_blank(&line) {
                error_sink(&line);
            }
        });

        self.stderr.on_chunk(move |chunk| {
            if !chunk.contains_newline() {
                raw_sink(chunk.as_bytes());
            }
        });
    }

    /// [`attach_logger`](Self::attach_logger) wired to `tracing`, with raw
    /// progress chunks written to this process's stdout.
    pub fn attach_tracing(&self) {
        let script: Arc<str> = Arc::from(self.invocation.get_script());
        let error_script = Arc::clone(&script);

        self.attach_logger(
            move |line| tracing::info!(script = %script, "{line}"),
            move |line| tracing::error!(script = %error_script, "{line}"),
            |bytes| {
                let mut out = std::io::stdout().lock();
                let _ = out.write_all(bytes);
                let _ = out.flush();
            },
        );
    }

    /// Stop the process if it is still running. Idempotent.
    ///
    /// Returns immediately; the kill happens on the monitor task. Use
    /// [`shutdown`](Self::shutdown) to wait for it.
    pub fn dispose(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::debug!(pid = ?self.pid, state = %self.state(), "Disposing script supervisor");
            self.shutdown.cancel();
        }
    }

    /// Dispose and wait for the process to end and both streams to close.
    pub async fn shutdown(&self) -> ProcessState {
        self.dispose();
        let state = self.wait().await;
        if self.stdout.is_started() {
            self.stdout.closed().await;
        }
        if self.stderr.is_started() {
            self.stderr.closed().await;
        }
        state
    }

    /// Wait until the process reaches a terminal state.
    ///
    /// Returns `NotStarted` immediately if the process was never launched.
    pub async fn wait(&self) -> ProcessState {
        let mut rx = self.state.subscribe();
        if *rx.borrow() == ProcessState::NotStarted {
            return ProcessState::NotStarted;
        }
        let result = rx.wait_for(|state| state.is_terminal()).await.map(|s| *s);
        result.unwrap_or_else(|_| *self.state.borrow())
    }

    #[must_use]
    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    /// OS process id of the shell running the script, once launched.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    #[must_use]
    pub fn invocation(&self) -> &ScriptInvocation {
        &self.invocation
    }

    #[must_use]
    pub fn stdout(&self) -> &StreamDemultiplexer {
        &self.stdout
    }

    #[must_use]
    pub fn stderr(&self) -> &StreamDemultiplexer {
        &self.stderr
    }

    /// Take ownership of the child's stdin.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn transition(state: &watch::Sender<ProcessState>, next: ProcessState) -> bool {
    state.send_if_modified(|current| {
        if current.can_transition_to(next) {
            tracing::debug!(from = %current, to = %next, "Process state transition");
            *current = next;
            true
        } else {
            false
        }
    })
}

struct Monitor {
    state: Arc<watch::Sender<ProcessState>>,
    shutdown: CancellationToken,
    cancel: CancellationToken,
    termination: TerminationMode,
    drain_timeout: Duration,
    stdout: StreamDemultiplexer,
    stderr: StreamDemultiplexer,
}

impl Monitor {
    async fn stop_requested(&self) {
        tokio::select! {
            () = self.shutdown.cancelled() => {}
            () = self.cancel.cancelled() => {
                tracing::debug!("Cancellation requested by caller");
            }
        }
        self.shutdown.cancel();
    }

    async fn streams_closed(&self) {
        tokio::join!(self.stdout.closed(), self.stderr.closed());
    }

    fn stop_streams(&self) {
        self.stdout.stop();
        self.stderr.stop();
    }
}

async fn monitor(mut child: Child, ctx: Monitor) {
    let killed = tokio::select! {
        status = child.wait() => {
            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to wait for script process");
                    None
                }
            };
            transition(&ctx.state, ProcessState::Exited { code });
            tracing::info!(code = ?code, "Script process exited");
            false
        }
        () = ctx.stop_requested() => {
            if let Err(e) = terminate(&mut child, ctx.termination).await {
                tracing::debug!(error = %e, "Kill failed, process likely already exited");
            }
            transition(&ctx.state, ProcessState::Killed);
            tracing::info!("Script process killed");
            true
        }
    };

    if !killed {
        // Output may still be in flight; keep reading until EOF or disposal.
        tokio::select! {
            () = ctx.streams_closed() => return,
            () = ctx.stop_requested() => {}
        }
    }

    if tokio::time::timeout(ctx.drain_timeout, ctx.streams_closed())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_ms = ctx.drain_timeout.as_millis(),
            "Output streams still open after process ended, stopping readers"
        );
        ctx.stop_streams();
    }
}

async fn terminate(child: &mut Child, mode: TerminationMode) -> std::io::Result<()> {
    match mode {
        TerminationMode::Force => child.kill().await,
        TerminationMode::Graceful(timeout) => graceful_terminate(child, timeout).await,
    }
}

#[cfg(unix)]
async fn graceful_terminate(child: &mut Child, timeout: Duration) -> std::io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return Ok(());
    };

    let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
    let _ = kill(nix_pid, Signal::SIGTERM);

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(_) => {
            tracing::debug!(pid, "Graceful termination timed out, killing");
            child.kill().await
        }
    }
}

#[cfg(not(unix))]
async fn graceful_terminate(child: &mut Child, _timeout: Duration) -> std::io::Result<()> {
    child.kill().await
}
