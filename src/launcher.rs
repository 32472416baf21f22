/// Static-file-server lifecycle: spawn the server inside the session directory,
/// watch it from a background task, and deliver how it ended.
use crate::config::ServerConfig;
use crate::session::{ServerSession, SessionState};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;

/// The server could not be started, or it exited with an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchFailure {
    /// Whatever diagnostic text the server emitted (e.g. a Python traceback).
    pub raw_message: String,
}

impl LaunchFailure {
    pub fn new(raw_message: impl Into<String>) -> Self {
        Self {
            raw_message: raw_message.into(),
        }
    }
}

impl std::fmt::Display for LaunchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "server failed: {}", self.raw_message)
    }
}

impl std::error::Error for LaunchFailure {}

/// How the server process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// Exited with status 0.
    Exited,
    /// Killed by a signal (including our own SIGTERM).
    Signaled { signal: i32 },
    /// Exited non-zero, or could not be waited on.
    Failed(LaunchFailure),
}

/// Shared between the handle and the monitor task.
#[derive(Debug)]
struct ProcessState {
    pid: u32,
    terminate_requested: AtomicBool,
}

impl ProcessState {
    /// Signal every process in the server's group.
    ///
    /// The group outlives its leader while descendants are still running, so
    /// this is still meaningful after the leader has been reaped.
    fn signal_group(&self, signal: Signal) -> bool {
        // pid 0 would address our own process group.
        if self.pid == 0 {
            return false;
        }
        match killpg(Pid::from_raw(self.pid as i32), signal) {
            Ok(()) => true,
            Err(Errno::ESRCH) => {
                tracing::debug!(pid = self.pid, ?signal, "server process group already gone");
                false
            }
            Err(e) => {
                tracing::warn!(pid = self.pid, ?signal, "failed to signal server: {e}");
                false
            }
        }
    }
}

/// Handle to a running server. Owned by the shutdown coordinator.
#[derive(Debug)]
pub struct ServerHandle {
    process: Arc<ProcessState>,
    outcome_rx: oneshot::Receiver<LaunchOutcome>,
    outcome: Option<LaunchOutcome>,
}

impl ServerHandle {
    pub fn pid(&self) -> u32 {
        self.process.pid
    }

    /// Ask the server to stop (SIGTERM to its process group).
    ///
    /// Idempotent: only the first call does anything, and it returns true.
    pub fn terminate(&self) -> bool {
        if self
            .process
            .terminate_requested
            .swap(true, Ordering::SeqCst)
        {
            return false;
        }
        tracing::info!(pid = self.process.pid, "stopping server");
        self.process.signal_group(Signal::SIGTERM);
        true
    }

    /// SIGKILL the process group. Used when SIGTERM was ignored.
    pub fn kill(&self) {
        if self.process.signal_group(Signal::SIGKILL) {
            tracing::warn!(pid = self.process.pid, "server ignored SIGTERM, killed");
        }
    }

    pub fn termination_requested(&self) -> bool {
        self.process.terminate_requested.load(Ordering::SeqCst)
    }

    /// Wait for the server to exit. Safe to call again after it has returned.
    pub async fn wait(&mut self) -> LaunchOutcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        let outcome = (&mut self.outcome_rx).await.unwrap_or_else(|_| {
            LaunchOutcome::Failed(LaunchFailure::new("server monitor stopped unexpectedly"))
        });
        self.outcome = Some(outcome.clone());
        outcome
    }
}

/// Build the server arguments, replacing `{port}` and `{directory}` placeholders.
fn build_args(config: &ServerConfig, session: &ServerSession) -> Vec<String> {
    let port = session.port().to_string();
    let directory = session.directory().to_string_lossy();
    config
        .args
        .iter()
        .map(|arg| arg.replace("{port}", &port).replace("{directory}", &directory))
        .collect()
}

/// Start the server for `session` without waiting for it.
///
/// Must be called from within a tokio runtime. On success the session moves to
/// Running and the returned handle delivers the exit outcome later.
pub fn launch(
    session: &mut ServerSession,
    config: &ServerConfig,
) -> Result<ServerHandle, LaunchFailure> {
    if session.state() != SessionState::NotStarted {
        return Err(LaunchFailure::new(format!(
            "cannot launch a session that is {}",
            session.state()
        )));
    }

    let args = build_args(config, session);
    tracing::info!(
        command = %config.command,
        args = ?args,
        directory = %session.directory().display(),
        port = session.port(),
        "spawning static file server"
    );

    let mut child = Command::new(&config.command)
        .args(&args)
        .current_dir(session.directory())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0) // New process group so termination reaches its children
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            LaunchFailure::new(format!("failed to spawn '{}': {}", config.command, e))
        })?;

    let pid = child.id().unwrap_or(0);
    session
        .mark_running()
        .map_err(|e| LaunchFailure::new(e.to_string()))?;
    tracing::info!(pid, "server process started");

    let process = Arc::new(ProcessState {
        pid,
        terminate_requested: AtomicBool::new(false),
    });

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let max_diagnostic_bytes = config.max_diagnostic_bytes;
    let (outcome_tx, outcome_rx) = oneshot::channel();
    let monitor_state = Arc::clone(&process);

    tokio::spawn(async move {
        if let Some(stdout) = stdout {
            tokio::spawn(forward_lines(stdout));
        }
        let diagnostics = stderr.map(|stderr| {
            tokio::spawn(collect_diagnostics(stderr, max_diagnostic_bytes))
        });

        let status = child.wait().await;
        // Leftover group members would keep stderr open and the outcome pending.
        if monitor_state.signal_group(Signal::SIGKILL) {
            tracing::debug!(pid, "killed processes left behind by the server");
        }

        let text = match diagnostics {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        let outcome = match status {
            Ok(status) => outcome_from_status(status, text),
            Err(e) => LaunchOutcome::Failed(LaunchFailure::new(format!(
                "failed to wait for server: {e}"
            ))),
        };
        tracing::info!(pid, outcome = ?outcome, "server process exited");
        let _ = outcome_tx.send(outcome);
    });

    Ok(ServerHandle {
        process,
        outcome_rx,
        outcome: None,
    })
}

fn outcome_from_status(status: ExitStatus, diagnostics: String) -> LaunchOutcome {
    if status.success() {
        return LaunchOutcome::Exited;
    }
    if let Some(signal) = status.signal() {
        return LaunchOutcome::Signaled { signal };
    }
    let raw_message = if diagnostics.trim().is_empty() {
        match status.code() {
            Some(code) => format!("server exited with status {code}"),
            None => "server exited abnormally".to_string(),
        }
    } else {
        diagnostics
    };
    LaunchOutcome::Failed(LaunchFailure { raw_message })
}

/// Read the next line, replacing invalid UTF-8. None at EOF or on a read error.
async fn next_line_lossy<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> Option<String> {
    buf.clear();
    match reader.read_until(b'\n', buf).await {
        Ok(0) => None,
        Ok(_) => {
            if buf.last() == Some(&b'\n') {
                buf.pop();
            }
            Some(String::from_utf8_lossy(buf).into_owned())
        }
        Err(e) => {
            tracing::debug!("stopped reading server output: {e}");
            None
        }
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(stream: R) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    while let Some(line) = next_line_lossy(&mut reader, &mut buf).await {
        tracing::debug!(target: "publish_preview::server", "{line}");
    }
}

/// Read stderr to EOF, logging each line and keeping the first `max_bytes` of it.
async fn collect_diagnostics<R: AsyncRead + Unpin>(stream: R, max_bytes: usize) -> String {
    let mut collected = String::new();
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    while let Some(line) = next_line_lossy(&mut reader, &mut buf).await {
        tracing::debug!(target: "publish_preview::server", "{line}");
        if collected.len() + line.len() < max_bytes {
            collected.push_str(&line);
            collected.push('\n');
        }
    }
    collected
}
