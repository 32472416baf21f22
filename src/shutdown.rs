/// Shutdown coordination: wait for the first trigger, stop the server exactly
/// once, and decide the exit status.
///
/// The coordinator is Waiting until the shared `ShutdownSignal` fires (or the
/// server exits on its own), ShuttingDown while the server is being stopped and
/// reaped, and Done once the session is marked Terminated.
use crate::classify::{classify, Diagnostic};
use crate::launcher::{LaunchOutcome, ServerHandle};
use crate::session::ServerSession;
use crate::signals::{ShutdownSignal, Trigger};
use std::io::BufRead;
use std::time::Duration;

/// Overall result of a preview run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStatus {
    Success,
    Failure,
}

impl ShutdownStatus {
    pub fn code(self) -> u8 {
        match self {
            ShutdownStatus::Success => 0,
            ShutdownStatus::Failure => 1,
        }
    }
}

impl From<ShutdownStatus> for std::process::ExitCode {
    fn from(status: ShutdownStatus) -> Self {
        std::process::ExitCode::from(status.code())
    }
}

/// What happened during shutdown.
#[derive(Debug)]
pub struct ShutdownReport {
    pub trigger: Trigger,
    pub status: ShutdownStatus,
    /// How the server process ended.
    pub outcome: LaunchOutcome,
    /// Set only when the server stopped on its own.
    pub diagnostic: Option<Diagnostic>,
}

pub struct ShutdownCoordinator {
    shutdown: ShutdownSignal,
    grace_period: Duration,
}

impl ShutdownCoordinator {
    /// `shutdown` is the cancellation context every trigger source fires into.
    pub fn new(shutdown: ShutdownSignal, grace_period: Duration) -> Self {
        Self {
            shutdown,
            grace_period,
        }
    }

    /// Block until a trigger fires, then stop the server and report.
    ///
    /// A single line read from `input` counts as a keystroke. End of input is
    /// not a trigger.
    pub async fn run<R>(
        &self,
        session: &mut ServerSession,
        mut server: ServerHandle,
        input: R,
    ) -> ShutdownReport
    where
        R: BufRead + Send + 'static,
    {
        spawn_keystroke_reader(input, self.shutdown.clone());

        let trigger = tokio::select! {
            trigger = self.shutdown.wait() => trigger,
            _ = server.wait() => {
                self.shutdown.fire(Trigger::ServerExited);
                self.shutdown.fired().unwrap_or(Trigger::ServerExited)
            }
        };
        tracing::info!(%trigger, pid = server.pid(), "shutting down");

        // A no-op for a server that already exited, or if stopped before.
        server.terminate();
        let outcome = self.reap(&mut server).await;

        if let Err(e) = session.mark_terminated() {
            tracing::warn!("{e}");
        }

        let (status, diagnostic) = match trigger {
            Trigger::Interrupt | Trigger::Keystroke => (ShutdownStatus::Success, None),
            Trigger::ServerExited => (
                ShutdownStatus::Failure,
                Some(diagnose(&outcome, session.port())),
            ),
        };

        tracing::debug!(%trigger, ?status, ?outcome, "shutdown complete");
        ShutdownReport {
            trigger,
            status,
            outcome,
            diagnostic,
        }
    }

    /// Wait for the server to exit, escalating to SIGKILL after the grace period.
    async fn reap(&self, server: &mut ServerHandle) -> LaunchOutcome {
        match tokio::time::timeout(self.grace_period, server.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    pid = server.pid(),
                    grace_secs = self.grace_period.as_secs_f64(),
                    "server still running after SIGTERM"
                );
                server.kill();
                server.wait().await
            }
        }
    }
}

/// Failure text for a server that stopped before any user trigger.
fn diagnose(outcome: &LaunchOutcome, port: u16) -> Diagnostic {
    match outcome {
        LaunchOutcome::Failed(failure) => classify(&failure.raw_message, port),
        LaunchOutcome::Exited => Diagnostic::Raw("The server exited unexpectedly.".to_string()),
        LaunchOutcome::Signaled { signal } => {
            Diagnostic::Raw(format!("The server was stopped by signal {signal}."))
        }
    }
}

/// Read one line on a dedicated thread and fire `Keystroke` if it arrives.
///
/// The thread is detached: a blocked stdin read must not hold up process exit.
fn spawn_keystroke_reader<R>(mut input: R, shutdown: ShutdownSignal)
where
    R: BufRead + Send + 'static,
{
    let spawned = std::thread::Builder::new()
        .name("preview-stdin".to_string())
        .spawn(move || {
            let mut line = String::new();
            match input.read_line(&mut line) {
                Ok(0) => tracing::debug!("input closed, waiting for Ctrl-C"),
                Ok(_) => {
                    shutdown.fire(Trigger::Keystroke);
                }
                Err(e) => tracing::warn!("failed to read input: {e}"),
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("failed to start input reader: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::launcher::launch;
    use crate::session::SessionState;
    use nix::sys::signal::Signal;
    use std::io::{BufReader, Cursor, Read};
    use std::sync::mpsc;

    /// Blocks on read until the test sends a chunk; EOF once the sender is gone.
    struct PendingInput {
        rx: mpsc::Receiver<Vec<u8>>,
        buf: Vec<u8>,
    }

    impl Read for PendingInput {
        fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
            if self.buf.is_empty() {
                match self.rx.recv() {
                    Ok(chunk) => self.buf = chunk,
                    Err(_) => return Ok(0),
                }
            }
            let n = out.len().min(self.buf.len());
            out[..n].copy_from_slice(&self.buf[..n]);
            self.buf.drain(..n);
            Ok(n)
        }
    }

    fn pending_input() -> (mpsc::Sender<Vec<u8>>, BufReader<PendingInput>) {
        let (tx, rx) = mpsc::channel();
        (
            tx,
            BufReader::new(PendingInput {
                rx,
                buf: Vec::new(),
            }),
        )
    }

    fn sleeping_server() -> ServerConfig {
        ServerConfig {
            command: "sleep".to_string(),
            args: vec!["30".to_string()],
            ..Default::default()
        }
    }

    fn sh(script: &str) -> ServerConfig {
        ServerConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            ..Default::default()
        }
    }

    async fn run_with_timeout<R: BufRead + Send + 'static>(
        coordinator: &ShutdownCoordinator,
        session: &mut ServerSession,
        server: ServerHandle,
        input: R,
    ) -> ShutdownReport {
        tokio::time::timeout(
            Duration::from_secs(15),
            coordinator.run(session, server, input),
        )
        .await
        .expect("coordinator did not finish")
    }

    #[tokio::test]
    async fn test_keystroke_stops_server_with_success() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ServerSession::new(dir.path(), 8000).unwrap();
        let server = launch(&mut session, &sleeping_server()).unwrap();
        let coordinator = ShutdownCoordinator::new(ShutdownSignal::new(), Duration::from_secs(5));

        let report =
            run_with_timeout(&coordinator, &mut session, server, Cursor::new(b"\n".to_vec())).await;

        assert_eq!(report.trigger, Trigger::Keystroke);
        assert_eq!(report.status, ShutdownStatus::Success);
        assert_eq!(
            report.outcome,
            LaunchOutcome::Signaled {
                signal: Signal::SIGTERM as i32
            }
        );
        assert!(report.diagnostic.is_none());
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[tokio::test]
    async fn test_interrupt_wins_over_pending_keystroke() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ServerSession::new(dir.path(), 8000).unwrap();
        let server = launch(&mut session, &sleeping_server()).unwrap();
        let shutdown = ShutdownSignal::new();
        let coordinator = ShutdownCoordinator::new(shutdown.clone(), Duration::from_secs(5));
        let (keys, input) = pending_input();

        let interrupter = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            interrupter.fire(Trigger::Interrupt);
        });

        let report = run_with_timeout(&coordinator, &mut session, server, input).await;
        assert_eq!(report.trigger, Trigger::Interrupt);
        assert_eq!(report.status, ShutdownStatus::Success);
        assert!(matches!(report.outcome, LaunchOutcome::Signaled { .. }));
        assert_eq!(session.state(), SessionState::Terminated);

        // The late keystroke changes nothing.
        keys.send(b"\n".to_vec()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!shutdown.fire(Trigger::Keystroke));
        assert_eq!(shutdown.fired(), Some(Trigger::Interrupt));
    }

    #[tokio::test]
    async fn test_simultaneous_triggers_keep_the_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ServerSession::new(dir.path(), 8000).unwrap();
        let server = launch(&mut session, &sleeping_server()).unwrap();
        let shutdown = ShutdownSignal::new();
        shutdown.fire(Trigger::Interrupt);
        let coordinator = ShutdownCoordinator::new(shutdown.clone(), Duration::from_secs(5));

        let report =
            run_with_timeout(&coordinator, &mut session, server, Cursor::new(b"\n".to_vec())).await;

        assert_eq!(report.trigger, Trigger::Interrupt);
        assert_eq!(report.status, ShutdownStatus::Success);
    }

    #[tokio::test]
    async fn test_port_in_use_failure_is_classified() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ServerSession::new(dir.path(), 4567).unwrap();
        let config = sh("printf 'Traceback (most recent call last):\\nOSError: [Errno 98] Address already in use\\n' >&2; exit 1");
        let server = launch(&mut session, &config).unwrap();
        let coordinator = ShutdownCoordinator::new(ShutdownSignal::new(), Duration::from_secs(5));
        let (_keys, input) = pending_input();

        let report = run_with_timeout(&coordinator, &mut session, server, input).await;

        assert_eq!(report.trigger, Trigger::ServerExited);
        assert_eq!(report.status, ShutdownStatus::Failure);
        assert_eq!(report.status.code(), 1);
        assert_eq!(report.diagnostic, Some(Diagnostic::PortInUse { port: 4567 }));
        assert!(report
            .diagnostic
            .unwrap()
            .to_string()
            .contains("port number 4567"));
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[tokio::test]
    async fn test_other_failure_passes_raw_text() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ServerSession::new(dir.path(), 8000).unwrap();
        let server = launch(&mut session, &sh("echo 'no such module' >&2; exit 2")).unwrap();
        let coordinator = ShutdownCoordinator::new(ShutdownSignal::new(), Duration::from_secs(5));

        let report = run_with_timeout(&coordinator, &mut session, server, Cursor::new(Vec::new())).await;

        assert_eq!(report.status, ShutdownStatus::Failure);
        assert_eq!(
            report.diagnostic,
            Some(Diagnostic::Raw("no such module\n".to_string()))
        );
    }

    #[tokio::test]
    async fn test_clean_exit_before_trigger_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ServerSession::new(dir.path(), 8000).unwrap();
        let server = launch(&mut session, &sh("exit 0")).unwrap();
        let coordinator = ShutdownCoordinator::new(ShutdownSignal::new(), Duration::from_secs(5));
        let (_keys, input) = pending_input();

        let report = run_with_timeout(&coordinator, &mut session, server, input).await;

        assert_eq!(report.trigger, Trigger::ServerExited);
        assert_eq!(report.outcome, LaunchOutcome::Exited);
        assert_eq!(report.status, ShutdownStatus::Failure);
        assert_eq!(
            report.diagnostic,
            Some(Diagnostic::Raw("The server exited unexpectedly.".to_string()))
        );
    }

    #[tokio::test]
    async fn test_keystroke_after_exit_with_background_child_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ServerSession::new(dir.path(), 8000).unwrap();
        let server = launch(&mut session, &sh("sleep 20 & exit 1")).unwrap();
        let coordinator =
            ShutdownCoordinator::new(ShutdownSignal::new(), Duration::from_millis(300));
        let (keys, input) = pending_input();

        let typist = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(500));
            let _ = keys.send(b"\n".to_vec());
        });

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            coordinator.run(&mut session, server, input),
        )
        .await
        .expect("coordinator should not wait on the background sleep");
        typist.join().unwrap();

        assert_eq!(session.state(), SessionState::Terminated);
        assert_eq!(report.trigger, Trigger::ServerExited);
        assert_eq!(report.status, ShutdownStatus::Failure);
        assert_eq!(
            report.diagnostic,
            Some(Diagnostic::Raw("server exited with status 1".to_string()))
        );
    }

    #[tokio::test]
    async fn test_end_of_input_is_not_a_trigger() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ServerSession::new(dir.path(), 8000).unwrap();
        let server = launch(&mut session, &sleeping_server()).unwrap();
        let shutdown = ShutdownSignal::new();
        let coordinator = ShutdownCoordinator::new(shutdown.clone(), Duration::from_secs(5));

        let interrupter = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            interrupter.fire(Trigger::Interrupt);
        });

        let report = run_with_timeout(&coordinator, &mut session, server, Cursor::new(Vec::new())).await;
        assert_eq!(report.trigger, Trigger::Interrupt);
    }

    #[tokio::test]
    async fn test_escalates_to_sigkill_when_sigterm_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ServerSession::new(dir.path(), 8000).unwrap();
        let server = launch(&mut session, &sh("trap '' TERM; sleep 30")).unwrap();
        let shutdown = ShutdownSignal::new();
        let coordinator = ShutdownCoordinator::new(shutdown.clone(), Duration::from_millis(300));
        let (_keys, input) = pending_input();

        let firer = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            firer.fire(Trigger::Keystroke);
        });

        let report = run_with_timeout(&coordinator, &mut session, server, input).await;
        assert_eq!(report.status, ShutdownStatus::Success);
        assert_eq!(
            report.outcome,
            LaunchOutcome::Signaled {
                signal: Signal::SIGKILL as i32
            }
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ShutdownStatus::Success.code(), 0);
        assert_eq!(ShutdownStatus::Failure.code(), 1);
    }

    #[test]
    fn test_diagnose_signal_exit() {
        let diagnostic = diagnose(&LaunchOutcome::Signaled { signal: 9 }, 8000);
        assert_eq!(
            diagnostic,
            Diagnostic::Raw("The server was stopped by signal 9.".to_string())
        );
    }
}
