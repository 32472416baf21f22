/// Top-level preview flow: resolve the output folder, start the server, and
/// hand control to the shutdown coordinator.
use crate::classify::{classify, Diagnostic};
use crate::config::{ConfigError, PreviewConfig};
use crate::launcher;
use crate::session::{self, ServerSession, SessionError};
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};
use crate::signals::{InterruptGuard, ShutdownSignal};
use std::io::{BufRead, Write};
use std::path::Path;
use std::time::Duration;

/// Everything that can stop a preview run before the coordinator takes over.
#[derive(Debug)]
pub enum PreviewError {
    Config(ConfigError),
    Session(SessionError),
    /// The server could not be started; already classified for display.
    Launch(Diagnostic),
    /// Ctrl-C handling could not be installed.
    Interrupt(std::io::Error),
}

impl std::fmt::Display for PreviewError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreviewError::Config(e) => write!(f, "{e}"),
            PreviewError::Session(e) => write!(f, "{e}"),
            PreviewError::Launch(diagnostic) => write!(f, "{diagnostic}"),
            PreviewError::Interrupt(e) => write!(f, "failed to install Ctrl-C handler: {e}"),
        }
    }
}

impl std::error::Error for PreviewError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PreviewError::Config(e) => Some(e),
            PreviewError::Session(e) => Some(e),
            PreviewError::Launch(_) => None,
            PreviewError::Interrupt(e) => Some(e),
        }
    }
}

impl From<ConfigError> for PreviewError {
    fn from(e: ConfigError) -> Self {
        PreviewError::Config(e)
    }
}

impl From<SessionError> for PreviewError {
    fn from(e: SessionError) -> Self {
        PreviewError::Session(e)
    }
}

/// The ready message printed once the server is up.
pub fn banner(session: &ServerSession) -> String {
    format!(
        "🌍 Starting web server at {}\n\nPress ENTER or CONTROL+C to stop the server and exit",
        session.url()
    )
}

/// Serve `<site_root>/<output_folder>` until ENTER, Ctrl-C, or the server dies.
pub async fn run(config: &PreviewConfig, site_root: &Path) -> Result<ShutdownReport, PreviewError> {
    let stdin = std::io::BufReader::new(std::io::stdin());
    run_with_input(config, site_root, stdin, &mut std::io::stdout()).await
}

/// `run` with injectable input and banner output.
pub async fn run_with_input<R, W>(
    config: &PreviewConfig,
    site_root: &Path,
    input: R,
    out: &mut W,
) -> Result<ShutdownReport, PreviewError>
where
    R: BufRead + Send + 'static,
    W: Write,
{
    let directory = session::resolve_output_folder(site_root, &config.server.output_folder)?;
    let mut session = ServerSession::new(directory, config.server.port)?;

    let shutdown = ShutdownSignal::new();
    let _interrupts =
        InterruptGuard::install(shutdown.clone()).map_err(PreviewError::Interrupt)?;

    let server = launcher::launch(&mut session, &config.server)
        .map_err(|failure| PreviewError::Launch(classify(&failure.raw_message, session.port())))?;

    let _ = writeln!(out, "{}", banner(&session));
    let _ = out.flush();

    let coordinator = ShutdownCoordinator::new(
        shutdown,
        Duration::from_secs(config.shutdown.grace_period_secs),
    );
    Ok(coordinator.run(&mut session, server, input).await)
}
