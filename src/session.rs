/// One preview run: the folder being served, the port, and where the
/// spawned server is in its lifecycle.
use std::path::{Path, PathBuf};

/// Lifecycle of the spawned server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Running,
    Terminated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::NotStarted => "not started",
            SessionState::Running => "running",
            SessionState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Errors raised by session setup and state transitions.
#[derive(Debug)]
pub enum SessionError {
    /// The generated output folder does not exist.
    OutputFolderNotFound { path: PathBuf },
    /// Port 0 asks the OS for any port, which the banner could not announce.
    InvalidPort,
    /// A transition the lifecycle does not allow.
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::OutputFolderNotFound { path } => {
                write!(
                    f,
                    "output folder not found at {} (generate the site first)",
                    path.display()
                )
            }
            SessionError::InvalidPort => write!(f, "port must be between 1 and 65535"),
            SessionError::InvalidTransition { from, to } => {
                write!(f, "invalid session transition from {from} to {to}")
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// Resolve `<site_root>/<output_folder>` to a canonical directory path.
pub fn resolve_output_folder(
    site_root: &Path,
    output_folder: &str,
) -> Result<PathBuf, SessionError> {
    let path = site_root.join(output_folder);
    match path.canonicalize() {
        Ok(resolved) if resolved.is_dir() => Ok(resolved),
        _ => Err(SessionError::OutputFolderNotFound { path }),
    }
}

#[derive(Debug)]
pub struct ServerSession {
    directory: PathBuf,
    port: u16,
    state: SessionState,
}

impl ServerSession {
    /// Create a session for an existing directory.
    pub fn new(directory: impl Into<PathBuf>, port: u16) -> Result<Self, SessionError> {
        let directory = directory.into();
        if port == 0 {
            return Err(SessionError::InvalidPort);
        }
        if !directory.is_dir() {
            return Err(SessionError::OutputFolderNotFound { path: directory });
        }
        Ok(Self {
            directory,
            port,
            state: SessionState::NotStarted,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The address announced in the ready banner.
    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// NotStarted -> Running, after a successful spawn.
    pub(crate) fn mark_running(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::NotStarted, SessionState::Running)
    }

    /// Running -> Terminated. Terminated is absorbing.
    pub(crate) fn mark_terminated(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Running, SessionState::Terminated)
    }

    fn transition(&mut self, from: SessionState, to: SessionState) -> Result<(), SessionError> {
        if self.state != from {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::debug!(from = %from, to = %to, port = self.port, "session transition");
        self.state = to;
        Ok(())
    }
}
