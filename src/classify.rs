//! Turns the server's raw failure output into something a user can act on.

use std::io::Write;

const TRACEBACK_MARKER: &str = "Traceback";
const ADDRESS_IN_USE: &str = "Address already in use";

/// A failure message ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// The server could not bind its port.
    PortInUse { port: u16 },
    /// Anything unrecognized, shown as-is.
    Raw(String),
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::PortInUse { port } => write!(
                f,
                "A localhost server is already running on port number {port}.\n\
                 - Perhaps another 'publish-preview' session is running?\n\
                 - The default server is Python's simple HTTP server, so to find any\n  \
                 running processes, you can use the 'ps' command (or Activity Monitor)\n  \
                 and search for 'python'. You can then terminate any previous process\n  \
                 in order to start a new one."
            ),
            Diagnostic::Raw(message) => f.write_str(message),
        }
    }
}

/// Classify the diagnostic text emitted by a failed server.
///
/// Both markers are matched exactly as Python prints them.
pub fn classify(raw_message: &str, port: u16) -> Diagnostic {
    if raw_message.starts_with(TRACEBACK_MARKER) && raw_message.contains(ADDRESS_IN_USE) {
        return Diagnostic::PortInUse { port };
    }
    Diagnostic::Raw(raw_message.to_string())
}

/// Write the failure report. Write errors are dropped; there is nowhere left to report them.
pub fn write_failure<W: Write>(out: &mut W, diagnostic: &Diagnostic) {
    let _ = writeln!(out, "\n❌ Failed to start local web server:\n{diagnostic}");
    let _ = out.flush();
}
