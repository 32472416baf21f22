/// Shutdown triggers and the single-fire signal they race to close.
///
/// Every trigger source (Ctrl-C, ENTER, the server exiting on its own) holds a
/// clone of the same `ShutdownSignal`. The first `fire` wins; the rest are no-ops.
use nix::sys::signal::{self as nix_signal, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// SIGINT (Ctrl-C).
    Interrupt,
    /// A line read from interactive input.
    Keystroke,
    /// The server process exited before any user trigger.
    ServerExited,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Trigger::Interrupt => "interrupt",
            Trigger::Keystroke => "keystroke",
            Trigger::ServerExited => "server-exited",
        };
        f.write_str(name)
    }
}

/// Cancellation context shared by all trigger sources.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<Option<Trigger>>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Close the signal with `trigger`. Returns true only for the call that closed it.
    pub fn fire(&self, trigger: Trigger) -> bool {
        let won = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(trigger);
            true
        });
        if won {
            tracing::debug!(%trigger, "shutdown triggered");
        } else {
            tracing::debug!(%trigger, "shutdown already triggered, ignoring");
        }
        won
    }

    /// The winning trigger, if any has fired.
    pub fn fired(&self) -> Option<Trigger> {
        *self.tx.borrow()
    }

    /// Wait until some trigger fires and return the winner.
    pub async fn wait(&self) -> Trigger {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(trigger) = *rx.borrow_and_update() {
                return trigger;
            }
            // `self` holds the sender, so the channel never closes while we wait.
            let _ = rx.changed().await;
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped SIGINT interception.
///
/// `install` switches SIGINT to ignored before registering the async listener,
/// so there is no window where Ctrl-C kills the process. Dropping the guard
/// stops the listener and restores the default disposition.
///
/// tokio registers its process-level SIGINT handler only once, so a later
/// `install` puts that handler back itself instead of relying on tokio.
pub struct InterruptGuard {
    listener: JoinHandle<()>,
}

impl InterruptGuard {
    /// Must be called from within a tokio runtime.
    pub fn install(shutdown: ShutdownSignal) -> std::io::Result<InterruptGuard> {
        let _disposition = DISPOSITION_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        set_sigint_disposition(SigHandler::SigIgn)?;

        let mut interrupts = match signal(SignalKind::interrupt())
            .and_then(|stream| route_sigint_to_listener().map(|()| stream))
        {
            Ok(stream) => stream,
            Err(e) => {
                let _ = set_sigint_disposition(SigHandler::SigDfl);
                return Err(e);
            }
        };

        let listener = tokio::spawn(async move {
            while interrupts.recv().await.is_some() {
                tracing::info!("received SIGINT");
                shutdown.fire(Trigger::Interrupt);
            }
        });

        tracing::debug!("SIGINT handler installed");
        Ok(InterruptGuard { listener })
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.listener.abort();
        let _disposition = DISPOSITION_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = set_sigint_disposition(SigHandler::SigDfl) {
            tracing::warn!("failed to restore default SIGINT handling: {e}");
        }
    }
}

/// Held while a guard changes the SIGINT disposition.
static DISPOSITION_LOCK: Mutex<()> = Mutex::new(());

/// The SIGINT action tokio installed the first time a listener was registered.
static LISTENER_ACTION: OnceLock<SigAction> = OnceLock::new();

/// Make SIGINT reach the tokio listener again, even after a previous guard
/// reset the disposition to the default.
fn route_sigint_to_listener() -> std::io::Result<()> {
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    let current = swap_sigint_action(&ignore)?;
    if !matches!(current.handler(), SigHandler::SigIgn | SigHandler::SigDfl) {
        LISTENER_ACTION.get_or_init(|| current);
    }

    let Some(action) = LISTENER_ACTION.get() else {
        return Err(std::io::Error::other("SIGINT listener handler is not registered"));
    };
    swap_sigint_action(action)?;
    tracing::debug!("SIGINT routed to listener");
    Ok(())
}

fn swap_sigint_action(action: &SigAction) -> std::io::Result<SigAction> {
    // SAFETY: `action` is either SIG_IGN or the handler tokio registered for
    // SIGINT, which only performs async-signal-safe work.
    unsafe { nix_signal::sigaction(Signal::SIGINT, action) }.map_err(std::io::Error::from)
}

fn set_sigint_disposition(handler: SigHandler) -> std::io::Result<()> {
    // SAFETY: SIG_IGN and SIG_DFL are not user handlers, so no async-signal-safety
    // requirements apply.
    unsafe { nix_signal::signal(Signal::SIGINT, handler) }
        .map(|_| ())
        .map_err(std::io::Error::from)
}
