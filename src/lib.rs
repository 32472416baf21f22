//! Local preview server for a generated static site.
//!
//! Serves `<site>/Output` with an external static-file server (Python's
//! `http.server` by default) and stops it on ENTER or Ctrl-C, whichever comes
//! first.
//!
//! - [`launcher`] spawns the server and reports how it exited.
//! - [`signals`] holds the single-fire [`signals::ShutdownSignal`] and the scoped
//!   SIGINT guard.
//! - [`shutdown`] races the triggers and stops the server exactly once.
//! - [`classify`] turns server failures (port in use) into actionable messages.
//! - [`markdown`] is the parsed-document value handed over by the site generator.

pub mod classify;
pub mod config;
pub mod launcher;
pub mod markdown;
pub mod runner;
pub mod session;
pub mod shutdown;
pub mod signals;
