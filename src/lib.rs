//! ptyproc — interactive pseudo-terminal process controller.
//!
//! Spawns a child command attached to a PTY master/slave pair, streams
//! its combined stdout/stderr back to the caller, forwards
//! caller-supplied bytes into its stdin, and lets the caller drive an
//! interactive session by matching regular-expression patterns against
//! accumulating output (classic `expect`-style automation).
//!
//! The [`PtyProcess`] facade is the single entry point; see its
//! methods for the `read`/`write`/`find`/`alive`/`wait`/`autopsy`
//! contract.

// Error documentation is deferred - the errors are self-explanatory from types
#![allow(clippy::missing_errors_doc)]

mod command;
mod controller;
mod error;
mod pty;

pub use command::Command;
pub use controller::{PtyProcess, DEFAULT_RECOVER_MAX};
pub use error::{ProcessError, PtyError};
