//! Error taxonomy for the PTY controller.
//!
//! Every fault is reported through [`ProcessError`], with the forensic
//! cache tail attached wherever it is available (see [`CacheContext`]).
//! Destructors and finalizers swallow these errors rather than
//! propagate them; everywhere else they surface to the caller.

use thiserror::Error;

/// Number of trailing cache bytes attached to error messages as forensic context.
pub const CACHE_TAIL: usize = 256;

/// Errors produced by [`crate::pty::spawn`].
#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to open PTY: {0}")]
    OpenPty(#[source] nix::Error),

    #[error("failed to fork: {0}")]
    Fork(#[source] nix::Error),

    #[error("failed to create session: {0}")]
    Setsid(#[source] nix::Error),

    #[error("failed to set controlling terminal: {0}")]
    SetControllingTerminal(#[source] nix::Error),

    #[error("failed to disable local echo: {0}")]
    Termios(#[source] nix::Error),

    #[error("command is empty")]
    EmptyCommand,

    #[error("invalid command string: {0}")]
    InvalidCommand(#[source] std::ffi::NulError),
}

/// Errors produced by the [`crate::controller::PtyProcess`] facade.
///
/// These are the error kinds named by the controller's public contract:
/// `BadParameter`, `SpawnFailed`, `IoError`, `UnexpectedEOF`, `ParseError`.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The command was neither a non-empty string nor a non-empty sequence.
    #[error("bad parameter: {message}")]
    BadParameter { message: String },

    /// PTY allocation, fork, or exec failed, either at construction or during recovery.
    #[error("spawn failed: {0}")]
    SpawnFailed(#[source] PtyError),

    /// Reading or writing the master fd failed, or the operation targeted a dead child.
    #[error("I/O error: {message}{context}")]
    IoError { message: String, context: CacheContext },

    /// A zero-byte read from an otherwise-ready master fd: the child closed its side.
    #[error("unexpected EOF{context}")]
    UnexpectedEof { context: CacheContext },

    /// A regex passed to `find` was ill-formed.
    #[error("invalid pattern: {0}")]
    ParseError(#[source] regex::Error),
}

impl ProcessError {
    /// Build an `IoError` with the cache tail attached as diagnostic context.
    #[must_use]
    pub fn io(message: impl Into<String>, cache: &[u8]) -> Self {
        Self::IoError {
            message: message.into(),
            context: CacheContext::new(cache),
        }
    }

    /// Build an `UnexpectedEof` with the cache tail attached as diagnostic context.
    #[must_use]
    pub fn eof(cache: &[u8]) -> Self {
        Self::UnexpectedEof {
            context: CacheContext::new(cache),
        }
    }

    /// Build a `BadParameter` error.
    #[must_use]
    pub fn bad_parameter(message: impl Into<String>) -> Self {
        Self::BadParameter {
            message: message.into(),
        }
    }
}

/// Lazily-formatted forensic cache tail attached to errors.
///
/// Holds up to [`CACHE_TAIL`] trailing bytes of the cache at the moment
/// of failure, rendered lossily as UTF-8 for display.
#[derive(Debug)]
pub struct CacheContext(String);

impl CacheContext {
    #[must_use]
    pub fn new(cache: &[u8]) -> Self {
        let start = cache.len().saturating_sub(CACHE_TAIL);
        let tail = String::from_utf8_lossy(&cache[start..]);
        Self(tail.into_owned())
    }
}

impl std::fmt::Display for CacheContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            Ok(())
        } else {
            write!(f, " (last output: {:?})", self.0)
        }
    }
}
