//! Controller facade: the `PtyProcess` struct wiring §4.A–§4.E
//! together behind a single non-reentrant lock.
//!
//! The spec's design notes (§9) allow either a reentrant mutex or a
//! refactor of internal calls into non-locking variants with an
//! identical observable contract. This module takes the refactor
//! route: `PtyProcess::state` is a plain [`std::sync::Mutex`], and
//! every public method locks it once, then calls private `*_locked`
//! functions (in [`lifecycle`] and [`io`]) that assume the lock is
//! already held and call each other directly. `find` calling `read`'s
//! internals, or `read`/`write` calling `alive`'s internals, therefore
//! never double-locks.

mod io;
mod lifecycle;

use crate::command::Command;
use crate::error::ProcessError;
use crate::pty;
use nix::unistd::Pid;
use std::os::fd::OwnedFd;
use std::sync::{Mutex, MutexGuard};

/// The default number of caller-triggered respawns permitted over a
/// controller's lifetime (§3: `recover_max`, default 3).
pub const DEFAULT_RECOVER_MAX: u32 = 3;

/// Mutable controller state, guarded by `PtyProcess::state`.
///
/// Mirrors the attribute list in spec §3 exactly: `command` (`argv`),
/// `master_fd` (`master`), `child_pid`, `cache`, `exit_code`,
/// `exit_signal`, `recover_max`, `recover_attempts`.
pub(crate) struct ProcessState {
    pub(crate) argv: Vec<String>,
    pub(crate) master: Option<OwnedFd>,
    pub(crate) child_pid: Option<Pid>,
    pub(crate) cache: Vec<u8>,
    /// The last [`crate::error::CACHE_TAIL`] bytes ever pulled from
    /// `master`, independent of whether the caller has since consumed
    /// them out of `cache`. Forensic error context (§7) and `autopsy`
    /// read from here rather than `cache`, so a `read` that fully
    /// drains the buffer doesn't erase the evidence a following
    /// failure needs to report.
    pub(crate) history: Vec<u8>,
    pub(crate) exit_code: Option<i32>,
    pub(crate) exit_signal: Option<i32>,
    pub(crate) recover_max: u32,
    pub(crate) recover_attempts: u32,
}

/// An interactive pseudo-terminal process controller.
///
/// One `PtyProcess` owns exactly one PTY master fd and, while the
/// child is alive, exactly one child pid (invariants 1–2 in §3).
/// Constructing one spawns the child immediately; dropping one
/// finalizes it (best-effort `kill` + reap + fd close).
pub struct PtyProcess {
    state: Mutex<ProcessState>,
}

impl PtyProcess {
    /// Spawn `command`, using the default recovery ceiling
    /// ([`DEFAULT_RECOVER_MAX`]).
    ///
    /// # Errors
    ///
    /// [`ProcessError::BadParameter`] if `command` is empty (after
    /// shell-splitting, if given as a string). [`ProcessError::SpawnFailed`]
    /// if PTY allocation or fork fails.
    pub fn spawn(command: impl Into<Command>) -> Result<Self, ProcessError> {
        Self::spawn_with_recover_max(command, DEFAULT_RECOVER_MAX)
    }

    /// Spawn `command` with an explicit `recover_max` ceiling on
    /// caller-triggered respawns (see [`PtyProcess::alive`]).
    ///
    /// # Errors
    ///
    /// Same as [`PtyProcess::spawn`].
    pub fn spawn_with_recover_max(
        command: impl Into<Command>,
        recover_max: u32,
    ) -> Result<Self, ProcessError> {
        let argv = command.into().into_argv()?;
        let spawned = pty::spawn(&argv).map_err(ProcessError::SpawnFailed)?;
        tracing::info!(pid = spawned.pid.as_raw(), argv = ?argv, "controller spawned child");
        let state = ProcessState {
            argv,
            master: Some(spawned.master),
            child_pid: Some(spawned.pid),
            cache: Vec::new(),
            history: Vec::new(),
            exit_code: None,
            exit_signal: None,
            recover_max,
            recover_attempts: 0,
        };
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ProcessState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Pull bytes from the child's combined stdout/stderr stream.
    ///
    /// `size == 0` returns whatever is drained on the next successful
    /// read; `size > 0` returns at most that many bytes. `timeout`
    /// follows spec §4.C: `0` is a single poll cycle (return on first
    /// data, else empty), `< 0` is likewise a single attempt (may
    /// return empty), `> 0` polls up to that many seconds.
    ///
    /// # Errors
    ///
    /// [`ProcessError::IoError`] if the child is not alive or the
    /// master fd faults. [`ProcessError::UnexpectedEof`] if the child
    /// closed its side of the PTY.
    pub fn read(&self, size: usize, timeout: f64) -> Result<Vec<u8>, ProcessError> {
        io::read_locked(&mut self.lock(), size, timeout)
    }

    /// Write all of `data` into the child's stdin, retrying partial
    /// writes until every byte has been handed to the kernel.
    ///
    /// # Errors
    ///
    /// [`ProcessError::IoError`] if the child is not alive or the
    /// master fd faults.
    pub fn write(&self, data: &[u8]) -> Result<(), ProcessError> {
        io::write_locked(&mut self.lock(), data)
    }

    /// Search accumulating output for the first of `patterns` (regex
    /// source strings, compiled multi-line + dot-matches-newline) that
    /// matches, consuming the match and everything before it.
    ///
    /// Patterns are tried in list order on every pass; the first one
    /// whose `search` succeeds wins, regardless of where in the buffer
    /// it matches (§4.D) — not longest-match, not earliest-position.
    ///
    /// # Errors
    ///
    /// [`ProcessError::ParseError`] if a pattern fails to compile.
    /// [`ProcessError::IoError`]/[`ProcessError::UnexpectedEof`] as in
    /// [`PtyProcess::read`].
    pub fn find(
        &self,
        patterns: &[&str],
        timeout: f64,
    ) -> Result<(Option<usize>, Option<Vec<u8>>), ProcessError> {
        io::find_locked(&mut self.lock(), patterns, timeout)
    }

    /// Poll the child without blocking. With `recover == false`, this
    /// is a pure liveness check. With `recover == true`, a dead child
    /// is respawned (bounded by `recover_max`) and the respawn's
    /// liveness is itself verified recursively.
    ///
    /// # Errors
    ///
    /// [`ProcessError::SpawnFailed`] if a recovery respawn fails.
    pub fn alive(&self, recover: bool) -> Result<bool, ProcessError> {
        lifecycle::alive_locked(&mut self.lock(), recover)
    }

    /// Block until the child terminates by any cause.
    ///
    /// # Errors
    ///
    /// [`ProcessError::IoError`] if `waitpid` fails for a reason other
    /// than `ECHILD` (which is treated as "already reaped").
    pub fn wait(&self) -> Result<(), ProcessError> {
        lifecycle::wait_locked(&mut self.lock())
    }

    /// A human-readable postmortem: exit code, exit signal, and the
    /// last 256 bytes of cache. If the child is still alive, says so
    /// instead.
    #[must_use]
    pub fn autopsy(&self) -> String {
        lifecycle::autopsy_locked(&self.lock())
    }

    /// Idempotent best-effort teardown: `SIGKILL` the child if alive,
    /// blocking-reap it, and close the master fd. Safe to call more
    /// than once, and safe to call instead of relying on `Drop`.
    pub fn close(&self) {
        lifecycle::finalize_locked(&mut self.lock());
    }

    /// The exit code if the child terminated normally, else `None`.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.lock().exit_code
    }

    /// The signal number if the child was killed by a signal, else `None`.
    #[must_use]
    pub fn exit_signal(&self) -> Option<i32> {
        self.lock().exit_signal
    }

    /// How many caller-triggered respawns have happened so far.
    #[must_use]
    pub fn recover_attempts(&self) -> u32 {
        self.lock().recover_attempts
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        lifecycle::finalize_locked(&mut self.lock());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessError;

    #[test]
    fn spawn_rejects_empty_command() {
        let result = PtyProcess::spawn(Vec::<String>::new());
        assert!(matches!(result, Err(ProcessError::BadParameter { .. })));
    }

    #[test]
    fn fresh_controller_has_no_exit_state_and_no_recoveries() {
        let proc = PtyProcess::spawn(vec!["cat".to_string()]).expect("spawn cat");
        assert_eq!(proc.exit_code(), None);
        assert_eq!(proc.exit_signal(), None);
        assert_eq!(proc.recover_attempts(), 0);
        proc.close();
    }

    #[test]
    fn drop_finalizes_without_panicking() {
        let proc = PtyProcess::spawn(vec!["cat".to_string()]).expect("spawn cat");
        drop(proc);
    }
}
