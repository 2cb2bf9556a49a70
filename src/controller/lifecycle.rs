//! Child lifecycle: non-blocking and blocking reap, exit
//! classification, kill, bounded recovery, postmortem (§4.B).

use super::ProcessState;
use crate::error::{ProcessError, CACHE_TAIL};
use crate::pty;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};

/// Reap `state`'s child without blocking, classify its death if any,
/// and optionally respawn.
///
/// See spec §4.B for the six-step algorithm this follows: steps 1–3
/// reap and classify, step 4–5 gate recovery on the `recover` flag and
/// the `recover_max` ceiling, step 6 respawns and recurses (bounded
/// because `recover_attempts` strictly increases). One deliberate
/// deviation from the literal step 2 wording: death does not close
/// `master` here (see the comment at the call site below) — only
/// `wait_locked` and `finalize_locked` do that, since they mark the
/// point a caller has declared it is done with the child, whereas
/// `alive_locked` runs as a side effect of `read`/`write`/`find` and
/// must not cut those operations off from output the child already
/// wrote before dying.
pub(crate) fn alive_locked(state: &mut ProcessState, recover: bool) -> Result<bool, ProcessError> {
    if let Some(pid) = state.child_pid {
        loop {
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => return Ok(true),
                Ok(WaitStatus::Exited(_, code)) => {
                    state.exit_code = Some(code);
                    // `master` deliberately stays open here: the kernel may
                    // still be holding output the child wrote before it
                    // died, and a caller draining with `read`/`find` must
                    // still be able to reach it. The fd closes for real
                    // once an actual read hits EOF, or on explicit `close`.
                    state.child_pid = None;
                    break;
                }
                Ok(WaitStatus::Signaled(_, sig, _)) => {
                    state.exit_signal = Some(sig as i32);
                    state.child_pid = None;
                    break;
                }
                Ok(_) => continue, // Stopped / Continued: transient, not death.
                Err(nix::Error::EINTR) => continue,
                Err(nix::Error::ECHILD) => {
                    // Already reaped by someone else; cause unknown.
                    state.child_pid = None;
                    break;
                }
                Err(e) => {
                    return Err(ProcessError::io(format!("waitpid failed: {e}"), &state.history));
                }
            }
        }
    }

    if !recover {
        return Ok(false);
    }
    if state.recover_attempts >= state.recover_max {
        return Ok(false);
    }

    state.recover_attempts += 1;
    tracing::warn!(
        attempt = state.recover_attempts,
        max = state.recover_max,
        "respawning child after death"
    );
    respawn_locked(state)?;
    alive_locked(state, true)
}

/// Block until the child terminates by any cause, then finalize.
pub(crate) fn wait_locked(state: &mut ProcessState) -> Result<(), ProcessError> {
    let Some(pid) = state.child_pid else {
        return Ok(());
    };
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                state.exit_code = Some(code);
                break;
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                state.exit_signal = Some(sig as i32);
                break;
            }
            Ok(_) => continue,
            Err(nix::Error::EINTR) => continue,
            Err(nix::Error::ECHILD) => break, // already gone; unknown cause
            Err(e) => {
                return Err(ProcessError::io(format!("waitpid failed: {e}"), &state.cache));
            }
        }
    }
    close_master(state);
    Ok(())
}

/// Idempotent teardown. If a child is still recorded alive, sends
/// `SIGKILL` and blocking-reaps it; then closes the master fd if open.
/// Swallows every error: this is the finalizer called from `Drop` and
/// from the public `close`, and per §7 destructors must not surface
/// faults.
pub(crate) fn finalize_locked(state: &mut ProcessState) {
    if let Some(pid) = state.child_pid {
        let _ = signal::kill(pid, Signal::SIGKILL);
        loop {
            match waitpid(pid, None) {
                Ok(WaitStatus::Exited(_, code)) => {
                    state.exit_code = Some(code);
                    break;
                }
                Ok(WaitStatus::Signaled(_, sig, _)) => {
                    state.exit_signal = Some(sig as i32);
                    break;
                }
                Ok(_) => continue,
                Err(nix::Error::EINTR) => continue,
                Err(_) => break,
            }
        }
    }
    close_master(state);
}

/// Clear `child_pid` and drop the master `OwnedFd`, closing it exactly
/// once (invariant 5 in §8). Safe to call when already cleared.
fn close_master(state: &mut ProcessState) {
    state.child_pid = None;
    state.master = None;
}

/// Re-spawn the controller's original command, replacing `master` and
/// `child_pid` and resetting the exit classification so the new child
/// starts from a clean `RUNNING` state.
fn respawn_locked(state: &mut ProcessState) -> Result<(), ProcessError> {
    let spawned = pty::spawn(&state.argv).map_err(ProcessError::SpawnFailed)?;
    tracing::info!(pid = spawned.pid.as_raw(), argv = ?state.argv, "recovery respawned child");
    state.master = Some(spawned.master);
    state.child_pid = Some(spawned.pid);
    state.exit_code = None;
    state.exit_signal = None;
    Ok(())
}

/// Human-readable postmortem: exit code, exit signal, and the last
/// [`CACHE_TAIL`] bytes of cache. If the child is still recorded
/// alive, says so instead of inspecting exit state.
pub(crate) fn autopsy_locked(state: &ProcessState) -> String {
    if state.child_pid.is_some() {
        return "child is still alive".to_string();
    }
    let start = state.history.len().saturating_sub(CACHE_TAIL);
    let tail = String::from_utf8_lossy(&state.history[start..]);
    match (state.exit_code, state.exit_signal) {
        (Some(code), _) => format!("exit_code: {code}; last output: {tail:?}"),
        (_, Some(sig)) => format!("exit_signal: {sig}; last output: {tail:?}"),
        (None, None) => format!("child status unknown (lost to ECHILD); last output: {tail:?}"),
    }
}
