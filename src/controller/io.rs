//! Read engine, pattern matcher, and writer (§4.C, §4.D, §4.E).
//!
//! The spec calls for polling the master fd "for readability/writability
//! with a short delay". The teacher's own PTY-reading code
//! (`pty_reader_task`, `run_attach_bridge` in the original `botty`
//! server) doesn't reach for `poll`/`select` at all: it opens the
//! master fd `O_NONBLOCK` and attempts the syscall directly, treating
//! `EAGAIN` as "not ready yet" and sleeping before retrying. This
//! module follows that same pattern for both directions.

use super::lifecycle;
use super::ProcessState;
use crate::error::{ProcessError, CACHE_TAIL};
use regex::bytes::RegexBuilder;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::time::{Duration, Instant};

/// How long to sleep after an `EAGAIN` before retrying the syscall.
const POLL_DELAY: Duration = Duration::from_millis(10);

/// Maximum bytes pulled from the master fd in a single read syscall.
const CHUNK: usize = 1024;

/// Snippets longer than this are truncated to head…tail form for logging.
const SNIPPET_THRESHOLD: usize = 600;

/// Length of each half of a truncated snippet.
const SNIPPET_EDGE: usize = 30;

pub(crate) fn read_locked(
    state: &mut ProcessState,
    size: usize,
    timeout: f64,
) -> Result<Vec<u8>, ProcessError> {
    fail_if_finalized(state, "read")?;

    let start = Instant::now();
    loop {
        if let Some(ready) = take_from_cache(state, size) {
            return Ok(ready);
        }
        pull_once(state)?;
        if let Some(ready) = take_from_cache(state, size) {
            return Ok(ready);
        }
        // timeout==0: a single poll cycle, return whatever arrived (possibly
        // nothing). timeout<0: likewise a single attempt. timeout>0: keep
        // polling until the deadline, then return accumulated data.
        if timeout <= 0.0 || start.elapsed().as_secs_f64() > timeout {
            return Ok(drain_cache(state));
        }
    }
}

pub(crate) fn write_locked(state: &mut ProcessState, data: &[u8]) -> Result<(), ProcessError> {
    fail_if_finalized(state, "write")?;

    let mut remaining = data;
    while !remaining.is_empty() {
        let Some(raw_fd) = state.master.as_ref().map(AsRawFd::as_raw_fd) else {
            return Err(ProcessError::io("no master fd", &state.cache));
        };
        // SAFETY: raw_fd is the master fd owned by this controller for as
        // long as `state.master` holds it; no other code closes it concurrently.
        #[allow(unsafe_code)]
        let borrowed = unsafe { BorrowedFd::borrow_raw(raw_fd) };
        match nix::unistd::write(borrowed, remaining) {
            Ok(0) => {}
            Ok(n) => {
                tracing::debug!(fd = raw_fd, len = n, snippet = %snippet(&remaining[..n]), "wrote to child");
                remaining = &remaining[n..];
            }
            Err(nix::Error::EAGAIN) => std::thread::sleep(POLL_DELAY),
            Err(nix::Error::EINTR) => {}
            Err(e) => return Err(ProcessError::io(format!("write failed: {e}"), &state.cache)),
        }
    }
    Ok(())
}

pub(crate) fn find_locked(
    state: &mut ProcessState,
    patterns: &[&str],
    timeout: f64,
) -> Result<(Option<usize>, Option<Vec<u8>>), ProcessError> {
    fail_if_finalized(state, "find")?;

    let compiled = patterns
        .iter()
        .map(|pattern| {
            RegexBuilder::new(pattern)
                .multi_line(true)
                .dot_matches_new_line(true)
                .build()
                .map_err(ProcessError::ParseError)
        })
        .collect::<Result<Vec<_>, _>>()?;

    // Re-searching the full buffer on every pass is quadratic in the
    // worst case, but patterns may straddle chunk boundaries and
    // interactive prompts are small and arrive in bursts (§4.D).
    let mut data = drain_cache(state);
    if data.is_empty() {
        data.extend(read_chunk(state)?);
    }

    let start = Instant::now();
    loop {
        for (index, re) in compiled.iter().enumerate() {
            if let Some(found) = re.find(&data) {
                let end = found.end();
                let matched = data[..end].to_vec();
                state.cache = data[end..].to_vec();
                return Ok((Some(index), Some(matched)));
            }
        }

        let expired = timeout == 0.0 || (timeout > 0.0 && start.elapsed().as_secs_f64() > timeout);
        if expired {
            state.cache = data;
            return Ok((None, None));
        }
        data.extend(read_chunk(state)?);
    }
}

/// Gate an operation on the master fd still being open.
///
/// This deliberately reaps/classifies via `alive_locked` (so exit state
/// stays current) but does *not* treat "child already died" as fatal
/// on its own: `alive_locked` no longer closes `master` the instant it
/// observes death (see its doc comment), so output the child wrote
/// before dying can still be drained here. The operation only fails
/// once `master` itself is gone — closed by a real EOF read, or by an
/// explicit `close`/`Drop`.
fn fail_if_finalized(state: &mut ProcessState, op: &str) -> Result<(), ProcessError> {
    lifecycle::alive_locked(state, false)?;
    if state.master.is_none() {
        return Err(ProcessError::io(
            format!("{op} attempted on a finalized controller"),
            &state.history,
        ));
    }
    Ok(())
}

/// Take bytes out of `state.cache` satisfying `size`, if any are ready.
/// `size == 0` drains everything; `size > 0` requires at least `size`
/// bytes buffered and returns exactly that many, keeping the rest.
fn take_from_cache(state: &mut ProcessState, size: usize) -> Option<Vec<u8>> {
    if state.cache.is_empty() {
        return None;
    }
    if size == 0 {
        return Some(drain_cache(state));
    }
    if state.cache.len() >= size {
        let remainder = state.cache.split_off(size);
        return Some(std::mem::replace(&mut state.cache, remainder));
    }
    None
}

fn drain_cache(state: &mut ProcessState) -> Vec<u8> {
    std::mem::take(&mut state.cache)
}

/// Pull one chunk from the master fd into `state.cache`.
fn pull_once(state: &mut ProcessState) -> Result<(), ProcessError> {
    let chunk = read_chunk(state)?;
    state.cache.extend_from_slice(&chunk);
    Ok(())
}

/// Attempt a single non-blocking read from the master fd. Returns an
/// empty vec on `EAGAIN` (after sleeping `POLL_DELAY`) or `EINTR`
/// (retried transparently). A zero-length or `EIO` read is the
/// platform's PTY-master EOF signal (§9 Open Question: treated
/// universally, not gated on one platform); the controller finalizes
/// before raising [`ProcessError::UnexpectedEof`].
fn read_chunk(state: &mut ProcessState) -> Result<Vec<u8>, ProcessError> {
    let Some(raw_fd) = state.master.as_ref().map(AsRawFd::as_raw_fd) else {
        return Err(ProcessError::io("no master fd", &state.cache));
    };
    let mut buf = [0u8; CHUNK];
    loop {
        // SAFETY: raw_fd is the master fd owned by this controller for as
        // long as `state.master` holds it; no other code closes it concurrently.
        #[allow(unsafe_code)]
        let borrowed = unsafe { BorrowedFd::borrow_raw(raw_fd) };
        match nix::unistd::read(borrowed, &mut buf) {
            Ok(0) => {
                let tail = state.history.clone();
                lifecycle::finalize_locked(state);
                return Err(ProcessError::eof(&tail));
            }
            Ok(n) => {
                let stripped = strip_cr(&buf[..n]);
                tracing::debug!(fd = raw_fd, len = stripped.len(), snippet = %snippet(&stripped), "read from child");
                push_history(state, &stripped);
                return Ok(stripped);
            }
            Err(nix::Error::EAGAIN) => {
                std::thread::sleep(POLL_DELAY);
                return Ok(Vec::new());
            }
            Err(nix::Error::EINTR) => continue,
            Err(nix::Error::EIO) => {
                let tail = state.history.clone();
                lifecycle::finalize_locked(state);
                return Err(ProcessError::eof(&tail));
            }
            Err(e) => return Err(ProcessError::io(format!("read failed: {e}"), &state.history)),
        }
    }
}

/// Append freshly-read bytes to the forensic history, keeping only the
/// trailing [`CACHE_TAIL`] bytes (the most any error context ever renders).
fn push_history(state: &mut ProcessState, bytes: &[u8]) {
    state.history.extend_from_slice(bytes);
    let keep_from = state.history.len().saturating_sub(CACHE_TAIL);
    state.history.drain(..keep_from);
}

/// Strip `0x0D` (carriage return) bytes on ingest, preserving
/// newlines, so invariant 3 (`cache` never contains `0x0D`) holds
/// unconditionally.
fn strip_cr(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().copied().filter(|&b| b != 0x0D).collect()
}

/// Truncate a logged snippet to head30…tail30 form past
/// [`SNIPPET_THRESHOLD`] bytes, per §6's logger contract.
fn snippet(bytes: &[u8]) -> String {
    if bytes.len() <= SNIPPET_THRESHOLD {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let head = String::from_utf8_lossy(&bytes[..SNIPPET_EDGE]);
    let tail = String::from_utf8_lossy(&bytes[bytes.len() - SNIPPET_EDGE..]);
    format!("{head}\u{2026}{tail}")
}
