//! PTY creation: open a master/slave pair, fork, and exec the child
//! with its controlling terminal on the slave side.
//!
//! # Safety
//!
//! This module uses unsafe code for PTY and process setup (fork, ioctl,
//! dup2). These are fundamental operations that cannot be done safely.

#![allow(unsafe_code)]

use crate::error::PtyError;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::{openpty, OpenptyResult, Winsize};
use nix::sys::termios::{self, LocalFlags, SetArg};
use nix::unistd::{execvp, fork, setsid, ForkResult, Pid};
use std::ffi::CString;
use std::os::unix::io::{AsRawFd, OwnedFd};

/// Default terminal size for a spawned PTY. The controller does not
/// expose a resize operation (§1 Non-goals: no line-discipline
/// configuration beyond disabling echo), so this is fixed.
const DEFAULT_WINSIZE: Winsize = Winsize {
    ws_row: 24,
    ws_col: 80,
    ws_xpixel: 0,
    ws_ypixel: 0,
};

/// The parent-side result of a successful spawn: the PTY master fd and
/// the child's process id.
pub struct Spawned {
    pub master: OwnedFd,
    pub pid: Pid,
}

/// Open a PTY pair, fork, and in the child replace the process image
/// with `execvp(argv[0], argv)`, inheriting the parent's environment
/// unchanged.
///
/// In the parent this disables the PTY's local-echo line-discipline
/// bit, so bytes the controller writes are never reflected back into
/// the read stream (otherwise a `write("secret\n")` would later appear
/// in the read stream and spuriously match the next prompt regex).
///
/// # Errors
///
/// Returns [`PtyError::EmptyCommand`] if `argv` is empty,
/// [`PtyError::OpenPty`]/[`PtyError::Fork`] if PTY allocation or fork
/// fails. If `execvp` fails inside the child, the child terminates
/// with a non-zero exit status instead of returning an error to the
/// parent; the parent observes this as a short-lived child on its
/// first reap.
pub fn spawn(argv: &[String]) -> Result<Spawned, PtyError> {
    if argv.is_empty() {
        return Err(PtyError::EmptyCommand);
    }

    let OpenptyResult { master, slave } =
        openpty(&DEFAULT_WINSIZE, None).map_err(PtyError::OpenPty)?;

    // SAFETY: between fork and exec in the child we do nothing but set
    // up the terminal and call exec; no allocation beyond what's
    // needed to build the exec argv, no logging through the inherited
    // logger (which may hold locks acquired in the parent).
    match unsafe { fork() }.map_err(PtyError::Fork)? {
        ForkResult::Parent { child } => {
            drop(slave);
            disable_echo(&master)?;
            set_nonblocking(&master)?;
            tracing::info!(pid = child.as_raw(), argv = ?argv, "spawned PTY child");
            Ok(Spawned { master, pid: child })
        }
        ForkResult::Child => exec_child(slave, argv),
    }
}

/// Clear `ECHO` in the PTY's local flags so the controller's writes are
/// never echoed back into the read stream.
fn disable_echo(master: &OwnedFd) -> Result<(), PtyError> {
    let mut attrs = termios::tcgetattr(master).map_err(PtyError::Termios)?;
    attrs.local_flags.remove(LocalFlags::ECHO);
    termios::tcsetattr(master, SetArg::TCSANOW, &attrs).map_err(PtyError::Termios)
}

/// Put the master fd in non-blocking mode, so the read engine and
/// writer can poll it with `EAGAIN` retries instead of blocking
/// indefinitely on a single syscall.
fn set_nonblocking(master: &OwnedFd) -> Result<(), PtyError> {
    let flags = fcntl(master, FcntlArg::F_GETFL).map_err(PtyError::OpenPty)?;
    let mut flags = OFlag::from_bits_retain(flags);
    flags.insert(OFlag::O_NONBLOCK);
    fcntl(master, FcntlArg::F_SETFL(flags)).map_err(PtyError::OpenPty)?;
    Ok(())
}

/// Child-side setup: become a session leader, attach the slave as the
/// controlling terminal, redirect std{in,out,err} to it, and exec.
/// Never returns on success.
fn exec_child(slave: OwnedFd, argv: &[String]) -> ! {
    // Nothing allocates or logs here beyond what's required to reach
    // exec; a single write to the inherited stderr fd is the only
    // diagnostic we can safely perform if exec fails.
    if setsid().is_err() {
        std::process::exit(1);
    }

    // SAFETY: slave is a valid, open fd owned by this process.
    unsafe {
        if libc::ioctl(slave.as_raw_fd(), libc::TIOCSCTTY, 0) < 0 {
            std::process::exit(1);
        }
    }

    let slave_fd = slave.as_raw_fd();
    // SAFETY: dup2 targets are the standard fd numbers; slave_fd is valid.
    unsafe {
        if libc::dup2(slave_fd, libc::STDIN_FILENO) < 0
            || libc::dup2(slave_fd, libc::STDOUT_FILENO) < 0
            || libc::dup2(slave_fd, libc::STDERR_FILENO) < 0
        {
            std::process::exit(1);
        }
    }

    if slave_fd > 2 {
        drop(slave);
    }

    let Ok(prog) = CString::new(argv[0].as_str()) else {
        std::process::exit(1);
    };
    let Ok(args) = argv
        .iter()
        .map(|s| CString::new(s.as_str()))
        .collect::<Result<Vec<_>, _>>()
    else {
        std::process::exit(1);
    };

    // execvp inherits the parent's full environment unchanged.
    let _ = execvp(&prog, &args);

    // execvp only returns on error.
    let diagnostic = b"execvp failed\n";
    // SAFETY: fd 2 (stderr) is valid here; write is a single raw syscall.
    unsafe {
        libc::write(2, diagnostic.as_ptr().cast(), diagnostic.len());
    }
    std::process::exit(127)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::wait::{waitpid, WaitStatus};

    #[test]
    fn spawn_echo_exits_cleanly() {
        let spawned = spawn(&["sh".into(), "-c".into(), "echo hello".into()]).unwrap();
        match waitpid(spawned.pid, None).unwrap() {
            WaitStatus::Exited(_, code) => assert_eq!(code, 0),
            other => panic!("unexpected wait status: {other:?}"),
        }
    }

    #[test]
    fn spawn_propagates_exit_code() {
        let spawned = spawn(&["sh".into(), "-c".into(), "exit 42".into()]).unwrap();
        match waitpid(spawned.pid, None).unwrap() {
            WaitStatus::Exited(_, code) => assert_eq!(code, 42),
            other => panic!("unexpected wait status: {other:?}"),
        }
    }

    #[test]
    fn spawn_empty_command_fails() {
        let result = spawn(&[]);
        assert!(matches!(result, Err(PtyError::EmptyCommand)));
    }

    #[test]
    fn spawn_bad_executable_exits_nonzero() {
        let spawned = spawn(&["/nonexistent/nope-no-way".into()]).unwrap();
        match waitpid(spawned.pid, None).unwrap() {
            WaitStatus::Exited(_, code) => assert_ne!(code, 0),
            other => panic!("unexpected wait status: {other:?}"),
        }
    }
}
