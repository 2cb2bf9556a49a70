//! End-to-end tests against real `/bin/sh`/`/bin/cat` children.
//!
//! Each test spawns its own controller and its own child process, so
//! these are inherently slower and less parallel-friendly than unit
//! tests; they exercise the six literal scenarios from the spec plus
//! the boundary behaviours and invariants around them.

use ptyproc::{PtyProcess, ProcessError};
use std::time::{Duration, Instant};

/// Scenario 1: Echo. `write` then `find` round-trips through `/bin/cat`
/// with echo disabled, and `close` kills the child with `SIGKILL`.
#[test]
fn echo_round_trip_then_autopsy_shows_sigkill() {
    let proc = PtyProcess::spawn(vec!["cat".to_string()]).expect("spawn cat");

    proc.write(b"hello\n").expect("write hello");
    let (index, matched) = proc
        .find(&["hello\n"], 2.0)
        .expect("find should not error");

    assert_eq!(index, Some(0));
    assert_eq!(matched, Some(b"hello\n".to_vec()));

    proc.close();
    let autopsy = proc.autopsy();
    assert!(
        autopsy.contains("exit_signal: 9"),
        "expected SIGKILL in autopsy, got: {autopsy}"
    );
}

/// Scenario 2: Exit code capture.
#[test]
fn wait_captures_normal_exit_code() {
    let proc =
        PtyProcess::spawn(vec!["sh".into(), "-c".into(), "exit 7".into()]).expect("spawn sh");
    proc.wait().expect("wait");
    assert_eq!(proc.exit_code(), Some(7));
    assert_eq!(proc.exit_signal(), None);
}

/// Scenario 3: Signal death.
#[test]
fn wait_captures_signal_death() {
    let proc = PtyProcess::spawn(vec![
        "sh".into(),
        "-c".into(),
        "kill -TERM $$".into(),
    ])
    .expect("spawn sh");
    proc.wait().expect("wait");
    assert_eq!(proc.exit_signal(), Some(15));
    assert_eq!(proc.exit_code(), None);
}

/// Scenario 4: pattern first-in-list wins at the position it happens
/// to match, not earliest-position-across-all-patterns. Against the
/// buffer `"ab"` with patterns `["b", "a"]`, pattern `"b"` is tried
/// first each pass and finds a match (at position 1), so the return is
/// `(0, "ab")` — index 0, and the *prefix through match end*, not just
/// the matched substring.
#[test]
fn find_first_pattern_in_list_wins() {
    let proc = PtyProcess::spawn(vec!["cat".to_string()]).expect("spawn cat");
    proc.write(b"ab").expect("write ab");

    // Give the echoed bytes time to land in the cache before searching.
    std::thread::sleep(Duration::from_millis(100));

    let (index, matched) = proc.find(&["b", "a"], 1.0).expect("find");
    assert_eq!(index, Some(0));
    assert_eq!(matched, Some(b"ab".to_vec()));
}

/// Scenario 5: recovery. With `recover_max = 2`, a child that always
/// exits is respawned twice, then `alive(recover = true)` refuses.
#[test]
fn alive_recovers_up_to_max_then_refuses() {
    let proc =
        PtyProcess::spawn_with_recover_max(vec!["sh".into(), "-c".into(), "exit 1".into()], 2)
            .expect("spawn sh");

    // Let the first child die.
    std::thread::sleep(Duration::from_millis(100));

    assert!(proc.alive(true).expect("alive #1"));
    assert_eq!(proc.recover_attempts(), 1);

    std::thread::sleep(Duration::from_millis(100));
    assert!(proc.alive(true).expect("alive #2"));
    assert_eq!(proc.recover_attempts(), 2);

    std::thread::sleep(Duration::from_millis(100));
    assert!(!proc.alive(true).expect("alive #3 refuses"));
    assert_eq!(proc.recover_attempts(), 2);
}

/// Scenario 6: EOF mid-read. The first read drains `"hi"`; the next
/// read, once the child has exited and closed its side, raises
/// `UnexpectedEof` carrying `"hi"` in its forensic cache tail.
#[test]
fn read_after_child_exit_raises_unexpected_eof() {
    let proc = PtyProcess::spawn(vec![
        "sh".into(),
        "-c".into(),
        "printf hi; exit 0".into(),
    ])
    .expect("spawn sh");

    let first = proc.read(0, 1.0).expect("first read");
    assert!(first.ends_with(b"hi"), "expected trailing hi, got {first:?}");

    let second = proc.read(0, 1.0);
    match second {
        Err(ProcessError::UnexpectedEof { context }) => {
            let rendered = context.to_string();
            assert!(
                rendered.contains("hi"),
                "expected cache tail to mention hi, got: {rendered}"
            );
        }
        other => panic!("expected UnexpectedEof, got {other:?}"),
    }
}

/// Boundary: `read(timeout=0)` on an empty cache with no new data
/// returns promptly (well within a couple of poll cycles).
#[test]
fn read_zero_timeout_returns_promptly_when_empty() {
    let proc = PtyProcess::spawn(vec!["cat".to_string()]).expect("spawn cat");

    let start = Instant::now();
    let data = proc.read(0, 0.0).expect("read");
    assert!(data.is_empty());
    assert!(
        start.elapsed() < Duration::from_millis(100),
        "read(timeout=0) took too long: {:?}",
        start.elapsed()
    );
}

/// Boundary: `read(timeout<0)` returns on the very next poll cycle
/// regardless of data availability.
#[test]
fn read_negative_timeout_returns_on_next_poll() {
    let proc = PtyProcess::spawn(vec!["cat".to_string()]).expect("spawn cat");

    let start = Instant::now();
    let data = proc.read(0, -1.0).expect("read");
    assert!(data.is_empty());
    assert!(start.elapsed() < Duration::from_millis(100));
}

/// Boundary: a pattern matching the empty string matches immediately
/// without consuming anything from the buffer.
#[test]
fn find_empty_pattern_matches_without_consuming() {
    let proc = PtyProcess::spawn(vec!["cat".to_string()]).expect("spawn cat");
    proc.write(b"abc").expect("write abc");
    std::thread::sleep(Duration::from_millis(100));

    let (index, matched) = proc.find(&[""], 1.0).expect("find");
    assert_eq!(index, Some(0));
    assert_eq!(matched, Some(Vec::new()));

    // Nothing was consumed: a second find for the full echo should
    // still see it.
    let (index2, matched2) = proc.find(&["abc"], 1.0).expect("find abc");
    assert_eq!(index2, Some(0));
    assert_eq!(matched2, Some(b"abc".to_vec()));
}

/// Boundary: `find` against a stream missing the pattern times out and
/// preserves every byte in the cache (no bytes lost on a miss).
#[test]
fn find_timeout_preserves_cache_on_miss() {
    let proc = PtyProcess::spawn(vec!["cat".to_string()]).expect("spawn cat");
    proc.write(b"xyz").expect("write xyz");
    std::thread::sleep(Duration::from_millis(100));

    let start = Instant::now();
    let (index, matched) = proc.find(&["not-present"], 0.5).expect("find misses");
    assert_eq!(index, None);
    assert_eq!(matched, None);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(450), "expired too early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "expired too late: {elapsed:?}");

    // The bytes are still there for a subsequent find.
    let (index2, matched2) = proc.find(&["xyz"], 1.0).expect("find xyz");
    assert_eq!(index2, Some(0));
    assert_eq!(matched2, Some(b"xyz".to_vec()));
}

/// Invariant 3: the cache never contains carriage returns, even when
/// the child writes `\r\n` line endings.
#[test]
fn carriage_returns_are_stripped_from_cache() {
    let proc = PtyProcess::spawn(vec![
        "sh".into(),
        "-c".into(),
        r"printf 'a\r\nb\r\n'".into(),
    ])
    .expect("spawn sh");

    let data = proc.read(0, 1.0).expect("read");
    assert!(!data.contains(&0x0D), "cache contained a CR: {data:?}");
    assert!(data.contains(&b'a') && data.contains(&b'b'));
}

/// `finalize` (via `close`) is idempotent.
#[test]
fn close_is_idempotent() {
    let proc = PtyProcess::spawn(vec!["cat".to_string()]).expect("spawn cat");
    proc.close();
    let first = proc.autopsy();
    proc.close();
    let second = proc.autopsy();
    assert_eq!(first, second);
}

/// `BadParameter` surfaces synchronously from construction on an
/// empty command.
#[test]
fn empty_command_is_bad_parameter() {
    let result = PtyProcess::spawn(Vec::<String>::new());
    assert!(matches!(result, Err(ProcessError::BadParameter { .. })));
}

/// `read`/`write`/`find` on an already-dead child (no recovery
/// requested) surface `IoError` rather than blocking or panicking.
#[test]
fn operations_on_dead_child_raise_io_error() {
    let proc =
        PtyProcess::spawn(vec!["sh".into(), "-c".into(), "exit 0".into()]).expect("spawn sh");
    proc.wait().expect("wait");

    assert!(matches!(proc.read(0, 0.0), Err(ProcessError::IoError { .. })));
    assert!(matches!(proc.write(b"x"), Err(ProcessError::IoError { .. })));
    assert!(matches!(
        proc.find(&["x"], 0.0),
        Err(ProcessError::IoError { .. })
    ));
}
