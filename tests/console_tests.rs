// Integration tests for console redirection and the visibility token
//
// Redirection runs against a real FIFO, with temp files standing in for
// stdout/stderr.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use nix::unistd;
use wsl_launcher::console::{ConsoleService, ConsoleState, RedirectError, StreamSlots};
use wsl_launcher::pipe::{ConsolePipe, FifoPipe};
use wsl_launcher::visibility::VisibilityCoordinator;
use wsl_launcher::window::HeadlessWindowManager;

fn temp_slots() -> (File, File, StreamSlots) {
    let out = tempfile::tempfile().unwrap();
    let err = tempfile::tempfile().unwrap();
    let slots = StreamSlots {
        stdout: out.as_raw_fd(),
        stderr: err.as_raw_fd(),
    };
    (out, err, slots)
}

/// An owned `File` on a duplicate of `fd`.
fn file_on(fd: RawFd) -> File {
    let dup = unistd::dup(fd).unwrap();
    unsafe { File::from_raw_fd(dup) }
}

fn service(dir: &std::path::Path, name: &str) -> ConsoleService<FifoPipe> {
    let pipe = FifoPipe::create_in(dir, true, false, name).unwrap();
    ConsoleService::new(pipe, Arc::new(HeadlessWindowManager), None, "console")
}

// =============================================================================
// Redirection round trip
// =============================================================================

#[test]
fn test_output_flows_through_pipe() {
    let dir = tempfile::tempdir().unwrap();
    let (_out, _err, slots) = temp_slots();
    let mut console = service(dir.path(), "roundtrip");

    let read_fd = console.redirect_console(slots).unwrap();
    assert!(console.is_redirected());
    assert!(!console.pipe().is_write_open(), "write end belongs to the slots now");

    file_on(slots.stdout).write_all(b"out\n").unwrap();
    file_on(slots.stderr).write_all(b"err\n").unwrap();

    let mut buf = [0u8; 8];
    file_on(read_fd).read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"out\nerr\n");
}

#[test]
fn test_restore_reinstalls_streams_and_ends_pipe() {
    let dir = tempfile::tempdir().unwrap();
    let (out, _err, slots) = temp_slots();
    let before = ConsoleState::observe(slots);
    let mut console = service(dir.path(), "restore");
    let fifo_path = console.pipe().path().to_path_buf();

    let read_fd = console.redirect_console(slots).unwrap();
    assert_ne!(ConsoleState::observe(slots), before);

    console.restore_console(slots);
    assert!(!console.is_redirected());
    assert_eq!(ConsoleState::observe(slots), before);
    assert!(!fifo_path.exists(), "restore disconnects the pipe");

    // No writer is left, so the reader sees EOF.
    let mut rest = Vec::new();
    file_on(read_fd).read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());

    // Writes land in the original stream again.
    file_on(slots.stdout).write_all(b"back").unwrap();
    let mut content = String::new();
    let mut reader = file_on(out.as_raw_fd());
    std::io::Seek::rewind(&mut reader).unwrap();
    reader.read_to_string(&mut content).unwrap();
    assert_eq!(content, "back");
}

#[test]
fn test_restore_twice_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let (_out, _err, slots) = temp_slots();
    let before = ConsoleState::observe(slots);
    let mut console = service(dir.path(), "twice");

    console.redirect_console(slots).unwrap();
    console.restore_console(slots);
    console.restore_console(slots);

    assert!(!console.is_redirected());
    assert_eq!(ConsoleState::observe(slots), before);
}

#[test]
fn test_redirect_twice_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let (_out, _err, slots) = temp_slots();
    let mut console = service(dir.path(), "redirect-twice");

    let first = console.redirect_console(slots).unwrap();
    let redirected = ConsoleState::observe(slots);
    let second = console.redirect_console(slots).unwrap();

    assert_eq!(first, second);
    assert_eq!(ConsoleState::observe(slots), redirected);
}

#[test]
fn test_redirect_after_disconnect_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (_out, _err, slots) = temp_slots();
    let before = ConsoleState::observe(slots);
    let mut console = service(dir.path(), "disconnected");

    console.redirect_console(slots).unwrap();
    console.restore_console(slots);

    // The write end was released and the pipe is gone.
    let err = console.redirect_console(slots).unwrap_err();
    assert!(matches!(err, RedirectError::PipeNotReady { .. }));
    assert_eq!(ConsoleState::observe(slots), before);
}

#[test]
fn test_redirect_of_closed_slots_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let mut console = service(dir.path(), "closed-slots");
    let slots = StreamSlots {
        stdout: 9990,
        stderr: 9991,
    };

    let err = console.redirect_console(slots).unwrap_err();
    assert!(matches!(err, RedirectError::Os { .. }));
    assert!(!console.is_redirected());
}

#[test]
fn test_children_do_not_inherit_saved_streams() {
    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::NamedTempFile::new_in(dir.path()).unwrap();
    let err = tempfile::NamedTempFile::new_in(dir.path()).unwrap();
    let slots = StreamSlots {
        stdout: out.as_file().as_raw_fd(),
        stderr: err.as_file().as_raw_fd(),
    };
    let mut console = service(dir.path(), "inherit");
    console.redirect_console(slots).unwrap();

    let listing = Command::new("sh")
        .arg("-c")
        .arg("for f in /proc/self/fd/*; do readlink \"$f\"; done")
        .output()
        .unwrap();
    assert!(listing.status.success());
    let open = String::from_utf8_lossy(&listing.stdout);

    for saved in [out.path(), err.path()] {
        let saved = saved.canonicalize().unwrap();
        let saved = saved.to_string_lossy();
        assert!(
            !open.lines().any(|line| line == saved),
            "child holds {}:\n{}",
            saved,
            open
        );
    }

    console.restore_console(slots);
}

#[test]
fn test_drop_restores_console() {
    let dir = tempfile::tempdir().unwrap();
    let (_out, _err, slots) = temp_slots();
    let before = ConsoleState::observe(slots);

    {
        let mut console = service(dir.path(), "dropped");
        console.redirect_console(slots).unwrap();
        assert_ne!(ConsoleState::observe(slots), before);
    }

    assert_eq!(ConsoleState::observe(slots), before);
}

// =============================================================================
// Visibility token
// =============================================================================

#[test]
fn test_token_is_exclusive_across_threads() {
    let token = Arc::new(VisibilityCoordinator::with_timeout(0u32, Duration::from_millis(50)));
    let held = Arc::new(Barrier::new(2));
    let done = Arc::new(Barrier::new(2));

    let holder = {
        let token = Arc::clone(&token);
        let held = Arc::clone(&held);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            token.with_token("hold", |count| {
                *count += 1;
                held.wait();
                done.wait();
            });
        })
    };

    held.wait();
    // The holder keeps the token until `done`, so this one times out.
    let skipped = token.with_token("contend", |count| *count += 1);
    assert!(skipped.is_none());
    done.wait();
    holder.join().unwrap();

    assert_eq!(token.with_token("read", |count| *count), Some(1));
}

#[test]
fn test_token_serializes_concurrent_updates() {
    let token = Arc::new(VisibilityCoordinator::new((false, 0u32)));
    let overlap = Arc::new(AtomicBool::new(false));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let token = Arc::clone(&token);
            let overlap = Arc::clone(&overlap);
            thread::spawn(move || {
                for _ in 0..100 {
                    token.with_token("update", |(busy, count)| {
                        if *busy {
                            overlap.store(true, Ordering::SeqCst);
                        }
                        *busy = true;
                        *count += 1;
                        thread::yield_now();
                        *busy = false;
                    });
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(!overlap.load(Ordering::SeqCst));
    assert_eq!(token.with_token("read", |(_, count)| *count), Some(400));
}
