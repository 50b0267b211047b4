//! Console redirection service
//!
//! Swaps the process-wide stdout/stderr for the write end of a
//! [`ConsolePipe`] and back again, and shows or hides the console window.
//!
//! The std streams are addressed through [`StreamSlots`], a pair of fd
//! numbers that default to 1 and 2. Tests point the slots at temp files so
//! the real streams of the test harness are never touched.
//!
//! # Invariants
//!
//! - After a successful [`ConsoleService::redirect_console`] both slots refer
//!   to the pipe's write end, and the pre-redirection state is remembered.
//! - After [`ConsoleService::restore_console`] both slots refer to the
//!   remembered streams again and the pipe is disconnected.
//! - Redirecting twice without restoring in between is a no-op; restoring
//!   twice is a no-op.

use crate::pipe::ConsolePipe;
use crate::window::{WindowId, WindowManager};
use nix::errno::Errno;
use nix::fcntl::{self, FcntlArg};
use nix::sys::stat;
use nix::unistd;
use std::io::Write;
use std::os::fd::RawFd;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Identity of the open file behind a descriptor.
///
/// Two descriptors with the same identity write to the same place, which is
/// how the service tells whether a slot already holds the desired stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamIdentity {
    pub device: u64,
    pub inode: u64,
}

impl StreamIdentity {
    pub fn of(fd: RawFd) -> Result<Self, Errno> {
        let st = stat::fstat(fd)?;
        Ok(Self {
            device: st.st_dev as u64,
            inode: st.st_ino as u64,
        })
    }
}

/// The two process-wide stream slots the service mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSlots {
    pub stdout: RawFd,
    pub stderr: RawFd,
}

impl Default for StreamSlots {
    fn default() -> Self {
        Self {
            stdout: 1,
            stderr: 2,
        }
    }
}

/// Snapshot of the stdout/stderr pair.
///
/// The descriptors are owned duplicates (or `-1` when the state only records
/// identities). Equality compares identities only, so a snapshot taken
/// before redirection equals the slots once they are restored.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleState {
    stdout_fd: RawFd,
    stderr_fd: RawFd,
    stdout_id: Option<StreamIdentity>,
    stderr_id: Option<StreamIdentity>,
}

impl Default for ConsoleState {
    fn default() -> Self {
        Self {
            stdout_fd: -1,
            stderr_fd: -1,
            stdout_id: None,
            stderr_id: None,
        }
    }
}

impl PartialEq for ConsoleState {
    fn eq(&self, other: &Self) -> bool {
        self.stdout_id == other.stdout_id && self.stderr_id == other.stderr_id
    }
}

impl Eq for ConsoleState {}

impl ConsoleState {
    /// Duplicates both slots so they can be reinstalled later.
    ///
    /// The duplicates are close-on-exec, so spawned children never hold the
    /// saved streams.
    pub fn capture(slots: StreamSlots) -> Result<Self, Errno> {
        let stdout_fd = fcntl::fcntl(slots.stdout, FcntlArg::F_DUPFD_CLOEXEC(0))?;
        let stderr_fd = match fcntl::fcntl(slots.stderr, FcntlArg::F_DUPFD_CLOEXEC(0)) {
            Ok(fd) => fd,
            Err(e) => {
                let _ = unistd::close(stdout_fd);
                return Err(e);
            }
        };
        let state = Self {
            stdout_fd,
            stderr_fd,
            stdout_id: StreamIdentity::of(stdout_fd).ok(),
            stderr_id: StreamIdentity::of(stderr_fd).ok(),
        };
        if !state.is_valid() {
            state.close();
            return Err(Errno::EBADF);
        }
        Ok(state)
    }

    /// Identities currently held by the slots, without duplicating anything.
    pub fn observe(slots: StreamSlots) -> Self {
        Self {
            stdout_id: StreamIdentity::of(slots.stdout).ok(),
            stderr_id: StreamIdentity::of(slots.stderr).ok(),
            ..Self::default()
        }
    }

    /// A state where both streams are `fd`. The descriptor stays owned by the caller.
    pub fn both(fd: RawFd) -> Result<Self, Errno> {
        let id = StreamIdentity::of(fd)?;
        Ok(Self {
            stdout_fd: fd,
            stderr_fd: fd,
            stdout_id: Some(id),
            stderr_id: Some(id),
        })
    }

    pub fn is_valid(&self) -> bool {
        self.stdout_fd >= 0
            && self.stderr_fd >= 0
            && self.stdout_id.is_some()
            && self.stderr_id.is_some()
    }

    /// Closes the owned duplicates. Only call on states built by [`ConsoleState::capture`].
    fn close(&self) {
        for fd in [self.stdout_fd, self.stderr_fd] {
            if fd >= 0 {
                let _ = unistd::close(fd);
            }
        }
    }
}

/// Installs `state` onto `slots` unless they already hold it.
fn apply_console_state(state: &ConsoleState, slots: StreamSlots) -> Result<(), Errno> {
    if *state == ConsoleState::observe(slots) {
        return Ok(());
    }
    flush_std_streams();
    unistd::dup2(state.stderr_fd, slots.stderr)?;
    unistd::dup2(state.stdout_fd, slots.stdout)?;
    Ok(())
}

fn flush_std_streams() {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
}

#[derive(Debug, Error)]
pub enum RedirectError {
    #[error("Pipe {pipe} has no usable write end")]
    PipeNotReady { pipe: String },

    #[error("Failed to {operation} the console streams: {source}")]
    Os {
        operation: &'static str,
        source: Errno,
    },
}

impl From<RedirectError> for crate::error::LauncherError {
    fn from(err: RedirectError) -> Self {
        crate::error::LauncherError::Redirect(err.to_string())
    }
}

/// Redirects the console into a pipe and controls the console window.
pub struct ConsoleService<P: ConsolePipe> {
    redirect_to: P,
    previous: ConsoleState,
    redirected_slots: StreamSlots,
    is_redirected: bool,
    windows: Arc<dyn WindowManager>,
    window: Option<WindowId>,
}

impl<P: ConsolePipe> ConsoleService<P> {
    /// Takes ownership of `pipe` and looks up the console window.
    ///
    /// The window is searched by `class` and `title` first and falls back to
    /// the window manager's notion of the launcher's own console.
    pub fn new(
        pipe: P,
        windows: Arc<dyn WindowManager>,
        class: Option<&str>,
        title: &str,
    ) -> Self {
        debug_assert!(pipe.read_fd().is_some(), "pipe must expose a read end");
        let window = windows
            .find_window(class, title)
            .or_else(|| windows.console_window());
        match window {
            Some(w) => debug!("Console window is {}", w),
            None => debug!("No console window found for title {:?}", title),
        }
        Self {
            redirect_to: pipe,
            previous: ConsoleState::default(),
            redirected_slots: StreamSlots::default(),
            is_redirected: false,
            windows,
            window,
        }
    }

    /// Points both slots at the pipe's write end.
    ///
    /// Returns the pipe's read fd, which is what the splash process reads.
    /// Nothing is changed on error.
    pub fn redirect_console(&mut self, slots: StreamSlots) -> Result<RawFd, RedirectError> {
        let not_ready = || RedirectError::PipeNotReady {
            pipe: self.redirect_to.name(),
        };
        let read = self.redirect_to.read_fd().ok_or_else(not_ready)?;
        if self.is_redirected {
            return Ok(read);
        }

        let Some(write) = self.redirect_to.write_fd() else {
            return Err(RedirectError::PipeNotReady {
                pipe: self.redirect_to.name(),
            });
        };

        let target = ConsoleState::both(write).map_err(|source| RedirectError::Os {
            operation: "inspect",
            source,
        })?;
        let previous = ConsoleState::capture(slots).map_err(|source| RedirectError::Os {
            operation: "capture",
            source,
        })?;

        if let Err(source) = apply_console_state(&target, slots) {
            // A failed dup2 may have replaced stderr already.
            let _ = apply_console_state(&previous, slots);
            previous.close();
            return Err(RedirectError::Os {
                operation: "redirect",
                source,
            });
        }

        // The slots keep the write end alive; our copy would hold off EOF.
        self.redirect_to.close_write_end();
        self.previous = previous;
        self.redirected_slots = slots;
        self.is_redirected = true;
        info!("Console redirected into {}", self.redirect_to.name());
        Ok(read)
    }

    /// Reinstalls the remembered streams and disconnects the pipe.
    ///
    /// OS failures are logged and otherwise ignored. The service is not
    /// redirected afterwards no matter what.
    pub fn restore_console(&mut self, slots: StreamSlots) {
        if !self.is_redirected {
            return;
        }
        if let Err(e) = apply_console_state(&self.previous, slots) {
            debug!("Failed to restore the console streams: {}", e);
        }
        self.previous.close();
        self.previous = ConsoleState::default();
        self.redirect_to.disconnect();
        self.is_redirected = false;
        info!("Console restored");
    }

    pub fn is_redirected(&self) -> bool {
        self.is_redirected
    }

    /// The console window, if one was found.
    pub fn window(&self) -> Option<WindowId> {
        self.window
    }

    pub fn pipe(&self) -> &P {
        &self.redirect_to
    }

    pub fn hide_console_window(&self) -> bool {
        match self.window {
            Some(w) => self.windows.hide(w),
            None => false,
        }
    }

    /// Shows the console window, first lining it up with `top` if that
    /// window is visible.
    pub fn show_console_window(&self, top: Option<WindowId>) -> bool {
        let Some(window) = self.window else {
            return false;
        };
        if let Some(top) = top {
            if self.windows.is_visible(top) {
                if let Err(e) = self.windows.resize_relative(window, top) {
                    warn!("Failed to move the console window over {}: {}", top, e);
                }
            }
        }
        self.windows.show(window)
    }
}

impl<P: ConsolePipe> Drop for ConsoleService<P> {
    fn drop(&mut self) {
        if self.is_redirected {
            let slots = self.redirected_slots;
            self.restore_console(slots);
        }
    }
}
