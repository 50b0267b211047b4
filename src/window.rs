//! Window manager collaborator
//!
//! The orchestration core never talks to a windowing system directly. Every
//! window operation goes through [`WindowManager`], and every one of them is
//! best-effort: a `false` or an `Err` is logged by the caller and otherwise
//! ignored.
//!
//! Two implementations ship with the crate:
//!
//! - [`HeadlessWindowManager`] knows no windows at all (CI, ssh sessions).
//! - [`XtermWindowManager`] controls the terminal window the launcher runs in
//!   through xterm window-manipulation sequences written to `/dev/tty`, which
//!   keeps working while stdout/stderr are redirected.

use crossterm::Command;
use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Opaque identity of a top-level window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub u64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("Window {0} is not known to this window manager")]
    NotFound(WindowId),

    #[error("Operation not supported by this window manager")]
    Unsupported,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Window operations consumed by the console service and the splash lifecycle.
pub trait WindowManager: Send + Sync {
    /// Finds a top-level window by class (when given) and title.
    fn find_window(&self, class: Option<&str>, title: &str) -> Option<WindowId>;

    /// False when `find_window` can never succeed, so callers may skip retrying.
    fn can_find_windows(&self) -> bool {
        true
    }

    /// The window hosting the launcher's own console, if any.
    fn console_window(&self) -> Option<WindowId>;

    /// Shows and restores `window`. Returns true if the window is visible afterwards.
    fn show(&self, window: WindowId) -> bool;

    /// Hides `window`. Returns true if the window is hidden afterwards.
    fn hide(&self, window: WindowId) -> bool;

    fn is_visible(&self, window: WindowId) -> bool;

    /// Moves and resizes `window` so it lines up with `anchor`.
    fn resize_relative(&self, window: WindowId, anchor: WindowId) -> Result<(), WindowError>;
}

/// Window manager for environments without any window to control.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessWindowManager;

impl WindowManager for HeadlessWindowManager {
    fn find_window(&self, _class: Option<&str>, _title: &str) -> Option<WindowId> {
        None
    }

    fn can_find_windows(&self) -> bool {
        false
    }

    fn console_window(&self) -> Option<WindowId> {
        None
    }

    fn show(&self, _window: WindowId) -> bool {
        false
    }

    fn hide(&self, _window: WindowId) -> bool {
        false
    }

    fn is_visible(&self, _window: WindowId) -> bool {
        false
    }

    fn resize_relative(&self, window: WindowId, _anchor: WindowId) -> Result<(), WindowError> {
        Err(WindowError::NotFound(window))
    }
}

/// `CSI 2 t`: iconify the terminal window.
#[derive(Debug, Clone, Copy)]
struct Iconify;

impl Command for Iconify {
    fn write_ansi(&self, f: &mut impl fmt::Write) -> fmt::Result {
        f.write_str("\x1b[2t")
    }
}

/// `CSI 1 t`: de-iconify the terminal window.
#[derive(Debug, Clone, Copy)]
struct Deiconify;

impl Command for Deiconify {
    fn write_ansi(&self, f: &mut impl fmt::Write) -> fmt::Result {
        f.write_str("\x1b[1t")
    }
}

/// Controls the launcher's own xterm-compatible terminal window.
///
/// Only the console window is known; other windows cannot be enumerated
/// through the terminal, so `find_window` always misses and resizing relative
/// to a foreign window is unsupported.
#[derive(Debug)]
pub struct XtermWindowManager {
    visible: AtomicBool,
}

impl XtermWindowManager {
    /// The console window as seen through the controlling terminal.
    pub const CONSOLE: WindowId = WindowId(0);

    /// Returns a manager when the process has a controlling terminal.
    pub fn detect() -> Option<Self> {
        OpenOptions::new().write(true).open("/dev/tty").ok()?;
        Some(Self {
            visible: AtomicBool::new(true),
        })
    }

    fn send(&self, command: impl Command) -> io::Result<()> {
        let mut tty = OpenOptions::new().write(true).open("/dev/tty")?;
        crossterm::execute!(tty, command)
    }
}

impl WindowManager for XtermWindowManager {
    fn find_window(&self, _class: Option<&str>, _title: &str) -> Option<WindowId> {
        None
    }

    fn can_find_windows(&self) -> bool {
        false
    }

    fn console_window(&self) -> Option<WindowId> {
        Some(Self::CONSOLE)
    }

    fn show(&self, window: WindowId) -> bool {
        if window != Self::CONSOLE {
            return false;
        }
        match self.send(Deiconify) {
            Ok(()) => {
                self.visible.store(true, Ordering::SeqCst);
                true
            }
            Err(e) => {
                tracing::debug!("Failed to de-iconify the terminal: {}", e);
                false
            }
        }
    }

    fn hide(&self, window: WindowId) -> bool {
        if window != Self::CONSOLE {
            return false;
        }
        match self.send(Iconify) {
            Ok(()) => {
                self.visible.store(false, Ordering::SeqCst);
                true
            }
            Err(e) => {
                tracing::debug!("Failed to iconify the terminal: {}", e);
                false
            }
        }
    }

    fn is_visible(&self, window: WindowId) -> bool {
        window == Self::CONSOLE && self.visible.load(Ordering::SeqCst)
    }

    fn resize_relative(&self, window: WindowId, anchor: WindowId) -> Result<(), WindowError> {
        if window != Self::CONSOLE {
            return Err(WindowError::NotFound(window));
        }
        if anchor != Self::CONSOLE {
            return Err(WindowError::Unsupported);
        }
        Ok(())
    }
}
