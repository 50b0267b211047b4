//! Splash lifecycle
//!
//! The splash is an external process showing a placeholder window while the
//! installer starts. It reads the launcher's redirected console from its
//! stdin and, once it goes away, asks the launcher to show the real console
//! again through a one-shot callback.
//!
//! [`SplashController`] is the splash state machine; the process itself is
//! started through a [`SplashLauncher`].
//!
//! ```text
//! NotRunning --Run--> Visible <--ToggleVisibility--> Hidden
//!                     Visible | Hidden --Close--> Closed
//! ```

use crate::install_state::InvalidTransition;
use crate::process_guard::{spawn_tracked, terminate_process_tree};
use crate::window::{WindowId, WindowManager};
use nix::errno::Errno;
use nix::fcntl::{self, FcntlArg};
use std::fmt;
use std::io;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use strum::IntoStaticStr;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Notification asking the launcher to show its console again.
pub type ShowConsoleCallback = Box<dyn FnOnce() + Send + 'static>;

/// Resolves the splash executable `name` next to the running launcher.
pub fn splash_path(name: &str) -> PathBuf {
    match std::env::current_exe() {
        Ok(exe) => exe.with_file_name(name),
        Err(_) => PathBuf::from(name),
    }
}

#[derive(Debug, Error)]
pub enum SplashError {
    #[error("Splash executable {0:?} not found")]
    NotFound(PathBuf),

    #[error("Failed to hand the console pipe to the splash: {0}")]
    Stdin(Errno),

    #[error("Failed to start splash {path:?}: {source}")]
    Spawn { path: PathBuf, source: io::Error },
}

impl From<SplashError> for crate::error::LauncherError {
    fn from(err: SplashError) -> Self {
        crate::error::LauncherError::Splash(err.to_string())
    }
}

/// A running splash process.
pub trait SplashProcess: Send {
    fn window(&self) -> Option<WindowId>;

    /// Looks the splash window up again if it is still unknown. Never blocks.
    fn locate_window(&mut self) -> Option<WindowId> {
        self.window()
    }

    /// Shows the splash window. Returns true if it is visible afterwards.
    fn show(&mut self) -> bool;

    /// Hides the splash window. Returns true if it is hidden afterwards.
    fn hide(&mut self) -> bool;

    /// Disarms the show-console callback.
    fn unsubscribe(&mut self);

    fn terminate(&mut self);
}

/// Starts splash processes.
pub trait SplashLauncher: Send {
    type Process: SplashProcess;

    /// Starts `path` reading the console from `stdin`. `on_show_console` is
    /// called at most once, from another thread.
    fn launch(
        &self,
        path: &Path,
        stdin: RawFd,
        on_show_console: ShowConsoleCallback,
    ) -> Result<Self::Process, SplashError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum SplashState {
    NotRunning,
    Visible { window: Option<WindowId> },
    Hidden { window: Option<WindowId> },
    Closed,
}

#[derive(IntoStaticStr)]
pub enum SplashEvent {
    Run {
        stdin: RawFd,
        on_show_console: ShowConsoleCallback,
    },
    ToggleVisibility,
    Close,
}

impl fmt::Debug for SplashEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run { stdin, .. } => f.debug_struct("Run").field("stdin", stdin).finish_non_exhaustive(),
            Self::ToggleVisibility => f.write_str("ToggleVisibility"),
            Self::Close => f.write_str("Close"),
        }
    }
}

/// Splash state machine owning the splash process.
pub struct SplashController<L: SplashLauncher> {
    launcher: L,
    path: PathBuf,
    state: SplashState,
    process: Option<L::Process>,
}

impl<L: SplashLauncher> SplashController<L> {
    pub fn new(launcher: L, path: PathBuf) -> Self {
        Self {
            launcher,
            path,
            state: SplashState::NotRunning,
            process: None,
        }
    }

    pub fn state(&self) -> SplashState {
        self.state
    }

    pub fn process(&self) -> Option<&L::Process> {
        self.process.as_ref()
    }

    /// Asks a running splash for its window once, recording it in the state.
    pub fn locate_window(&mut self) -> Option<WindowId> {
        let process = self.process.as_mut()?;
        match &mut self.state {
            SplashState::Visible { window } | SplashState::Hidden { window } => {
                if window.is_none() {
                    *window = process.locate_window();
                }
                *window
            }
            _ => None,
        }
    }

    pub fn add_event(&mut self, event: SplashEvent) -> Result<SplashState, InvalidTransition> {
        use SplashEvent as E;
        use SplashState as S;

        let received: &'static str = (&event).into();
        let next = match (self.state, event) {
            (S::NotRunning, E::Run { stdin, on_show_console }) => {
                match self.launcher.launch(&self.path, stdin, on_show_console) {
                    Ok(process) => {
                        let window = process.window();
                        self.process = Some(process);
                        S::Visible { window }
                    }
                    Err(e) => {
                        warn!("{}", e);
                        S::NotRunning
                    }
                }
            }
            (S::Visible { window }, E::ToggleVisibility) => {
                if let Some(process) = self.process.as_mut() {
                    process.hide();
                }
                S::Hidden { window }
            }
            (S::Hidden { window }, E::ToggleVisibility) => {
                if let Some(process) = self.process.as_mut() {
                    process.show();
                }
                S::Visible { window }
            }
            (S::Visible { .. } | S::Hidden { .. }, E::Close) => {
                if let Some(mut process) = self.process.take() {
                    process.unsubscribe();
                    process.terminate();
                }
                S::Closed
            }
            (current, _) => {
                let current: &'static str = current.into();
                return Err(InvalidTransition { current, received });
            }
        };
        debug!("Splash: --{}--> {:?}", received, next);
        self.state = next;
        Ok(next)
    }
}

impl<L: SplashLauncher> Drop for SplashController<L> {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.unsubscribe();
            process.terminate();
        }
    }
}

/// How long the splash gets to exit after SIGTERM.
const SPLASH_TERMINATE_GRACE: Duration = Duration::from_secs(1);

/// Launches the splash as a tracked child process.
///
/// `launch` looks the splash window up once. A window that appears later is
/// picked up through [`SplashProcess::locate_window`].
pub struct ProcessSplashLauncher {
    windows: Arc<dyn WindowManager>,
    window_title: String,
}

impl ProcessSplashLauncher {
    pub fn new(windows: Arc<dyn WindowManager>, window_title: impl Into<String>) -> Self {
        Self {
            windows,
            window_title: window_title.into(),
        }
    }
}

impl SplashLauncher for ProcessSplashLauncher {
    type Process = ProcessSplash;

    fn launch(
        &self,
        path: &Path,
        stdin: RawFd,
        on_show_console: ShowConsoleCallback,
    ) -> Result<ProcessSplash, SplashError> {
        if !path.exists() {
            return Err(SplashError::NotFound(path.to_path_buf()));
        }
        let raw = fcntl::fcntl(stdin, FcntlArg::F_DUPFD_CLOEXEC(0)).map_err(SplashError::Stdin)?;
        // SAFETY: `raw` is a fresh duplicate nobody else owns.
        let stdin = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut cmd = Command::new(path);
        cmd.stdin(Stdio::from(stdin))
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let mut child = spawn_tracked(&mut cmd).map_err(|source| SplashError::Spawn {
            path: path.to_path_buf(),
            source,
        })?;
        let pid = child.id();
        info!("Splash started (PID {})", pid);

        let subscribed = Arc::new(AtomicBool::new(true));
        let armed = Arc::clone(&subscribed);
        let watcher = thread::Builder::new()
            .name("splash-watcher".to_string())
            .spawn(move || {
                match child.wait() {
                    Ok(status) => debug!("Splash exited: {}", status),
                    Err(e) => debug!("Failed to wait for the splash: {}", e),
                }
                if armed.swap(false, Ordering::SeqCst) {
                    on_show_console();
                }
            });
        if let Err(e) = watcher {
            terminate_process_tree(pid, SPLASH_TERMINATE_GRACE);
            return Err(SplashError::Spawn {
                path: path.to_path_buf(),
                source: e,
            });
        }

        Ok(ProcessSplash {
            pid,
            window: self.windows.find_window(None, &self.window_title),
            window_title: self.window_title.clone(),
            windows: Arc::clone(&self.windows),
            subscribed,
            running: true,
        })
    }
}

/// Splash child process watched by a background thread.
pub struct ProcessSplash {
    pid: u32,
    window: Option<WindowId>,
    window_title: String,
    windows: Arc<dyn WindowManager>,
    subscribed: Arc<AtomicBool>,
    running: bool,
}

impl std::fmt::Debug for ProcessSplash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSplash")
            .field("pid", &self.pid)
            .field("window", &self.window)
            .field("window_title", &self.window_title)
            .field("subscribed", &self.subscribed)
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}

impl ProcessSplash {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }
}

impl SplashProcess for ProcessSplash {
    fn window(&self) -> Option<WindowId> {
        self.window
    }

    fn locate_window(&mut self) -> Option<WindowId> {
        if self.window.is_none() {
            self.window = self.windows.find_window(None, &self.window_title);
        }
        self.window
    }

    fn show(&mut self) -> bool {
        self.window.is_some_and(|w| self.windows.show(w))
    }

    fn hide(&mut self) -> bool {
        self.window.is_some_and(|w| self.windows.hide(w))
    }

    fn unsubscribe(&mut self) {
        self.subscribed.store(false, Ordering::SeqCst);
    }

    fn terminate(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        // The watcher thread reaps the child.
        terminate_process_tree(self.pid, SPLASH_TERMINATE_GRACE);
    }
}

impl Drop for ProcessSplash {
    fn drop(&mut self) {
        self.unsubscribe();
        self.terminate();
    }
}
