//! Orchestration driver
//!
//! A [`LauncherStrategy`] feeds fixed event sequences to the installer state
//! machine and reacts to the states it reaches:
//!
//! - [`SplashEnabledStrategy`] (feature `splash`) additionally coordinates the
//!   splash process, console redirection and console window visibility.
//! - [`NoSplashStrategy`] drives the installer alone.
//!
//! Both derive the final [`Status`] the same way. Console and splash failures
//! are logged and never change the status.

use crate::error::Result;
use crate::install_state::{InstallerController, InstallerEvent, InstallerState, Mode};
use crate::installer::InstallerPolicy;
use crate::status::Status;
use std::path::Path;
use tracing::{debug, info};

#[cfg(feature = "splash")]
pub use splash_enabled::{SplashEnabledStrategy, SplashOptions};

/// The driver API used by `main`.
pub trait LauncherStrategy {
    /// Interactive installation in the requested UI mode.
    fn do_install(&mut self, mode: Mode) -> Status;

    /// Re-runs the installer to reconfigure an installed distro.
    fn do_reconfigure(&mut self) -> Status;

    /// Unattended installation driven by the answers in `path`.
    fn do_autoinstall(&mut self, path: &Path) -> Status;

    /// Redirects the console and starts the splash, when supported.
    fn do_run_splash(&mut self, hide_console: bool);
}

/// Feeds the interactive install sequence, calling `on_state` after every
/// accepted transition. Stops after `Success` or `UpstreamDefaultInstall`.
fn install_sequence<P: InstallerPolicy>(
    installer: &mut InstallerController<P>,
    mode: Mode,
    mut on_state: impl FnMut(&InstallerState),
) -> Result<Status> {
    let events = [
        InstallerEvent::InteractiveInstall { mode },
        InstallerEvent::StartInstaller,
        InstallerEvent::BlockOnInstaller,
    ];
    let mut status = Status::NOT_IMPLEMENTED;
    for event in events {
        let state = installer.add_event(event)?;
        on_state(&state);
        match state {
            InstallerState::Success => return Ok(Status::SUCCESS),
            InstallerState::UpstreamDefaultInstall { status } => return Ok(status),
            _ => status = Status::UNEXPECTED,
        }
    }
    Ok(status)
}

/// The reconfigure sequence, shared by every strategy.
///
/// `PreparedGui` and `Ready` continue the sequence; any other state ends it.
pub fn do_reconfigure<P: InstallerPolicy>(installer: &mut InstallerController<P>) -> Status {
    let events = [
        InstallerEvent::Reconfig,
        InstallerEvent::StartInstaller,
        InstallerEvent::BlockOnInstaller,
    ];
    let mut status = Status::NOT_IMPLEMENTED;
    for event in events {
        let Ok(state) = installer.add_event(event) else {
            return status;
        };
        status = match state {
            InstallerState::PreparedGui { .. } | InstallerState::Ready { .. } => continue,
            InstallerState::Success => Status::SUCCESS,
            InstallerState::UpstreamDefaultInstall { status } => status,
            _ => Status::UNEXPECTED,
        };
        break;
    }
    status
}

/// The autoinstall sequence, shared by every strategy.
pub fn do_autoinstall<P: InstallerPolicy>(installer: &mut InstallerController<P>, path: &Path) -> Status {
    let events = [
        InstallerEvent::AutoInstall {
            path: path.to_path_buf(),
        },
        InstallerEvent::BlockOnInstaller,
    ];
    let mut last = InstallerState::Idle;
    for event in events {
        match installer.add_event(event) {
            Ok(state) => last = state,
            Err(_) => return Status::FAIL,
        }
    }
    match last {
        InstallerState::Success => Status::SUCCESS,
        InstallerState::UpstreamDefaultInstall { status } => status,
        _ => Status::UNEXPECTED,
    }
}

/// Drives the installer without any console or window coordination.
pub struct NoSplashStrategy<P: InstallerPolicy> {
    installer: InstallerController<P>,
}

impl<P: InstallerPolicy> NoSplashStrategy<P> {
    pub fn new(policy: P) -> Self {
        Self {
            installer: InstallerController::new(policy),
        }
    }

    pub fn installer(&self) -> &InstallerController<P> {
        &self.installer
    }
}

impl<P: InstallerPolicy> LauncherStrategy for NoSplashStrategy<P> {
    fn do_install(&mut self, mode: Mode) -> Status {
        install_sequence(&mut self.installer, mode, |_| {}).unwrap_or_else(|e| {
            debug!("Install aborted: {}", e);
            Status::UNEXPECTED
        })
    }

    fn do_reconfigure(&mut self) -> Status {
        do_reconfigure(&mut self.installer)
    }

    fn do_autoinstall(&mut self, path: &Path) -> Status {
        do_autoinstall(&mut self.installer, path)
    }

    fn do_run_splash(&mut self, _hide_console: bool) {
        info!("This build does not support running the splash screen");
    }
}

#[cfg(feature = "splash")]
mod splash_enabled {
    use super::*;
    use crate::config::LauncherConfig;
    use crate::console::{ConsoleService, StreamSlots};
    use crate::error::LauncherError;
    use crate::pipe::FifoPipe;
    use crate::splash::{splash_path, SplashController, SplashEvent, SplashLauncher, SplashState};
    use crate::visibility::VisibilityCoordinator;
    use crate::window::{WindowId, WindowManager};
    use std::path::PathBuf;
    use std::sync::{Arc, Weak};
    use std::thread;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    use tracing::warn;

    /// How often a started splash is asked for its window.
    const WINDOW_LOOKUP_ATTEMPTS: u32 = 25;

    /// Pause between two splash window lookups, spent without the token.
    const WINDOW_LOOKUP_INTERVAL: Duration = Duration::from_millis(20);

    /// Where the splash strategy finds its executable, pipe and streams.
    #[derive(Debug, Clone)]
    pub struct SplashOptions {
        pub splash_path: PathBuf,
        /// Directory the console FIFO is created in
        pub pipe_dir: PathBuf,
        pub slots: StreamSlots,
        pub console_window_class: Option<String>,
        pub console_window_title: String,
        pub lock_timeout: Duration,
        /// Lookups of the splash window after launch, `0` disables them
        pub window_lookup_attempts: u32,
    }

    impl SplashOptions {
        pub fn from_config(config: &LauncherConfig) -> Self {
            Self {
                splash_path: splash_path(&config.splash_executable),
                pipe_dir: std::env::temp_dir(),
                slots: StreamSlots::default(),
                console_window_class: config.console_window_class.clone(),
                console_window_title: config.console_window_title.clone(),
                lock_timeout: config.lock_timeout(),
                window_lookup_attempts: WINDOW_LOOKUP_ATTEMPTS,
            }
        }
    }

    /// Everything guarded by the visibility token.
    struct SplashSession<L: SplashLauncher> {
        console: Option<ConsoleService<FifoPipe>>,
        console_visible: bool,
        splash_running: bool,
        splash_window: Option<WindowId>,
        splash: Option<SplashController<L>>,
        slots: StreamSlots,
    }

    /// Drives the installer while a splash covers the console.
    pub struct SplashEnabledStrategy<P: InstallerPolicy, L: SplashLauncher + 'static> {
        installer: InstallerController<P>,
        coordinator: Arc<Coordinator<L>>,
        launcher: Option<L>,
        windows: Arc<dyn WindowManager>,
        options: SplashOptions,
    }

    impl<P: InstallerPolicy, L: SplashLauncher + 'static> SplashEnabledStrategy<P, L> {
        pub fn new(policy: P, launcher: L, windows: Arc<dyn WindowManager>, options: SplashOptions) -> Self {
            let session = SplashSession {
                console: None,
                console_visible: true,
                splash_running: false,
                splash_window: None,
                splash: None,
                slots: options.slots,
            };
            Self {
                installer: InstallerController::new(policy),
                coordinator: Arc::new(VisibilityCoordinator::with_timeout(session, options.lock_timeout)),
                launcher: Some(launcher),
                windows,
                options,
            }
        }

        pub fn installer(&self) -> &InstallerController<P> {
            &self.installer
        }

        pub fn is_splash_running(&self) -> bool {
            self.coordinator
                .with_token("query splash", |s| s.splash_running)
                .unwrap_or(false)
        }

        pub fn splash_state(&self) -> Option<SplashState> {
            self.coordinator
                .with_token("query splash", |s| s.splash.as_ref().map(|c| c.state()))
                .flatten()
        }

        pub fn is_console_redirected(&self) -> bool {
            self.coordinator
                .with_token("query console", |s| {
                    s.console.as_ref().is_some_and(|c| c.is_redirected())
                })
                .unwrap_or(false)
        }

        pub fn is_console_visible(&self) -> bool {
            self.coordinator
                .with_token("query console", |s| s.console_visible)
                .unwrap_or(false)
        }
    }

    type Coordinator<L> = VisibilityCoordinator<SplashSession<L>>;

    /// Restores the console and shows its window over the last splash window.
    fn show_console<L: SplashLauncher>(coordinator: &Coordinator<L>) {
        coordinator.with_token("show console", |session| {
            let slots = session.slots;
            let Some(console) = session.console.as_mut() else {
                return;
            };
            console.restore_console(slots);
            if !session.console_visible {
                session.console_visible = console.show_console_window(session.splash_window);
            }
        });
    }

    fn toggle_splash<L: SplashLauncher>(coordinator: &Coordinator<L>) {
        coordinator.with_token("toggle splash", |session| {
            if let Some(Err(e)) = session
                .splash
                .as_mut()
                .map(|splash| splash.add_event(SplashEvent::ToggleVisibility))
            {
                debug!("{}", e);
            }
        });
    }

    fn close_splash<L: SplashLauncher>(coordinator: &Coordinator<L>) {
        show_console(coordinator);
        coordinator.with_token("close splash", |session| {
            if !session.splash_running {
                return;
            }
            if let Some(Err(e)) = session
                .splash
                .as_mut()
                .map(|splash| splash.add_event(SplashEvent::Close))
            {
                debug!("{}", e);
            }
            session.splash_running = false;
            session.splash_window = None;
        });
    }

    impl<P: InstallerPolicy, L: SplashLauncher + 'static> LauncherStrategy for SplashEnabledStrategy<P, L> {
        fn do_install(&mut self, mode: Mode) -> Status {
            let coordinator = &self.coordinator;
            let result = install_sequence(&mut self.installer, mode, |state| match state {
                InstallerState::PreparedTui { .. } => show_console(coordinator),
                InstallerState::Ready { .. } => toggle_splash(coordinator),
                InstallerState::Success => close_splash(coordinator),
                InstallerState::UpstreamDefaultInstall { .. } => show_console(coordinator),
                _ => {}
            });
            result.unwrap_or_else(|e| {
                debug!("Install aborted: {}", e);
                close_splash(&self.coordinator);
                Status::UNEXPECTED
            })
        }

        fn do_reconfigure(&mut self) -> Status {
            do_reconfigure(&mut self.installer)
        }

        fn do_autoinstall(&mut self, path: &Path) -> Status {
            do_autoinstall(&mut self.installer, path)
        }

        fn do_run_splash(&mut self, hide_console: bool) {
            match self.start_splash(hide_console) {
                Ok(true) => self.locate_splash_window(),
                Ok(false) => {}
                Err(e) => warn!("Not starting the splash: {}", e),
            }
        }
    }

    impl<P: InstallerPolicy, L: SplashLauncher + 'static> SplashEnabledStrategy<P, L> {
        /// Redirects the console and launches the splash under the token.
        /// Returns whether the splash is running afterwards.
        fn start_splash(&mut self, hide_console: bool) -> Result<bool> {
            let path = self.options.splash_path.clone();
            if !path.exists() {
                info!("Splash executable {:?} not found", path);
                return Ok(false);
            }
            let launcher = self
                .launcher
                .take()
                .ok_or_else(|| LauncherError::splash("the splash can only be started once"))?;

            let name = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos().to_string())
                .unwrap_or_default();
            let pipe = FifoPipe::create_in(&self.options.pipe_dir, true, false, &name)?;
            let console = ConsoleService::new(
                pipe,
                Arc::clone(&self.windows),
                self.options.console_window_class.as_deref(),
                &self.options.console_window_title,
            );
            let splash = SplashController::new(launcher, path);

            let weak: Weak<Coordinator<L>> = Arc::downgrade(&self.coordinator);
            let on_show_console = Box::new(move || {
                if let Some(coordinator) = weak.upgrade() {
                    show_console(&coordinator);
                }
            });

            let started = self.coordinator.with_token("run splash", move |session| -> Result<bool> {
                let slots = session.slots;
                let console = session.console.insert(console);
                let splash = session.splash.insert(splash);

                let read_fd = console.redirect_console(slots)?;
                let transition = splash.add_event(SplashEvent::Run {
                    stdin: read_fd,
                    on_show_console,
                });
                let window = match transition {
                    Ok(SplashState::Visible { window }) => window,
                    Ok(state) => {
                        debug!("Splash did not start ({:?})", state);
                        console.restore_console(slots);
                        return Ok(false);
                    }
                    Err(e) => {
                        console.restore_console(slots);
                        return Err(e.into());
                    }
                };
                session.splash_window = window;
                if hide_console {
                    session.console_visible = !console.hide_console_window();
                }
                session.splash_running = true;
                Ok(true)
            });
            started.unwrap_or(Ok(false))
        }

        /// Polls the splash for its window, holding the token only for each
        /// single lookup.
        fn locate_splash_window(&self) {
            if !self.windows.can_find_windows() {
                return;
            }
            for attempt in 0..self.options.window_lookup_attempts {
                if attempt > 0 {
                    thread::sleep(WINDOW_LOOKUP_INTERVAL);
                }
                let done = self.coordinator.with_token("locate splash window", |session| {
                    if session.splash_window.is_some() || !session.splash_running {
                        return true;
                    }
                    let window = session.splash.as_mut().and_then(|splash| splash.locate_window());
                    session.splash_window = window;
                    window.is_some()
                });
                // `None` means the token timed out; keep trying.
                if done == Some(true) {
                    return;
                }
            }
            debug!("Splash window not found");
        }
    }
}
