//! Installer State Machine
//!
//! The authoritative lifecycle of the guest OS installer. The orchestration
//! driver feeds [`InstallerEvent`]s into an [`InstallerController`] and
//! branches on the resulting [`InstallerState`]; every side effect (running
//! the installer, copying files into the distro, hiding windows) goes through
//! the controller's [`InstallerPolicy`].
//!
//! # Design Principles
//!
//! - **Closed vocabulary**: events and states are closed enums, the transition
//!   table is one exhaustive `match`.
//! - **Fail Fast**: an event the current state does not accept returns
//!   [`InvalidTransition`] and leaves the state unchanged.
//! - **Installer failures are states**: a failing installer ends in
//!   `UpstreamDefaultInstall`, never in an error.
//!
//! # State Flow
//!
//! ```text
//! Idle --InteractiveInstall--> PreparedTui --StartInstaller--> Closed --BlockOnInstaller--> Success
//!      --InteractiveInstall--> PreparedGui --StartInstaller--> Ready  --BlockOnInstaller--> Success
//!      --Reconfig (text)-----> Success
//!      --Reconfig (gui)------> PreparedGui
//!      --AutoInstall---------> AutoInstalling --BlockOnInstaller--> Success
//!
//! (Any step driving the installer can end in UpstreamDefaultInstall)
//! ```

use crate::config::AUTOINSTALL_DESTINATION;
use crate::installer::InstallerPolicy;
use crate::status::Status;
use crate::window::WindowId;
use std::path::PathBuf;
use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;
use tracing::{debug, info, warn};

/// How many times the GUI installer window is looked for before giving up.
const HIDE_WINDOW_ATTEMPTS: u32 = 50;

/// Installer UI mode requested by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    /// Text unless graphics are available (or forced through the environment)
    #[default]
    #[strum(serialize = "auto")]
    AutoDetect,
    Text,
    Gui,
}

/// Events accepted by the installer state machine.
#[derive(Debug, Clone, PartialEq, Eq, IntoStaticStr)]
pub enum InstallerEvent {
    InteractiveInstall { mode: Mode },
    Reconfig,
    AutoInstall { path: PathBuf },
    StartInstaller,
    BlockOnInstaller,
}

/// States of the installer lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default, IntoStaticStr)]
pub enum InstallerState {
    #[default]
    Idle,
    /// Text installer prepared, runs in the launcher's console
    PreparedTui { args: Vec<String> },
    /// GUI installer prepared, not started yet
    PreparedGui { args: Vec<String> },
    AutoInstalling { args: Vec<String> },
    /// GUI installer running and ready for the user
    Ready { window: Option<WindowId> },
    /// Text installer finished successfully
    Closed,
    Success,
    /// The installer could not run or reported failure
    UpstreamDefaultInstall { status: Status },
}

impl InstallerState {
    /// Returns true for states after which no event is accepted
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::UpstreamDefaultInstall { .. })
    }

    /// State name for logs
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// An event the current state does not accept.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid transition: state {current} does not accept event {received}")]
pub struct InvalidTransition {
    pub current: &'static str,
    pub received: &'static str,
}

impl From<InvalidTransition> for crate::error::LauncherError {
    fn from(err: InvalidTransition) -> Self {
        crate::error::LauncherError::InstallTransition(err.to_string())
    }
}

/// Owns the installer state and the running installer process.
pub struct InstallerController<P: InstallerPolicy> {
    policy: P,
    state: InstallerState,
    running: Option<P::Process>,
    /// (state name, unix timestamp) for every accepted transition
    history: Vec<(&'static str, u64)>,
}

impl<P: InstallerPolicy> InstallerController<P> {
    pub fn new(policy: P) -> Self {
        Self {
            policy,
            state: InstallerState::Idle,
            running: None,
            history: Vec::new(),
        }
    }

    #[inline]
    pub fn state(&self) -> &InstallerState {
        &self.state
    }

    #[inline]
    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn history(&self) -> &[(&'static str, u64)] {
        &self.history
    }

    /// Feeds `event` to the state machine.
    ///
    /// Returns the new state, or [`InvalidTransition`] with the state left
    /// untouched.
    pub fn add_event(&mut self, event: InstallerEvent) -> Result<InstallerState, InvalidTransition> {
        use InstallerEvent as E;
        use InstallerState as S;

        let received: &'static str = (&event).into();
        let current = self.state.clone();
        let next = match (current, event) {
            (S::Idle, E::InteractiveInstall { mode }) => self.on_interactive_install(mode),
            (S::Idle, E::Reconfig) => self.on_reconfig(),
            (S::Idle, E::AutoInstall { path }) => self.on_autoinstall(path),
            (S::PreparedTui { args }, E::StartInstaller) => self.on_start_tui(&args),
            (S::PreparedGui { args }, E::StartInstaller) => self.on_start_gui(&args),
            (S::Closed, E::BlockOnInstaller) => {
                self.policy.handle_exit_status();
                S::Success
            }
            (S::Ready { window }, E::BlockOnInstaller) => self.on_block_gui(window),
            (S::AutoInstalling { args }, E::BlockOnInstaller) => self.on_block_autoinstall(&args),
            (current, _) => {
                let err = InvalidTransition {
                    current: current.name(),
                    received,
                };
                warn!("{}", err);
                return Err(err);
            }
        };

        debug!("Installer: {} --{}--> {}", self.state.name(), received, next.name());
        self.record_transition(&next);
        self.state = next.clone();
        Ok(next)
    }

    fn text_mode(&self, mode: Mode) -> bool {
        match mode {
            Mode::Text => true,
            Mode::Gui => false,
            Mode::AutoDetect => self.policy.must_run_in_text_mode(),
        }
    }

    fn unavailable(&self) -> Option<InstallerState> {
        if self.policy.is_installer_available() {
            return None;
        }
        info!("Installer not available, falling back to the default setup");
        Some(InstallerState::UpstreamDefaultInstall {
            status: Status::NOT_IMPLEMENTED,
        })
    }

    fn on_interactive_install(&mut self, mode: Mode) -> InstallerState {
        if let Some(fallback) = self.unavailable() {
            return fallback;
        }
        let mut args = self.policy.prepare_prefill_info();
        if self.text_mode(mode) {
            args.push("--text".to_string());
            InstallerState::PreparedTui { args }
        } else {
            InstallerState::PreparedGui { args }
        }
    }

    fn on_reconfig(&mut self) -> InstallerState {
        if let Some(fallback) = self.unavailable() {
            return fallback;
        }
        let mut args = vec!["--reconfigure".to_string()];
        args.extend(self.policy.prepare_prefill_info());
        if !self.text_mode(Mode::AutoDetect) {
            return InstallerState::PreparedGui { args };
        }

        args.push("--text".to_string());
        match self.policy.launch_sync(&args) {
            0 => {
                self.policy.handle_exit_status();
                InstallerState::Success
            }
            code => InstallerState::UpstreamDefaultInstall {
                status: Status::from_exit_code(code),
            },
        }
    }

    fn on_autoinstall(&mut self, path: PathBuf) -> InstallerState {
        if let Some(fallback) = self.unavailable() {
            return fallback;
        }
        if !self.policy.copy_file_into_distro(&path, AUTOINSTALL_DESTINATION) {
            warn!("Failed to copy {} into the distro", path.display());
            return InstallerState::UpstreamDefaultInstall {
                status: Status::FAIL,
            };
        }
        InstallerState::AutoInstalling {
            args: vec![
                "--autoinstall".to_string(),
                AUTOINSTALL_DESTINATION.to_string(),
            ],
        }
    }

    fn on_start_tui(&mut self, args: &[String]) -> InstallerState {
        match self.policy.launch_sync(args) {
            0 => InstallerState::Closed,
            code => InstallerState::UpstreamDefaultInstall {
                status: Status::from_exit_code(code),
            },
        }
    }

    fn on_start_gui(&mut self, args: &[String]) -> InstallerState {
        let Some(mut process) = self.policy.start_async(args) else {
            return InstallerState::UpstreamDefaultInstall {
                status: Status::FAIL,
            };
        };
        let window = self.policy.try_hiding_installer_window(HIDE_WINDOW_ATTEMPTS);
        if !self.policy.poll_ready(&mut process) {
            warn!("Installer never became ready");
            self.policy.terminate(process);
            return InstallerState::UpstreamDefaultInstall {
                status: Status::FAIL,
            };
        }
        self.running = Some(process);
        InstallerState::Ready { window }
    }

    fn on_block_gui(&mut self, window: Option<WindowId>) -> InstallerState {
        if let Some(window) = window {
            self.policy.show_installer_window(window);
        }
        let Some(process) = self.running.take() else {
            return InstallerState::UpstreamDefaultInstall {
                status: Status::FAIL,
            };
        };
        match self.policy.consume_process(process) {
            0 => {
                self.policy.handle_exit_status();
                InstallerState::Success
            }
            code => InstallerState::UpstreamDefaultInstall {
                status: Status::from_exit_code(code),
            },
        }
    }

    fn on_block_autoinstall(&mut self, args: &[String]) -> InstallerState {
        match self.policy.launch_sync(args) {
            0 => {
                self.policy.handle_exit_status();
                InstallerState::Success
            }
            code => InstallerState::UpstreamDefaultInstall {
                status: Status::from_exit_code(code),
            },
        }
    }

    fn record_transition(&mut self, state: &InstallerState) {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.history.push((state.name(), timestamp));
    }
}
