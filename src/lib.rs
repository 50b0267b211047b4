//! WSL Launcher Library
//!
//! Drives a guest distro's installer on first launch: an installer state
//! machine, console redirection into a named pipe read by a splash screen,
//! and the coordination of console and splash window visibility.

pub mod cli;
pub mod config;
pub mod console;
pub mod error;
pub mod install_state;
pub mod installer;
pub mod pipe;
pub mod process_guard;
pub mod splash;
pub mod status;
pub mod strategy;
pub mod visibility;
pub mod window;

// Re-export main types for convenience
pub use config::{ForceMode, LauncherConfig};
pub use console::{ConsoleService, ConsoleState, RedirectError, StreamIdentity, StreamSlots};
pub use error::LauncherError;
pub use install_state::{InstallerController, InstallerEvent, InstallerState, InvalidTransition, Mode};
pub use installer::{InstallerPolicy, ProcessInstallerPolicy};
pub use pipe::{ConsolePipe, FifoPipe, PipeError};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use splash::{ProcessSplashLauncher, SplashController, SplashEvent, SplashLauncher, SplashProcess, SplashState};
pub use status::Status;
pub use strategy::{LauncherStrategy, NoSplashStrategy};
#[cfg(feature = "splash")]
pub use strategy::{SplashEnabledStrategy, SplashOptions};
pub use visibility::VisibilityCoordinator;
pub use window::{HeadlessWindowManager, WindowId, WindowManager, XtermWindowManager};
