//! Launcher configuration
//!
//! Everything the launcher needs to know about the guest distro and its
//! installer lives in [`LauncherConfig`], saved and loaded as JSON. The
//! `LAUNCHER_FORCE_MODE` environment variable overrides the installer's UI
//! mode detection (see [`ForceMode`]).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum::{Display, EnumString};

/// Environment variable forcing the installer UI mode.
pub const FORCE_MODE_VAR: &str = "LAUNCHER_FORCE_MODE";

/// Where the prefill answers land inside the distro.
pub const PREFILL_DESTINATION: &str = "/var/tmp/prefill-system-setup.yaml";

/// Where an autoinstall file lands inside the distro.
pub const AUTOINSTALL_DESTINATION: &str = "/var/tmp/autoinstall.yaml";

/// Command file the installer may leave behind for the launcher.
pub const LAUNCHER_COMMAND_FILE: &str = "/run/launcher-command";

/// Launcher configuration that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Name of the guest distro, used in window titles
    pub distro_name: String,
    /// Host path where the distro's root filesystem is reachable
    pub distro_root: PathBuf,

    // Installer
    pub installer_program: String,
    pub installer_args: Vec<String>,
    /// Command exiting 0 when the installer exists in the distro
    pub availability_probe: Vec<String>,
    /// Command exiting 0 once a GUI installer is ready for the user
    pub readiness_probe: Vec<String>,
    /// Command exiting 0 when the installer finished its job, whatever its exit code; empty to skip
    pub completion_probe: Vec<String>,
    /// Host-side prefill answers copied into the distro before launching
    pub prefill_file: Option<PathBuf>,
    pub readiness_attempts: u32,
    /// Upper bound for a GUI installer run, unbounded when unset
    pub installer_timeout_secs: Option<u64>,

    // Splash and console
    /// Splash executable, resolved next to the launcher binary
    pub splash_executable: String,
    pub splash_window_title: String,
    pub console_window_class: Option<String>,
    pub console_window_title: String,
    pub lock_timeout_ms: u64,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            distro_name: "Ubuntu".to_string(),
            distro_root: PathBuf::from("/"),
            installer_program: "sudo".to_string(),
            installer_args: vec!["/usr/libexec/wsl-setup".to_string()],
            availability_probe: vec!["which".to_string(), "/usr/libexec/wsl-setup".to_string()],
            readiness_probe: vec![
                "test".to_string(),
                "-S".to_string(),
                "/run/subiquity/socket".to_string(),
            ],
            completion_probe: vec![
                "grep".to_string(),
                "-E".to_string(),
                "EXITED|DONE".to_string(),
                "/run/subiquity/server-state".to_string(),
            ],
            prefill_file: None,
            readiness_attempts: 30,
            installer_timeout_secs: None,
            splash_executable: "wsl-launcher-splash".to_string(),
            splash_window_title: "Ubuntu WSL Splash".to_string(),
            console_window_class: None,
            console_window_title: "Ubuntu".to_string(),
            lock_timeout_ms: 5000,
        }
    }
}

impl LauncherConfig {
    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.distro_name.trim().is_empty() {
            anyhow::bail!("Distro name must be specified");
        }
        if self.installer_program.trim().is_empty() {
            anyhow::bail!("Installer program must be specified");
        }
        if self.availability_probe.is_empty() {
            anyhow::bail!("Availability probe must not be empty");
        }
        if self.readiness_probe.is_empty() {
            anyhow::bail!("Readiness probe must not be empty");
        }
        if self.readiness_attempts == 0 {
            anyhow::bail!("Readiness attempts must be at least 1");
        }
        if self.lock_timeout_ms == 0 {
            anyhow::bail!("Lock timeout must be positive");
        }
        if self.installer_timeout_secs == Some(0) {
            anyhow::bail!("Installer timeout must be positive when set");
        }
        if self.splash_executable.trim().is_empty() || self.splash_executable.contains('/') {
            anyhow::bail!("Splash executable must be a plain file name");
        }
        if !self.distro_root.is_absolute() {
            anyhow::bail!("Distro root must be an absolute path");
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn installer_timeout(&self) -> Option<Duration> {
        self.installer_timeout_secs.map(Duration::from_secs)
    }

    /// Host path of `destination`, an absolute path inside the distro.
    pub fn host_path_of(&self, destination: &str) -> PathBuf {
        self.distro_root.join(destination.trim_start_matches('/'))
    }

    /// Title of the GUI installer window.
    pub fn installer_window_title(&self) -> String {
        format!("Ubuntu WSL ({})", self.distro_name)
    }
}

/// Installer UI mode forced through [`FORCE_MODE_VAR`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
pub enum ForceMode {
    /// `0`, unset or anything invalid
    #[default]
    #[strum(serialize = "0")]
    AutoDetect,
    #[strum(serialize = "1")]
    Text,
    #[strum(serialize = "2")]
    Gui,
}

impl ForceMode {
    /// Interprets the raw variable value. Only a single known digit counts.
    pub fn from_value(value: Option<&str>) -> Self {
        value.and_then(|v| v.parse().ok()).unwrap_or_default()
    }

    pub fn from_env() -> Self {
        Self::from_value(std::env::var(FORCE_MODE_VAR).ok().as_deref())
    }

    /// Whether the installer must use its text UI given graphics support.
    pub fn requires_text_mode(self, graphics_supported: bool) -> bool {
        match self {
            Self::Text => true,
            Self::Gui => false,
            Self::AutoDetect => !graphics_supported,
        }
    }
}

/// Whether a graphical session is reachable from this process.
pub fn graphics_supported() -> bool {
    ["DISPLAY", "WAYLAND_DISPLAY"]
        .iter()
        .any(|var| std::env::var_os(var).is_some_and(|v| !v.is_empty()))
}
