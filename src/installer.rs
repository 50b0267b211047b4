//! Installer policy
//!
//! [`InstallerPolicy`] is everything the installer state machine needs from
//! the outside world. [`ProcessInstallerPolicy`] implements it by running the
//! installer and its probes as tracked child processes, driven by
//! [`LauncherConfig`].

use crate::config::{ForceMode, LauncherConfig, LAUNCHER_COMMAND_FILE, PREFILL_DESTINATION};
use crate::process_guard::{exit_code_of, spawn_tracked, TrackedChild};
use crate::window::{WindowId, WindowManager};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Exit code reported for an installer that had to be killed.
pub const CRASHED_EXIT_CODE: i32 = -5;

/// Exit code reported when the installer could not be launched at all.
pub const LAUNCH_FAILED_EXIT_CODE: i32 = -1;

/// Base of the decaying delay between readiness probes.
pub const INITIAL_POLL_DELAY: Duration = Duration::from_millis(4000);

/// Each readiness delay is this fraction of the previous one.
pub const POLL_DELAY_RATIO: f32 = 0.85;

/// How long a single probe may run before it is killed.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Grace period given to the installer between SIGTERM and SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Pause between two lookups of the installer window.
const WINDOW_LOOKUP_INTERVAL: Duration = Duration::from_millis(20);

/// Side effects the installer state machine delegates.
pub trait InstallerPolicy {
    /// Handle of an installer started with [`InstallerPolicy::start_async`].
    type Process;

    fn is_installer_available(&self) -> bool;

    /// Extra installer arguments carrying prefill answers, empty if none.
    fn prepare_prefill_info(&self) -> Vec<String>;

    fn must_run_in_text_mode(&self) -> bool;

    /// Acts upon whatever the installer left for the launcher on exit.
    fn handle_exit_status(&self);

    /// Copies `source` to `destination`, an absolute path inside the distro.
    fn copy_file_into_distro(&self, source: &Path, destination: &str) -> bool;

    /// Runs the installer with `args` to completion and returns its exit code.
    fn launch_sync(&self, args: &[String]) -> i32;

    fn start_async(&self, args: &[String]) -> Option<Self::Process>;

    /// Looks for the installer window up to `attempts` times and hides it.
    fn try_hiding_installer_window(&self, attempts: u32) -> Option<WindowId>;

    /// Waits until the started installer is ready for the user.
    fn poll_ready(&self, process: &mut Self::Process) -> bool;

    fn terminate(&self, process: Self::Process);

    fn show_installer_window(&self, window: WindowId);

    /// Blocks until the installer exits and returns its effective exit code.
    fn consume_process(&self, process: Self::Process) -> i32;
}

/// Successive readiness delays: `initial * ratio`, `initial * ratio^2`, ...
pub fn poll_delays(initial: Duration, ratio: f32) -> impl Iterator<Item = Duration> {
    std::iter::successors(Some(initial.mul_f32(ratio)), move |d| Some(d.mul_f32(ratio)))
}

/// Runs the installer as a local child process.
pub struct ProcessInstallerPolicy {
    config: LauncherConfig,
    windows: Arc<dyn WindowManager>,
    force_mode: ForceMode,
    graphics_supported: bool,
    initial_poll_delay: Duration,
}

impl ProcessInstallerPolicy {
    pub fn new(
        config: LauncherConfig,
        windows: Arc<dyn WindowManager>,
        force_mode: ForceMode,
        graphics_supported: bool,
    ) -> Self {
        Self {
            config,
            windows,
            force_mode,
            graphics_supported,
            initial_poll_delay: INITIAL_POLL_DELAY,
        }
    }

    /// Overrides the base of the readiness delays.
    pub fn with_poll_delay(mut self, initial: Duration) -> Self {
        self.initial_poll_delay = initial;
        self
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    fn installer_command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.config.installer_program);
        cmd.args(&self.config.installer_args).args(args);
        cmd
    }

    /// Runs a probe without any I/O and returns its exit code.
    fn run_probe(&self, probe: &[String]) -> i32 {
        let Some((program, args)) = probe.split_first() else {
            return LAUNCH_FAILED_EXIT_CODE;
        };
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let mut child = match spawn_tracked(&mut cmd) {
            Ok(child) => child,
            Err(e) => {
                debug!("Failed to run probe {:?}: {}", probe, e);
                return LAUNCH_FAILED_EXIT_CODE;
            }
        };
        match child.wait_timeout(Some(PROBE_TIMEOUT)) {
            Ok(Some(status)) => exit_code_of(status),
            Ok(None) => {
                let _ = child.terminate(Duration::ZERO);
                CRASHED_EXIT_CODE
            }
            Err(e) => {
                debug!("Failed to wait for probe {:?}: {}", probe, e);
                CRASHED_EXIT_CODE
            }
        }
    }

    fn copy_into(&self, source: &Path, destination: &str) -> Result<()> {
        let target = self.config.host_path_of(destination);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        fs::copy(source, &target)
            .with_context(|| format!("Failed to copy {:?} to {:?}", source, target))?;
        Ok(())
    }

    fn consume_command_file(&self) -> Result<()> {
        let path = self.config.host_path_of(LAUNCHER_COMMAND_FILE);
        if !path.exists() {
            return Ok(());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read launcher commands from {:?}", path))?;
        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            info!("Installer left a launcher command: {}", line);
        }
        fs::remove_file(&path).with_context(|| format!("Failed to remove {:?}", path))?;
        Ok(())
    }
}

impl InstallerPolicy for ProcessInstallerPolicy {
    type Process = TrackedChild;

    fn is_installer_available(&self) -> bool {
        self.run_probe(&self.config.availability_probe) == 0
    }

    fn prepare_prefill_info(&self) -> Vec<String> {
        let Some(source) = &self.config.prefill_file else {
            return Vec::new();
        };
        match self.copy_into(source, PREFILL_DESTINATION) {
            Ok(()) => vec![format!("--prefill={}", PREFILL_DESTINATION)],
            Err(e) => {
                warn!("Skipping prefill: {:#}", e);
                Vec::new()
            }
        }
    }

    fn must_run_in_text_mode(&self) -> bool {
        self.force_mode.requires_text_mode(self.graphics_supported)
    }

    fn handle_exit_status(&self) {
        if let Err(e) = self.consume_command_file() {
            warn!("{:#}", e);
        }
    }

    fn copy_file_into_distro(&self, source: &Path, destination: &str) -> bool {
        match self.copy_into(source, destination) {
            Ok(()) => true,
            Err(e) => {
                warn!("{:#}", e);
                false
            }
        }
    }

    fn launch_sync(&self, args: &[String]) -> i32 {
        info!("Running installer with {:?}", args);
        let mut cmd = self.installer_command(args);
        let mut child = match spawn_tracked(&mut cmd) {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to launch {}: {}", self.config.installer_program, e);
                return LAUNCH_FAILED_EXIT_CODE;
            }
        };
        match child.wait() {
            Ok(status) => exit_code_of(status),
            Err(e) => {
                warn!("Failed to wait for the installer: {}", e);
                LAUNCH_FAILED_EXIT_CODE
            }
        }
    }

    fn start_async(&self, args: &[String]) -> Option<TrackedChild> {
        info!("Starting installer with {:?}", args);
        let mut cmd = self.installer_command(args);
        match spawn_tracked(&mut cmd) {
            Ok(child) => Some(child),
            Err(e) => {
                warn!("Failed to start {}: {}", self.config.installer_program, e);
                None
            }
        }
    }

    fn try_hiding_installer_window(&self, attempts: u32) -> Option<WindowId> {
        let title = self.config.installer_window_title();
        for _ in 0..attempts {
            if let Some(window) = self.windows.find_window(None, &title) {
                self.windows.hide(window);
                return Some(window);
            }
            std::thread::sleep(WINDOW_LOOKUP_INTERVAL);
        }
        debug!("Installer window {:?} not found", title);
        None
    }

    fn poll_ready(&self, process: &mut TrackedChild) -> bool {
        let delays = poll_delays(self.initial_poll_delay, POLL_DELAY_RATIO)
            .take(self.config.readiness_attempts as usize);
        for delay in delays {
            if let Ok(Some(status)) = process.try_wait() {
                warn!("Installer exited before becoming ready ({})", status);
                return false;
            }
            if self.run_probe(&self.config.readiness_probe) == 0 {
                info!("Installer is ready");
                return true;
            }
            std::thread::sleep(delay);
        }
        false
    }

    fn terminate(&self, mut process: TrackedChild) {
        if let Err(e) = process.terminate(TERMINATE_GRACE) {
            warn!("Failed to terminate the installer: {}", e);
        }
    }

    fn show_installer_window(&self, window: WindowId) {
        if !self.windows.show(window) {
            debug!("Could not show installer window {}", window);
        }
    }

    fn consume_process(&self, mut process: TrackedChild) -> i32 {
        let status = match process.wait_timeout(self.config.installer_timeout()) {
            Ok(Some(status)) => status,
            Ok(None) => {
                warn!("Installer timed out, terminating it");
                let _ = process.terminate(TERMINATE_GRACE);
                return CRASHED_EXIT_CODE;
            }
            Err(e) => {
                warn!("Failed to wait for the installer: {}", e);
                return CRASHED_EXIT_CODE;
            }
        };
        // What matters is whether the installer finished its job, not how it exited.
        if !self.config.completion_probe.is_empty()
            && self.run_probe(&self.config.completion_probe) == 0
        {
            return 0;
        }
        exit_code_of(status)
    }
}
