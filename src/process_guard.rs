//! Process lifecycle management for child processes
//!
//! Every process the launcher starts (the installer, its probes, the splash)
//! is spawned through [`spawn_tracked`]: it runs in its own process group,
//! dies with the launcher (`PR_SET_PDEATHSIG`) and is recorded in a global
//! registry so signal handlers and [`ProcessGuard`] can take the whole tree
//! down on exit.
//!
//! Termination sends SIGTERM to the process group first and SIGKILL to
//! whatever is still alive after the grace period.

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Global registry of child process IDs
static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Grace period between SIGTERM and SIGKILL on normal shutdown
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Interval at which waiting loops poll a child
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Registry tracking all spawned child processes
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    /// Whether cleanup has already been initiated (prevent double-cleanup)
    cleanup_initiated: bool,
}

impl ChildRegistry {
    /// Get or create the global child registry
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        debug!("Registered child process PID {}", pid);
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        debug!("Unregistered child process PID {}", pid);
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// Terminate all tracked child processes
    /// Sends SIGTERM first, waits up to `grace_period`, then SIGKILL
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.cleanup_initiated {
            debug!("Cleanup already initiated, skipping");
            return;
        }
        self.cleanup_initiated = true;

        if self.pids.is_empty() {
            debug!("No child processes to terminate");
            return;
        }

        info!("Terminating {} child process(es)...", self.count());
        let pids: Vec<u32> = self.pids.iter().copied().collect();
        for &pid in &pids {
            signal_tree(pid, Signal::SIGTERM);
        }

        let start = Instant::now();
        while start.elapsed() < grace_period {
            if pids.iter().all(|&pid| !is_process_alive(pid)) {
                info!("All child processes terminated gracefully");
                self.pids.clear();
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for &pid in &pids {
            if is_process_alive(pid) {
                warn!("Process group {} did not terminate, sending SIGKILL", pid);
                signal_tree(pid, Signal::SIGKILL);
            }
        }

        self.pids.clear();
        info!("Child process cleanup complete");
    }
}

fn with_registry(f: impl FnOnce(&mut ChildRegistry)) {
    if let Ok(mut registry) = ChildRegistry::global().lock() {
        f(&mut registry);
    }
}

/// Send a signal to a process
fn send_signal(pid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), signal)
}

/// Send a signal to an entire process group
fn send_signal_to_group(pgid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), signal)
}

/// Signals the group led by `pid`, falling back to the process alone.
fn signal_tree(pid: u32, sig: Signal) {
    if let Err(e) = send_signal_to_group(pid, sig) {
        debug!("Failed to send {} to process group {}: {}", sig, pid, e);
        if let Err(e) = send_signal(pid, sig) {
            debug!("Failed to send {} to PID {}: {}", sig, pid, e);
        }
    }
}

/// Terminates the tree led by `pid` without reaping it.
///
/// For children owned elsewhere (a watcher thread waiting on them): SIGTERM,
/// then SIGKILL if the process is still alive after `grace`.
pub fn terminate_process_tree(pid: u32, grace: Duration) {
    signal_tree(pid, Signal::SIGTERM);
    let start = Instant::now();
    while start.elapsed() < grace {
        if !is_process_alive(pid) {
            return;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    if is_process_alive(pid) {
        warn!("PID {} ignored SIGTERM, sending SIGKILL", pid);
        signal_tree(pid, Signal::SIGKILL);
    }
}

/// Check if a process is still alive (not dead or zombie)
pub fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }

    // Field 3 of /proc/pid/stat is the state; zombies are not alive.
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        let fields: Vec<&str> = stat.split_whitespace().collect();
        if fields.len() > 2 {
            return !matches!(fields[2], "Z" | "X");
        }
    }

    true
}

/// Exit code of a finished child; signal deaths map to `128 + signal`.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

/// Spawns `cmd` in a new process group and registers it for cleanup.
pub fn spawn_tracked(cmd: &mut Command) -> io::Result<TrackedChild> {
    let child = cmd.in_new_process_group().spawn()?;
    let pid = child.id();
    with_registry(|registry| registry.register(pid));
    Ok(TrackedChild { child })
}

/// A child registered in the global registry for as long as it lives.
#[derive(Debug)]
pub struct TrackedChild {
    child: Child,
}

impl TrackedChild {
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    pub fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait()
    }

    /// Waits up to `timeout` (forever when `None`). `Ok(None)` means the
    /// child is still running.
    pub fn wait_timeout(&mut self, timeout: Option<Duration>) -> io::Result<Option<ExitStatus>> {
        let Some(timeout) = timeout else {
            return self.child.wait().map(Some);
        };
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(Some(status));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    /// SIGTERM to the group, SIGKILL after `grace`, then reaps the child.
    pub fn terminate(&mut self, grace: Duration) -> io::Result<ExitStatus> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(status);
        }
        signal_tree(self.id(), Signal::SIGTERM);
        if let Some(status) = self.wait_timeout(Some(grace))? {
            return Ok(status);
        }
        warn!("PID {} ignored SIGTERM, sending SIGKILL", self.id());
        signal_tree(self.id(), Signal::SIGKILL);
        self.child.wait()
    }
}

impl Drop for TrackedChild {
    fn drop(&mut self) {
        let pid = self.child.id();
        with_registry(|registry| registry.unregister(pid));
    }
}

/// RAII guard that terminates all registered children on drop
pub struct ProcessGuard {
    registry: Arc<Mutex<ChildRegistry>>,
}

impl ProcessGuard {
    pub fn new() -> Self {
        Self {
            registry: ChildRegistry::global(),
        }
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        debug!("ProcessGuard dropped, initiating cleanup");
        if let Ok(mut registry) = self.registry.lock() {
            registry.terminate_all(SHUTDOWN_GRACE);
        }
    }
}

/// Initialize global signal handlers for graceful shutdown
/// Handles SIGINT (Ctrl+C), SIGTERM, and SIGHUP
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::thread;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            let signal_name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "UNKNOWN",
            };

            info!("Received {} signal, cleaning up...", signal_name);
            if let Ok(mut registry) = ChildRegistry::global().lock() {
                registry.terminate_all(Duration::from_secs(3));
            }

            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension trait for std::process::Command to set up process groups
pub trait CommandProcessGroup {
    /// Run the command as leader of its own process group, killed when the launcher dies
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: only async-signal-safe calls between fork and exec.
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(io::Error::from)?;

                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(io::Error::last_os_error());
                }

                Ok(())
            });
        }
        self
    }
}
