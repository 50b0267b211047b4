// Integration tests for the orchestration driver
//
// The installer, splash process and window system are replaced by scripted
// fakes; the console is redirected for real, but on temp-file stream slots
// so the test harness keeps its own stdout/stderr.

#![cfg(feature = "splash")]

mod common;

use std::fs::File;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::ScriptedPolicy;
use wsl_launcher::console::StreamSlots;
use wsl_launcher::install_state::{InstallerState, Mode};
use wsl_launcher::splash::{ShowConsoleCallback, SplashError, SplashLauncher, SplashProcess, SplashState};
use wsl_launcher::status::Status;
use wsl_launcher::strategy::{LauncherStrategy, SplashEnabledStrategy, SplashOptions};
use wsl_launcher::window::{WindowError, WindowId, WindowManager};

// =============================================================================
// Fakes
// =============================================================================

/// Window system with a single console window, recording calls.
#[derive(Default)]
struct RecordingWindows {
    calls: Mutex<Vec<String>>,
    /// Reports that windows cannot be looked up at all
    blind: bool,
}

const CONSOLE_WINDOW: WindowId = WindowId(0x10);
const SPLASH_WINDOW: WindowId = WindowId(0x20);

impl RecordingWindows {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl WindowManager for RecordingWindows {
    fn find_window(&self, _class: Option<&str>, _title: &str) -> Option<WindowId> {
        Some(CONSOLE_WINDOW)
    }

    fn can_find_windows(&self) -> bool {
        !self.blind
    }

    fn console_window(&self) -> Option<WindowId> {
        Some(CONSOLE_WINDOW)
    }

    fn show(&self, window: WindowId) -> bool {
        self.calls.lock().unwrap().push(format!("show {}", window));
        true
    }

    fn hide(&self, window: WindowId) -> bool {
        self.calls.lock().unwrap().push(format!("hide {}", window));
        true
    }

    fn is_visible(&self, _window: WindowId) -> bool {
        true
    }

    fn resize_relative(&self, window: WindowId, anchor: WindowId) -> Result<(), WindowError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("resize {} over {}", window, anchor));
        Ok(())
    }
}

/// Everything the fake splash saw, shared with the test body.
#[derive(Default)]
struct SplashLog {
    events: Vec<&'static str>,
    lookups: usize,
    stdin: Option<RawFd>,
    callback: Option<ShowConsoleCallback>,
}

type SharedLog = Arc<Mutex<SplashLog>>;

#[derive(Default)]
struct FakeSplashLauncher {
    log: SharedLog,
    fail: bool,
    /// The splash window only appears on the second lookup after launch
    late_window: bool,
}

struct FakeSplash {
    log: SharedLog,
    window: Option<WindowId>,
}

impl SplashProcess for FakeSplash {
    fn window(&self) -> Option<WindowId> {
        self.window
    }

    fn locate_window(&mut self) -> Option<WindowId> {
        let mut log = self.log.lock().unwrap();
        log.lookups += 1;
        if log.lookups >= 2 {
            self.window = Some(SPLASH_WINDOW);
        }
        self.window
    }

    fn show(&mut self) -> bool {
        self.log.lock().unwrap().events.push("show");
        true
    }

    fn hide(&mut self) -> bool {
        self.log.lock().unwrap().events.push("hide");
        true
    }

    fn unsubscribe(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.events.push("unsubscribe");
        log.callback = None;
    }

    fn terminate(&mut self) {
        self.log.lock().unwrap().events.push("terminate");
    }
}

impl SplashLauncher for FakeSplashLauncher {
    type Process = FakeSplash;

    fn launch(
        &self,
        path: &Path,
        stdin: RawFd,
        on_show_console: ShowConsoleCallback,
    ) -> Result<FakeSplash, SplashError> {
        if self.fail {
            return Err(SplashError::NotFound(path.to_path_buf()));
        }
        let mut log = self.log.lock().unwrap();
        log.events.push("launch");
        log.stdin = Some(stdin);
        log.callback = Some(on_show_console);
        Ok(FakeSplash {
            log: Arc::clone(&self.log),
            window: (!self.late_window).then_some(SPLASH_WINDOW),
        })
    }
}

/// Temp files standing in for stdout/stderr plus a fake splash executable.
struct Fixture {
    dir: tempfile::TempDir,
    _out: File,
    _err: File,
    slots: StreamSlots,
    splash_path: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempfile().unwrap();
        let err = tempfile::tempfile().unwrap();
        let slots = StreamSlots {
            stdout: out.as_raw_fd(),
            stderr: err.as_raw_fd(),
        };
        let splash_path = dir.path().join("splash");
        std::fs::write(&splash_path, b"").unwrap();
        Self {
            dir,
            _out: out,
            _err: err,
            slots,
            splash_path,
        }
    }

    fn options(&self) -> SplashOptions {
        SplashOptions {
            splash_path: self.splash_path.clone(),
            pipe_dir: self.dir.path().to_path_buf(),
            slots: self.slots,
            console_window_class: None,
            console_window_title: "console".to_string(),
            lock_timeout: Duration::from_millis(500),
            window_lookup_attempts: 5,
        }
    }

    fn strategy(
        &self,
        policy: ScriptedPolicy,
        fail_launch: bool,
    ) -> (
        SplashEnabledStrategy<ScriptedPolicy, FakeSplashLauncher>,
        SharedLog,
        Arc<RecordingWindows>,
    ) {
        let launcher = FakeSplashLauncher {
            fail: fail_launch,
            ..Default::default()
        };
        self.strategy_with(policy, launcher, RecordingWindows::default())
    }

    fn strategy_with(
        &self,
        policy: ScriptedPolicy,
        launcher: FakeSplashLauncher,
        windows: RecordingWindows,
    ) -> (
        SplashEnabledStrategy<ScriptedPolicy, FakeSplashLauncher>,
        SharedLog,
        Arc<RecordingWindows>,
    ) {
        let log = Arc::clone(&launcher.log);
        let windows = Arc::new(windows);
        let strategy = SplashEnabledStrategy::new(policy, launcher, windows.clone(), self.options());
        (strategy, log, windows)
    }
}

// =============================================================================
// Splash-enabled strategy
// =============================================================================

#[test]
fn test_run_splash_redirects_and_hides_console() {
    let fixture = Fixture::new();
    let (mut strategy, log, windows) = fixture.strategy(ScriptedPolicy::default(), false);

    strategy.do_run_splash(true);

    assert!(strategy.is_splash_running());
    assert!(strategy.is_console_redirected());
    assert!(!strategy.is_console_visible());
    assert_eq!(
        strategy.splash_state(),
        Some(SplashState::Visible {
            window: Some(SPLASH_WINDOW)
        })
    );
    assert!(log.lock().unwrap().stdin.is_some());
    assert_eq!(windows.calls(), vec![format!("hide {}", CONSOLE_WINDOW)]);
}

#[test]
fn test_run_splash_locates_late_window_after_launch() {
    let fixture = Fixture::new();
    let launcher = FakeSplashLauncher {
        late_window: true,
        ..Default::default()
    };
    let (mut strategy, log, windows) =
        fixture.strategy_with(ScriptedPolicy::default(), launcher, RecordingWindows::default());

    strategy.do_run_splash(true);

    assert_eq!(log.lock().unwrap().lookups, 2);
    assert_eq!(
        strategy.splash_state(),
        Some(SplashState::Visible {
            window: Some(SPLASH_WINDOW)
        })
    );

    // The located window anchors the console when it comes back.
    strategy.do_install(Mode::Gui);
    assert!(windows
        .calls()
        .contains(&format!("resize {} over {}", CONSOLE_WINDOW, SPLASH_WINDOW)));
}

#[test]
fn test_run_splash_skips_lookup_without_window_search() {
    let fixture = Fixture::new();
    let launcher = FakeSplashLauncher {
        late_window: true,
        ..Default::default()
    };
    let windows = RecordingWindows {
        blind: true,
        ..Default::default()
    };
    let (mut strategy, log, _windows) = fixture.strategy_with(ScriptedPolicy::default(), launcher, windows);

    strategy.do_run_splash(false);

    assert!(strategy.is_splash_running());
    assert_eq!(log.lock().unwrap().lookups, 0);
    assert_eq!(strategy.splash_state(), Some(SplashState::Visible { window: None }));
}

#[test]
fn test_run_splash_keeps_console_visible_when_not_hiding() {
    let fixture = Fixture::new();
    let (mut strategy, _log, windows) = fixture.strategy(ScriptedPolicy::default(), false);

    strategy.do_run_splash(false);

    assert!(strategy.is_splash_running());
    assert!(strategy.is_console_visible());
    assert!(windows.calls().is_empty());
}

#[test]
fn test_run_splash_without_executable_stays_console_only() {
    let fixture = Fixture::new();
    std::fs::remove_file(&fixture.splash_path).unwrap();
    let (mut strategy, log, _windows) = fixture.strategy(ScriptedPolicy::default(), false);

    strategy.do_run_splash(true);

    assert!(!strategy.is_splash_running());
    assert!(!strategy.is_console_redirected());
    assert!(strategy.splash_state().is_none());
    assert!(log.lock().unwrap().events.is_empty());
}

#[test]
fn test_run_splash_launch_failure_restores_console() {
    let fixture = Fixture::new();
    let (mut strategy, _log, _windows) = fixture.strategy(ScriptedPolicy::default(), true);

    strategy.do_run_splash(true);

    assert!(!strategy.is_splash_running());
    assert!(!strategy.is_console_redirected());
    assert!(strategy.is_console_visible());
    assert_eq!(strategy.splash_state(), Some(SplashState::NotRunning));
}

#[test]
fn test_gui_install_success_closes_splash() {
    let fixture = Fixture::new();
    let (mut strategy, log, windows) = fixture.strategy(ScriptedPolicy::default(), false);

    strategy.do_run_splash(true);
    let status = strategy.do_install(Mode::Gui);

    assert_eq!(status, Status::SUCCESS);
    assert_eq!(strategy.installer().state(), &InstallerState::Success);
    assert!(!strategy.is_splash_running());
    assert!(!strategy.is_console_redirected());
    assert!(strategy.is_console_visible());
    assert_eq!(strategy.splash_state(), Some(SplashState::Closed));

    // Ready hides the splash, Success tears it down.
    assert_eq!(
        log.lock().unwrap().events,
        vec!["launch", "hide", "unsubscribe", "terminate"]
    );
    // The console comes back over the splash window.
    let calls = windows.calls();
    assert!(calls.contains(&format!("resize {} over {}", CONSOLE_WINDOW, SPLASH_WINDOW)));
    assert_eq!(calls.last(), Some(&format!("show {}", CONSOLE_WINDOW)));
}

#[test]
fn test_text_install_shows_console_before_installer() {
    let fixture = Fixture::new();
    let (mut strategy, _log, _windows) = fixture.strategy(ScriptedPolicy::default(), false);

    strategy.do_run_splash(true);
    let status = strategy.do_install(Mode::Text);

    assert_eq!(status, Status::SUCCESS);
    assert!(!strategy.is_console_redirected());
    assert!(!strategy.is_splash_running());
}

#[test]
fn test_installer_code_passes_through_and_restores_console() {
    let fixture = Fixture::new();
    let policy = ScriptedPolicy {
        async_exit: 7,
        ..Default::default()
    };
    let (mut strategy, _log, _windows) = fixture.strategy(policy, false);

    strategy.do_run_splash(true);
    let status = strategy.do_install(Mode::Gui);

    assert_eq!(status, Status(7));
    assert!(!strategy.is_console_redirected());
    assert!(strategy.is_console_visible());
    // The splash is left alone on failure.
    assert!(strategy.is_splash_running());
}

#[test]
fn test_rejected_install_closes_splash() {
    let fixture = Fixture::new();
    let (mut strategy, _log, _windows) = fixture.strategy(ScriptedPolicy::default(), false);

    assert_eq!(strategy.do_install(Mode::Gui), Status::SUCCESS);
    strategy.do_run_splash(false);
    assert!(strategy.is_splash_running());

    // The installer already finished, so the first event is rejected.
    let status = strategy.do_install(Mode::Gui);

    assert_eq!(status, Status::UNEXPECTED);
    assert!(!strategy.is_splash_running());
    assert!(!strategy.is_console_redirected());
    assert_eq!(strategy.splash_state(), Some(SplashState::Closed));
}

#[test]
fn test_show_console_callback_restores_console() {
    let fixture = Fixture::new();
    let (mut strategy, log, windows) = fixture.strategy(ScriptedPolicy::default(), false);

    strategy.do_run_splash(true);
    let callback = log.lock().unwrap().callback.take().unwrap();
    // Fired from another thread, like the splash watcher does.
    std::thread::spawn(callback).join().unwrap();

    assert!(!strategy.is_console_redirected());
    assert!(strategy.is_console_visible());
    assert!(strategy.is_splash_running());
    assert_eq!(windows.calls().last(), Some(&format!("show {}", CONSOLE_WINDOW)));
}

#[test]
fn test_callback_after_strategy_dropped_is_harmless() {
    let fixture = Fixture::new();
    let (mut strategy, log, _windows) = fixture.strategy(ScriptedPolicy::default(), false);

    strategy.do_run_splash(true);
    let callback = log.lock().unwrap().callback.take().unwrap();
    drop(strategy);

    callback();
    assert!(log.lock().unwrap().events.contains(&"terminate"));
}

#[test]
fn test_splash_runs_only_once() {
    let fixture = Fixture::new();
    let (mut strategy, log, _windows) = fixture.strategy(ScriptedPolicy::default(), false);

    strategy.do_run_splash(false);
    strategy.do_run_splash(false);

    let launches = log
        .lock()
        .unwrap()
        .events
        .iter()
        .filter(|e| **e == "launch")
        .count();
    assert_eq!(launches, 1);
}
