// Installer policy fake shared by the strategy test files

use std::cell::RefCell;
use std::path::Path;

use wsl_launcher::installer::InstallerPolicy;
use wsl_launcher::window::WindowId;

/// Installer policy answering from a script.
#[derive(Default)]
pub struct ScriptedPolicy {
    pub unavailable: bool,
    pub text_mode: bool,
    pub sync_exit: i32,
    pub async_exit: i32,
    pub launched: RefCell<Vec<Vec<String>>>,
}

impl InstallerPolicy for ScriptedPolicy {
    type Process = ();

    fn is_installer_available(&self) -> bool {
        !self.unavailable
    }

    fn prepare_prefill_info(&self) -> Vec<String> {
        Vec::new()
    }

    fn must_run_in_text_mode(&self) -> bool {
        self.text_mode
    }

    fn handle_exit_status(&self) {}

    fn copy_file_into_distro(&self, source: &Path, _destination: &str) -> bool {
        source.exists()
    }

    fn launch_sync(&self, args: &[String]) -> i32 {
        self.launched.borrow_mut().push(args.to_vec());
        self.sync_exit
    }

    fn start_async(&self, args: &[String]) -> Option<()> {
        self.launched.borrow_mut().push(args.to_vec());
        Some(())
    }

    fn try_hiding_installer_window(&self, _attempts: u32) -> Option<WindowId> {
        Some(WindowId(0x50))
    }

    fn poll_ready(&self, _process: &mut ()) -> bool {
        true
    }

    fn terminate(&self, _process: ()) {}

    fn show_installer_window(&self, _window: WindowId) {}

    fn consume_process(&self, _process: ()) -> i32 {
        self.async_exit
    }
}
