//! WSL launcher - main entry point
//!
//! Parses the command line, loads the configuration and hands the requested
//! operation to the launcher strategy. The process exit code is the
//! resulting status.

use std::io::{self, BufRead};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use wsl_launcher::cli::{Cli, Commands};
use wsl_launcher::config::{graphics_supported, ForceMode, LauncherConfig};
use wsl_launcher::error::{LauncherError, Result};
use wsl_launcher::install_state::Mode;
use wsl_launcher::installer::ProcessInstallerPolicy;
use wsl_launcher::process_guard::{self, ProcessGuard};
use wsl_launcher::status::Status;
use wsl_launcher::strategy::LauncherStrategy;
use wsl_launcher::window::{HeadlessWindowManager, WindowManager, XtermWindowManager};

/// Log to stderr so that a redirected console carries the log into the splash.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<LauncherConfig> {
    let config = match path {
        Some(path) => {
            info!("Loading configuration from: {:?}", path);
            LauncherConfig::load_from_file(path)
                .map_err(|e| LauncherError::config(format!("{:#}", e)))?
        }
        None => LauncherConfig::default(),
    };
    config
        .validate()
        .map_err(|e| LauncherError::config(format!("{:#}", e)))?;
    Ok(config)
}

fn window_manager() -> Arc<dyn WindowManager> {
    match XtermWindowManager::detect() {
        Some(manager) => Arc::new(manager),
        None => {
            debug!("No controlling terminal, window operations are disabled");
            Arc::new(HeadlessWindowManager)
        }
    }
}

#[cfg(feature = "splash")]
fn build_strategy(config: LauncherConfig, windows: Arc<dyn WindowManager>) -> impl LauncherStrategy {
    use wsl_launcher::splash::ProcessSplashLauncher;
    use wsl_launcher::strategy::{SplashEnabledStrategy, SplashOptions};

    let options = SplashOptions::from_config(&config);
    let launcher = ProcessSplashLauncher::new(Arc::clone(&windows), config.splash_window_title.clone());
    let policy = ProcessInstallerPolicy::new(config, Arc::clone(&windows), ForceMode::from_env(), graphics_supported());
    SplashEnabledStrategy::new(policy, launcher, windows, options)
}

#[cfg(not(feature = "splash"))]
fn build_strategy(config: LauncherConfig, windows: Arc<dyn WindowManager>) -> impl LauncherStrategy {
    use wsl_launcher::strategy::NoSplashStrategy;

    NoSplashStrategy::new(ProcessInstallerPolicy::new(
        config,
        windows,
        ForceMode::from_env(),
        graphics_supported(),
    ))
}

fn run(command: Commands, strategy: &mut impl LauncherStrategy) -> Result<Status> {
    let status = match command {
        Commands::Install { ui, hide_console } => {
            if ui != Mode::Text {
                strategy.do_run_splash(hide_console);
            }
            strategy.do_install(ui)
        }
        Commands::Reconfig => strategy.do_reconfigure(),
        Commands::Autoinstall { file } => {
            let metadata = std::fs::metadata(&file)
                .map_err(|e| io::Error::new(e.kind(), format!("autoinstall file {:?}: {}", file, e)))?;
            if !metadata.is_file() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("autoinstall file {:?} is not a regular file", file),
                )
                .into());
            }
            strategy.do_autoinstall(&file)
        }
        Commands::RunSplash { hide_console } => {
            strategy.do_run_splash(hide_console);
            info!("Press Enter to close the splash");
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            Status::SUCCESS
        }
    };
    Ok(status)
}

fn main() {
    init_tracing();
    info!("WSL launcher starting up");

    // Children must not outlive us on SIGINT/SIGTERM
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }

    let cli = Cli::parse_args();
    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(Status::FAIL.exit_code());
        }
    };

    // Scoped so that the strategy tears the splash down and the guard reaps
    // the children before we exit.
    let status = {
        let _guard = ProcessGuard::new();
        let mut strategy = build_strategy(config, window_manager());
        run(cli.command(), &mut strategy).unwrap_or_else(|e| {
            error!("{}", e);
            Status::FAIL
        })
    };

    info!("Exiting with status {}", status);
    std::process::exit(status.exit_code());
}
