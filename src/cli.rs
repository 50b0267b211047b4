use crate::install_state::Mode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// WSL distro launcher - installs and reconfigures the distro on first run
#[derive(Parser)]
#[command(name = "wsl-launcher")]
#[command(about = "Drives the distro installer behind a splash screen")]
#[command(version)]
pub struct Cli {
    /// Launcher configuration file (JSON). Built-in defaults when omitted.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the interactive installer (the default)
    Install {
        /// Installer UI (auto, text, gui)
        #[arg(long, default_value = "auto")]
        ui: Mode,

        /// Hide the console window while the splash is shown
        #[arg(long)]
        hide_console: bool,
    },
    /// Reconfigure an already installed distro
    Reconfig,
    /// Install unattended from an autoinstall file
    Autoinstall {
        /// Path to the autoinstall answers on the host
        file: PathBuf,
    },
    /// Show the splash screen until Enter is pressed
    RunSplash {
        #[arg(long)]
        hide_console: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// The subcommand to run, `install` when none was given.
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Install {
            ui: Mode::AutoDetect,
            hide_console: false,
        })
    }
}
