//! Error handling module for the launcher
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Component-level errors (pipe, redirection, splash, state machine) convert
//! into [`LauncherError`] so callers outside the orchestration core can use a
//! single type.

use thiserror::Error;

/// Main error type for the launcher
#[derive(Error, Debug)]
pub enum LauncherError {
    /// IO errors (files, FIFOs, child processes)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pipe creation or write-end errors
    #[error("Pipe error: {0}")]
    Pipe(String),

    /// Console redirection errors
    #[error("Console redirection error: {0}")]
    Redirect(String),

    /// Splash process errors
    #[error("Splash error: {0}")]
    Splash(String),

    /// Installer or splash state machine transition errors
    #[error("Install transition error: {0}")]
    InstallTransition(String),
}

/// Result type alias for launcher operations
pub type Result<T> = std::result::Result<T, LauncherError>;

impl LauncherError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a splash error
    pub fn splash(msg: impl Into<String>) -> Self {
        Self::Splash(msg.into())
    }
}
