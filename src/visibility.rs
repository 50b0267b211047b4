//! Console visibility coordinator
//!
//! Serializes every change to console and splash visibility. The driver
//! thread and the splash watcher thread both go through
//! [`VisibilityCoordinator::with_token`]; a caller that cannot get the token
//! within the timeout gives up instead of blocking forever.

use parking_lot::Mutex;
use std::time::Duration;
use tracing::warn;

/// How long an operation waits for the token before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout-bounded mutual exclusion over visibility state `T`.
#[derive(Debug)]
pub struct VisibilityCoordinator<T> {
    state: Mutex<T>,
    timeout: Duration,
}

impl<T> VisibilityCoordinator<T> {
    pub fn new(state: T) -> Self {
        Self::with_timeout(state, DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_timeout(state: T, timeout: Duration) -> Self {
        Self {
            state: Mutex::new(state),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `f` while holding the token.
    ///
    /// Returns `None` without running `f` if the token could not be acquired
    /// in time. `operation` names the caller in the warning.
    pub fn with_token<R>(&self, operation: &str, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        match self.state.try_lock_for(self.timeout) {
            Some(mut guard) => Some(f(&mut guard)),
            None => {
                warn!(
                    "Timed out after {:?} waiting for the console token ({})",
                    self.timeout, operation
                );
                None
            }
        }
    }

    /// Consumes the coordinator and returns the protected state.
    pub fn into_inner(self) -> T {
        self.state.into_inner()
    }
}
