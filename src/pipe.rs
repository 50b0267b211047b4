//! Local named pipe used for console redirection
//!
//! A [`FifoPipe`] is a FIFO living in the temp directory whose read end is
//! opened at construction (and typically handed to the splash process as its
//! stdin) and whose write end is opened lazily, the first time somebody asks
//! for it. Both client and server stay in this process until the read end is
//! inherited by a child.
//!
//! # Invariants
//!
//! - The read end is valid for the whole lifetime of the pipe.
//! - A valid write fd is both the "handle" and the "descriptor" of the write
//!   end: there is no separate OS object to keep in sync.
//! - Once opening the write end failed it is never retried, until the write
//!   end is explicitly closed with [`FifoPipe::close_write_end`].
//! - Opening the write end never blocks: the FIFO is opened non-blocking and
//!   switched back to blocking I/O once it is connected.

use nix::errno::Errno;
use nix::fcntl::{self, FcntlArg, FdFlag, OFlag};
use nix::sys::stat::Mode;
use nix::unistd;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Prefix shared by every FIFO created by the launcher.
pub const PIPE_NAME_PREFIX: &str = "wsl-launcher-";

/// Suffix used when the requested name sanitizes to nothing.
pub const DEFAULT_PIPE_SUFFIX: &str = "LOCAL";

/// Longest suffix (in bytes) that still fits `NAME_MAX` together with the prefix.
pub const MAX_SUFFIX_LENGTH: usize = 255 - PIPE_NAME_PREFIX.len();

/// Errors raised while creating or connecting a [`FifoPipe`].
#[derive(Debug, Error)]
pub enum PipeError {
    /// The FIFO node or its read end could not be created
    #[error("Failed to create a pipe. Pipe name was: {path}. Error: {source}")]
    Create { path: PathBuf, source: Errno },

    /// The write end could not be opened
    #[error("Failed to open the write end of pipe {path}. Error: {source}")]
    Open { path: PathBuf, source: Errno },
}

impl From<PipeError> for crate::error::LauncherError {
    fn from(err: PipeError) -> Self {
        crate::error::LauncherError::Pipe(err.to_string())
    }
}

/// Returns an always valid FIFO file name built from `suffix`.
///
/// Path separators and NULs are removed, the suffix is trimmed to
/// [`MAX_SUFFIX_LENGTH`] bytes (on a char boundary) and an empty result is
/// replaced by [`DEFAULT_PIPE_SUFFIX`].
pub fn pipe_name_from(suffix: &str) -> String {
    let mut name: String = suffix.chars().filter(|c| *c != '/' && *c != '\0').collect();
    if name.len() > MAX_SUFFIX_LENGTH {
        let mut cut = MAX_SUFFIX_LENGTH;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
    }
    if name.is_empty() {
        name.push_str(DEFAULT_PIPE_SUFFIX);
    }
    format!("{}{}", PIPE_NAME_PREFIX, name)
}

/// Full path of the FIFO for `suffix` inside `dir`.
pub fn pipe_path_from(dir: &Path, suffix: &str) -> PathBuf {
    dir.join(pipe_name_from(suffix))
}

/// The pipe API the console service depends on.
///
/// Implemented by [`FifoPipe`]; tests substitute fakes that fail to expose a
/// write end or that write into a regular file.
pub trait ConsolePipe {
    /// Human readable name, used in log messages.
    fn name(&self) -> String;

    /// Raw fd of the read end, `None` if the pipe is unusable.
    fn read_fd(&self) -> Option<RawFd>;

    /// Raw fd of the write end, opening it on first use.
    fn write_fd(&mut self) -> Option<RawFd>;

    /// Releases the write end. Required after installing it onto the std
    /// streams so the reader sees EOF once those are restored.
    fn close_write_end(&mut self);

    /// Severs the server side so no further writer can connect. Idempotent.
    fn disconnect(&mut self);
}

/// Write-end memo: distinguishes "not attempted yet" from "attempted and failed".
#[derive(Debug, Default)]
struct WriteEnd {
    fd: Option<OwnedFd>,
    open_failed: bool,
}

/// FIFO-backed local named pipe.
#[derive(Debug)]
pub struct FifoPipe {
    path: PathBuf,
    read: OwnedFd,
    write: WriteEnd,
    inherit_write: bool,
    disconnected: bool,
}

impl FifoPipe {
    /// Creates a FIFO in the system temp directory.
    pub fn create(inherit_read: bool, inherit_write: bool, name: &str) -> Result<Self, PipeError> {
        Self::create_in(&std::env::temp_dir(), inherit_read, inherit_write, name)
    }

    /// Creates a FIFO in `dir`.
    ///
    /// `inherit_read` / `inherit_write` decide whether the respective end
    /// survives `exec` in child processes.
    pub fn create_in(
        dir: &Path,
        inherit_read: bool,
        inherit_write: bool,
        name: &str,
    ) -> Result<Self, PipeError> {
        let path = pipe_path_from(dir, name);
        let create_err = |source| PipeError::Create {
            path: path.clone(),
            source,
        };

        match unistd::mkfifo(path.as_path(), Mode::S_IRUSR | Mode::S_IWUSR) {
            Ok(()) => {}
            Err(Errno::EEXIST) => {
                // Stale node from a previous run.
                unistd::unlink(path.as_path()).map_err(create_err)?;
                unistd::mkfifo(path.as_path(), Mode::S_IRUSR | Mode::S_IWUSR).map_err(create_err)?;
            }
            Err(e) => return Err(create_err(e)),
        }

        let raw = match fcntl::open(
            path.as_path(),
            OFlag::O_RDONLY | OFlag::O_NONBLOCK | OFlag::O_CLOEXEC,
            Mode::empty(),
        ) {
            Ok(raw) => raw,
            Err(e) => {
                let _ = unistd::unlink(path.as_path());
                return Err(create_err(e));
            }
        };
        // SAFETY: `raw` was just returned by open(2) and is owned by nobody else.
        let read = unsafe { OwnedFd::from_raw_fd(raw) };

        let configured = set_blocking(read.as_raw_fd()).and_then(|_| set_inheritable(read.as_raw_fd(), inherit_read));
        if let Err(e) = configured {
            let _ = unistd::unlink(path.as_path());
            return Err(create_err(e));
        }

        debug!("Created pipe {}", path.display());
        Ok(Self {
            path,
            read,
            write: WriteEnd::default(),
            inherit_write,
            disconnected: false,
        })
    }

    /// Filesystem path of the FIFO node.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a write end is currently open.
    pub fn is_write_open(&self) -> bool {
        self.write.fd.is_some()
    }

    fn open_write_end(&mut self) -> Result<(), PipeError> {
        let open_err = |source| PipeError::Open {
            path: self.path.clone(),
            source,
        };
        if self.disconnected {
            return Err(open_err(Errno::ENOENT));
        }
        // Non-blocking open fails fast with ENXIO instead of hanging when
        // nobody reads; the read end we hold makes it succeed normally.
        let raw = fcntl::open(
            self.path.as_path(),
            OFlag::O_WRONLY | OFlag::O_NONBLOCK | OFlag::O_CLOEXEC,
            Mode::empty(),
        )
        .map_err(open_err)?;
        // SAFETY: freshly opened descriptor, exclusively owned here.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        set_blocking(fd.as_raw_fd()).map_err(open_err)?;
        set_inheritable(fd.as_raw_fd(), self.inherit_write).map_err(open_err)?;
        self.write.fd = Some(fd);
        Ok(())
    }
}

impl ConsolePipe for FifoPipe {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn read_fd(&self) -> Option<RawFd> {
        Some(self.read.as_raw_fd())
    }

    fn write_fd(&mut self) -> Option<RawFd> {
        if self.write.fd.is_none() && !self.write.open_failed {
            if let Err(e) = self.open_write_end() {
                debug!("{}", e);
                self.write.open_failed = true;
            }
        }
        self.write.fd.as_ref().map(|fd| fd.as_raw_fd())
    }

    fn close_write_end(&mut self) {
        // Dropping the OwnedFd closes it.
        self.write = WriteEnd::default();
    }

    fn disconnect(&mut self) {
        if self.disconnected {
            return;
        }
        self.disconnected = true;
        if let Err(e) = unistd::unlink(self.path.as_path()) {
            debug!("Failed to unlink pipe {}: {}", self.path.display(), e);
        }
    }
}

impl Drop for FifoPipe {
    fn drop(&mut self) {
        self.disconnect();
        self.close_write_end();
        // `read` closes itself.
    }
}

fn set_blocking(fd: RawFd) -> Result<(), Errno> {
    let flags = OFlag::from_bits_truncate(fcntl::fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl::fcntl(fd, FcntlArg::F_SETFL(flags & !OFlag::O_NONBLOCK))?;
    Ok(())
}

fn set_inheritable(fd: RawFd, inheritable: bool) -> Result<(), Errno> {
    let flags = if inheritable {
        FdFlag::empty()
    } else {
        FdFlag::FD_CLOEXEC
    };
    fcntl::fcntl(fd, FcntlArg::F_SETFD(flags))?;
    Ok(())
}
