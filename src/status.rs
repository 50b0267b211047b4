//! Launcher status codes
//!
//! The orchestration driver reports a single integer status. Zero is success,
//! installer-reported failure codes pass through unchanged, and every other
//! failure path maps onto one of a few HRESULT-valued generic codes.

use std::fmt;

/// Status code returned by the orchestration driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

impl Status {
    /// The operation completed successfully.
    pub const SUCCESS: Status = Status(0);
    /// Unspecified failure (`E_FAIL`).
    pub const FAIL: Status = Status(0x8000_4005_u32 as i32);
    /// Nothing was attempted (`E_NOTIMPL`).
    pub const NOT_IMPLEMENTED: Status = Status(0x8000_4001_u32 as i32);
    /// The installer reached a state the driver did not expect (`E_UNEXPECTED`).
    pub const UNEXPECTED: Status = Status(0x8000_FFFF_u32 as i32);

    /// Exit code reported by an installer process, passed through verbatim.
    #[inline]
    pub const fn from_exit_code(code: i32) -> Self {
        Self(code)
    }

    #[inline]
    pub const fn code(self) -> i32 {
        self.0
    }

    #[inline]
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Maps the status onto a process exit code.
    ///
    /// Values that fit a Unix exit status are kept as they are so installer
    /// codes remain visible to the caller; everything else becomes `1`.
    pub const fn exit_code(self) -> i32 {
        if self.0 >= 0 && self.0 <= 255 {
            self.0
        } else {
            1
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::NOT_IMPLEMENTED
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SUCCESS => write!(f, "success"),
            Self::FAIL => write!(f, "failure (0x{:08X})", self.0 as u32),
            Self::NOT_IMPLEMENTED => write!(f, "not implemented (0x{:08X})", self.0 as u32),
            Self::UNEXPECTED => write!(f, "unexpected (0x{:08X})", self.0 as u32),
            Self(code) => write!(f, "installer exit code {}", code),
        }
    }
}
