//! The three standard streams a unit can capture.

use std::fmt;
use std::os::fd::RawFd;

/// A standard stream, bound to its fixed descriptor number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureTarget {
    Input,
    Output,
    Error,
}

impl CaptureTarget {
    pub const ALL: [CaptureTarget; 3] = [
        CaptureTarget::Input,
        CaptureTarget::Output,
        CaptureTarget::Error,
    ];

    /// Descriptor number: 0, 1 or 2.
    pub fn fd(&self) -> RawFd {
        match self {
            CaptureTarget::Input => libc::STDIN_FILENO,
            CaptureTarget::Output => libc::STDOUT_FILENO,
            CaptureTarget::Error => libc::STDERR_FILENO,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CaptureTarget::Input => "stdin",
            CaptureTarget::Output => "stdout",
            CaptureTarget::Error => "stderr",
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.fd() as usize
    }
}

impl fmt::Display for CaptureTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
