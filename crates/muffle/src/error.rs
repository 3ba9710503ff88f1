//! Errors raised by capture units, sessions and the manager.

use std::io;
use std::os::fd::RawFd;

use thiserror::Error;

use crate::state::CaptureState;

/// Message carried by the error returned when reading a captured stdin.
pub const STDIN_CAPTURED: &str =
    "reading from stdin while output is captured!  Consider using `-s`.";

/// Errors that can occur while capturing.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// An operation was attempted from a state that does not allow it.
    #[error("cannot {op} in state {state}: expected one of {expected}")]
    InvalidState {
        op: &'static str,
        state: CaptureState,
        expected: String,
    },

    #[error("session was already stopped")]
    AlreadyStopped,

    #[error("global capture was already started")]
    AlreadyStarted,

    #[error("global capture has not been started")]
    NotStarted,

    /// A second fixture capture was requested while one is active.
    #[error("cannot use {requested} and {current} at the same time")]
    FixtureConflict { requested: String, current: String },

    /// A descriptor operation failed. Never retried.
    #[error("{op} failed on fd {fd}: {source}")]
    Os {
        op: &'static str,
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CaptureError {
    /// Build an [`CaptureError::Os`] from `errno`.
    pub(crate) fn last_os(op: &'static str, fd: RawFd) -> Self {
        CaptureError::Os {
            op,
            fd,
            source: io::Error::last_os_error(),
        }
    }

    /// True for errors caused by misuse of the API rather than the environment.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            CaptureError::InvalidState { .. }
                | CaptureError::AlreadyStopped
                | CaptureError::AlreadyStarted
                | CaptureError::NotStarted
                | CaptureError::FixtureConflict { .. }
        )
    }
}

pub type Result<T, E = CaptureError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_message() {
        let err = CaptureError::InvalidState {
            op: "snap",
            state: CaptureState::Initialized,
            expected: "started, suspended".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "cannot snap in state initialized: expected one of started, suspended"
        );
        assert!(err.is_usage_error());
    }

    #[test]
    fn test_conflict_names_both() {
        let err = CaptureError::FixtureConflict {
            requested: "capfd".to_string(),
            current: "capsys".to_string(),
        };
        assert_eq!(err.to_string(), "cannot use capfd and capsys at the same time");
    }

    #[test]
    fn test_os_error_is_not_usage() {
        let err = CaptureError::Os {
            op: "dup2",
            fd: 1,
            source: io::Error::from_raw_os_error(libc::EBADF),
        };
        assert!(err.to_string().starts_with("dup2 failed on fd 1"));
        assert!(!err.is_usage_error());
    }
}
