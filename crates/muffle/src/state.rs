//! Lifecycle state shared by capture units and sessions.

use std::fmt;

use crate::error::{CaptureError, Result};

/// Where a unit or session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureState {
    Initialized,
    Started,
    Suspended,
    Done,
}

impl CaptureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureState::Initialized => "initialized",
            CaptureState::Started => "started",
            CaptureState::Suspended => "suspended",
            CaptureState::Done => "done",
        }
    }

    /// Fail with [`CaptureError::InvalidState`] unless `self` is one of `allowed`.
    pub fn check(self, op: &'static str, allowed: &[CaptureState]) -> Result<()> {
        if allowed.contains(&self) {
            return Ok(());
        }
        Err(CaptureError::InvalidState {
            op,
            state: self,
            expected: allowed
                .iter()
                .map(CaptureState::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        })
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Transition validity tables.
pub(crate) const START: &[CaptureState] = &[CaptureState::Initialized];
pub(crate) const ACTIVE: &[CaptureState] = &[CaptureState::Started, CaptureState::Suspended];
pub(crate) const ANY: &[CaptureState] = &[
    CaptureState::Initialized,
    CaptureState::Started,
    CaptureState::Suspended,
    CaptureState::Done,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_allows_listed_state() {
        assert!(CaptureState::Suspended.check("resume", ACTIVE).is_ok());
        assert!(CaptureState::Done.check("done", ANY).is_ok());
    }

    #[test]
    fn test_check_rejects_with_expected_list() {
        let err = CaptureState::Done.check("start", START).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot start in state done: expected one of initialized"
        );
    }
}
