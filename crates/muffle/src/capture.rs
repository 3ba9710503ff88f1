//! The capture unit interface shared by stream-level and descriptor-level units.

use std::fmt;

use crate::encoding::Encoding;
use crate::error::Result;
use crate::state::CaptureState;
use crate::target::CaptureTarget;

/// One captured standard stream.
///
/// Every method checks the unit's [`CaptureState`] first and fails with
/// [`CaptureError::InvalidState`](crate::CaptureError::InvalidState) when the
/// transition is not allowed. `done` is allowed from every state and is
/// idempotent.
pub trait Capture: fmt::Debug {
    type Output: Encoding;

    fn target(&self) -> CaptureTarget;

    fn state(&self) -> CaptureState;

    /// Install the substitute. Only valid once, from `Initialized`.
    fn start(&mut self) -> Result<()>;

    /// Put the original destination back temporarily.
    fn suspend(&mut self) -> Result<()>;

    /// Reinstall the substitute after [`Capture::suspend`].
    fn resume(&mut self) -> Result<()>;

    /// Return everything captured since the last snapshot and clear it.
    fn snap(&mut self) -> Result<Self::Output>;

    /// Restore the original destination for good.
    fn done(&mut self) -> Result<()>;

    /// Write straight to the original destination, bypassing the capture.
    fn write_original(&mut self, data: &Self::Output) -> Result<()>;
}

/// Output and error captured by one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureResult<E> {
    pub out: E,
    pub err: E,
}

impl<E: Encoding> CaptureResult<E> {
    pub fn new(out: E, err: E) -> Self {
        Self { out, err }
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty() && self.err.is_empty()
    }
}

impl<E> From<CaptureResult<E>> for (E, E) {
    fn from(result: CaptureResult<E>) -> Self {
        (result.out, result.err)
    }
}
