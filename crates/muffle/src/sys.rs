//! Stream-level capture: swap one logical stream's destination.

use std::fmt;
use std::fs::File;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::capture::Capture;
use crate::encoding::Encoding;
use crate::error::Result;
use crate::fd::drain_file;
use crate::state::{CaptureState, ACTIVE, ANY, START};
use crate::streams::{self, Destination, MemoryBuffer};
use crate::target::CaptureTarget;

/// What a stream-level unit puts in place of the original destination.
#[derive(Debug)]
enum Substitute {
    Memory { buffer: MemoryBuffer, tee: bool },
    File(Arc<File>),
    RefuseInput,
    /// Buffer released by `done`.
    Released,
}

/// Captures one logical stream (see [`crate::streams`]).
///
/// Only code writing through `muffle::stdout()`/`muffle::stderr()` is
/// captured; raw descriptor writes are not. Use [`crate::FdCapture`] for those.
pub struct SysCapture<E> {
    target: CaptureTarget,
    substitute: Substitute,
    saved: Option<Destination>,
    state: CaptureState,
    _encoding: PhantomData<fn() -> E>,
}

impl<E: Encoding> SysCapture<E> {
    /// Capture `target` into memory. Input gets a placeholder that refuses reads.
    pub fn new(target: CaptureTarget) -> Self {
        Self::with_substitute(target, Self::memory(target, false))
    }

    /// Capture `target` into memory while still forwarding every write.
    pub fn tee(target: CaptureTarget) -> Self {
        Self::with_substitute(target, Self::memory(target, true))
    }

    /// Send writes straight into a descriptor-level unit's backing file.
    pub(crate) fn with_file(target: CaptureTarget, file: Arc<File>) -> Self {
        let substitute = match target {
            CaptureTarget::Input => Substitute::RefuseInput,
            _ => Substitute::File(file),
        };
        Self::with_substitute(target, substitute)
    }

    fn memory(target: CaptureTarget, tee: bool) -> Substitute {
        match target {
            CaptureTarget::Input => Substitute::RefuseInput,
            _ => Substitute::Memory {
                buffer: MemoryBuffer::default(),
                tee,
            },
        }
    }

    fn with_substitute(target: CaptureTarget, substitute: Substitute) -> Self {
        Self {
            target,
            substitute,
            saved: None,
            state: CaptureState::Initialized,
            _encoding: PhantomData,
        }
    }

    /// The destination installed while capturing.
    fn active_destination(&self) -> Destination {
        match &self.substitute {
            Substitute::Memory { buffer, tee: true } => Destination::Tee {
                buffer: buffer.clone(),
                original: Box::new(
                    self.saved
                        .clone()
                        .unwrap_or(Destination::Real(self.target)),
                ),
            },
            Substitute::Memory { buffer, tee: false } => Destination::Memory(buffer.clone()),
            Substitute::File(file) => Destination::File(file.clone()),
            Substitute::RefuseInput | Substitute::Released => Destination::RefuseInput,
        }
    }
}

impl<E: Encoding> Capture for SysCapture<E> {
    type Output = E;

    fn target(&self) -> CaptureTarget {
        self.target
    }

    fn state(&self) -> CaptureState {
        self.state
    }

    fn start(&mut self) -> Result<()> {
        self.state.check("start", START)?;
        // A tee substitute is built around the destination it replaces.
        self.saved = Some(streams::current(self.target));
        let previous = streams::install(self.target, self.active_destination());
        self.saved = Some(previous);
        self.state = CaptureState::Started;
        debug!(target_stream = %self.target, "stream capture started");
        Ok(())
    }

    fn suspend(&mut self) -> Result<()> {
        self.state.check("suspend", ACTIVE)?;
        if let Some(saved) = &self.saved {
            streams::install(self.target, saved.clone());
        }
        self.state = CaptureState::Suspended;
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.state.check("resume", ACTIVE)?;
        if self.state == CaptureState::Started {
            return Ok(());
        }
        streams::install(self.target, self.active_destination());
        self.state = CaptureState::Started;
        Ok(())
    }

    fn snap(&mut self) -> Result<E> {
        self.state.check("snap", ACTIVE)?;
        let bytes = match &self.substitute {
            Substitute::Memory { buffer, .. } => buffer.take(),
            Substitute::File(file) => drain_file(file)?,
            Substitute::RefuseInput | Substitute::Released => Vec::new(),
        };
        Ok(E::decode(bytes))
    }

    fn done(&mut self) -> Result<()> {
        self.state.check("done", ANY)?;
        if self.state == CaptureState::Done {
            return Ok(());
        }
        if let Some(saved) = self.saved.take() {
            streams::install(self.target, saved);
        }
        self.substitute = Substitute::Released;
        self.state = CaptureState::Done;
        debug!(target_stream = %self.target, "stream capture done");
        Ok(())
    }

    fn write_original(&mut self, data: &E) -> Result<()> {
        self.state.check("write_original", ACTIVE)?;
        if let Some(saved) = &self.saved {
            saved.write_all(data.as_bytes())?;
        }
        Ok(())
    }
}

impl<E> fmt::Debug for SysCapture<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SysCapture")
            .field("target", &self.target)
            .field("saved", &self.saved)
            .field("state", &self.state)
            .field("substitute", &self.substitute)
            .finish()
    }
}

impl<E> Drop for SysCapture<E> {
    fn drop(&mut self) {
        if self.state == CaptureState::Done {
            return;
        }
        if let Some(saved) = self.saved.take() {
            warn!(target_stream = %self.target, "stream capture dropped while active, restoring");
            streams::install(self.target, saved);
        }
    }
}
