//! Per-test capture handles (`capsys`, `capsysbinary`, `capfd`, `capfdbinary`).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::capture::CaptureResult;
use crate::encoding::Encoding;
use crate::error::Result;
use crate::fd::FdCapture;
use crate::manager::CaptureManager;
use crate::session::{Session, Unit};
use crate::state::CaptureState;
use crate::sys::SysCapture;
use crate::target::CaptureTarget;

/// Which kind of unit a handle captures with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureLevel {
    /// Logical streams only.
    Sys,
    /// Descriptors 1 and 2.
    Fd,
}

impl CaptureLevel {
    /// Resource name for this level with encoding `E`, e.g. `capfdbinary`.
    pub fn resource_name<E: Encoding>(self) -> &'static str {
        match (self, E::BINARY) {
            (CaptureLevel::Sys, false) => "capsys",
            (CaptureLevel::Sys, true) => "capsysbinary",
            (CaptureLevel::Fd, false) => "capfd",
            (CaptureLevel::Fd, true) => "capfdbinary",
        }
    }

    fn unit<E: Encoding>(self, target: CaptureTarget) -> Unit<E> {
        match self {
            CaptureLevel::Sys => Box::new(SysCapture::<E>::new(target)),
            CaptureLevel::Fd => Box::new(FdCapture::<E>::new(target)),
        }
    }
}

/// What the manager needs from the active fixture, whatever its encoding.
pub(crate) trait FixtureControl: fmt::Debug {
    fn name(&self) -> &'static str;

    fn start(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn suspend(&mut self, pop_to_orig: bool) -> Result<()>;

    fn resume(&mut self) -> Result<()>;
}

#[derive(Debug)]
struct HandleInner<E: Encoding> {
    name: &'static str,
    session: Session<E>,
    /// Popped output not yet returned by `read`.
    captured: CaptureResult<E>,
}

impl<E: Encoding> HandleInner<E> {
    fn pop_into_carry_over(&mut self) -> Result<()> {
        let popped = self.session.pop_outerr_to_orig()?;
        self.captured.out.append(popped.out);
        self.captured.err.append(popped.err);
        Ok(())
    }
}

impl<E: Encoding> FixtureControl for HandleInner<E> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn start(&mut self) -> Result<()> {
        if self.session.state() != CaptureState::Initialized {
            return Ok(());
        }
        self.session.start_capturing()?;
        debug!(fixture = self.name, "fixture capture started");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.session.state() == CaptureState::Done {
            return Ok(());
        }
        if self.session.is_active() {
            self.pop_into_carry_over()?;
        }
        self.session.stop_capturing()?;
        debug!(fixture = self.name, "fixture capture closed");
        Ok(())
    }

    fn suspend(&mut self, pop_to_orig: bool) -> Result<()> {
        if !self.session.is_active() {
            return Ok(());
        }
        if pop_to_orig {
            self.pop_into_carry_over()?;
        }
        self.session.suspend_capturing(false)
    }

    fn resume(&mut self) -> Result<()> {
        if !self.session.is_active() {
            return Ok(());
        }
        self.session.resume_capturing()
    }
}

/// The object a test gets back when it asks for one of the capture resources.
///
/// Obtained from [`CaptureManager::request_capture`]. Output and error are
/// captured; input never is. Cloning shares the same capture.
pub struct CaptureHandle<E: Encoding> {
    inner: Rc<RefCell<HandleInner<E>>>,
}

impl<E: Encoding> CaptureHandle<E> {
    pub(crate) fn new(level: CaptureLevel) -> Self {
        let session = Session::new(
            None,
            Some(level.unit(CaptureTarget::Output)),
            Some(level.unit(CaptureTarget::Error)),
        );
        Self {
            inner: Rc::new(RefCell::new(HandleInner {
                name: level.resource_name::<E>(),
                session,
                captured: CaptureResult::default(),
            })),
        }
    }

    pub(crate) fn control(&self) -> Rc<RefCell<dyn FixtureControl>> {
        self.inner.clone()
    }

    pub fn name(&self) -> &'static str {
        self.inner.borrow().name
    }

    pub fn is_closed(&self) -> bool {
        self.inner.borrow().session.state() == CaptureState::Done
    }

    /// Everything captured since the previous `read`.
    ///
    /// Output already forwarded to the originals at a phase boundary is
    /// included too, so nothing written during the test goes missing.
    pub fn read(&self) -> Result<CaptureResult<E>> {
        let mut inner = self.inner.borrow_mut();
        let mut result = std::mem::take(&mut inner.captured);
        if inner.session.is_active() {
            let fresh = inner.session.read()?;
            result.out.append(fresh.out);
            result.err.append(fresh.err);
        }
        Ok(result)
    }

    /// Forward what is left to the originals and stop capturing. Idempotent.
    pub fn close(&self) -> Result<()> {
        self.inner.borrow_mut().close()
    }

    /// Run `body` with both global and fixture capture suspended.
    pub fn disabled<R>(
        &self,
        manager: &mut CaptureManager,
        body: impl FnOnce(&mut CaptureManager) -> R,
    ) -> Result<R> {
        manager.global_and_fixture_disabled(body)
    }
}

impl<E: Encoding> Clone for CaptureHandle<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: Encoding> fmt::Debug for CaptureHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => fmt::Debug::fmt(&*inner, f),
            Err(_) => f.write_str("CaptureHandle { <in use> }"),
        }
    }
}
