//! The capture manager: one global session for the run and at most one
//! fixture capture on top of it.
//!
//! The global layer captures every collection and test phase unless the
//! method is `no`. A test that asks for `capsys`/`capfd` (and the binary
//! variants) gets a [`CaptureHandle`], which takes precedence over the
//! global layer until it is released.
//!
//! Phase boundaries always suspend the fixture before the global layer, and
//! always harvest, even when the phase body panics.

use std::cell::RefCell;
use std::fmt;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use muffleconf::{CaptureMethod, MuffleConfig};
use tracing::{debug, info, warn};

use crate::capture::CaptureResult;
use crate::encoding::Encoding;
use crate::error::{CaptureError, Result};
use crate::fixture::{CaptureHandle, CaptureLevel, FixtureControl};
use crate::report::{Phase, ReportSink};
use crate::session::Session;
use crate::state::CaptureState;
use crate::streams;

/// What [`CaptureManager::is_capturing`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturingStatus {
    Global,
    Fixture(&'static str),
}

impl fmt::Display for CapturingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapturingStatus::Global => f.write_str("global"),
            CapturingStatus::Fixture(name) => write!(f, "fixture {name}"),
        }
    }
}

pub struct CaptureManager {
    method: CaptureMethod,
    global: Option<Session<String>>,
    fixture: Option<Rc<RefCell<dyn FixtureControl>>>,
}

impl CaptureManager {
    pub fn new(method: CaptureMethod) -> Self {
        Self {
            method,
            global: None,
            fixture: None,
        }
    }

    pub fn from_config(config: &MuffleConfig) -> Self {
        Self::new(config.capture.method)
    }

    pub fn method(&self) -> CaptureMethod {
        self.method
    }

    pub fn is_globally_capturing(&self) -> bool {
        self.method.is_capturing()
    }

    pub fn is_capturing(&self) -> Option<CapturingStatus> {
        if self.is_globally_capturing() {
            return Some(CapturingStatus::Global);
        }
        self.fixture
            .as_ref()
            .map(|f| CapturingStatus::Fixture(f.borrow().name()))
    }

    // Global capturing control

    pub fn start_global_capturing(&mut self) -> Result<()> {
        if self.global.is_some() {
            return Err(CaptureError::AlreadyStarted);
        }
        streams::prepare_environment();
        let mut session = Session::for_method(self.method);
        session.start_capturing()?;
        self.global = Some(session);
        info!(method = %self.method, "global capture started");
        Ok(())
    }

    /// Forward anything still buffered to the originals and stop. No-op when
    /// global capture was never started.
    pub fn stop_global_capturing(&mut self) -> Result<()> {
        let Some(mut session) = self.global.take() else {
            return Ok(());
        };
        let popped = if session.is_active() {
            session.pop_outerr_to_orig().map(|_| ())
        } else {
            Ok(())
        };
        let stopped = session.stop_capturing();
        info!(method = %self.method, "global capture stopped");
        popped.and(stopped)
    }

    pub fn resume_global_capture(&mut self) -> Result<()> {
        match &mut self.global {
            Some(session) => session.resume_capturing(),
            None => Ok(()),
        }
    }

    pub fn suspend_global_capture(&mut self, include_input: bool) -> Result<()> {
        match &mut self.global {
            Some(session) => session.suspend_capturing(include_input),
            None => Ok(()),
        }
    }

    pub fn read_global_capture(&mut self) -> Result<CaptureResult<String>> {
        match &mut self.global {
            Some(session) => session.read(),
            None => Err(CaptureError::NotStarted),
        }
    }

    /// Like [`Self::read_global_capture`], but `None` once global capture is gone,
    /// e.g. after a forced teardown inside the phase.
    fn harvest_global(&mut self) -> Result<Option<CaptureResult<String>>> {
        self.global.as_mut().map(Session::read).transpose()
    }

    /// Suspend the fixture, then the global layer.
    pub fn suspend(&mut self, include_input: bool) -> Result<()> {
        let fixture = self.suspend_fixture(false);
        let global = self.suspend_global_capture(include_input);
        fixture.and(global)
    }

    /// Resume the global layer, then the fixture.
    pub fn resume(&mut self) -> Result<()> {
        self.resume_global_capture()?;
        self.resume_fixture()
    }

    // Fixture control

    /// Register `handle` as the active fixture.
    pub fn set_fixture<E: Encoding>(&mut self, handle: &CaptureHandle<E>) -> Result<()> {
        if let Some(current) = &self.fixture {
            return Err(CaptureError::FixtureConflict {
                requested: handle.name().to_string(),
                current: current.borrow().name().to_string(),
            });
        }
        self.fixture = Some(handle.control());
        Ok(())
    }

    pub fn unset_fixture(&mut self) {
        self.fixture = None;
    }

    /// Start the active fixture so it takes precedence over global capture.
    pub fn activate_fixture(&mut self) -> Result<()> {
        match &self.fixture {
            Some(fixture) => fixture.borrow_mut().start(),
            None => Ok(()),
        }
    }

    /// Close the active fixture. It stays registered until unset.
    pub fn deactivate_fixture(&mut self) -> Result<()> {
        match &self.fixture {
            Some(fixture) => fixture.borrow_mut().close(),
            None => Ok(()),
        }
    }

    pub fn suspend_fixture(&mut self, pop_to_orig: bool) -> Result<()> {
        match &self.fixture {
            Some(fixture) => fixture.borrow_mut().suspend(pop_to_orig),
            None => Ok(()),
        }
    }

    pub fn resume_fixture(&mut self) -> Result<()> {
        match &self.fixture {
            Some(fixture) => fixture.borrow_mut().resume(),
            None => Ok(()),
        }
    }

    /// Hand out a capture resource for the current test and start it.
    pub fn request_capture<E: Encoding>(
        &mut self,
        level: CaptureLevel,
    ) -> Result<CaptureHandle<E>> {
        let handle = CaptureHandle::<E>::new(level);
        self.set_fixture(&handle)?;
        if let Err(e) = self.activate_fixture().and_then(|_| self.park_outside_phase()) {
            self.unset_fixture();
            return Err(e);
        }
        debug!(fixture = handle.name(), "capture resource requested");
        Ok(handle)
    }

    /// A fixture requested between phases starts under suspended global
    /// capture. Suspend it as well so the next phase resumes it on top.
    fn park_outside_phase(&mut self) -> Result<()> {
        let between_phases = self
            .global
            .as_ref()
            .is_some_and(|session| session.state() == CaptureState::Suspended);
        if between_phases {
            self.suspend_fixture(false)?;
        }
        Ok(())
    }

    /// Close `handle` and free the fixture slot, even if closing fails.
    pub fn release_capture<E: Encoding>(&mut self, handle: &CaptureHandle<E>) -> Result<()> {
        let closed = handle.close();
        self.unset_fixture();
        closed
    }

    /// Run `body` with a capture resource that is released afterwards.
    pub fn with_capture<E: Encoding, R>(
        &mut self,
        level: CaptureLevel,
        body: impl FnOnce(&mut Self, &CaptureHandle<E>) -> R,
    ) -> Result<R> {
        let handle = self.request_capture::<E>(level)?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(self, &handle)));
        let released = self.release_capture(&handle);
        match outcome {
            Ok(value) => released.map(|_| value),
            Err(payload) => {
                if let Err(e) = released {
                    warn!(error = %e, "failed to release capture after panic");
                }
                panic::resume_unwind(payload)
            }
        }
    }

    // Scoped helpers

    /// Run `body` with both layers suspended, resuming on every exit path.
    pub fn global_and_fixture_disabled<R>(
        &mut self,
        body: impl FnOnce(&mut Self) -> R,
    ) -> Result<R> {
        self.suspend(false)?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(self)));
        let resumed = self.resume();
        match outcome {
            Ok(value) => resumed.map(|_| value),
            Err(payload) => {
                if let Err(e) = resumed {
                    warn!(error = %e, "failed to resume capture after panic");
                }
                panic::resume_unwind(payload)
            }
        }
    }

    /// Capture one test phase and attach its output to `report`.
    ///
    /// Empty sections are omitted. A panic in `body` is re-raised after the
    /// output up to that point has been attached.
    pub fn item_capture<R>(
        &mut self,
        phase: Phase,
        report: &mut dyn ReportSink,
        body: impl FnOnce(&mut Self) -> R,
    ) -> Result<R> {
        self.resume_global_capture()?;
        self.resume_fixture()?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(self)));

        let fixture = self.suspend_fixture(true);
        let global = self.suspend_global_capture(false);
        let harvested = fixture.and(global).and_then(|_| self.harvest_global());
        if let Ok(Some(result)) = &harvested {
            add_sections(report, phase, "stdout", "stderr", result);
        }
        debug!(%phase, "phase captured");

        match outcome {
            Ok(value) => harvested.map(|_| value),
            Err(payload) => {
                if let Err(e) = harvested {
                    warn!(%phase, error = %e, "failed to harvest output after panic");
                }
                panic::resume_unwind(payload)
            }
        }
    }

    /// Capture collection of one file, labeling sections `Captured stdout` and
    /// `Captured stderr`.
    pub fn collect_capture<R>(
        &mut self,
        report: &mut dyn ReportSink,
        body: impl FnOnce(&mut Self) -> R,
    ) -> Result<R> {
        self.resume_global_capture()?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(self)));
        let harvested = self
            .suspend_global_capture(false)
            .and_then(|_| self.harvest_global());
        if let Ok(Some(result)) = &harvested {
            add_sections(
                report,
                Phase::Collect,
                "Captured stdout",
                "Captured stderr",
                result,
            );
        }
        match outcome {
            Ok(value) => harvested.map(|_| value),
            Err(payload) => {
                if let Err(e) = harvested {
                    warn!(error = %e, "failed to harvest collection output after panic");
                }
                panic::resume_unwind(payload)
            }
        }
    }

    /// Start global capture around early initialization.
    ///
    /// When `body` fails, the output it produced is written to the real
    /// streams so the failure can be diagnosed.
    pub fn load_initial<T, Er: From<CaptureError>>(
        &mut self,
        body: impl FnOnce(&mut Self) -> std::result::Result<T, Er>,
    ) -> std::result::Result<T, Er> {
        self.start_global_capturing()?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(self)));
        self.suspend_global_capture(false)?;

        if !matches!(outcome, Ok(Ok(_))) {
            let captured = self.read_global_capture()?;
            let _ = streams::stdout().write_all(captured.out.as_bytes());
            let _ = streams::stderr().write_all(captured.err.as_bytes());
        }
        match outcome {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    // Forced teardown

    /// Restore every descriptor before an interrupt is reported.
    pub fn on_interrupt(&mut self) -> Result<()> {
        self.forced_teardown("interrupt")
    }

    /// Restore every descriptor before an internal error is reported.
    pub fn on_internal_error(&mut self) -> Result<()> {
        self.forced_teardown("internal error")
    }

    fn forced_teardown(&mut self, reason: &str) -> Result<()> {
        warn!(reason, "forced capture teardown");
        let fixture = self.deactivate_fixture();
        let global = self.stop_global_capturing();
        fixture.and(global)
    }
}

fn add_sections(
    report: &mut dyn ReportSink,
    phase: Phase,
    out_key: &str,
    err_key: &str,
    result: &CaptureResult<String>,
) {
    if !result.out.is_empty() {
        report.add_report_section(phase, out_key, &result.out);
    }
    if !result.err.is_empty() {
        report.add_report_section(phase, err_key, &result.err);
    }
}

impl fmt::Debug for CaptureManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureManager")
            .field("method", &self.method)
            .field("global", &self.global)
            .field("fixture", &self.fixture.as_ref().map(|f| f.borrow().name()))
            .finish()
    }
}

impl Drop for CaptureManager {
    fn drop(&mut self) {
        if self.global.is_none() && self.fixture.is_none() {
            return;
        }
        if let Err(e) = self.forced_teardown("manager dropped") {
            warn!(error = %e, "capture teardown on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Report;
    use crate::target::CaptureTarget;
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_start_twice_is_error() {
        let mut manager = CaptureManager::new(CaptureMethod::Sys);
        manager.start_global_capturing().unwrap();
        assert!(matches!(
            manager.start_global_capturing(),
            Err(CaptureError::AlreadyStarted)
        ));
        manager.stop_global_capturing().unwrap();
        manager.stop_global_capturing().unwrap();
    }

    #[test]
    fn test_read_before_start() {
        let mut manager = CaptureManager::new(CaptureMethod::No);
        assert!(matches!(
            manager.read_global_capture(),
            Err(CaptureError::NotStarted)
        ));
    }

    #[test]
    #[serial]
    fn test_is_capturing() {
        let manager = CaptureManager::new(CaptureMethod::Fd);
        assert_eq!(manager.is_capturing(), Some(CapturingStatus::Global));

        let mut manager = CaptureManager::new(CaptureMethod::No);
        assert_eq!(manager.is_capturing(), None);
        let handle = manager.request_capture::<String>(CaptureLevel::Sys).unwrap();
        assert_eq!(
            manager.is_capturing(),
            Some(CapturingStatus::Fixture("capsys"))
        );
        assert_eq!(manager.is_capturing().unwrap().to_string(), "fixture capsys");
        manager.release_capture(&handle).unwrap();
        assert_eq!(manager.is_capturing(), None);
    }

    #[test]
    #[serial]
    fn test_second_fixture_names_both() {
        let mut manager = CaptureManager::new(CaptureMethod::Sys);
        let first = manager.request_capture::<String>(CaptureLevel::Sys).unwrap();
        let err = manager
            .request_capture::<Vec<u8>>(CaptureLevel::Fd)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot use capfdbinary and capsys at the same time"
        );
        manager.release_capture(&first).unwrap();
    }

    #[test]
    #[serial]
    fn test_collect_sections_are_labeled() {
        let mut manager = CaptureManager::new(CaptureMethod::Sys);
        manager.start_global_capturing().unwrap();
        manager.suspend_global_capture(false).unwrap();

        let mut report = Report::new();
        manager
            .collect_capture(&mut report, |_| {
                write!(streams::stdout(), "collected").unwrap();
            })
            .unwrap();
        assert_eq!(report.section(Phase::Collect, "Captured stdout"), Some("collected"));
        assert_eq!(report.section(Phase::Collect, "Captured stderr"), None);
        manager.stop_global_capturing().unwrap();
    }

    #[test]
    #[serial]
    fn test_collect_panic_survives_failed_harvest() {
        let mut manager = CaptureManager::new(CaptureMethod::Sys);
        manager.start_global_capturing().unwrap();
        manager.suspend_global_capture(false).unwrap();

        let mut report = Report::new();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            manager.collect_capture(&mut report, |capman| {
                write!(streams::stdout(), "lost").unwrap();
                if let Some(session) = capman.global.as_mut() {
                    session.stop_capturing().unwrap();
                }
                panic!("collection failed");
            })
        }));
        let payload = outcome.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"collection failed"));
        assert!(report.is_empty());
        assert!(!streams::is_captured(CaptureTarget::Output));
        manager.global = None;
    }

    #[test]
    #[serial]
    fn test_disabled_block_reaches_originals() {
        let mut outer = Session::<String>::for_method(CaptureMethod::Sys);
        outer.start_capturing().unwrap();

        let mut manager = CaptureManager::new(CaptureMethod::Sys);
        manager.start_global_capturing().unwrap();
        manager
            .global_and_fixture_disabled(|_| {
                write!(streams::stdout(), "visible").unwrap();
            })
            .unwrap();
        write!(streams::stdout(), "captured").unwrap();
        assert_eq!(manager.read_global_capture().unwrap().out, "captured");
        manager.suspend_global_capture(false).unwrap();
        manager.stop_global_capturing().unwrap();

        outer.suspend_capturing(false).unwrap();
        assert_eq!(outer.read().unwrap().out, "visible");
        outer.stop_capturing().unwrap();
    }

    #[test]
    #[serial]
    fn test_load_initial_replays_output_on_failure() {
        let mut outer = Session::<String>::for_method(CaptureMethod::Sys);
        outer.start_capturing().unwrap();

        let mut manager = CaptureManager::new(CaptureMethod::Sys);
        let result: std::result::Result<(), CaptureError> = manager.load_initial(|_| {
            write!(streams::stderr(), "early failure context").unwrap();
            Err(CaptureError::NotStarted)
        });
        assert!(result.is_err());
        manager.stop_global_capturing().unwrap();

        assert_eq!(outer.read().unwrap().err, "early failure context");
        outer.stop_capturing().unwrap();
    }

    #[test]
    #[serial]
    fn test_load_initial_keeps_output_on_success() {
        let mut manager = CaptureManager::new(CaptureMethod::Sys);
        let value = manager
            .load_initial(|_| {
                write!(streams::stdout(), "quiet").unwrap();
                Ok::<_, CaptureError>(7)
            })
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(manager.read_global_capture().unwrap().out, "quiet");
        manager.stop_global_capturing().unwrap();
    }

    #[test]
    #[serial]
    fn test_drop_restores_streams() {
        {
            let mut manager = CaptureManager::new(CaptureMethod::Sys);
            manager.start_global_capturing().unwrap();
            let _handle = manager.request_capture::<String>(CaptureLevel::Sys).unwrap();
            assert!(streams::is_captured(CaptureTarget::Output));
        }
        assert!(!streams::is_captured(CaptureTarget::Output));
        assert!(!streams::is_captured(CaptureTarget::Input));
    }

    #[test]
    fn test_debug_names_method() {
        let manager = CaptureManager::new(CaptureMethod::TeeSys);
        let repr = format!("{manager:?}");
        assert!(repr.contains("TeeSys"));
        assert!(repr.contains("fixture: None"));
    }
}
