//! A session bundles up to three capture units under one lifecycle.

use std::fmt;

use muffleconf::CaptureMethod;
use tracing::debug;

use crate::capture::{Capture, CaptureResult};
use crate::encoding::Encoding;
use crate::error::{CaptureError, Result};
use crate::fd::FdCapture;
use crate::state::{CaptureState, ACTIVE, START};
use crate::sys::SysCapture;
use crate::target::CaptureTarget;

/// A boxed unit of either level.
pub type Unit<E> = Box<dyn Capture<Output = E>>;

/// Input, output and error units driven together.
pub struct Session<E: Encoding> {
    input: Option<Unit<E>>,
    out: Option<Unit<E>>,
    err: Option<Unit<E>>,
    state: CaptureState,
    in_suspended: bool,
}

impl<E: Encoding> Session<E> {
    pub fn new(input: Option<Unit<E>>, out: Option<Unit<E>>, err: Option<Unit<E>>) -> Self {
        Self {
            input,
            out,
            err,
            state: CaptureState::Initialized,
            in_suspended: false,
        }
    }

    /// The units a whole run captures with under `method`.
    pub fn for_method(method: CaptureMethod) -> Self {
        fn fd<E: Encoding>(target: CaptureTarget) -> Option<Unit<E>> {
            Some(Box::new(FdCapture::<E>::new(target)))
        }
        fn sys<E: Encoding>(target: CaptureTarget) -> Option<Unit<E>> {
            Some(Box::new(SysCapture::<E>::new(target)))
        }
        fn tee<E: Encoding>(target: CaptureTarget) -> Option<Unit<E>> {
            Some(Box::new(SysCapture::<E>::tee(target)))
        }

        use CaptureTarget::*;
        match method {
            CaptureMethod::Fd => Self::new(fd(Input), fd(Output), fd(Error)),
            CaptureMethod::Sys => Self::new(sys(Input), sys(Output), sys(Error)),
            CaptureMethod::No => Self::new(None, None, None),
            CaptureMethod::TeeSys => Self::new(None, tee(Output), tee(Error)),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Whether the session has started and not yet stopped.
    pub fn is_active(&self) -> bool {
        ACTIVE.contains(&self.state)
    }

    /// Whether input is suspended by this session.
    pub fn in_suspended(&self) -> bool {
        self.in_suspended
    }

    /// Start input, output and error, in that order.
    pub fn start_capturing(&mut self) -> Result<()> {
        self.state.check("start_capturing", START)?;
        for unit in [&mut self.input, &mut self.out, &mut self.err]
            .into_iter()
            .flatten()
        {
            unit.start()?;
        }
        self.state = CaptureState::Started;
        debug!("session started");
        Ok(())
    }

    /// Suspend output and error. Input too, when `include_input` is set.
    pub fn suspend_capturing(&mut self, include_input: bool) -> Result<()> {
        self.state.check("suspend_capturing", ACTIVE)?;
        for unit in [&mut self.out, &mut self.err].into_iter().flatten() {
            unit.suspend()?;
        }
        if include_input {
            if let Some(input) = &mut self.input {
                input.suspend()?;
                self.in_suspended = true;
            }
        }
        self.state = CaptureState::Suspended;
        debug!(include_input, "session suspended");
        Ok(())
    }

    /// Resume output and error, and input if this session suspended it.
    pub fn resume_capturing(&mut self) -> Result<()> {
        self.state.check("resume_capturing", ACTIVE)?;
        for unit in [&mut self.out, &mut self.err].into_iter().flatten() {
            unit.resume()?;
        }
        if self.in_suspended {
            if let Some(input) = &mut self.input {
                input.resume()?;
            }
            self.in_suspended = false;
        }
        self.state = CaptureState::Started;
        debug!("session resumed");
        Ok(())
    }

    /// Snapshot output and error and forward what was captured to the originals.
    pub fn pop_outerr_to_orig(&mut self) -> Result<CaptureResult<E>> {
        let result = self.read()?;
        if let Some(out) = &mut self.out {
            if !result.out.is_empty() {
                out.write_original(&result.out)?;
            }
        }
        if let Some(err) = &mut self.err {
            if !result.err.is_empty() {
                err.write_original(&result.err)?;
            }
        }
        Ok(result)
    }

    /// Finish every unit. Stopping twice is an error.
    pub fn stop_capturing(&mut self) -> Result<()> {
        if self.state == CaptureState::Done {
            return Err(CaptureError::AlreadyStopped);
        }
        self.state = CaptureState::Done;
        for unit in [&mut self.out, &mut self.err, &mut self.input]
            .into_iter()
            .flatten()
        {
            unit.done()?;
        }
        debug!("session stopped");
        Ok(())
    }

    /// Take what output and error captured since the last read.
    pub fn read(&mut self) -> Result<CaptureResult<E>> {
        self.state.check("read", ACTIVE)?;
        let out = match &mut self.out {
            Some(unit) => unit.snap()?,
            None => E::default(),
        };
        let err = match &mut self.err {
            Some(unit) => unit.snap()?,
            None => E::default(),
        };
        Ok(CaptureResult::new(out, err))
    }
}

impl<E: Encoding> fmt::Debug for Session<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("out", &self.out)
            .field("err", &self.err)
            .field("input", &self.input)
            .field("state", &self.state)
            .field("in_suspended", &self.in_suspended)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::io::{Read, Write};

    #[test]
    #[serial]
    fn test_sys_session_reads_both_streams() {
        let mut session = Session::<String>::for_method(CaptureMethod::Sys);
        session.start_capturing().unwrap();
        write!(streams::stdout(), "out").unwrap();
        write!(streams::stderr(), "err").unwrap();
        let result = session.read().unwrap();
        assert_eq!(result, CaptureResult::new("out".to_string(), "err".to_string()));
        assert!(session.read().unwrap().is_empty());
        session.stop_capturing().unwrap();
    }

    #[test]
    #[serial]
    fn test_stop_twice_is_error() {
        let mut session = Session::<String>::for_method(CaptureMethod::Sys);
        session.start_capturing().unwrap();
        session.stop_capturing().unwrap();
        let err = session.stop_capturing().unwrap_err();
        assert_eq!(err.to_string(), "session was already stopped");
    }

    #[test]
    #[serial]
    fn test_no_method_never_fails() {
        let mut session = Session::<String>::for_method(CaptureMethod::No);
        session.start_capturing().unwrap();
        session.suspend_capturing(true).unwrap();
        session.resume_capturing().unwrap();
        assert!(session.read().unwrap().is_empty());
        assert!(session.pop_outerr_to_orig().unwrap().is_empty());
        session.stop_capturing().unwrap();
        assert!(!session.in_suspended());
        assert!(!streams::is_captured(CaptureTarget::Output));
    }

    #[test]
    #[serial]
    fn test_input_suspended_only_on_request() {
        let mut session = Session::<String>::for_method(CaptureMethod::Sys);
        session.start_capturing().unwrap();

        session.suspend_capturing(false).unwrap();
        assert!(!session.in_suspended());
        assert!(streams::is_captured(CaptureTarget::Input));
        assert!(!streams::is_captured(CaptureTarget::Output));

        session.suspend_capturing(true).unwrap();
        assert!(session.in_suspended());
        assert!(!streams::is_captured(CaptureTarget::Input));

        session.resume_capturing().unwrap();
        assert!(!session.in_suspended());
        assert!(streams::is_captured(CaptureTarget::Input));
        assert!(streams::stdin().read(&mut [0u8; 1]).is_err());

        session.stop_capturing().unwrap();
        assert!(!streams::is_captured(CaptureTarget::Input));
    }

    #[test]
    #[serial]
    fn test_pop_forwards_to_originals() {
        let mut outer = Session::<String>::for_method(CaptureMethod::Sys);
        outer.start_capturing().unwrap();

        let mut session = Session::<String>::for_method(CaptureMethod::Sys);
        session.start_capturing().unwrap();
        write!(streams::stderr(), "late").unwrap();
        let popped = session.pop_outerr_to_orig().unwrap();
        assert_eq!(popped.err, "late");
        session.stop_capturing().unwrap();

        assert_eq!(outer.read().unwrap().err, "late");
        outer.stop_capturing().unwrap();
    }

    #[test]
    #[serial]
    fn test_tee_session_has_no_input() {
        let mut session = Session::<String>::for_method(CaptureMethod::TeeSys);
        session.start_capturing().unwrap();
        assert!(!streams::is_captured(CaptureTarget::Input));
        assert!(streams::is_captured(CaptureTarget::Output));
        session.stop_capturing().unwrap();
    }

    #[test]
    #[serial]
    fn test_fd_session_captures_stderr() {
        let mut session = Session::<Vec<u8>>::for_method(CaptureMethod::Fd);
        session.start_capturing().unwrap();
        write!(streams::stderr(), "bytes").unwrap();
        assert_eq!(session.read().unwrap().err, b"bytes".to_vec());
        session.stop_capturing().unwrap();
    }

    #[test]
    fn test_read_before_start_is_usage_error() {
        let mut session = Session::<String>::for_method(CaptureMethod::No);
        let err = session.read().unwrap_err();
        assert!(err.is_usage_error());
    }

    #[test]
    fn test_debug_lists_state() {
        let session = Session::<String>::for_method(CaptureMethod::Sys);
        let repr = format!("{session:?}");
        assert!(repr.starts_with("Session"));
        assert!(repr.contains("in_suspended: false"));
    }
}
