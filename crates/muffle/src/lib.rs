//! Per-phase capture of standard output, error and input for a test engine.
//!
//! Two levels of capture are available:
//! - **stream level** ([`SysCapture`]): swaps the destination of the logical
//!   streams [`stdout()`], [`stderr()`] and [`stdin()`]. Only code writing
//!   through those streams is captured.
//! - **descriptor level** ([`FdCapture`]): `dup2`s a temporary file onto
//!   descriptor 0, 1 or 2, so native code and child processes are captured too.
//!
//! A [`CaptureManager`] runs one global [`Session`] for the whole run and
//! harvests it into a report after every phase. A test may ask for one of
//! `capsys`, `capsysbinary`, `capfd` or `capfdbinary`, which takes precedence
//! over the global layer while it is active.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::io::Write;
//! use muffle::{CaptureManager, CaptureMethod, Phase, Report};
//!
//! let mut manager = CaptureManager::new(CaptureMethod::Fd);
//! manager.start_global_capturing().unwrap();
//! manager.suspend_global_capture(false).unwrap();
//!
//! let mut report = Report::new();
//! manager
//!     .item_capture(Phase::Call, &mut report, |_| {
//!         writeln!(muffle::stderr(), "something went sideways").unwrap();
//!     })
//!     .unwrap();
//!
//! manager.stop_global_capturing().unwrap();
//! assert_eq!(
//!     report.section(Phase::Call, "stderr"),
//!     Some("something went sideways\n")
//! );
//! ```
//!
//! # Platform
//!
//! Descriptor-level capture uses `dup`/`dup2` and is Unix only.

pub mod capture;
pub mod encoding;
pub mod error;
pub mod fd;
pub mod fixture;
pub mod manager;
pub mod report;
pub mod session;
pub mod state;
pub mod streams;
pub mod sys;
pub mod target;

// Re-exports for convenience
pub use capture::{Capture, CaptureResult};
pub use encoding::Encoding;
pub use error::{CaptureError, Result, STDIN_CAPTURED};
pub use fd::FdCapture;
pub use fixture::{CaptureHandle, CaptureLevel};
pub use manager::{CaptureManager, CapturingStatus};
pub use muffleconf::CaptureMethod;
pub use report::{Phase, Report, ReportSink, Section};
pub use session::Session;
pub use state::CaptureState;
pub use streams::{
    is_captured, prepare_environment, stderr, stdin, stdout, LogicalInput, LogicalOutput,
};
pub use sys::SysCapture;
pub use target::CaptureTarget;
