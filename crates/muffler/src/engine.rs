//! A minimal test engine: each test is a shell command, optionally wrapped by
//! setup and teardown commands, and every phase runs under capture.

use std::io::Write;
use std::process::Command;

use anyhow::{bail, Context, Result};
use muffle::{CaptureManager, Phase, Report};
use tracing::{debug, info};

/// Shell commands making up one test.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub setup: Option<String>,
    pub call: String,
    pub teardown: Option<String>,
}

#[derive(Debug)]
pub struct TestOutcome {
    pub name: String,
    /// First phase that failed, if any.
    pub failed: Option<Phase>,
    pub report: Report,
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        self.failed.is_none()
    }
}

/// Run `command` through `sh -c`. Children inherit descriptors 0/1/2, so
/// descriptor-level capture sees their output.
fn run_shell(command: &str) -> bool {
    match Command::new("sh").arg("-c").arg(command).status() {
        Ok(status) => {
            debug!(command, %status, "phase command finished");
            status.success()
        }
        Err(e) => {
            let _ = writeln!(muffle::stderr(), "failed to spawn {command:?}: {e}");
            false
        }
    }
}

/// Start global capture around the optional initialization command.
///
/// On failure the command's output is replayed to the terminal.
pub fn initialize(manager: &mut CaptureManager, init: Option<&str>) -> Result<()> {
    manager.load_initial(|_| {
        if let Some(command) = init {
            if !run_shell(command) {
                bail!("initialization command failed: {command}");
            }
        }
        Ok(())
    })
}

/// Run one test through setup, call and teardown.
///
/// A failed setup skips the call; teardown runs whenever setup ran.
pub fn run_test(manager: &mut CaptureManager, test: &TestCase) -> Result<TestOutcome> {
    let mut report = Report::new();
    let mut failed = None;

    let phases = [
        (Phase::Setup, test.setup.as_deref()),
        (Phase::Call, Some(test.call.as_str())),
        (Phase::Teardown, test.teardown.as_deref()),
    ];
    for (phase, command) in phases {
        if phase == Phase::Call && failed.is_some() {
            continue;
        }
        let Some(command) = command else {
            continue;
        };
        let ok = match manager.item_capture(phase, &mut report, |_| run_shell(command)) {
            Ok(ok) => ok,
            Err(e) => {
                manager.on_internal_error()?;
                return Err(e).with_context(|| format!("capturing {phase} of {:?}", test.call));
            }
        };
        if !ok && failed.is_none() {
            failed = Some(phase);
        }
    }

    info!(test = %test.call, passed = failed.is_none(), "test finished");
    Ok(TestOutcome {
        name: test.call.clone(),
        failed,
        report,
    })
}

/// Print one result line, and the captured sections when the test failed or
/// `show_output` is set.
pub fn print_outcome(outcome: &TestOutcome, show_output: bool) {
    match outcome.failed {
        None => println!("{} ... ok", outcome.name),
        Some(phase) => println!("{} ... FAILED ({phase})", outcome.name),
    }
    if outcome.passed() && !show_output {
        return;
    }
    for section in &outcome.report.sections {
        println!("---- {} ----", section.title());
        print!("{}", section.content);
        if !section.content.ends_with('\n') {
            println!();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muffle::CaptureMethod;

    fn case(call: &str) -> TestCase {
        TestCase {
            setup: None,
            call: call.to_string(),
            teardown: None,
        }
    }

    #[test]
    fn test_failed_setup_skips_call_but_not_teardown() {
        let mut manager = CaptureManager::new(CaptureMethod::No);
        initialize(&mut manager, None).unwrap();
        let test = TestCase {
            setup: Some("false".to_string()),
            call: "true".to_string(),
            teardown: Some("true".to_string()),
        };
        let outcome = run_test(&mut manager, &test).unwrap();
        assert_eq!(outcome.failed, Some(Phase::Setup));
        manager.stop_global_capturing().unwrap();
    }

    #[test]
    fn test_passing_call() {
        let mut manager = CaptureManager::new(CaptureMethod::No);
        initialize(&mut manager, None).unwrap();
        let outcome = run_test(&mut manager, &case("exit 0")).unwrap();
        assert!(outcome.passed());
        assert!(outcome.report.is_empty());
        manager.stop_global_capturing().unwrap();
    }

    #[test]
    fn test_failing_init_is_error() {
        let mut manager = CaptureManager::new(CaptureMethod::No);
        let err = initialize(&mut manager, Some("exit 2")).unwrap_err();
        assert!(err.to_string().contains("initialization command failed"));
    }
}
