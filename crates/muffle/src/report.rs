//! Where captured output ends up: labeled sections on a phase report.

use std::fmt;

/// A point in a test's life at which output is harvested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Collect,
    Setup,
    Call,
    Teardown,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Collect => "collect",
            Phase::Setup => "setup",
            Phase::Call => "call",
            Phase::Teardown => "teardown",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives captured output from the manager.
///
/// `key` is `stdout`/`stderr` for test phases and `Captured stdout`/
/// `Captured stderr` for collection.
pub trait ReportSink {
    fn add_report_section(&mut self, phase: Phase, key: &str, content: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub phase: Phase,
    pub key: String,
    pub content: String,
}

impl Section {
    /// Heading as shown to a user, e.g. `Captured stderr setup`.
    pub fn title(&self) -> String {
        match self.phase {
            Phase::Collect => self.key.clone(),
            phase => format!("Captured {} {}", self.key, phase),
        }
    }
}

/// A plain in-memory report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub sections: Vec<Section>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content of the first section for `phase` and `key`.
    pub fn section(&self, phase: Phase, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|s| s.phase == phase && s.key == key)
            .map(|s| s.content.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

impl ReportSink for Report {
    fn add_report_section(&mut self, phase: Phase, key: &str, content: &str) {
        self.sections.push(Section {
            phase,
            key: key.to_string(),
            content: content.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_lookup() {
        let mut report = Report::new();
        report.add_report_section(Phase::Setup, "stderr", "A");
        assert_eq!(report.section(Phase::Setup, "stderr"), Some("A"));
        assert_eq!(report.section(Phase::Call, "stderr"), None);
    }

    #[test]
    fn test_titles() {
        let mut report = Report::new();
        report.add_report_section(Phase::Teardown, "stdout", "x");
        report.add_report_section(Phase::Collect, "Captured stderr", "y");
        let titles: Vec<_> = report.sections.iter().map(Section::title).collect();
        assert_eq!(titles, ["Captured stdout teardown", "Captured stderr"]);
    }
}
