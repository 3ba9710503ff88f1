//! The capture method selector.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ConfigError;

/// How output is intercepted for a run. Chosen once, never changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CaptureMethod {
    /// Redirect descriptors 0/1/2 (captures native code and subprocesses).
    #[default]
    #[serde(rename = "fd")]
    Fd,
    /// Substitute the logical streams only.
    #[serde(rename = "sys")]
    Sys,
    /// Capture nothing.
    #[serde(rename = "no")]
    No,
    /// Substitute the logical output streams, still forwarding every write.
    #[serde(rename = "tee-sys")]
    TeeSys,
}

impl CaptureMethod {
    /// All recognized methods, in the order they are documented.
    pub const ALL: [CaptureMethod; 4] = [
        CaptureMethod::Fd,
        CaptureMethod::Sys,
        CaptureMethod::No,
        CaptureMethod::TeeSys,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureMethod::Fd => "fd",
            CaptureMethod::Sys => "sys",
            CaptureMethod::No => "no",
            CaptureMethod::TeeSys => "tee-sys",
        }
    }

    /// Whether this method captures anything at all.
    pub fn is_capturing(&self) -> bool {
        !matches!(self, CaptureMethod::No)
    }
}

impl fmt::Display for CaptureMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaptureMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CaptureMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == s.trim())
            .ok_or_else(|| ConfigError::UnknownMethod(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_methods() {
        for method in CaptureMethod::ALL {
            assert_eq!(method.as_str().parse::<CaptureMethod>().unwrap(), method);
        }
    }

    #[test]
    fn test_unknown_method() {
        let err = "pipe".parse::<CaptureMethod>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownMethod(ref m) if m == "pipe"));
        assert!(err.to_string().contains("fd|sys|no|tee-sys"));
    }

    #[test]
    fn test_default_is_fd() {
        assert_eq!(CaptureMethod::default(), CaptureMethod::Fd);
    }

    #[test]
    fn test_only_no_is_not_capturing() {
        assert!(!CaptureMethod::No.is_capturing());
        assert!(CaptureMethod::TeeSys.is_capturing());
    }

    #[test]
    fn test_serde_uses_cli_spelling() {
        #[derive(Deserialize)]
        struct Wrapper {
            method: CaptureMethod,
        }
        let w: Wrapper = toml::from_str(r#"method = "tee-sys""#).unwrap();
        assert_eq!(w.method, CaptureMethod::TeeSys);
    }
}
