//! Severity-tagged build diagnostics.
//!
//! Remarks are a pure data sink: plugins and the coordinator append
//! them, the caller presents them after the build. No remark aborts a
//! build by itself, not even an `Error` one; the build keeps going so
//! the operator sees every problem at once. Fatal conditions use
//! [`crate::BuildError`] instead.

use std::fmt;

/// Remark severity, ordered from least to most serious.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Information,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Information => "information",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// One diagnostic message, immutable once created.
#[derive(Debug, Clone)]
pub struct Remark {
    pub severity: Severity,
    /// Owning package, or `None` for a build-wide remark.
    pub package: Option<String>,
    pub message: String,
}

impl Remark {
    pub fn new(severity: Severity, package: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            severity,
            package: package.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn information(package: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(Severity::Information, package, message)
    }

    pub fn warning(package: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, package, message)
    }

    pub fn error(package: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, package, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Information < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
    }

    #[test]
    fn test_build_wide_remark_has_no_package() {
        let r = Remark::warning(None, "orphan file");
        assert_eq!(r.package, None);
        assert_eq!(r.severity, Severity::Warning);
    }
}
