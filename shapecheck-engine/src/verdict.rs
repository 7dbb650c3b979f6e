//! Verdicts and single evaluation results

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
    Warn,
    /// Nothing to check
    Skip,
}

impl Verdict {
    fn severity(self) -> u8 {
        match self {
            Verdict::Skip => 0,
            Verdict::Pass => 1,
            Verdict::Warn => 2,
            Verdict::Fail => 3,
        }
    }

    /// FAIL over WARN over PASS over SKIP
    pub fn worst(self, other: Verdict) -> Verdict {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::Warn => "WARN",
            Verdict::Skip => "SKIP",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict plus the reason it was reached
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub reason: String,
}

impl Evaluation {
    pub fn new(verdict: Verdict, reason: impl Into<String>) -> Self {
        Self {
            verdict,
            reason: reason.into(),
        }
    }

    pub fn pass() -> Self {
        Self::new(Verdict::Pass, "")
    }

    pub fn pass_because(reason: impl Into<String>) -> Self {
        Self::new(Verdict::Pass, reason)
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self::new(Verdict::Fail, reason)
    }

    pub fn warn(reason: impl Into<String>) -> Self {
        Self::new(Verdict::Warn, reason)
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self::new(Verdict::Skip, reason)
    }

    pub fn is_pass(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    /// Report cell: `PASS`, or `FAIL - <reason>`
    pub fn cell(&self) -> String {
        if self.reason.is_empty() {
            self.verdict.to_string()
        } else if self.verdict == Verdict::Pass {
            "PASS".to_string()
        } else {
            format!("{} - {}", self.verdict, self.reason)
        }
    }

    /// A breach reported as WARN instead of FAIL
    pub fn soften(mut self) -> Self {
        if self.verdict == Verdict::Fail {
            self.verdict = Verdict::Warn;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_ordering() {
        assert_eq!(Verdict::Pass.worst(Verdict::Warn), Verdict::Warn);
        assert_eq!(Verdict::Warn.worst(Verdict::Fail), Verdict::Fail);
        assert_eq!(Verdict::Fail.worst(Verdict::Pass), Verdict::Fail);
        assert_eq!(Verdict::Skip.worst(Verdict::Pass), Verdict::Pass);
    }

    #[test]
    fn test_serialized_uppercase() {
        assert_eq!(serde_json::to_string(&Verdict::Warn).unwrap(), "\"WARN\"");
    }

    #[test]
    fn test_cells() {
        assert_eq!(Evaluation::pass().cell(), "PASS");
        assert_eq!(Evaluation::fail("boom").cell(), "FAIL - boom");
        assert_eq!(Evaluation::fail("x").soften().cell(), "WARN - x");
    }
}
