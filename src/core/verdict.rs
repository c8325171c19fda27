use serde::{Deserialize, Serialize};
use std::fmt;

/// Verdict of a single test case or of a whole submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictStatus {
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    RuntimeError,
    InternalError,
    /// Submission-level only: the problem has no test cases
    NoTestCases,
}

impl VerdictStatus {
    /// Severity used for submission-level aggregation (higher is worse).
    ///
    /// INTERNAL_ERROR > RUNTIME_ERROR > TIME_LIMIT_EXCEEDED > WRONG_ANSWER > ACCEPTED.
    /// NO_TEST_CASES never appears among case verdicts and ranks with ACCEPTED.
    pub fn severity(self) -> u8 {
        match self {
            VerdictStatus::Accepted | VerdictStatus::NoTestCases => 0,
            VerdictStatus::WrongAnswer => 1,
            VerdictStatus::TimeLimitExceeded => 2,
            VerdictStatus::RuntimeError => 3,
            VerdictStatus::InternalError => 4,
        }
    }

    /// The more severe of `self` and `other`; ties keep `self`.
    pub fn worst(self, other: VerdictStatus) -> VerdictStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VerdictStatus::Accepted => "ACCEPTED",
            VerdictStatus::WrongAnswer => "WRONG_ANSWER",
            VerdictStatus::TimeLimitExceeded => "TIME_LIMIT_EXCEEDED",
            VerdictStatus::RuntimeError => "RUNTIME_ERROR",
            VerdictStatus::InternalError => "INTERNAL_ERROR",
            VerdictStatus::NoTestCases => "NO_TEST_CASES",
        }
    }
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scan verdicts in order and keep the worst seen so far.
pub fn aggregate<I>(verdicts: I) -> VerdictStatus
where
    I: IntoIterator<Item = VerdictStatus>,
{
    verdicts
        .into_iter()
        .fold(VerdictStatus::Accepted, VerdictStatus::worst)
}
