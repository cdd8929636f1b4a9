//! Cleanup policy for objects created during a test
//!
//! The strategy is fixed for a session. `OnSuccess` and `Never` exist so a
//! failing test can leave its objects behind for inspection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::identity::ObjectIdentity;

/// When the cleanup driver runs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupStrategy {
    /// Clean up regardless of the test outcome
    #[default]
    Always,
    /// Clean up only after a passing test
    OnSuccess,
    /// Leave everything in place
    Never,
}

impl CleanupStrategy {
    /// Whether cleanup runs for a test that ended with `outcome`
    pub fn should_run(self, outcome: TestOutcome) -> bool {
        match self {
            CleanupStrategy::Always => true,
            CleanupStrategy::OnSuccess => outcome == TestOutcome::Passed,
            CleanupStrategy::Never => false,
        }
    }
}

impl fmt::Display for CleanupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupStrategy::Always => write!(f, "always"),
            CleanupStrategy::OnSuccess => write!(f, "on-success"),
            CleanupStrategy::Never => write!(f, "never"),
        }
    }
}

impl FromStr for CleanupStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(CleanupStrategy::Always),
            "on-success" => Ok(CleanupStrategy::OnSuccess),
            "never" => Ok(CleanupStrategy::Never),
            other => Err(Error::InvalidConfig(format!(
                "unknown cleanup strategy '{other}' (expected always, on-success or never)"
            ))),
        }
    }
}

/// Recorded result of the test body
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed,
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Passed => write!(f, "passed"),
            TestOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// What a cleanup run did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// False when the strategy skipped cleanup for the outcome
    pub ran: bool,
    /// Objects confirmed gone, in deletion order
    pub deleted: Vec<ObjectIdentity>,
}

impl CleanupReport {
    pub fn skipped() -> Self {
        Self::default()
    }
}
