//! Stopping rules for an adaptive test.
//!
//! `Active` is the only non-terminal state. Once a test is `Stopped` or
//! `Aborted` it stays that way no matter what is fed back in.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Standard error reached the target after the minimum test length.
    PrecisionReached,
    MaxItemsReached,
    /// No eligible items remain.
    BankExhausted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StopReason::PrecisionReached => "precision_reached",
            StopReason::MaxItemsReached => "max_items_reached",
            StopReason::BankExhausted => "bank_exhausted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum TestStatus {
    Active,
    Stopped(StopReason),
    Aborted(String),
}

impl TestStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, TestStatus::Active)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Next status given the latest test state. Terminal states are absorbing.
    pub fn advance(&self, rule: &StoppingRule, input: &StoppingInput) -> TestStatus {
        match self {
            TestStatus::Active => evaluate_stopping(rule, input),
            terminal => terminal.clone(),
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Active => f.write_str("active"),
            TestStatus::Stopped(reason) => write!(f, "stopped ({reason})"),
            TestStatus::Aborted(reason) => write!(f, "aborted ({reason})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoppingRule {
    pub min_items: usize,
    pub max_items: usize,
    /// Target standard error; `None` runs every test to `max_items`.
    pub min_sem: Option<f64>,
}

impl Default for StoppingRule {
    fn default() -> Self {
        Self {
            min_items: 5,
            max_items: 20,
            min_sem: Some(0.3),
        }
    }
}

impl StoppingRule {
    pub fn new(min_items: usize, max_items: usize, min_sem: Option<f64>) -> Self {
        Self {
            min_items,
            max_items,
            min_sem,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_items > self.max_items {
            return Err(CatError::InvalidStoppingRule {
                min_items: self.min_items,
                max_items: self.max_items,
            });
        }
        if self.max_items == 0 {
            return Err(CatError::InvalidConfig(
                "max_items must be at least 1".to_string(),
            ));
        }
        if let Some(sem) = self.min_sem {
            if !(sem > 0.0) {
                return Err(CatError::InvalidConfig(format!(
                    "min_sem must be positive, got {sem}"
                )));
            }
        }
        Ok(())
    }
}

/// What the stopping rule looks at after each response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoppingInput {
    pub administered: usize,
    pub se: f64,
    pub bank_exhausted: bool,
}

/// Decide whether the test continues.
///
/// Precision only counts once `min_items` responses are in; the item cap and an
/// exhausted bank stop the test regardless.
pub fn evaluate_stopping(rule: &StoppingRule, input: &StoppingInput) -> TestStatus {
    if input.administered >= rule.max_items {
        return TestStatus::Stopped(StopReason::MaxItemsReached);
    }
    if let Some(target) = rule.min_sem {
        if input.administered >= rule.min_items && input.se <= target {
            return TestStatus::Stopped(StopReason::PrecisionReached);
        }
    }
    if input.bank_exhausted {
        return TestStatus::Stopped(StopReason::BankExhausted);
    }
    TestStatus::Active
}
