//! Use counts for expectations and verification bounds.

use serde::{Deserialize, Serialize};

/// How many times an expectation may be dispatched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Times {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_times: Option<u32>,
    #[serde(default)]
    pub unlimited: bool,
}

impl Times {
    pub fn unlimited() -> Self {
        Self {
            remaining_times: None,
            unlimited: true,
        }
    }

    pub fn exactly(count: u32) -> Self {
        Self {
            remaining_times: Some(count),
            unlimited: false,
        }
    }

    /// Remaining uses as a signed counter, -1 meaning unlimited.
    pub fn as_budget(&self) -> i64 {
        if self.unlimited || self.remaining_times.is_none() {
            -1
        } else {
            i64::from(self.remaining_times.unwrap_or(0))
        }
    }
}

impl Default for Times {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Bounds for verification queries; `exactly(n)` desugars to `{n, n}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationTimes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_least: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_most: Option<usize>,
}

impl VerificationTimes {
    pub fn exactly(count: usize) -> Self {
        Self {
            at_least: Some(count),
            at_most: Some(count),
        }
    }

    pub fn at_least(count: usize) -> Self {
        Self {
            at_least: Some(count),
            at_most: None,
        }
    }

    pub fn satisfied_by(&self, actual: usize) -> bool {
        if let Some(lo) = self.at_least {
            if actual < lo {
                return false;
            }
        }
        if let Some(hi) = self.at_most {
            if actual > hi {
                return false;
            }
        }
        true
    }

    /// Human-readable description used in mismatch reports.
    pub fn describe(&self) -> String {
        match (self.at_least, self.at_most) {
            (Some(lo), Some(hi)) if lo == hi => format!("exactly {lo} times"),
            (Some(lo), Some(hi)) => format!("between {lo} and {hi} times"),
            (Some(lo), None) => format!("at least {lo} times"),
            (None, Some(hi)) => format!("at most {hi} times"),
            (None, None) => "at least once".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn times_budget() {
        assert_eq!(Times::unlimited().as_budget(), -1);
        assert_eq!(Times::exactly(3).as_budget(), 3);
        let parsed: Times = serde_json::from_str(r#"{"remainingTimes": 1}"#).unwrap();
        assert_eq!(parsed.as_budget(), 1);
    }

    #[test]
    fn verification_bounds() {
        let exactly_two = VerificationTimes::exactly(2);
        assert!(!exactly_two.satisfied_by(1));
        assert!(exactly_two.satisfied_by(2));
        assert!(!exactly_two.satisfied_by(3));
        assert_eq!(exactly_two.describe(), "exactly 2 times");

        let open = VerificationTimes::default();
        assert!(open.satisfied_by(0));
        assert!(open.satisfied_by(100));

        assert!(VerificationTimes::at_least(1).satisfied_by(5));
        assert!(!VerificationTimes::at_least(1).satisfied_by(0));
    }
}
