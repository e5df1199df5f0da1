//! Match outcome shared by the biometric matchers

use serde::{Deserialize, Serialize};

/// Result of comparing a probe sample against an enrollment set.
///
/// Keeps "did not match" apart from "nothing to match against".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MatchOutcome {
    /// Best score cleared the threshold
    Matched { confidence: f64 },
    /// Sample was usable but the best score missed the threshold
    NotMatched { confidence: f64 },
    /// Probe contained no usable face/voice
    NoSample,
    /// Enrollment set is empty
    NotEnrolled,
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. })
    }

    /// Confidence in [0, 1]; zero when there was nothing to compare
    pub fn confidence(&self) -> f64 {
        match self {
            MatchOutcome::Matched { confidence } | MatchOutcome::NotMatched { confidence } => {
                *confidence
            }
            MatchOutcome::NoSample | MatchOutcome::NotEnrolled => 0.0,
        }
    }

    /// Collapse to the `(is_match, confidence)` pair
    pub fn as_pair(&self) -> (bool, f64) {
        (self.is_match(), self.confidence())
    }
}
