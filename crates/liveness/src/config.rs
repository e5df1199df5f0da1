//! Liveness configuration

use serde::{Deserialize, Serialize};

/// Liveness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// EAR below this value counts as a closed eye
    pub ear_threshold: f32,

    /// Consecutive closed-eye frames needed for one blink
    pub consec_frames: u32,

    /// Blinks required by a full check
    pub required_blinks: u32,

    /// Time budget for a full check (milliseconds)
    pub timeout_ms: u64,

    /// Also require head movement
    pub check_head_movement: bool,

    /// Head pose deviation from the first frame required (degrees)
    pub head_movement_threshold_deg: f32,

    /// Plausible open-eye EAR band for single-frame checks
    pub quick_ear_min: f32,
    pub quick_ear_max: f32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            ear_threshold: 0.25,
            consec_frames: 3,
            required_blinks: 2,
            timeout_ms: 10_000,
            check_head_movement: true,
            head_movement_threshold_deg: 15.0,
            quick_ear_min: 0.15,
            quick_ear_max: 0.4,
        }
    }
}

impl LivenessConfig {
    /// Create strict config (more evidence required)
    pub fn strict() -> Self {
        Self {
            required_blinks: 3,
            head_movement_threshold_deg: 20.0,
            ..Default::default()
        }
    }

    /// Create lenient config (blinks only)
    pub fn lenient() -> Self {
        Self {
            required_blinks: 1,
            check_head_movement: false,
            ..Default::default()
        }
    }
}
