//! Per-check liveness state

use crate::config::LivenessConfig;
use crate::detector::HeadPose;
use serde::{Deserialize, Serialize};

/// Phase of a liveness check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LivenessPhase {
    #[default]
    Idle,
    Checking,
    Live,
    TimedOut,
    /// Stopped by cancellation or device failure
    Aborted,
}

/// Signals accumulated over one check. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct LivenessState {
    /// Consecutive frames with EAR below threshold
    pub closed_frames: u32,

    /// Blinks registered so far
    pub total_blinks: u32,

    /// Pose of the first frame with a face
    pub initial_pose: Option<HeadPose>,

    /// Largest yaw/pitch deviation from `initial_pose` (degrees)
    pub max_deviation: f32,

    /// Frames with a detected face
    pub frames_with_face: u32,

    /// Frames where no face was found
    pub frames_without_face: u32,

    pub phase: LivenessPhase,
}

impl LivenessState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one EAR sample; returns true when it completes a blink.
    ///
    /// A blink is counted on the frame where the eye reopens, and only if it
    /// stayed closed for at least `consec_frames` frames.
    pub fn update_ear(&mut self, ear: f32, config: &LivenessConfig) -> bool {
        if ear < config.ear_threshold {
            self.closed_frames += 1;
            return false;
        }

        let blinked = self.closed_frames >= config.consec_frames;
        if blinked {
            self.total_blinks += 1;
        }
        self.closed_frames = 0;
        blinked
    }

    /// Feed one head pose sample; returns the current max deviation
    pub fn update_pose(&mut self, pose: HeadPose) -> f32 {
        match self.initial_pose {
            None => self.initial_pose = Some(pose),
            Some(baseline) => {
                self.max_deviation = self.max_deviation.max(pose.deviation_from(&baseline));
            }
        }
        self.max_deviation
    }

    /// Whether enough evidence has been seen
    pub fn is_satisfied(&self, required_blinks: u32, config: &LivenessConfig) -> bool {
        let blinks_ok = self.total_blinks >= required_blinks;
        let movement_ok = !config.check_head_movement
            || self.max_deviation >= config.head_movement_threshold_deg;
        blinks_ok && movement_ok
    }

    /// Partial confidence in [0, 1]: `0.5 * blink_ratio + 0.5 * movement_ratio`.
    ///
    /// Observed movement counts even when head movement is not required.
    pub fn confidence(&self, required_blinks: u32, config: &LivenessConfig) -> f64 {
        let blink_ratio = if required_blinks == 0 {
            1.0
        } else {
            (self.total_blinks as f64 / required_blinks as f64).min(1.0)
        };

        let threshold = config.head_movement_threshold_deg as f64;
        let movement_ratio = if threshold <= 0.0 {
            1.0
        } else {
            (self.max_deviation as f64).min(threshold) / threshold
        };
        0.5 * blink_ratio + 0.5 * movement_ratio
    }

    /// Back to `Idle` with all counters cleared
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const HIGH: f32 = 0.32;
    const LOW: f32 = 0.12;

    fn run(sequence: &[f32]) -> u32 {
        let config = LivenessConfig::default();
        let mut state = LivenessState::new();
        for &ear in sequence {
            state.update_ear(ear, &config);
        }
        state.total_blinks
    }

    fn seq(high_before: usize, low: usize, high_after: usize) -> Vec<f32> {
        let mut v = vec![HIGH; high_before];
        v.extend(std::iter::repeat(LOW).take(low));
        v.extend(std::iter::repeat(HIGH).take(high_after));
        v
    }

    #[test]
    fn test_short_closure_is_not_a_blink() {
        assert_eq!(run(&seq(5, 2, 5)), 0);
    }

    #[test]
    fn test_debounced_blink() {
        assert_eq!(run(&seq(5, 4, 5)), 1);
        assert_eq!(run(&seq(5, 3, 5)), 1);
    }

    #[test]
    fn test_blink_counted_on_reopen() {
        // Eye still closed at the end of the sequence: not yet a blink
        assert_eq!(run(&seq(5, 10, 0)), 0);
    }

    #[test]
    fn test_two_blinks() {
        let mut v = seq(3, 4, 3);
        v.extend(seq(0, 5, 2));
        assert_eq!(run(&v), 2);
    }

    #[test]
    fn test_pose_deviation_tracks_max() {
        let mut state = LivenessState::new();
        state.update_pose(HeadPose { yaw: 5.0, pitch: 0.0, roll: 0.0 });
        state.update_pose(HeadPose { yaw: 17.0, pitch: 0.0, roll: 0.0 });
        state.update_pose(HeadPose { yaw: 8.0, pitch: -3.0, roll: 0.0 });
        assert_eq!(state.max_deviation, 12.0);
    }

    #[test]
    fn test_partial_confidence() {
        let config = LivenessConfig::default();
        let state = LivenessState {
            total_blinks: 1,
            max_deviation: 7.5,
            ..Default::default()
        };
        // 0.5 * (1/2) + 0.5 * (7.5/15)
        assert!((state.confidence(2, &config) - 0.5).abs() < 1e-9);
        assert!(!state.is_satisfied(2, &config));
    }

    #[test]
    fn test_confidence_caps_at_one() {
        let config = LivenessConfig::default();
        let state = LivenessState {
            total_blinks: 5,
            max_deviation: 40.0,
            ..Default::default()
        };
        assert_eq!(state.confidence(2, &config), 1.0);
        assert!(state.is_satisfied(2, &config));
    }

    #[test]
    fn test_confidence_formula_when_movement_disabled() {
        let config = LivenessConfig::lenient();
        let threshold = config.head_movement_threshold_deg;
        let still = LivenessState {
            total_blinks: 1,
            ..Default::default()
        };
        assert!(still.is_satisfied(1, &config));
        assert!(!still.is_satisfied(2, &config));
        // 0.5 * (1/2) + 0.5 * 0
        assert!((still.confidence(2, &config) - 0.25).abs() < 1e-9);

        let moving = LivenessState {
            total_blinks: 1,
            max_deviation: threshold / 2.0,
            ..Default::default()
        };
        // 0.5 * (1/2) + 0.5 * (1/2)
        assert!((moving.confidence(2, &config) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_reset() {
        let mut state = LivenessState {
            total_blinks: 3,
            phase: LivenessPhase::Live,
            ..Default::default()
        };
        state.reset();
        assert_eq!(state.total_blinks, 0);
        assert_eq!(state.phase, LivenessPhase::Idle);
    }

    fn with_closures(runs: &[usize]) -> Vec<f32> {
        let mut v = Vec::new();
        for &r in runs {
            v.push(HIGH);
            v.extend(std::iter::repeat(LOW).take(r));
        }
        v.push(HIGH);
        v
    }

    proptest! {
        #[test]
        fn short_closures_never_count(runs in proptest::collection::vec(0usize..3, 0..20)) {
            prop_assert_eq!(run(&with_closures(&runs)), 0);
        }

        #[test]
        fn each_long_closure_counts_once(runs in proptest::collection::vec(3usize..12, 0..20)) {
            prop_assert_eq!(run(&with_closures(&runs)), runs.len() as u32);
        }
    }
}
