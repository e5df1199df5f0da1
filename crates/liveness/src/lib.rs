//! Liveness Detection
//!
//! Defeats static-photo spoofing by requiring involuntary motion:
//! - Blink detection from the eye aspect ratio (EAR) with debouncing
//! - Head movement relative to the first observed pose
//! - A cheap single-frame heuristic for continuous monitoring

pub mod config;
pub mod detector;
pub mod state;

pub use config::LivenessConfig;
pub use detector::{eye_aspect_ratio, estimate_head_pose, HeadPose, LandmarkDetector, Landmarks, Point};
pub use state::{LivenessPhase, LivenessState};

use capture::{BackendError, CameraDevice, CancelFlag, Capability, CaptureError, FrameStream, VideoFrame};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Liveness error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LivenessError {
    #[error("Landmark detector not configured: {0}")]
    NotConfigured(String),

    #[error("Camera unavailable: {0}")]
    Device(#[from] CaptureError),

    #[error("Liveness check cancelled")]
    Cancelled,
}

/// Outcome of a full liveness check that ran to a verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessReport {
    /// `Live` or `TimedOut`
    pub phase: LivenessPhase,
    pub confidence: f64,
    pub blinks: u32,
    pub max_head_deviation: f32,
    pub frames_with_face: u32,
    pub elapsed_ms: u64,
}

impl LivenessReport {
    pub fn is_live(&self) -> bool {
        self.phase == LivenessPhase::Live
    }
}

/// Single-frame heuristic result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuickCheck {
    pub face_found: bool,
    pub confidence: f64,
}

impl QuickCheck {
    pub fn as_pair(&self) -> (bool, f64) {
        (self.face_found, self.confidence)
    }
}

/// Per-frame observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameObservation {
    pub ear: f32,
    pub pose: HeadPose,
    pub blinked: bool,
}

/// Liveness detector
pub struct LivenessDetector {
    config: LivenessConfig,
    landmarks: Capability<dyn LandmarkDetector>,
}

impl LivenessDetector {
    pub fn new(config: LivenessConfig, landmarks: Capability<dyn LandmarkDetector>) -> Self {
        if let Some(reason) = landmarks.reason() {
            warn!("Liveness detection unavailable: {}", reason);
        }
        Self { config, landmarks }
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    pub fn is_available(&self) -> bool {
        self.landmarks.is_ready()
    }

    /// Detect landmarks in one frame, folding detector failures into "no face"
    pub fn landmarks(&self, frame: &VideoFrame) -> Result<Option<Landmarks>, LivenessError> {
        let detector = self.detector()?;
        match detector.detect(frame) {
            Ok(found) => Ok(found),
            Err(BackendError(msg)) => {
                debug!("Landmark detection failed: {}", msg);
                Ok(None)
            }
        }
    }

    /// Feed one frame into `state`; `None` when no face was found
    pub fn process_frame(
        &self,
        state: &mut LivenessState,
        frame: &VideoFrame,
    ) -> Result<Option<FrameObservation>, LivenessError> {
        let Some(landmarks) = self.landmarks(frame)? else {
            state.frames_without_face += 1;
            return Ok(None);
        };
        Ok(Some(self.observe(state, &landmarks)))
    }

    /// Feed precomputed landmarks into `state`
    pub fn observe(&self, state: &mut LivenessState, landmarks: &Landmarks) -> FrameObservation {
        state.frames_with_face += 1;
        let ear = landmarks.ear();
        let blinked = state.update_ear(ear, &self.config);
        if blinked {
            debug!("Blink detected ({} total)", state.total_blinks);
        }
        let pose = landmarks.head_pose();
        state.update_pose(pose);
        FrameObservation { ear, pose, blinked }
    }

    /// Open `camera`, run a full check, and release the camera before returning
    pub fn check_liveness(
        &self,
        camera: &dyn CameraDevice,
        required_blinks: u32,
        timeout: Duration,
        cancel: &CancelFlag,
    ) -> Result<LivenessReport, LivenessError> {
        self.detector()?;
        let mut stream = camera.open()?;
        self.check_liveness_on(stream.as_mut(), required_blinks, timeout, cancel)
    }

    /// Run a full check on an already-open stream.
    ///
    /// Reads frames until the blink (and head movement) requirements are met
    /// or `timeout` elapses. A timed-out report carries partial confidence.
    pub fn check_liveness_on(
        &self,
        stream: &mut dyn FrameStream,
        required_blinks: u32,
        timeout: Duration,
        cancel: &CancelFlag,
    ) -> Result<LivenessReport, LivenessError> {
        self.detector()?;

        let mut state = LivenessState::new();
        state.reset();
        state.phase = LivenessPhase::Checking;
        let started = Instant::now();
        info!(
            "Liveness check started: {} blinks, head movement {}, timeout {:?}",
            required_blinks, self.config.check_head_movement, timeout
        );

        loop {
            if cancel.is_cancelled() {
                state.phase = LivenessPhase::Aborted;
                info!("Liveness check cancelled");
                return Err(LivenessError::Cancelled);
            }

            if state.is_satisfied(required_blinks, &self.config) {
                state.phase = LivenessPhase::Live;
                break;
            }

            if started.elapsed() >= timeout {
                state.phase = LivenessPhase::TimedOut;
                break;
            }

            let frame = match stream.next_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    state.phase = LivenessPhase::Aborted;
                    warn!("Liveness check aborted: {}", e);
                    return Err(LivenessError::Device(e));
                }
            };
            self.process_frame(&mut state, &frame)?;
        }

        let confidence = if state.phase == LivenessPhase::Live {
            1.0
        } else {
            state.confidence(required_blinks, &self.config)
        };
        let report = LivenessReport {
            phase: state.phase,
            confidence,
            blinks: state.total_blinks,
            max_head_deviation: state.max_deviation,
            frames_with_face: state.frames_with_face,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            "Liveness check finished: {:?} (blinks {}, deviation {:.1}, confidence {:.2})",
            report.phase, report.blinks, report.max_head_deviation, report.confidence
        );
        Ok(report)
    }

    /// Cheap single-frame plausibility check.
    ///
    /// An open eye inside the EAR band scores 0.7, any other detected face
    /// scores 0.3. This is a soft signal, not a full check.
    pub fn quick_check(&self, frame: &VideoFrame) -> QuickCheck {
        let landmarks = match self.landmarks(frame) {
            Ok(Some(landmarks)) => landmarks,
            Ok(None) | Err(_) => {
                return QuickCheck {
                    face_found: false,
                    confidence: 0.0,
                }
            }
        };

        let ear = landmarks.ear();
        let plausible = ear > self.config.quick_ear_min && ear < self.config.quick_ear_max;
        QuickCheck {
            face_found: true,
            confidence: if plausible { 0.7 } else { 0.3 },
        }
    }

    fn detector(&self) -> Result<&std::sync::Arc<dyn LandmarkDetector>, LivenessError> {
        self.landmarks.get().ok_or_else(|| {
            LivenessError::NotConfigured(self.landmarks.reason().unwrap_or_default().to_string())
        })
    }
}
