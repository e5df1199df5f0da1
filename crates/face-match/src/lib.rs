//! Face Matching Module
//!
//! Distance-based face verification:
//! - Face encoding via a pluggable encoder
//! - Enrollment of multiple samples for one user
//! - Verification against the closest enrolled sample

use capture::{BackendError, Capability, VideoFrame};
use enrollment_store::{EnrollmentKind, EnrollmentStore, MatchOutcome, StorageError};
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Enrollment error types
#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("No face detected")]
    NoFaceDetected,

    #[error("Face encoder not configured: {0}")]
    NotConfigured(String),

    #[error("Face encoding failed: {0}")]
    Encoder(#[from] BackendError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Face encoding function: one encoding per face found in the frame
pub trait FaceEncoder: Send + Sync {
    fn encode(&self, frame: &VideoFrame) -> Result<Vec<Vec<f32>>, BackendError>;
}

/// Face matcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceMatcherConfig {
    /// Maximum distance accepted as a match (lower = stricter)
    pub tolerance: f64,
}

impl Default for FaceMatcherConfig {
    fn default() -> Self {
        Self { tolerance: 0.5 }
    }
}

impl FaceMatcherConfig {
    pub fn strict() -> Self {
        Self { tolerance: 0.4 }
    }

    pub fn lenient() -> Self {
        Self { tolerance: 0.6 }
    }
}

/// Face matcher
pub struct FaceMatcher {
    config: FaceMatcherConfig,
    encoder: Capability<dyn FaceEncoder>,
    store: EnrollmentStore,
}

impl FaceMatcher {
    /// Create a face matcher persisting enrollments at `path`
    pub fn new(
        config: FaceMatcherConfig,
        encoder: Capability<dyn FaceEncoder>,
        path: impl Into<PathBuf>,
    ) -> Self {
        if let Some(reason) = encoder.reason() {
            warn!("Face matching unavailable: {}", reason);
        }
        Self {
            config,
            encoder,
            store: EnrollmentStore::new(path, EnrollmentKind::Face),
        }
    }

    pub fn config(&self) -> &FaceMatcherConfig {
        &self.config
    }

    /// Whether a face encoder is configured
    pub fn is_available(&self) -> bool {
        self.encoder.is_ready()
    }

    /// Enroll the first face found in `frame`; returns the new sample count
    pub fn enroll(&self, frame: &VideoFrame) -> Result<usize, EnrollError> {
        let encodings = self.encode(frame)?;
        self.enroll_encodings(encodings)
    }

    /// Enroll a precomputed probe.
    ///
    /// Fails with `NoFaceDetected` when the probe holds zero encodings.
    pub fn enroll_encodings(&self, encodings: Vec<Vec<f32>>) -> Result<usize, EnrollError> {
        let encoding = encodings
            .into_iter()
            .next()
            .ok_or(EnrollError::NoFaceDetected)?;
        let count = self.store.append(encoding)?;
        info!("Face enrolled ({} samples)", count);
        Ok(count)
    }

    /// Verify the first face found in `frame`. Fails closed.
    pub fn verify(&self, frame: &VideoFrame) -> MatchOutcome {
        if self.store.snapshot().is_empty() {
            return MatchOutcome::NotEnrolled;
        }
        match self.encode(frame) {
            Ok(encodings) => match encodings.first() {
                Some(probe) => self.verify_encoding(probe),
                None => MatchOutcome::NoSample,
            },
            Err(e) => {
                warn!("Face verification skipped: {}", e);
                MatchOutcome::NoSample
            }
        }
    }

    /// Compare a probe encoding with every enrolled encoding.
    ///
    /// Only the closest enrolled sample matters: `confidence = 1 - d_min` and
    /// the probe matches when `d_min <= tolerance`.
    pub fn verify_encoding(&self, probe: &[f32]) -> MatchOutcome {
        let enrolled = self.store.snapshot();
        if enrolled.is_empty() {
            return MatchOutcome::NotEnrolled;
        }
        if probe.is_empty() || enrolled.dimension() != Some(probe.len()) {
            warn!(
                "Probe dimension {} does not match enrolled {:?}",
                probe.len(),
                enrolled.dimension()
            );
            return MatchOutcome::NoSample;
        }

        let d_min = enrolled
            .iter()
            .map(|known| face_distance(known, probe))
            .fold(f64::INFINITY, f64::min);
        let confidence = (1.0 - d_min).clamp(0.0, 1.0);
        debug!("Face distance {:.4} (tolerance {})", d_min, self.config.tolerance);

        if d_min <= self.config.tolerance {
            MatchOutcome::Matched { confidence }
        } else {
            MatchOutcome::NotMatched { confidence }
        }
    }

    /// Number of enrolled samples
    pub fn enrolled_count(&self) -> usize {
        self.store.snapshot().len()
    }

    pub fn is_enrolled(&self) -> bool {
        self.enrolled_count() > 0
    }

    /// Delete all enrolled samples
    pub fn clear(&self) -> Result<(), StorageError> {
        self.store.clear()
    }

    fn encode(&self, frame: &VideoFrame) -> Result<Vec<Vec<f32>>, EnrollError> {
        let encoder = self.encoder.get().ok_or_else(|| {
            EnrollError::NotConfigured(self.encoder.reason().unwrap_or_default().to_string())
        })?;
        Ok(encoder.encode(frame)?)
    }
}

/// Euclidean distance between two encodings
pub fn face_distance(a: &[f32], b: &[f32]) -> f64 {
    let a = ArrayView1::from(a);
    let b = ArrayView1::from(b);
    let diff = &a - &b;
    (diff.dot(&diff) as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    /// Treats each pixel byte as one encoding component; a blank frame has no face
    struct PixelEncoder;

    impl FaceEncoder for PixelEncoder {
        fn encode(&self, frame: &VideoFrame) -> Result<Vec<Vec<f32>>, BackendError> {
            if frame.data.iter().all(|&b| b == 0) {
                return Ok(vec![]);
            }
            Ok(vec![frame.data.iter().map(|&b| b as f32 / 255.0).collect()])
        }
    }

    struct FailingEncoder;

    impl FaceEncoder for FailingEncoder {
        fn encode(&self, _frame: &VideoFrame) -> Result<Vec<Vec<f32>>, BackendError> {
            Err(BackendError::new("model crashed"))
        }
    }

    fn matcher(dir: &tempfile::TempDir, config: FaceMatcherConfig) -> FaceMatcher {
        FaceMatcher::new(
            config,
            Capability::ready(Arc::new(PixelEncoder)),
            dir.path().join("face.enrl"),
        )
    }

    fn frame(bytes: [u8; 3]) -> VideoFrame {
        VideoFrame::new(bytes.to_vec(), 1, 1, 0, 0)
    }

    #[test]
    fn test_face_distance() {
        assert_eq!(face_distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0);
        assert_eq!(face_distance(&[1.0, 1.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_verify_without_enrollment_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let m = matcher(&dir, FaceMatcherConfig::default());
        assert_eq!(m.verify(&frame([10, 20, 30])), MatchOutcome::NotEnrolled);
        assert_eq!(m.verify(&frame([10, 20, 30])).as_pair(), (false, 0.0));
    }

    #[test]
    fn test_enroll_no_face() {
        let dir = tempfile::tempdir().unwrap();
        let m = matcher(&dir, FaceMatcherConfig::default());
        assert!(matches!(m.enroll(&frame([0, 0, 0])), Err(EnrollError::NoFaceDetected)));
        assert!(!m.is_enrolled());
    }

    #[test]
    fn test_enroll_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let m = matcher(&dir, FaceMatcherConfig::default());
        assert_eq!(m.enroll(&frame([200, 100, 50])).unwrap(), 1);

        let same = m.verify(&frame([200, 100, 50]));
        assert_eq!(same, MatchOutcome::Matched { confidence: 1.0 });

        let stranger = m.verify(&frame([0, 255, 255]));
        assert!(!stranger.is_match());
        assert!(matches!(stranger, MatchOutcome::NotMatched { .. }));
    }

    #[test]
    fn test_probe_without_face() {
        let dir = tempfile::tempdir().unwrap();
        let m = matcher(&dir, FaceMatcherConfig::default());
        m.enroll(&frame([200, 100, 50])).unwrap();
        assert_eq!(m.verify(&frame([0, 0, 0])), MatchOutcome::NoSample);
    }

    #[test]
    fn test_best_sample_wins() {
        let dir = tempfile::tempdir().unwrap();
        let m = matcher(&dir, FaceMatcherConfig::strict());
        m.enroll_encodings(vec![vec![0.0, 0.0]]).unwrap();
        m.enroll_encodings(vec![vec![1.0, 1.0]]).unwrap();

        // Far from the first sample, close to the second
        let outcome = m.verify_encoding(&[0.9, 1.0]);
        assert!(outcome.is_match());
        assert!((outcome.confidence() - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch_probe() {
        let dir = tempfile::tempdir().unwrap();
        let m = matcher(&dir, FaceMatcherConfig::default());
        m.enroll_encodings(vec![vec![0.0, 0.0]]).unwrap();
        assert_eq!(m.verify_encoding(&[0.0]), MatchOutcome::NoSample);
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let m = matcher(&dir, FaceMatcherConfig::default());
        m.enroll(&frame([1, 2, 3])).unwrap();
        m.clear().unwrap();
        m.clear().unwrap();
        assert_eq!(m.enrolled_count(), 0);
        assert_eq!(m.verify(&frame([1, 2, 3])), MatchOutcome::NotEnrolled);
    }

    #[test]
    fn test_encoder_failure_is_no_sample() {
        let dir = tempfile::tempdir().unwrap();
        let m = FaceMatcher::new(
            FaceMatcherConfig::default(),
            Capability::ready(Arc::new(FailingEncoder)),
            dir.path().join("face.enrl"),
        );
        m.enroll_encodings(vec![vec![0.5]]).unwrap();
        assert_eq!(m.verify(&frame([1, 1, 1])), MatchOutcome::NoSample);
        assert!(matches!(m.enroll(&frame([1, 1, 1])), Err(EnrollError::Encoder(_))));
    }

    #[test]
    fn test_not_configured() {
        let dir = tempfile::tempdir().unwrap();
        let m = FaceMatcher::new(
            FaceMatcherConfig::default(),
            Capability::not_configured("no face model"),
            dir.path().join("face.enrl"),
        );
        assert!(!m.is_available());
        assert!(matches!(
            m.enroll(&frame([1, 1, 1])),
            Err(EnrollError::NotConfigured(reason)) if reason == "no face model"
        ));
    }

    proptest! {
        #[test]
        fn enrolled_probe_always_matches(
            tolerance in 0.0f64..2.0,
            encoding in proptest::collection::vec(-1.0f32..1.0, 1..64),
        ) {
            let dir = tempfile::tempdir().unwrap();
            let m = matcher(&dir, FaceMatcherConfig { tolerance });
            m.enroll_encodings(vec![encoding.clone()]).unwrap();
            prop_assert!(m.verify_encoding(&encoding).is_match());
        }
    }
}
