//! Voice Matching Module
//!
//! Speaker verification by embedding similarity:
//! - Duration check and resampling to the encoder's native rate
//! - Enrollment of multiple utterances
//! - Verification against the most similar enrolled utterance

pub mod preprocess;

pub use preprocess::{preprocess, resample, Features, RejectReason};

use capture::{AudioClip, BackendError, Capability};
use enrollment_store::{EnrollmentKind, EnrollmentStore, MatchOutcome, StorageError};
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Voice enrollment error types
#[derive(Error, Debug)]
pub enum VoiceEnrollError {
    #[error("Audio rejected: {0}")]
    Rejected(#[from] RejectReason),

    #[error("No voice detected")]
    NoVoiceDetected,

    #[error("Voice encoder not configured: {0}")]
    NotConfigured(String),

    #[error("Voice embedding failed: {0}")]
    Encoder(#[from] BackendError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Speaker embedding function
pub trait VoiceEncoder: Send + Sync {
    /// Native sample rate the encoder expects
    fn sample_rate(&self) -> u32;

    /// Embed preprocessed audio; `None` when no voice is present
    fn embed(&self, samples: &[f32], sample_rate: u32) -> Result<Option<Vec<f32>>, BackendError>;
}

/// Voice matcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceMatcherConfig {
    /// Minimum cosine similarity accepted as a match
    pub similarity_threshold: f64,
    /// Minimum clip duration in seconds
    pub min_duration_secs: f64,
}

impl Default for VoiceMatcherConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.75,
            min_duration_secs: 1.5,
        }
    }
}

impl VoiceMatcherConfig {
    pub fn strict() -> Self {
        Self {
            similarity_threshold: 0.85,
            ..Default::default()
        }
    }

    pub fn lenient() -> Self {
        Self {
            similarity_threshold: 0.65,
            ..Default::default()
        }
    }
}

/// Voice matcher
pub struct VoiceMatcher {
    config: VoiceMatcherConfig,
    encoder: Capability<dyn VoiceEncoder>,
    store: EnrollmentStore,
}

impl VoiceMatcher {
    /// Create a voice matcher persisting enrollments at `path`
    pub fn new(
        config: VoiceMatcherConfig,
        encoder: Capability<dyn VoiceEncoder>,
        path: impl Into<PathBuf>,
    ) -> Self {
        if let Some(reason) = encoder.reason() {
            warn!("Voice matching unavailable: {}", reason);
        }
        Self {
            config,
            encoder,
            store: EnrollmentStore::new(path, EnrollmentKind::Voice),
        }
    }

    pub fn config(&self) -> &VoiceMatcherConfig {
        &self.config
    }

    /// Whether a voice encoder is configured
    pub fn is_available(&self) -> bool {
        self.encoder.is_ready()
    }

    /// Check duration and resample to the encoder's native rate
    pub fn preprocess(&self, clip: &AudioClip) -> Result<Features, VoiceEnrollError> {
        let encoder = self.encoder()?;
        Ok(preprocess(
            clip,
            encoder.sample_rate(),
            self.config.min_duration_secs,
        )?)
    }

    /// Enroll one utterance; returns the new sample count
    pub fn enroll(&self, clip: &AudioClip) -> Result<usize, VoiceEnrollError> {
        let embedding = self.embed(clip)?;
        self.enroll_embedding(embedding)
    }

    /// Enroll a precomputed embedding
    pub fn enroll_embedding(&self, embedding: Vec<f32>) -> Result<usize, VoiceEnrollError> {
        let count = self.store.append(embedding)?;
        info!("Voice enrolled ({} samples)", count);
        Ok(count)
    }

    /// Verify an utterance. Fails closed.
    pub fn verify(&self, clip: &AudioClip) -> MatchOutcome {
        if self.store.snapshot().is_empty() {
            return MatchOutcome::NotEnrolled;
        }
        match self.embed(clip) {
            Ok(probe) => self.verify_embedding(&probe),
            Err(e) => {
                debug!("Voice verification skipped: {}", e);
                MatchOutcome::NoSample
            }
        }
    }

    /// Compare a probe embedding with every enrolled embedding.
    ///
    /// Takes the maximum cosine similarity and matches when it reaches
    /// `similarity_threshold`.
    pub fn verify_embedding(&self, probe: &[f32]) -> MatchOutcome {
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

        let best = enrolled
            .iter()
            .map(|known| cosine_similarity(known, probe))
            .fold(f64::NEG_INFINITY, f64::max);
        debug!(
            "Voice similarity {:.4} (threshold {})",
            best, self.config.similarity_threshold
        );

        let confidence = best.clamp(0.0, 1.0);
        if best >= self.config.similarity_threshold {
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

    fn encoder(&self) -> Result<&std::sync::Arc<dyn VoiceEncoder>, VoiceEnrollError> {
        self.encoder.get().ok_or_else(|| {
            VoiceEnrollError::NotConfigured(self.encoder.reason().unwrap_or_default().to_string())
        })
    }

    fn embed(&self, clip: &AudioClip) -> Result<Vec<f32>, VoiceEnrollError> {
        let features = self.preprocess(clip)?;
        self.encoder()?
            .embed(&features.samples, features.sample_rate)?
            .ok_or(VoiceEnrollError::NoVoiceDetected)
    }
}

/// Cosine similarity between two embeddings; zero if either is a zero vector
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let a = ArrayView1::from(a);
    let b = ArrayView1::from(b);
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        (a.dot(&b) / (norm_a * norm_b)) as f64
    } else {
        0.0
    }
}
