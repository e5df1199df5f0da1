//! Layered configuration
//!
//! Defaults, then an optional TOML file, then `ASSISTANT_AUTH__*` environment
//! variables (`__` separates nesting levels, e.g.
//! `ASSISTANT_AUTH__SESSION__MAX_FAILED_ATTEMPTS=5`).

use config::{Config, Environment, File};
use face_match::FaceMatcherConfig;
use liveness::LivenessConfig;
use serde::{Deserialize, Serialize};
use session::{SessionConfig, MAX_DURATION_SECS};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use voice_match::VoiceMatcherConfig;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "ASSISTANT_AUTH";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Capture and flow settings of the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Identity of the enrolled user
    pub user_id: String,
    /// Frames read while looking for a face before giving up
    pub face_capture_frames: u32,
    /// Face samples taken by one enrollment run
    pub enroll_face_samples: u32,
    /// Recording length for voice verification and enrollment (seconds)
    pub voice_duration_secs: f64,
    /// Deadline of a capture step beyond its own recording or liveness time (ms)
    pub capture_timeout_ms: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            user_id: "owner".to_string(),
            face_capture_frames: 10,
            enroll_face_samples: 5,
            voice_duration_secs: 3.0,
            capture_timeout_ms: 5000,
        }
    }
}

impl FlowConfig {
    pub fn voice_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.voice_duration_secs).unwrap_or(Duration::from_secs(3))
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}

/// Complete configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Directory holding the enrollment blobs
    pub data_dir: PathBuf,
    /// Token signing secret; tokens are unsigned without one
    pub token_secret: Option<String>,
    pub flow: FlowConfig,
    pub face: FaceMatcherConfig,
    pub voice: VoiceMatcherConfig,
    pub liveness: LivenessConfig,
    pub session: SessionConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            token_secret: None,
            flow: FlowConfig::default(),
            face: FaceMatcherConfig::default(),
            voice: VoiceMatcherConfig::default(),
            liveness: LivenessConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("data_dir", &self.data_dir)
            .field("token_secret", &self.token_secret.as_ref().map(|_| "<redacted>"))
            .field("flow", &self.flow)
            .field("face", &self.face)
            .field("voice", &self.voice)
            .field("liveness", &self.liveness)
            .field("session", &self.session)
            .finish()
    }
}

impl AuthConfig {
    /// Create strict config (tighter thresholds, liveness-bound levels)
    pub fn strict() -> Self {
        Self {
            face: FaceMatcherConfig::strict(),
            voice: VoiceMatcherConfig::strict(),
            liveness: LivenessConfig::strict(),
            session: SessionConfig::strict(),
            ..Default::default()
        }
    }

    /// Create lenient config (looser thresholds, longer sessions)
    pub fn lenient() -> Self {
        Self {
            face: FaceMatcherConfig::lenient(),
            voice: VoiceMatcherConfig::lenient(),
            liveness: LivenessConfig::lenient(),
            session: SessionConfig::lenient(),
            ..Default::default()
        }
    }

    /// Load from an optional TOML file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(path, None)
    }

    /// Load with an explicit environment map instead of the process one
    pub fn load_from(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: AuthConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no matcher or policy can work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg.to_string())) };

        if self.face.tolerance.is_nan() || self.face.tolerance <= 0.0 {
            return invalid("face.tolerance must be positive");
        }
        if !(0.0..=1.0).contains(&self.voice.similarity_threshold) {
            return invalid("voice.similarity_threshold must be within [0, 1]");
        }
        if self.voice.min_duration_secs.is_nan() || self.voice.min_duration_secs < 0.0 {
            return invalid("voice.min_duration_secs must not be negative");
        }
        if self.liveness.consec_frames == 0 {
            return invalid("liveness.consec_frames must be at least 1");
        }
        if self.session.max_failed_attempts == 0 {
            return invalid("session.max_failed_attempts must be at least 1");
        }
        if self.session.session_timeout_secs == 0 {
            return invalid("session.session_timeout_secs must be positive");
        }
        let durations = [
            ("session.session_timeout_secs", self.session.session_timeout_secs),
            ("session.lockout_duration_secs", self.session.lockout_duration_secs),
            ("session.token_ttl_secs", self.session.token_ttl_secs),
            ("session.max_token_ttl_secs", self.session.max_token_ttl_secs),
        ];
        for (name, secs) in durations {
            if secs > MAX_DURATION_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{} must be at most {}",
                    name, MAX_DURATION_SECS
                )));
            }
        }
        if self.session.token_ttl_secs > self.session.max_token_ttl_secs {
            return invalid("session.token_ttl_secs must not exceed session.max_token_ttl_secs");
        }
        if !self.flow.voice_duration_secs.is_finite() || self.flow.voice_duration_secs <= 0.0 {
            return invalid("flow.voice_duration_secs must be positive");
        }
        Ok(())
    }

    pub fn face_path(&self) -> PathBuf {
        self.data_dir.join("face_encodings.enrl")
    }

    pub fn voice_path(&self) -> PathBuf {
        self.data_dir.join("voice_embeddings.enrl")
    }
}
