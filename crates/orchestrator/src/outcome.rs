//! Results and failures of authentication flows

use enrollment_store::{MatchOutcome, StorageError};
use face_match::EnrollError;
use liveness::QuickCheck;
use serde::{Deserialize, Serialize};
use session::{AuthLevel, Denied, Factors, Session, TokenError};
use std::fmt;
use thiserror::Error;
use voice_match::VoiceEnrollError;

/// Authentication factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Factor {
    Liveness,
    Face,
    Voice,
}

impl Factor {
    /// Factor set with only this factor verified
    pub fn as_factors(&self) -> Factors {
        match self {
            Factor::Liveness => Factors::new(false, false, true),
            Factor::Face => Factors::new(true, false, false),
            Factor::Voice => Factors::new(false, true, false),
        }
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Factor::Liveness => "liveness",
            Factor::Face => "face",
            Factor::Voice => "voice",
        })
    }
}

/// Capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Camera,
    Microphone,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Device::Camera => "camera",
            Device::Microphone => "microphone",
        })
    }
}

/// Why an authentication flow failed
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthFailure {
    #[error("No {factor} detected")]
    NotDetected { factor: Factor },

    #[error("No {factor} enrolled")]
    NotEnrolled { factor: Factor },

    #[error("{factor} below threshold (confidence {confidence:.2})")]
    BelowThreshold { factor: Factor, confidence: f64 },

    #[error("Locked out for {remaining_secs}s")]
    Locked { remaining_secs: u64 },

    #[error("{device} unavailable: {message}")]
    DeviceUnavailable { device: Device, message: String },

    #[error("{factor} not configured")]
    NotConfigured { factor: Factor },

    #[error("Authentication cancelled")]
    Cancelled,

    #[error("{factor} timed out (confidence {confidence:.2})")]
    TimedOut { factor: Factor, confidence: f64 },

    #[error("No active session")]
    NoSession,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AuthFailure {
    /// Map a non-matching outcome to a failure; `None` for a match
    pub fn from_outcome(factor: Factor, outcome: MatchOutcome) -> Option<AuthFailure> {
        match outcome {
            MatchOutcome::Matched { .. } => None,
            MatchOutcome::NotMatched { confidence } => {
                Some(AuthFailure::BelowThreshold { factor, confidence })
            }
            MatchOutcome::NoSample => Some(AuthFailure::NotDetected { factor }),
            MatchOutcome::NotEnrolled => Some(AuthFailure::NotEnrolled { factor }),
        }
    }

    /// Whether this failure counts toward a lockout.
    ///
    /// Only verification attempts count; missing enrollment, devices, or
    /// configuration and cancellation are not the user's attempt.
    pub fn counts_as_attempt(&self) -> bool {
        matches!(
            self,
            AuthFailure::NotDetected { .. }
                | AuthFailure::BelowThreshold { .. }
                | AuthFailure::TimedOut { .. }
        )
    }

    /// Score carried by the failure, zero when none was computed
    pub fn confidence(&self) -> f64 {
        match self {
            AuthFailure::BelowThreshold { confidence, .. }
            | AuthFailure::TimedOut { confidence, .. } => *confidence,
            _ => 0.0,
        }
    }

    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            AuthFailure::NotDetected { .. } => "not_detected",
            AuthFailure::NotEnrolled { .. } => "not_enrolled",
            AuthFailure::BelowThreshold { .. } => "below_threshold",
            AuthFailure::Locked { .. } => "locked",
            AuthFailure::DeviceUnavailable { .. } => "device_unavailable",
            AuthFailure::NotConfigured { .. } => "not_configured",
            AuthFailure::Cancelled => "cancelled",
            AuthFailure::TimedOut { .. } => "timed_out",
            AuthFailure::NoSession => "no_session",
            AuthFailure::Internal { .. } => "internal",
        }
    }

    /// Sentence a voice or chat surface can say back to the user
    pub fn reason(&self) -> String {
        match self {
            AuthFailure::NotDetected { factor: Factor::Voice } => {
                "I couldn't hear your voice clearly. Please try again.".to_string()
            }
            AuthFailure::NotDetected { .. } => {
                "I couldn't see your face. Please look at the camera and try again.".to_string()
            }
            AuthFailure::NotEnrolled { factor } => {
                format!("No {} is enrolled yet. Please enroll first.", factor)
            }
            AuthFailure::BelowThreshold { factor, .. } => {
                format!("Your {} was not recognized.", factor)
            }
            AuthFailure::Locked { remaining_secs } => format!(
                "Too many failed attempts. Please try again in {}.",
                human_duration(*remaining_secs)
            ),
            AuthFailure::DeviceUnavailable { device, .. } => {
                format!("The {} is not available right now.", device)
            }
            AuthFailure::NotConfigured { factor } => {
                format!("{} verification is not available on this device.", capitalize(factor))
            }
            AuthFailure::Cancelled => "Authentication was cancelled.".to_string(),
            AuthFailure::TimedOut {
                factor: Factor::Liveness,
                ..
            } => "I couldn't confirm you're there. Please blink naturally and move your head slightly."
                .to_string(),
            AuthFailure::TimedOut { factor, .. } => {
                format!("The {} check took too long. Please try again.", factor)
            }
            AuthFailure::NoSession => "Please authenticate first.".to_string(),
            AuthFailure::Internal { .. } => "Something went wrong. Please try again.".to_string(),
        }
    }
}

fn capitalize(factor: &Factor) -> String {
    let name = factor.to_string();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => name,
    }
}

fn human_duration(secs: u64) -> String {
    match secs {
        0..=1 => "1 second".to_string(),
        2..=59 => format!("{} seconds", secs),
        60..=119 => "1 minute".to_string(),
        _ => format!("{} minutes", secs.div_ceil(60)),
    }
}

/// Per-step confidences of one flow; `None` for steps that did not run
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StepScores {
    pub liveness: Option<f64>,
    pub face: Option<f64>,
    pub voice: Option<f64>,
}

impl StepScores {
    pub fn set(&mut self, factor: Factor, confidence: f64) {
        match factor {
            Factor::Liveness => self.liveness = Some(confidence),
            Factor::Face => self.face = Some(confidence),
            Factor::Voice => self.voice = Some(confidence),
        }
    }

    /// Mean of the steps that ran
    pub fn average(&self) -> f64 {
        let ran: Vec<f64> = [self.liveness, self.face, self.voice]
            .into_iter()
            .flatten()
            .collect();
        if ran.is_empty() {
            return 0.0;
        }
        ran.iter().sum::<f64>() / ran.len() as f64
    }
}

/// Result of `authenticate`
#[derive(Debug, Clone, Serialize)]
pub struct AuthResult {
    pub success: bool,
    pub session: Option<Session>,
    pub auth_level: AuthLevel,
    pub factors: Factors,
    pub confidence: f64,
    pub scores: StepScores,
    pub failure: Option<AuthFailure>,
    /// Human-readable outcome
    pub message: String,
}

impl AuthResult {
    pub fn succeeded(session: Session, scores: StepScores) -> Self {
        Self {
            success: true,
            auth_level: session.auth_level,
            factors: session.factors(),
            confidence: scores.average(),
            message: format!("Authenticated at {} level.", session.auth_level),
            session: Some(session),
            scores,
            failure: None,
        }
    }

    pub fn failed(failure: AuthFailure, factors: Factors, scores: StepScores) -> Self {
        Self {
            success: false,
            session: None,
            auth_level: AuthLevel::None,
            factors,
            confidence: scores.average(),
            scores,
            message: failure.reason(),
            failure: Some(failure),
        }
    }
}

/// Result of `quick_verify`
#[derive(Debug, Clone, Serialize)]
pub struct QuickVerifyResult {
    pub verified: bool,
    /// Mean of the face, liveness, and (when given) voice confidences
    pub confidence: f64,
    pub face: Option<MatchOutcome>,
    pub liveness: Option<QuickCheck>,
    pub voice: Option<MatchOutcome>,
    pub failure: Option<AuthFailure>,
}

impl QuickVerifyResult {
    pub fn rejected(failure: AuthFailure) -> Self {
        Self {
            verified: false,
            confidence: 0.0,
            face: None,
            liveness: None,
            voice: None,
            failure: Some(failure),
        }
    }

    pub fn reason(&self) -> Option<String> {
        self.failure.as_ref().map(AuthFailure::reason)
    }
}

/// Snapshot of the orchestrator's state
#[derive(Debug, Clone, Serialize)]
pub struct AuthStatus {
    pub user_id: String,
    pub face_enrolled: usize,
    pub voice_enrolled: usize,
    pub face_available: bool,
    pub voice_available: bool,
    pub liveness_available: bool,
    pub camera_available: bool,
    pub microphone_available: bool,
    pub strong_signing: bool,
    pub locked_out_secs: Option<u64>,
    pub active_sessions: usize,
    pub session: Option<Session>,
}

/// Enrollment flow error types
#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("{device} unavailable: {message}")]
    DeviceUnavailable { device: Device, message: String },

    #[error("{0} not configured")]
    NotConfigured(Factor),

    #[error("{0} has no enrollment")]
    NotEnrollable(Factor),

    #[error("No usable {0} sample captured")]
    NoSample(Factor),

    #[error(transparent)]
    Face(#[from] EnrollError),

    #[error(transparent)]
    Voice(#[from] VoiceEnrollError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Enrollment interrupted: {0}")]
    Internal(String),
}

/// Why a bearer token was not authorized for a command
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthorizeError {
    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Denied(#[from] Denied),
}

impl AuthorizeError {
    pub fn reason(&self) -> String {
        match self {
            AuthorizeError::Token(_) => "Your credentials are no longer valid. Please authenticate again.".to_string(),
            AuthorizeError::Denied(denied) => denied.reason(),
        }
    }
}
