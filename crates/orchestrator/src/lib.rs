//! Authentication Orchestrator
//!
//! Combines the biometric components into user-facing flows:
//! - Full authentication: liveness, then face, then voice
//! - Continuous re-verification of the current session
//! - Voice step-up, enrollment, logout, and bearer tokens
//!
//! Device capture blocks for seconds, so every capture step runs on the
//! blocking pool under a deadline. Abandoning a flow (dropping its future,
//! `cancel_authentication`, or a missed deadline) cancels the worker, which
//! releases the camera when its stream drops.

pub mod config;
pub mod outcome;
pub mod telemetry;

pub use config::{AuthConfig, ConfigError, FlowConfig, ENV_PREFIX};
pub use outcome::{
    AuthFailure, AuthResult, AuthStatus, AuthorizeError, Device, EnrollmentError, Factor,
    QuickVerifyResult, StepScores,
};

use capture::{
    AudioClip, CameraDevice, CancelFlag, CancelOnDrop, Capability, CaptureError, Microphone,
    VideoFrame,
};
use enrollment_store::MatchOutcome;
use face_match::{EnrollError, FaceEncoder, FaceMatcher};
use liveness::{LandmarkDetector, LivenessDetector, LivenessError};
use session::{Claims, Clock, Denied, Factors, Session, SessionStore, SystemClock, TokenError, TokenSigner};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use voice_match::{VoiceEncoder, VoiceMatcher};

/// Collaborator-supplied backends; anything left out is "not configured"
pub struct Backends {
    pub face_encoder: Capability<dyn FaceEncoder>,
    pub voice_encoder: Capability<dyn VoiceEncoder>,
    pub landmarks: Capability<dyn LandmarkDetector>,
    pub camera: Capability<dyn CameraDevice>,
    pub microphone: Capability<dyn Microphone>,
}

impl Default for Backends {
    fn default() -> Self {
        Self {
            face_encoder: Capability::not_configured("no face encoder supplied"),
            voice_encoder: Capability::not_configured("no voice encoder supplied"),
            landmarks: Capability::not_configured("no landmark detector supplied"),
            camera: Capability::not_configured("no camera supplied"),
            microphone: Capability::not_configured("no microphone supplied"),
        }
    }
}

/// Registration of one running flow; cancels it when dropped
struct FlowHandle<'a> {
    slot: &'a Mutex<Option<CancelFlag>>,
    flag: CancelFlag,
    _cancel: CancelOnDrop,
}

impl Drop for FlowHandle<'_> {
    fn drop(&mut self) {
        let mut slot = lock(self.slot);
        if slot.as_ref().is_some_and(|f| f.same_as(&self.flag)) {
            *slot = None;
        }
    }
}

/// Authentication orchestrator
pub struct AuthOrchestrator {
    flow: FlowConfig,
    face: Arc<FaceMatcher>,
    voice: Arc<VoiceMatcher>,
    liveness: Arc<LivenessDetector>,
    sessions: Arc<SessionStore>,
    camera: Capability<dyn CameraDevice>,
    microphone: Capability<dyn Microphone>,
    current: Mutex<Option<Uuid>>,
    in_flight: Mutex<Option<CancelFlag>>,
}

impl AuthOrchestrator {
    /// Assemble an orchestrator from already-built components
    pub fn new(
        flow: FlowConfig,
        face: Arc<FaceMatcher>,
        voice: Arc<VoiceMatcher>,
        liveness: Arc<LivenessDetector>,
        sessions: Arc<SessionStore>,
        camera: Capability<dyn CameraDevice>,
        microphone: Capability<dyn Microphone>,
    ) -> Self {
        info!(
            "Auth orchestrator for '{}': face {}, voice {}, liveness {}, camera {}, microphone {}",
            flow.user_id,
            face.is_available(),
            voice.is_available(),
            liveness.is_available(),
            camera.is_ready(),
            microphone.is_ready()
        );
        Self {
            flow,
            face,
            voice,
            liveness,
            sessions,
            camera,
            microphone,
            current: Mutex::new(None),
            in_flight: Mutex::new(None),
        }
    }

    /// Build every component from configuration on the system clock
    pub fn from_config(config: &AuthConfig, backends: Backends) -> Self {
        Self::with_clock(config, backends, Arc::new(SystemClock))
    }

    /// Build every component from configuration on `clock`
    pub fn with_clock(config: &AuthConfig, backends: Backends, clock: Arc<dyn Clock>) -> Self {
        let signer = TokenSigner::from_secret(config.token_secret.as_deref());
        let sessions = SessionStore::new(config.session.clone(), signer, clock);
        let face = FaceMatcher::new(config.face.clone(), backends.face_encoder, config.face_path());
        let voice = VoiceMatcher::new(config.voice.clone(), backends.voice_encoder, config.voice_path());
        let liveness = LivenessDetector::new(config.liveness.clone(), backends.landmarks);

        Self::new(
            config.flow.clone(),
            Arc::new(face),
            Arc::new(voice),
            Arc::new(liveness),
            Arc::new(sessions),
            backends.camera,
            backends.microphone,
        )
    }

    pub fn flow_config(&self) -> &FlowConfig {
        &self.flow
    }

    pub fn face(&self) -> &FaceMatcher {
        &self.face
    }

    pub fn voice(&self) -> &VoiceMatcher {
        &self.voice
    }

    pub fn liveness(&self) -> &LivenessDetector {
        &self.liveness
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    // ----------------------------------------
    // Authentication
    // ----------------------------------------

    /// Run a full authentication.
    ///
    /// Steps run in the order liveness, face, voice; steps not required are
    /// skipped and the first required step that fails ends the flow. A
    /// locked-out user is refused before any device is touched. `timeout`
    /// bounds the liveness step.
    pub async fn authenticate(
        &self,
        require_face: bool,
        require_voice: bool,
        require_liveness: bool,
        timeout: Duration,
    ) -> AuthResult {
        let user = self.flow.user_id.clone();
        if let Some(remaining) = self.sessions.lockout_remaining(&user) {
            let failure = AuthFailure::Locked {
                remaining_secs: ceil_secs(remaining),
            };
            info!("Authentication refused for {}: {}", user, failure);
            telemetry::auth_attempt(failure.label());
            return AuthResult::failed(failure, Factors::default(), StepScores::default());
        }
        self.sessions.cleanup_expired();

        let flow = self.begin_flow();
        info!(
            "Authentication started for {} (liveness {}, face {}, voice {})",
            user, require_liveness, require_face, require_voice
        );

        let mut factors = Factors::default();
        let mut scores = StepScores::default();
        let steps = [
            (Factor::Liveness, require_liveness),
            (Factor::Face, require_face),
            (Factor::Voice, require_voice),
        ];

        for (factor, required) in steps {
            if !required {
                continue;
            }
            let result = if flow.flag.is_cancelled() {
                Err(AuthFailure::Cancelled)
            } else {
                match factor {
                    Factor::Liveness => self.liveness_step(timeout, &flow.flag).await,
                    Factor::Face => self.face_step(&flow.flag).await,
                    Factor::Voice => self.voice_step(self.flow.voice_duration(), &flow.flag).await,
                }
            };

            match result {
                Ok(confidence) => {
                    debug!("{} verified (confidence {:.2})", factor, confidence);
                    scores.set(factor, confidence);
                    factors = factors.merge(factor.as_factors());
                }
                Err(failure) => {
                    scores.set(factor, failure.confidence());
                    self.note_failure(&user, &failure);
                    return AuthResult::failed(failure, factors, scores);
                }
            }
        }
        drop(flow);

        let level = self.sessions.config().level_rule.level_for(factors);
        let session = self.sessions.create_session(&user, level, factors);
        self.set_current(Some(session.id));
        telemetry::auth_attempt("success");
        telemetry::session_created();
        info!("{} authenticated at {} (session {})", user, level, session.id);

        AuthResult::succeeded(session, scores)
    }

    /// Verify a voice sample and upgrade the current session with it.
    ///
    /// Takes a MEDIUM face-and-liveness session to HIGH.
    pub async fn step_up_voice(&self, duration: Option<Duration>) -> Result<Session, AuthFailure> {
        let session = self.current_session().ok_or(AuthFailure::NoSession)?;
        let user = session.user_id.clone();
        if let Some(remaining) = self.sessions.lockout_remaining(&user) {
            let failure = AuthFailure::Locked {
                remaining_secs: ceil_secs(remaining),
            };
            telemetry::auth_attempt(failure.label());
            return Err(failure);
        }

        let flow = self.begin_flow();
        let duration = duration.unwrap_or_else(|| self.flow.voice_duration());
        let result = self.voice_step(duration, &flow.flag).await;
        drop(flow);

        match result {
            Ok(confidence) => {
                let upgraded = self
                    .sessions
                    .upgrade(&session.id, Factor::Voice.as_factors())
                    .ok_or(AuthFailure::NoSession)?;
                telemetry::auth_attempt("step_up");
                info!(
                    "Voice step-up for {} (confidence {:.2}): {} -> {}",
                    user, confidence, session.auth_level, upgraded.auth_level
                );
                Ok(upgraded)
            }
            Err(failure) => {
                self.note_failure(&user, &failure);
                Err(failure)
            }
        }
    }

    /// Cancel the running authentication or enrollment, if any
    pub fn cancel_authentication(&self) -> bool {
        match lock(&self.in_flight).as_ref() {
            Some(flag) => {
                info!("Cancelling in-flight flow");
                flag.cancel();
                true
            }
            None => false,
        }
    }

    /// Cheap re-verification of the current session from one frame.
    ///
    /// Needs a face match and a face for the liveness heuristic, plus a voice
    /// match when audio is given. Success refreshes the session; failure is
    /// not counted toward lockout.
    pub fn quick_verify(&self, frame: &VideoFrame, audio: Option<&AudioClip>) -> QuickVerifyResult {
        let Some(session) = self.current_session() else {
            telemetry::quick_verify("no_session");
            return QuickVerifyResult::rejected(AuthFailure::NoSession);
        };

        let face = self.face.verify(frame);
        let live = self.liveness.quick_check(frame);
        let voice = audio.map(|clip| self.voice.verify(clip));

        let mut confidences = vec![face.confidence(), live.confidence];
        if let Some(outcome) = voice {
            confidences.push(outcome.confidence());
        }
        let confidence = confidences.iter().sum::<f64>() / confidences.len() as f64;

        let failure = self
            .face_failure(face)
            .or_else(|| self.quick_liveness_failure(live.face_found))
            .or_else(|| voice.and_then(|outcome| self.voice_failure(outcome)));
        let verified = failure.is_none();

        if verified {
            self.sessions.refresh(&session.id);
        }
        telemetry::quick_verify(if verified { "verified" } else { "rejected" });
        debug!(
            "Quick verify for session {}: {} (confidence {:.2})",
            session.id, verified, confidence
        );

        QuickVerifyResult {
            verified,
            confidence,
            face: Some(face),
            liveness: Some(live),
            voice,
            failure,
        }
    }

    // ----------------------------------------
    // Sessions and authorization
    // ----------------------------------------

    /// Live session of the last successful authentication
    pub fn current_session(&self) -> Option<Session> {
        let id = (*lock(&self.current))?;
        let session = self.sessions.get_session(&id);
        if session.is_none() {
            self.forget_current(&id);
        }
        session
    }

    /// Authorize `command` against the current session
    pub fn check_command_authorization(&self, command: &str) -> Result<Session, Denied> {
        let id = (*lock(&self.current)).ok_or(Denied::NoSession)?;
        let result = self.sessions.check_authorization(&id, command);
        if matches!(result, Err(Denied::NoSession | Denied::SessionExpired)) {
            self.forget_current(&id);
        }
        result
    }

    /// End the current session; returns whether one was active
    pub fn logout(&self) -> bool {
        let Some(id) = lock(&self.current).take() else {
            return false;
        };
        self.sessions.invalidate(&id)
    }

    /// Bearer token for the current session
    pub fn issue_token(&self, ttl: Option<Duration>) -> Result<String, TokenError> {
        let id = (*lock(&self.current)).ok_or(TokenError::SessionRevoked)?;
        self.sessions.issue_token(&id, ttl)
    }

    pub fn verify_token(&self, token: &str) -> Option<Claims> {
        self.sessions.verify_token(token)
    }

    /// Fresh token for the session a valid token is bound to
    pub fn renew_token(&self, token: &str, ttl: Option<Duration>) -> Result<String, TokenError> {
        let claims = self.sessions.verify_token_detailed(token)?;
        self.sessions.issue_token(&claims.session_id, ttl)
    }

    /// Authorize `command` for the session a bearer token is bound to.
    ///
    /// The session's current level decides, so a token issued before a
    /// step-up carries the upgrade.
    pub fn authorize_token(&self, token: &str, command: &str) -> Result<Session, AuthorizeError> {
        let claims = self.sessions.verify_token_detailed(token)?;
        Ok(self.sessions.check_authorization(&claims.session_id, command)?)
    }

    /// Whether tokens are HMAC-signed
    pub fn strong_signing_active(&self) -> bool {
        self.sessions.strong_signing()
    }

    pub fn status(&self) -> AuthStatus {
        AuthStatus {
            user_id: self.flow.user_id.clone(),
            face_enrolled: self.face.enrolled_count(),
            voice_enrolled: self.voice.enrolled_count(),
            face_available: self.face.is_available(),
            voice_available: self.voice.is_available(),
            liveness_available: self.liveness.is_available(),
            camera_available: self.camera.is_ready(),
            microphone_available: self.microphone.is_ready(),
            strong_signing: self.strong_signing_active(),
            locked_out_secs: self
                .sessions
                .lockout_remaining(&self.flow.user_id)
                .map(ceil_secs),
            active_sessions: self.sessions.active_sessions().len(),
            session: self.current_session(),
        }
    }

    // ----------------------------------------
    // Enrollment
    // ----------------------------------------

    /// Capture frames and enroll up to `samples` faces.
    ///
    /// Frames without a face are skipped. Returns the total enrolled count.
    pub async fn enroll_face(&self, samples: Option<u32>) -> Result<usize, EnrollmentError> {
        if !self.face.is_available() {
            return Err(EnrollmentError::NotConfigured(Factor::Face));
        }
        let camera = self.camera.get().cloned().ok_or_else(|| {
            EnrollmentError::DeviceUnavailable {
                device: Device::Camera,
                message: self.camera.reason().unwrap_or_default().to_string(),
            }
        })?;

        let wanted = samples.unwrap_or(self.flow.enroll_face_samples).max(1) as usize;
        let max_frames = wanted * self.flow.face_capture_frames.max(1) as usize;
        let face = Arc::clone(&self.face);
        let flow = self.begin_flow();
        let cancel = flow.flag.clone();

        let enrolled = tokio::task::spawn_blocking(move || -> Result<usize, EnrollmentError> {
            let mut stream = camera.open().map_err(|e| enrollment_device(Device::Camera, e))?;
            let mut enrolled = 0;
            for _ in 0..max_frames {
                if enrolled >= wanted || cancel.is_cancelled() {
                    break;
                }
                let frame = match stream.next_frame() {
                    Ok(frame) => frame,
                    Err(e) if enrolled > 0 => {
                        warn!("Face enrollment stopped early: {}", e);
                        break;
                    }
                    Err(e) => return Err(enrollment_device(Device::Camera, e)),
                };
                match face.enroll(&frame) {
                    Ok(_) => enrolled += 1,
                    Err(EnrollError::NoFaceDetected) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(enrolled)
        })
        .await
        .map_err(|e| EnrollmentError::Internal(e.to_string()))??;
        drop(flow);

        if enrolled == 0 {
            return Err(EnrollmentError::NoSample(Factor::Face));
        }
        let total = self.face.enrolled_count();
        info!("Enrolled {} face sample(s), {} total", enrolled, total);
        Ok(total)
    }

    /// Record and enroll one utterance; returns the total enrolled count
    pub async fn enroll_voice(&self, duration: Option<Duration>) -> Result<usize, EnrollmentError> {
        if !self.voice.is_available() {
            return Err(EnrollmentError::NotConfigured(Factor::Voice));
        }
        let microphone = self.microphone.get().cloned().ok_or_else(|| {
            EnrollmentError::DeviceUnavailable {
                device: Device::Microphone,
                message: self.microphone.reason().unwrap_or_default().to_string(),
            }
        })?;

        let duration = duration.unwrap_or_else(|| self.flow.voice_duration());
        let voice = Arc::clone(&self.voice);
        let total = tokio::task::spawn_blocking(move || -> Result<usize, EnrollmentError> {
            let clip = microphone
                .record(duration)
                .map_err(|e| enrollment_device(Device::Microphone, e))?;
            Ok(voice.enroll(&clip)?)
        })
        .await
        .map_err(|e| EnrollmentError::Internal(e.to_string()))??;

        info!("Enrolled voice sample, {} total", total);
        Ok(total)
    }

    /// Delete every enrolled sample of `factor`
    pub fn clear_enrollment(&self, factor: Factor) -> Result<(), EnrollmentError> {
        match factor {
            Factor::Face => self.face.clear()?,
            Factor::Voice => self.voice.clear()?,
            Factor::Liveness => return Err(EnrollmentError::NotEnrollable(factor)),
        }
        info!("{} enrollment cleared", factor);
        Ok(())
    }

    // ----------------------------------------
    // Steps
    // ----------------------------------------

    async fn liveness_step(&self, timeout: Duration, cancel: &CancelFlag) -> Result<f64, AuthFailure> {
        if !self.liveness.is_available() {
            return Err(AuthFailure::NotConfigured {
                factor: Factor::Liveness,
            });
        }
        let camera = self.camera_device()?;
        let detector = Arc::clone(&self.liveness);
        let required_blinks = detector.config().required_blinks;
        let cancel = cancel.clone();

        let report = run_blocking(Factor::Liveness, timeout + self.flow.capture_timeout(), move || {
            detector
                .check_liveness(camera.as_ref(), required_blinks, timeout, &cancel)
                .map_err(liveness_failure)
        })
        .await?;

        if report.is_live() {
            Ok(report.confidence)
        } else {
            Err(AuthFailure::TimedOut {
                factor: Factor::Liveness,
                confidence: report.confidence,
            })
        }
    }

    async fn face_step(&self, cancel: &CancelFlag) -> Result<f64, AuthFailure> {
        if !self.face.is_available() {
            return Err(AuthFailure::NotConfigured { factor: Factor::Face });
        }
        if !self.face.is_enrolled() {
            return Err(AuthFailure::NotEnrolled { factor: Factor::Face });
        }
        let camera = self.camera_device()?;
        let face = Arc::clone(&self.face);
        let frames = self.flow.face_capture_frames.max(1);
        let cancel = cancel.clone();

        let outcome = run_blocking(Factor::Face, self.flow.capture_timeout(), move || {
            let mut stream = camera.open().map_err(|e| device_failure(Device::Camera, e))?;
            for _ in 0..frames {
                if cancel.is_cancelled() {
                    return Err(AuthFailure::Cancelled);
                }
                let frame = stream
                    .next_frame()
                    .map_err(|e| device_failure(Device::Camera, e))?;
                let outcome = face.verify(&frame);
                if outcome != MatchOutcome::NoSample {
                    return Ok(outcome);
                }
            }
            Ok(MatchOutcome::NoSample)
        })
        .await?;

        match self.face_failure(outcome) {
            None => Ok(outcome.confidence()),
            Some(failure) => Err(failure),
        }
    }

    async fn voice_step(&self, duration: Duration, cancel: &CancelFlag) -> Result<f64, AuthFailure> {
        if !self.voice.is_available() {
            return Err(AuthFailure::NotConfigured { factor: Factor::Voice });
        }
        if !self.voice.is_enrolled() {
            return Err(AuthFailure::NotEnrolled { factor: Factor::Voice });
        }
        let microphone = self.microphone_device()?;
        let voice = Arc::clone(&self.voice);
        let cancel = cancel.clone();

        let outcome = run_blocking(Factor::Voice, duration + self.flow.capture_timeout(), move || {
            if cancel.is_cancelled() {
                return Err(AuthFailure::Cancelled);
            }
            let clip = microphone
                .record(duration)
                .map_err(|e| device_failure(Device::Microphone, e))?;
            Ok(voice.verify(&clip))
        })
        .await?;

        match self.voice_failure(outcome) {
            None => Ok(outcome.confidence()),
            Some(failure) => Err(failure),
        }
    }

    // ----------------------------------------
    // Helpers
    // ----------------------------------------

    fn face_failure(&self, outcome: MatchOutcome) -> Option<AuthFailure> {
        if outcome == MatchOutcome::NoSample && !self.face.is_available() {
            return Some(AuthFailure::NotConfigured { factor: Factor::Face });
        }
        AuthFailure::from_outcome(Factor::Face, outcome)
    }

    fn voice_failure(&self, outcome: MatchOutcome) -> Option<AuthFailure> {
        if outcome == MatchOutcome::NoSample && !self.voice.is_available() {
            return Some(AuthFailure::NotConfigured { factor: Factor::Voice });
        }
        AuthFailure::from_outcome(Factor::Voice, outcome)
    }

    fn quick_liveness_failure(&self, face_found: bool) -> Option<AuthFailure> {
        if !self.liveness.is_available() {
            return Some(AuthFailure::NotConfigured {
                factor: Factor::Liveness,
            });
        }
        (!face_found).then_some(AuthFailure::NotDetected {
            factor: Factor::Liveness,
        })
    }

    fn note_failure(&self, user: &str, failure: &AuthFailure) {
        if failure.counts_as_attempt() && self.sessions.record_failed_attempt(user) {
            telemetry::lockout();
        }
        telemetry::auth_attempt(failure.label());
        info!("Authentication failed for {}: {}", user, failure);
    }

    fn begin_flow(&self) -> FlowHandle<'_> {
        let flag = CancelFlag::new();
        if let Some(previous) = lock(&self.in_flight).replace(flag.clone()) {
            debug!("Superseding in-flight flow");
            previous.cancel();
        }
        FlowHandle {
            slot: &self.in_flight,
            _cancel: flag.drop_guard(),
            flag,
        }
    }

    fn set_current(&self, id: Option<Uuid>) {
        *lock(&self.current) = id;
    }

    fn forget_current(&self, id: &Uuid) {
        let mut current = lock(&self.current);
        if current.as_ref() == Some(id) {
            *current = None;
        }
    }

    fn camera_device(&self) -> Result<Arc<dyn CameraDevice>, AuthFailure> {
        self.camera.get().cloned().ok_or_else(|| AuthFailure::DeviceUnavailable {
            device: Device::Camera,
            message: self.camera.reason().unwrap_or_default().to_string(),
        })
    }

    fn microphone_device(&self) -> Result<Arc<dyn Microphone>, AuthFailure> {
        self.microphone.get().cloned().ok_or_else(|| AuthFailure::DeviceUnavailable {
            device: Device::Microphone,
            message: self.microphone.reason().unwrap_or_default().to_string(),
        })
    }
}

/// Run blocking capture work under a deadline
async fn run_blocking<T, F>(factor: Factor, deadline: Duration, work: F) -> Result<T, AuthFailure>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AuthFailure> + Send + 'static,
{
    match tokio::time::timeout(deadline, tokio::task::spawn_blocking(work)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!("{} worker failed: {}", factor, e);
            Err(AuthFailure::Internal {
                message: e.to_string(),
            })
        }
        Err(_) => {
            warn!("{} step exceeded {:?}", factor, deadline);
            Err(AuthFailure::TimedOut {
                factor,
                confidence: 0.0,
            })
        }
    }
}

fn liveness_failure(e: LivenessError) -> AuthFailure {
    match e {
        LivenessError::NotConfigured(_) => AuthFailure::NotConfigured {
            factor: Factor::Liveness,
        },
        LivenessError::Device(e) => device_failure(Device::Camera, e),
        LivenessError::Cancelled => AuthFailure::Cancelled,
    }
}

fn device_failure(device: Device, e: CaptureError) -> AuthFailure {
    warn!("{} failed: {}", device, e);
    AuthFailure::DeviceUnavailable {
        device,
        message: e.to_string(),
    }
}

fn enrollment_device(device: Device, e: CaptureError) -> EnrollmentError {
    EnrollmentError::DeviceUnavailable {
        device,
        message: e.to_string(),
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use capture::{BackendError, ReplayCamera, ReplayMicrophone};
    use liveness::{Landmarks, Point};
    use session::{AuthLevel, ManualClock};

    const SECRET: &str = "orchestrator-test-secret-0123456789";
    const OWNER: u8 = 200;
    const STRANGER: u8 = 20;

    /// Pixel (0, 0) carries the identity in red; zero means no face
    struct TestFaceEncoder;

    impl FaceEncoder for TestFaceEncoder {
        fn encode(&self, frame: &VideoFrame) -> Result<Vec<Vec<f32>>, BackendError> {
            match frame.get_pixel(0, 0) {
                None | Some([0, _, _]) => Ok(vec![]),
                Some([id, _, _]) => Ok(vec![vec![id as f32 / 255.0, 0.5]]),
            }
        }
    }

    /// Green carries EAR x100, blue the nose offset +100
    struct TestLandmarks;

    impl LandmarkDetector for TestLandmarks {
        fn detect(&self, frame: &VideoFrame) -> Result<Option<Landmarks>, BackendError> {
            Ok(match frame.get_pixel(0, 0) {
                None | Some([0, _, _]) => None,
                Some([_, ear, nose]) => Some(face(ear as f32 / 100.0, nose as f32 - 100.0)),
            })
        }
    }

    /// Embeds the share of positive samples
    struct TestVoiceEncoder;

    impl VoiceEncoder for TestVoiceEncoder {
        fn sample_rate(&self) -> u32 {
            16_000
        }

        fn embed(&self, samples: &[f32], _sample_rate: u32) -> Result<Option<Vec<f32>>, BackendError> {
            if samples.is_empty() {
                return Ok(None);
            }
            let positive = samples.iter().filter(|s| **s > 0.0).count() as f32 / samples.len() as f32;
            Ok(Some(vec![positive, 1.0 - positive]))
        }
    }

    fn eye(cx: f32, cy: f32, ear: f32) -> [Point; 6] {
        let w = 30.0;
        let h = ear * w / 2.0;
        let x0 = cx - w / 2.0;
        [
            Point::new(x0, cy),
            Point::new(x0 + w / 3.0, cy - h),
            Point::new(x0 + 2.0 * w / 3.0, cy - h),
            Point::new(x0 + w, cy),
            Point::new(x0 + 2.0 * w / 3.0, cy + h),
            Point::new(x0 + w / 3.0, cy + h),
        ]
    }

    fn face(ear: f32, nose_dx: f32) -> Landmarks {
        Landmarks {
            left_eye: eye(70.0, 100.0, ear),
            right_eye: eye(130.0, 100.0, ear),
            nose_tip: Point::new(100.0 + nose_dx, 150.0),
            chin: Point::new(100.0, 200.0),
            face_left: Point::new(40.0, 120.0),
            face_right: Point::new(160.0, 120.0),
        }
    }

    fn frame(identity: u8, ear: f32, nose_dx: f32, sequence: u32) -> VideoFrame {
        let pixel = vec![identity, (ear * 100.0).round() as u8, (100.0 + nose_dx).round() as u8];
        VideoFrame::new(pixel, 1, 1, 0, sequence)
    }

    /// Two debounced blinks, then an 18 degree head turn
    fn live_frames(identity: u8) -> Vec<VideoFrame> {
        let mut script = Vec::new();
        for _ in 0..2 {
            script.extend([(0.3, 0.0); 3]);
            script.extend([(0.1, 0.0); 4]);
        }
        script.extend([(0.3, 24.0); 4]);
        script
            .into_iter()
            .enumerate()
            .map(|(i, (ear, dx))| frame(identity, ear, dx, i as u32))
            .collect()
    }

    fn owner_clip() -> AudioClip {
        AudioClip::new(vec![0.5; 32_000], 16_000)
    }

    fn stranger_clip() -> AudioClip {
        let samples = (0..32_000).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        AudioClip::new(samples, 16_000)
    }

    fn owner_encoding() -> Vec<Vec<f32>> {
        vec![vec![OWNER as f32 / 255.0, 0.5]]
    }

    struct Rig {
        orchestrator: Arc<AuthOrchestrator>,
        camera: Arc<ReplayCamera>,
        clock: Arc<ManualClock>,
        _dir: tempfile::TempDir,
    }

    fn rig(camera: ReplayCamera, clips: Vec<AudioClip>) -> Rig {
        let camera = Arc::new(camera);
        let backends = Backends {
            face_encoder: Capability::ready(Arc::new(TestFaceEncoder)),
            voice_encoder: Capability::ready(Arc::new(TestVoiceEncoder)),
            landmarks: Capability::ready(Arc::new(TestLandmarks)),
            camera: Capability::ready(camera.clone()),
            microphone: Capability::ready(Arc::new(ReplayMicrophone::new(clips))),
        };
        rig_with(camera, backends, Some(SECRET))
    }

    fn rig_with(camera: Arc<ReplayCamera>, backends: Backends, secret: Option<&str>) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let config = AuthConfig {
            data_dir: dir.path().to_path_buf(),
            token_secret: secret.map(str::to_string),
            ..Default::default()
        };
        let orchestrator = AuthOrchestrator::with_clock(&config, backends, clock.clone());
        Rig {
            orchestrator: Arc::new(orchestrator),
            camera,
            clock,
            _dir: dir,
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_face_and_liveness_then_voice_step_up() {
        let rig = rig(ReplayCamera::new(live_frames(OWNER)), vec![owner_clip(), owner_clip()]);
        let o = &rig.orchestrator;

        assert_eq!(o.enroll_face(Some(3)).await.unwrap(), 3);
        assert_eq!(o.enroll_voice(None).await.unwrap(), 1);

        let result = o.authenticate(true, false, true, TIMEOUT).await;
        assert!(result.success, "{}", result.message);
        assert_eq!(result.auth_level, AuthLevel::Medium);
        assert!(result.factors.face && result.factors.liveness && !result.factors.voice);
        assert_eq!(result.scores.liveness, Some(1.0));
        assert_eq!(result.scores.face, Some(1.0));
        assert!(o.check_command_authorization("read_calendar").is_ok());
        assert!(o.check_command_authorization("unlock_door").is_err());

        let upgraded = o.step_up_voice(None).await.unwrap();
        assert_eq!(upgraded.auth_level, AuthLevel::High);
        assert_eq!(upgraded.id, result.session.unwrap().id);
        assert!(o.check_command_authorization("unlock_door").is_ok());

        // Enrollment, liveness, and face each opened and released the camera
        assert_eq!(rig.camera.open_count(), 3);
        assert_eq!(rig.camera.release_count(), 3);
    }

    #[tokio::test]
    async fn test_photo_fails_liveness_before_face() {
        let photo = ReplayCamera::new(vec![frame(OWNER, 0.3, 0.0, 0)])
            .looping()
            .with_frame_interval(Duration::from_millis(5));
        let rig = rig(photo, vec![]);
        let o = &rig.orchestrator;
        o.face().enroll_encodings(owner_encoding()).unwrap();

        let result = o.authenticate(true, false, true, Duration::from_millis(200)).await;
        assert!(!result.success);
        assert!(matches!(
            result.failure,
            Some(AuthFailure::TimedOut { factor: Factor::Liveness, .. })
        ));
        assert_eq!(result.scores.liveness, Some(0.0));
        assert_eq!(result.scores.face, None);
        assert_eq!(o.sessions().failed_attempts("owner"), 1);

        // Face never ran; the liveness stream was released
        assert_eq!(rig.camera.open_count(), 1);
        assert_eq!(rig.camera.release_count(), 1);
    }

    #[tokio::test]
    async fn test_lockout_after_three_failures() {
        let rig = rig(ReplayCamera::new(vec![frame(STRANGER, 0.3, 0.0, 0)]), vec![]);
        let o = &rig.orchestrator;
        o.face().enroll_encodings(owner_encoding()).unwrap();

        for _ in 0..3 {
            let result = o.authenticate(true, false, false, TIMEOUT).await;
            assert!(matches!(
                result.failure,
                Some(AuthFailure::BelowThreshold { factor: Factor::Face, .. })
            ));
        }

        let locked = o.authenticate(true, false, false, TIMEOUT).await;
        assert_eq!(locked.failure, Some(AuthFailure::Locked { remaining_secs: 300 }));
        assert!(locked.message.contains("5 minutes"));
        assert_eq!(rig.camera.open_count(), 3);
        assert_eq!(o.status().locked_out_secs, Some(300));

        rig.clock.advance(chrono::Duration::seconds(300));
        let retry = o.authenticate(true, false, false, TIMEOUT).await;
        assert!(matches!(retry.failure, Some(AuthFailure::BelowThreshold { .. })));
        assert_eq!(o.sessions().failed_attempts("owner"), 1);
    }

    #[tokio::test]
    async fn test_not_enrolled_is_not_an_attempt() {
        let rig = rig(ReplayCamera::new(vec![frame(OWNER, 0.3, 0.0, 0)]), vec![owner_clip()]);
        let o = &rig.orchestrator;

        let result = o.authenticate(true, false, false, TIMEOUT).await;
        assert_eq!(
            result.failure,
            Some(AuthFailure::NotEnrolled { factor: Factor::Face })
        );
        assert_eq!(result.message, "No face is enrolled yet. Please enroll first.");
        assert_eq!(o.sessions().failed_attempts("owner"), 0);
        assert_eq!(rig.camera.open_count(), 0);

        let voice = o.authenticate(false, true, false, TIMEOUT).await;
        assert_eq!(
            voice.failure,
            Some(AuthFailure::NotEnrolled { factor: Factor::Voice })
        );
    }

    #[tokio::test]
    async fn test_no_face_in_view() {
        let rig = rig(ReplayCamera::new(vec![frame(0, 0.0, 0.0, 0)]).looping(), vec![]);
        let o = &rig.orchestrator;
        o.face().enroll_encodings(owner_encoding()).unwrap();

        let result = o.authenticate(true, false, false, TIMEOUT).await;
        assert_eq!(
            result.failure,
            Some(AuthFailure::NotDetected { factor: Factor::Face })
        );
        assert_eq!(o.sessions().failed_attempts("owner"), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_backends() {
        let rig = rig_with(
            Arc::new(ReplayCamera::new(vec![])),
            Backends::default(),
            Some(SECRET),
        );
        let o = &rig.orchestrator;

        let result = o.authenticate(true, true, true, TIMEOUT).await;
        assert_eq!(
            result.failure,
            Some(AuthFailure::NotConfigured { factor: Factor::Liveness })
        );
        let result = o.authenticate(true, false, false, TIMEOUT).await;
        assert_eq!(
            result.failure,
            Some(AuthFailure::NotConfigured { factor: Factor::Face })
        );
        assert!(matches!(
            o.enroll_face(None).await,
            Err(EnrollmentError::NotConfigured(Factor::Face))
        ));

        let status = o.status();
        assert!(!status.face_available && !status.camera_available && !status.microphone_available);
    }

    #[tokio::test]
    async fn test_missing_camera() {
        let backends = Backends {
            face_encoder: Capability::ready(Arc::new(TestFaceEncoder)),
            ..Default::default()
        };
        let rig = rig_with(Arc::new(ReplayCamera::new(vec![])), backends, Some(SECRET));
        let o = &rig.orchestrator;
        o.face().enroll_encodings(owner_encoding()).unwrap();

        let result = o.authenticate(true, false, false, TIMEOUT).await;
        assert!(matches!(
            result.failure,
            Some(AuthFailure::DeviceUnavailable { device: Device::Camera, .. })
        ));
        assert_eq!(o.sessions().failed_attempts("owner"), 0);
    }

    #[tokio::test]
    async fn test_quick_verify() {
        let rig = rig(ReplayCamera::new(vec![frame(OWNER, 0.3, 0.0, 0)]), vec![owner_clip()]);
        let o = &rig.orchestrator;
        let probe = frame(OWNER, 0.3, 0.0, 0);

        let without = o.quick_verify(&probe, None);
        assert!(!without.verified);
        assert_eq!(without.failure, Some(AuthFailure::NoSession));

        o.face().enroll_encodings(owner_encoding()).unwrap();
        o.voice().enroll_embedding(vec![1.0, 0.0]).unwrap();
        let result = o.authenticate(true, false, false, TIMEOUT).await;
        assert_eq!(result.auth_level, AuthLevel::Medium);

        let ok = o.quick_verify(&probe, None);
        assert!(ok.verified);
        assert!((ok.confidence - 0.85).abs() < 1e-9);

        let with_voice = o.quick_verify(&probe, Some(&owner_clip()));
        assert!(with_voice.verified);
        let wrong_voice = o.quick_verify(&probe, Some(&stranger_clip()));
        assert!(matches!(
            wrong_voice.failure,
            Some(AuthFailure::BelowThreshold { factor: Factor::Voice, .. })
        ));

        let stranger = o.quick_verify(&frame(STRANGER, 0.3, 0.0, 0), None);
        assert!(!stranger.verified);
        assert_eq!(o.sessions().failed_attempts("owner"), 0);

        // Success slides the session expiry
        rig.clock.advance(chrono::Duration::seconds(1500));
        assert!(o.quick_verify(&probe, None).verified);
        rig.clock.advance(chrono::Duration::seconds(1500));
        assert!(o.current_session().is_some());
    }

    #[tokio::test]
    async fn test_tokens_and_logout() {
        let rig = rig(ReplayCamera::new(vec![frame(OWNER, 0.3, 0.0, 0)]), vec![]);
        let o = &rig.orchestrator;
        assert!(o.strong_signing_active());
        assert_eq!(o.issue_token(None), Err(TokenError::SessionRevoked));

        o.face().enroll_encodings(owner_encoding()).unwrap();
        let result = o.authenticate(true, false, false, TIMEOUT).await;
        let session = result.session.unwrap();

        let token = o.issue_token(None).unwrap();
        let claims = o.verify_token(&token).unwrap();
        assert_eq!(claims.session_id, session.id);
        assert_eq!(claims.user_id, "owner");
        assert_eq!(claims.auth_level, AuthLevel::Medium);

        let renewed = o.renew_token(&token, Some(Duration::from_secs(60))).unwrap();
        let renewed_claims = o.verify_token(&renewed).unwrap();
        assert_eq!(renewed_claims.session_id, session.id);
        assert_eq!(renewed_claims.exp - renewed_claims.iat, 60);
        assert!(matches!(
            o.renew_token("hs256.forged.sig", None),
            Err(TokenError::Invalid(_))
        ));

        assert!(o.authorize_token(&token, "read_calendar").is_ok());
        assert!(matches!(
            o.authorize_token(&token, "unlock_door"),
            Err(AuthorizeError::Denied(Denied::InsufficientLevel { .. }))
        ));

        assert!(o.logout());
        assert!(!o.logout());
        assert!(o.verify_token(&token).is_none());
        assert_eq!(o.renew_token(&token, None), Err(TokenError::SessionRevoked));
        assert_eq!(
            o.authorize_token(&token, "get_time"),
            Err(AuthorizeError::Token(TokenError::SessionRevoked))
        );
        assert_eq!(
            o.check_command_authorization("get_time"),
            Err(Denied::NoSession)
        );
    }

    #[tokio::test]
    async fn test_unsigned_mode_is_observable() {
        let rig = rig_with(Arc::new(ReplayCamera::new(vec![])), Backends::default(), None);
        assert!(!rig.orchestrator.strong_signing_active());
        assert!(!rig.orchestrator.status().strong_signing);
    }

    #[tokio::test]
    async fn test_new_authentication_replaces_session() {
        let rig = rig(ReplayCamera::new(vec![frame(OWNER, 0.3, 0.0, 0)]), vec![]);
        let o = &rig.orchestrator;
        o.face().enroll_encodings(owner_encoding()).unwrap();

        let first = o.authenticate(true, false, false, TIMEOUT).await.session.unwrap();
        let second = o.authenticate(true, false, false, TIMEOUT).await.session.unwrap();
        assert_ne!(first.id, second.id);
        assert!(o.sessions().get_session(&first.id).is_none());
        assert_eq!(o.current_session().map(|s| s.id), Some(second.id));
        assert_eq!(o.status().active_sessions, 1);
    }

    #[tokio::test]
    async fn test_dropped_authentication_releases_camera() {
        let camera = ReplayCamera::new(vec![frame(OWNER, 0.3, 0.0, 0)])
            .looping()
            .with_frame_interval(Duration::from_millis(5));
        let rig = rig(camera, vec![]);
        let o = &rig.orchestrator;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(100),
            o.authenticate(false, false, true, Duration::from_secs(30)),
        )
        .await;
        assert!(abandoned.is_err());

        for _ in 0..200 {
            if rig.camera.release_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(rig.camera.open_count(), 1);
        assert_eq!(rig.camera.release_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_authentication() {
        let camera = ReplayCamera::new(vec![frame(OWNER, 0.3, 0.0, 0)])
            .looping()
            .with_frame_interval(Duration::from_millis(5));
        let rig = rig(camera, vec![]);
        assert!(!rig.orchestrator.cancel_authentication());

        let o = Arc::clone(&rig.orchestrator);
        let task = tokio::spawn(async move {
            o.authenticate(false, false, true, Duration::from_secs(30)).await
        });

        let mut cancelled = false;
        for _ in 0..200 {
            if rig.orchestrator.cancel_authentication() {
                cancelled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(cancelled);

        let result = task.await.unwrap();
        assert_eq!(result.failure, Some(AuthFailure::Cancelled));
        assert_eq!(rig.camera.release_count(), 1);
        assert_eq!(rig.orchestrator.sessions().failed_attempts("owner"), 0);
    }

    #[tokio::test]
    async fn test_step_up_requires_session_and_matching_voice() {
        let rig = rig(ReplayCamera::new(vec![frame(OWNER, 0.3, 0.0, 0)]), vec![stranger_clip()]);
        let o = &rig.orchestrator;
        assert_eq!(o.step_up_voice(None).await, Err(AuthFailure::NoSession));

        o.face().enroll_encodings(owner_encoding()).unwrap();
        o.voice().enroll_embedding(vec![1.0, 0.0]).unwrap();
        o.authenticate(true, false, false, TIMEOUT).await;

        let failed = o.step_up_voice(None).await;
        assert!(matches!(
            failed,
            Err(AuthFailure::BelowThreshold { factor: Factor::Voice, .. })
        ));
        assert_eq!(o.sessions().failed_attempts("owner"), 1);
        assert_eq!(o.current_session().unwrap().auth_level, AuthLevel::Medium);
    }

    #[tokio::test]
    async fn test_enrollment_management() {
        let frames = vec![
            frame(0, 0.0, 0.0, 0),
            frame(OWNER, 0.3, 0.0, 1),
            frame(0, 0.0, 0.0, 2),
            frame(OWNER, 0.3, 0.0, 3),
        ];
        let rig = rig(ReplayCamera::new(frames), vec![owner_clip()]);
        let o = &rig.orchestrator;

        // Faceless frames are skipped; the stream runs out after two samples
        assert_eq!(o.enroll_face(Some(5)).await.unwrap(), 2);
        assert_eq!(o.status().face_enrolled, 2);

        o.clear_enrollment(Factor::Face).unwrap();
        assert_eq!(o.face().enrolled_count(), 0);
        assert!(matches!(
            o.clear_enrollment(Factor::Liveness),
            Err(EnrollmentError::NotEnrollable(Factor::Liveness))
        ));

        assert_eq!(o.enroll_voice(None).await.unwrap(), 1);
        o.clear_enrollment(Factor::Voice).unwrap();
        assert!(!o.voice().is_enrolled());
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let rig = rig(ReplayCamera::new(vec![frame(OWNER, 0.3, 0.0, 0)]), vec![]);
        let o = &rig.orchestrator;
        let status = o.status();
        assert_eq!(status.user_id, "owner");
        assert_eq!(status.face_enrolled, 0);
        assert!(status.face_available && status.voice_available && status.liveness_available);
        assert!(status.camera_available && status.microphone_available);
        assert!(status.session.is_none());
        assert_eq!(status.locked_out_secs, None);
    }
}
