//! Session store
//!
//! All state lives behind one mutex. Compound operations (create =
//! invalidate-then-insert, authorize = read-then-refresh) run entirely under
//! the lock, and the lock is never held across device or network I/O.

use crate::clock::{Clock, SystemClock};
use crate::config::{SessionConfig, MAX_DURATION_SECS};
use crate::level::{AuthLevel, CommandTable, Factors};
use crate::token::{Claims, TokenSigner};
use crate::{Denied, TokenError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Authenticated session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub auth_level: AuthLevel,
    pub face_verified: bool,
    pub voice_verified: bool,
    pub liveness_verified: bool,
    pub metadata: BTreeMap<String, String>,
}

impl Session {
    pub fn factors(&self) -> Factors {
        Factors::new(self.face_verified, self.voice_verified, self.liveness_verified)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, Session>,
    failed_attempts: HashMap<String, Vec<DateTime<Utc>>>,
    lockouts: HashMap<String, DateTime<Utc>>,
    commands: CommandTable,
}

impl Inner {
    /// Live session by id; an expired one is evicted
    fn live_session(&mut self, id: &Uuid, now: DateTime<Utc>) -> Result<&mut Session, Denied> {
        let expired = match self.sessions.get(id) {
            None => return Err(Denied::NoSession),
            Some(session) => session.is_expired(now),
        };
        if expired {
            if let Some(session) = self.sessions.remove(id) {
                info!("Session {} for {} expired", session.id, session.user_id);
            }
            return Err(Denied::SessionExpired);
        }
        self.sessions.get_mut(id).ok_or(Denied::NoSession)
    }

    /// Lockout end for `user`; an elapsed lockout is cleared with its history
    fn lockout_until(&mut self, user: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let until = *self.lockouts.get(user)?;
        if now >= until {
            self.lockouts.remove(user);
            self.failed_attempts.remove(user);
            info!("Lockout for {} elapsed", user);
            return None;
        }
        Some(until)
    }
}

/// Session store
pub struct SessionStore {
    config: SessionConfig,
    signer: TokenSigner,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl SessionStore {
    pub fn new(config: SessionConfig, signer: TokenSigner, clock: Arc<dyn Clock>) -> Self {
        info!(
            "Session store: timeout {}s, {} attempts / {}s lockout, {:?}, signing {}",
            config.session_timeout_secs,
            config.max_failed_attempts,
            config.lockout_duration_secs,
            config.level_rule,
            if signer.is_strong() { "HMAC-SHA256" } else { "DISABLED" }
        );
        let inner = Inner {
            commands: CommandTable::new(config.command_levels.clone()),
            ..Default::default()
        };
        Self {
            config,
            signer,
            clock,
            inner: Mutex::new(inner),
        }
    }

    /// Store on the system clock
    pub fn with_system_clock(config: SessionConfig, signer: TokenSigner) -> Self {
        Self::new(config, signer, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether tokens are HMAC-signed
    pub fn strong_signing(&self) -> bool {
        self.signer.is_strong()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Session store lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    fn session_timeout(&self) -> Duration {
        bounded_secs(self.config.session_timeout_secs)
    }

    fn lockout_duration(&self) -> Duration {
        bounded_secs(self.config.lockout_duration_secs)
    }

    // ----------------------------------------
    // Lockout
    // ----------------------------------------

    pub fn is_locked_out(&self, user: &str) -> bool {
        let now = self.clock.now();
        self.lock().lockout_until(user, now).is_some()
    }

    /// Time left on `user`'s lockout
    pub fn lockout_remaining(&self, user: &str) -> Option<std::time::Duration> {
        let now = self.clock.now();
        let until = self.lock().lockout_until(user, now)?;
        Some((until - now).to_std().unwrap_or_default())
    }

    /// Record a failure; returns true iff this call started a lockout
    pub fn record_failed_attempt(&self, user: &str) -> bool {
        let now = self.clock.now();
        let window_start = now - self.lockout_duration();
        let mut inner = self.lock();

        if inner.lockout_until(user, now).is_some() {
            debug!("Failed attempt for {} while locked out", user);
            return false;
        }

        let attempts = inner.failed_attempts.entry(user.to_string()).or_default();
        attempts.retain(|t| *t > window_start);
        attempts.push(now);
        let count = attempts.len();

        if count >= self.config.max_failed_attempts as usize {
            let until = now + self.lockout_duration();
            inner.lockouts.insert(user.to_string(), until);
            warn!(
                "{} locked out until {} after {} failed attempts",
                user, until, count
            );
            return true;
        }

        debug!(
            "Failed attempt {}/{} for {}",
            count, self.config.max_failed_attempts, user
        );
        false
    }

    /// Failures currently inside the retention window
    pub fn failed_attempts(&self, user: &str) -> usize {
        let now = self.clock.now();
        let window_start = now - self.lockout_duration();
        let mut inner = self.lock();
        inner.lockout_until(user, now);
        inner
            .failed_attempts
            .get(user)
            .map(|a| a.iter().filter(|t| **t > window_start).count())
            .unwrap_or(0)
    }

    // ----------------------------------------
    // Session lifecycle
    // ----------------------------------------

    /// Create the only live session for `user`.
    ///
    /// Prior sessions of the user are invalidated and the failed-attempt
    /// history is cleared.
    pub fn create_session(&self, user: &str, auth_level: AuthLevel, factors: Factors) -> Session {
        let now = self.clock.now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id: user.to_string(),
            created_at: now,
            last_activity: now,
            expires_at: now + self.session_timeout(),
            auth_level,
            face_verified: factors.face,
            voice_verified: factors.voice,
            liveness_verified: factors.liveness,
            metadata: BTreeMap::new(),
        };

        let mut inner = self.lock();
        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| s.user_id != user);
        let replaced = before - inner.sessions.len();
        inner.failed_attempts.remove(user);
        inner.sessions.insert(session.id, session.clone());
        drop(inner);

        info!(
            "Session {} created for {} at {} (replaced {})",
            session.id, user, auth_level, replaced
        );
        session
    }

    /// Live session by id; expired sessions are evicted on access
    pub fn get_session(&self, id: &Uuid) -> Option<Session> {
        let now = self.clock.now();
        self.lock().live_session(id, now).ok().map(|s| s.clone())
    }

    /// Slide the expiry window forward
    pub fn refresh(&self, id: &Uuid) -> Option<Session> {
        let now = self.clock.now();
        let timeout = self.session_timeout();
        let mut inner = self.lock();
        let session = inner.live_session(id, now).ok()?;
        session.last_activity = now;
        session.expires_at = now + timeout;
        Some(session.clone())
    }

    /// Merge newly verified factors and recompute the level.
    ///
    /// Factors are only ever added here; un-verifying requires invalidation.
    pub fn upgrade(&self, id: &Uuid, factors: Factors) -> Option<Session> {
        let now = self.clock.now();
        let rule = self.config.level_rule;
        let mut inner = self.lock();
        let session = inner.live_session(id, now).ok()?;

        let merged = session.factors().merge(factors);
        let previous = session.auth_level;
        session.face_verified = merged.face;
        session.voice_verified = merged.voice;
        session.liveness_verified = merged.liveness;
        session.auth_level = rule.level_for(merged);

        if session.auth_level != previous {
            info!(
                "Session {} upgraded {} -> {}",
                session.id, previous, session.auth_level
            );
        }
        Some(session.clone())
    }

    /// Remove a session (logout); returns whether it existed
    pub fn invalidate(&self, id: &Uuid) -> bool {
        let removed = self.lock().sessions.remove(id);
        match removed {
            Some(session) => {
                info!("Session {} for {} invalidated", session.id, session.user_id);
                true
            }
            None => false,
        }
    }

    /// Non-expired sessions
    pub fn active_sessions(&self) -> Vec<Session> {
        let now = self.clock.now();
        self.lock()
            .sessions
            .values()
            .filter(|s| !s.is_expired(now))
            .cloned()
            .collect()
    }

    /// Evict expired sessions and elapsed lockouts; returns evicted sessions
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();
        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| !s.is_expired(now));
        let evicted = before - inner.sessions.len();

        let users: Vec<String> = inner.lockouts.keys().cloned().collect();
        for user in users {
            inner.lockout_until(&user, now);
        }

        if evicted > 0 {
            debug!("Evicted {} expired session(s)", evicted);
        }
        evicted
    }

    // ----------------------------------------
    // Authorization
    // ----------------------------------------

    pub fn required_level(&self, command: &str) -> AuthLevel {
        self.lock().commands.required_level(command)
    }

    pub fn set_command_level(&self, command: &str, level: AuthLevel) {
        self.lock().commands.set(command, level);
    }

    /// Authorize `command` for session `id`.
    ///
    /// A live session is refreshed (sliding expiry on use) before its level
    /// is compared with the command's requirement.
    pub fn check_authorization(&self, id: &Uuid, command: &str) -> Result<Session, Denied> {
        let now = self.clock.now();
        let timeout = self.session_timeout();
        let mut inner = self.lock();
        let required = inner.commands.required_level(command);

        let session = inner.live_session(id, now)?;
        session.last_activity = now;
        session.expires_at = now + timeout;

        if !session.auth_level.satisfies(required) {
            debug!(
                "Denied '{}' for session {}: {} < {}",
                command, session.id, session.auth_level, required
            );
            return Err(Denied::InsufficientLevel {
                command: command.to_string(),
                required,
                actual: session.auth_level,
            });
        }
        Ok(session.clone())
    }

    // ----------------------------------------
    // Tokens
    // ----------------------------------------

    /// Issue a bearer token for a live session.
    ///
    /// A requested lifetime is capped at `max_token_ttl_secs`.
    pub fn issue_token(
        &self,
        id: &Uuid,
        ttl: Option<std::time::Duration>,
    ) -> Result<String, TokenError> {
        let session = self.get_session(id).ok_or(TokenError::SessionRevoked)?;
        let now = self.clock.now();
        let max_secs = self.config.max_token_ttl_secs;
        let ttl_secs = match ttl {
            Some(t) => t.as_secs().min(max_secs),
            None => self.config.token_ttl_secs.min(max_secs),
        };
        let exp = now
            .checked_add_signed(bounded_secs(ttl_secs))
            .ok_or_else(|| TokenError::Invalid("expiry out of range".into()))?;

        let claims = Claims {
            session_id: session.id,
            user_id: session.user_id.clone(),
            auth_level: session.auth_level,
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };
        self.signer.encode(&claims)
    }

    /// Claims of a valid token bound to a live session
    pub fn verify_token(&self, token: &str) -> Option<Claims> {
        match self.verify_token_detailed(token) {
            Ok(claims) => Some(claims),
            Err(e) => {
                debug!("Token rejected: {}", e);
                None
            }
        }
    }

    /// Like `verify_token`, with the rejection reason
    pub fn verify_token_detailed(&self, token: &str) -> Result<Claims, TokenError> {
        let claims = self.signer.decode(token)?;
        let now = self.clock.now();
        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }

        let mut inner = self.lock();
        let session = inner
            .live_session(&claims.session_id, now)
            .map_err(|_| TokenError::SessionRevoked)?;

        if session.user_id != claims.user_id {
            return Err(TokenError::Invalid("user does not own session".into()));
        }
        if claims.auth_level > session.auth_level {
            return Err(TokenError::Invalid(format!(
                "claimed {} exceeds session {}",
                claims.auth_level, session.auth_level
            )));
        }
        Ok(claims)
    }
}

/// Seconds as a signed duration, capped at `MAX_DURATION_SECS`
fn bounded_secs(secs: u64) -> Duration {
    i64::try_from(secs.min(MAX_DURATION_SECS))
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::zero())
}
