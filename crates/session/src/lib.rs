//! Session & Authorization
//!
//! Owns everything that happens after a biometric decision:
//! - Sessions with sliding expiry, one live session per user
//! - Failed-attempt windows and time-bounded lockouts
//! - Command-to-privilege mapping and authorization checks
//! - Bearer tokens bound to live sessions

pub mod clock;
pub mod config;
pub mod level;
pub mod store;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{SessionConfig, MAX_DURATION_SECS};
pub use level::{AuthLevel, CommandTable, Factors, LevelRule};
pub use store::{Session, SessionStore};
pub use token::{Claims, TokenSigner};

use thiserror::Error;

/// Authorization denial reasons
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Denied {
    #[error("No active session")]
    NoSession,

    #[error("Session expired")]
    SessionExpired,

    #[error("Command '{command}' requires {required} authentication, session has {actual}")]
    InsufficientLevel {
        command: String,
        required: AuthLevel,
        actual: AuthLevel,
    },
}

impl Denied {
    /// Human-readable reason suitable for speaking back to the user
    pub fn reason(&self) -> String {
        match self {
            Denied::NoSession => "Please authenticate first.".to_string(),
            Denied::SessionExpired => "Your session has expired. Please authenticate again.".to_string(),
            Denied::InsufficientLevel { command, required, .. } => format!(
                "'{}' needs {} authentication. Please verify with additional factors.",
                command, required
            ),
        }
    }
}

/// Token verification failures. Callers treat all of them as "deny".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Invalid token: {0}")]
    Invalid(String),

    #[error("Token expired")]
    Expired,

    #[error("Session revoked")]
    SessionRevoked,
}
