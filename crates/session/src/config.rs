//! Session configuration

use crate::level::{AuthLevel, LevelRule};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Upper bound for every configured or requested duration (ten years)
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle time before a session expires (seconds); sliding on every use
    pub session_timeout_secs: u64,

    /// Failures within the window that trigger a lockout
    pub max_failed_attempts: u32,

    /// Lockout length, also the failed-attempt retention window (seconds)
    pub lockout_duration_secs: u64,

    /// Default bearer token lifetime (seconds)
    pub token_ttl_secs: u64,

    /// Longest lifetime a caller may request for a token (seconds)
    pub max_token_ttl_secs: u64,

    /// Factor-to-level rule used for new and upgraded sessions
    pub level_rule: LevelRule,

    /// Required level per command
    pub command_levels: HashMap<String, AuthLevel>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 1800,
            max_failed_attempts: 3,
            lockout_duration_secs: 300,
            token_ttl_secs: 3600,
            max_token_ttl_secs: 86_400,
            level_rule: LevelRule::default(),
            command_levels: default_command_levels(),
        }
    }
}

impl SessionConfig {
    /// Create strict config (short sessions, fewer attempts)
    pub fn strict() -> Self {
        Self {
            session_timeout_secs: 600,
            max_failed_attempts: 3,
            lockout_duration_secs: 900,
            token_ttl_secs: 900,
            max_token_ttl_secs: 3600,
            level_rule: LevelRule::LivenessBound,
            ..Default::default()
        }
    }

    /// Create lenient config (long sessions, more attempts)
    pub fn lenient() -> Self {
        Self {
            session_timeout_secs: 3600,
            max_failed_attempts: 5,
            lockout_duration_secs: 120,
            ..Default::default()
        }
    }
}

fn default_command_levels() -> HashMap<String, AuthLevel> {
    [
        ("get_time", AuthLevel::Low),
        ("get_weather", AuthLevel::Low),
        ("play_music", AuthLevel::Low),
        ("read_calendar", AuthLevel::Medium),
        ("read_messages", AuthLevel::Medium),
        ("send_message", AuthLevel::Medium),
        ("control_lights", AuthLevel::Medium),
        ("unlock_door", AuthLevel::High),
        ("disarm_alarm", AuthLevel::High),
        ("make_payment", AuthLevel::High),
        ("manage_enrollment", AuthLevel::High),
    ]
    .into_iter()
    .map(|(cmd, level)| (cmd.to_string(), level))
    .collect()
}
