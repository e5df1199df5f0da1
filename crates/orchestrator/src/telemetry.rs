//! Authentication counters
//!
//! No-ops until a recorder is installed (the API binary installs the
//! Prometheus exporter).

use metrics::{counter, describe_counter};

pub const AUTH_ATTEMPTS: &str = "auth_attempts_total";
pub const AUTH_LOCKOUTS: &str = "auth_lockouts_total";
pub const QUICK_VERIFY: &str = "quick_verify_total";
pub const SESSIONS_CREATED: &str = "sessions_created_total";

/// Register counter descriptions with the installed recorder
pub fn describe() {
    describe_counter!(AUTH_ATTEMPTS, "Authentication attempts by outcome");
    describe_counter!(AUTH_LOCKOUTS, "Lockouts started after repeated failures");
    describe_counter!(QUICK_VERIFY, "Continuous re-verification checks by outcome");
    describe_counter!(SESSIONS_CREATED, "Sessions created by successful authentication");
}

pub fn auth_attempt(outcome: &'static str) {
    counter!(AUTH_ATTEMPTS, "outcome" => outcome).increment(1);
}

pub fn lockout() {
    counter!(AUTH_LOCKOUTS).increment(1);
}

pub fn quick_verify(outcome: &'static str) {
    counter!(QUICK_VERIFY, "outcome" => outcome).increment(1);
}

pub fn session_created() {
    counter!(SESSIONS_CREATED).increment(1);
}
