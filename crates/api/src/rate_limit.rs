//! Per-peer throttling of the authenticate, token, and authorize routes.
//!
//! Biometric attempts already feed the session lockout; this layer keeps a
//! single client from flooding token verification and authorization.

use governor::middleware::StateInformationMiddleware;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::PeerIpKeyExtractor;

use crate::ApiError;

/// Governor config emitting X-RateLimit-* headers
pub type DefaultGovernorConfig =
    tower_governor::governor::GovernorConfig<PeerIpKeyExtractor, StateInformationMiddleware>;

/// `[server.rate_limit]` settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Seconds before a spent request slot comes back
    pub per_second: u64,
    /// Requests a peer may send back to back
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: 2,
            burst_size: 5,
        }
    }
}

impl RateLimitConfig {
    /// One request per 10s with a burst of three, the default lockout threshold
    pub fn strict() -> Self {
        Self {
            per_second: 10,
            burst_size: 3,
        }
    }

    /// Hub on the same host issuing many authorize calls per command burst
    pub fn lenient() -> Self {
        Self {
            per_second: 1,
            burst_size: 30,
        }
    }
}

/// Build the governor config for `GovernorLayer`.
///
/// Keys on the peer IP, so the service must be served with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn create_governor_config(config: &RateLimitConfig) -> Result<Arc<DefaultGovernorConfig>, ApiError> {
    GovernorConfigBuilder::default()
        .per_second(config.per_second)
        .burst_size(config.burst_size)
        .use_headers()
        .finish()
        .map(Arc::new)
        .ok_or_else(|| {
            ApiError::Config(format!(
                "rate limit needs a positive period and burst, got {}s / {}",
                config.per_second, config.burst_size
            ))
        })
}
