//! Bearer tokens
//!
//! Format: `<mode>.<claims>.<signature>`, base64url without padding.
//! `mode` is `hs256` for HMAC-SHA256 signed tokens and `none` for unsigned
//! tokens, whose signature part is empty. A verifier only accepts its own
//! mode. Unsigned tokens are still bound to a live session by the store.

use crate::level::AuthLevel;
use crate::TokenError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::warn;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const SIGNED_MODE: &str = "hs256";
const UNSIGNED_MODE: &str = "none";

/// Secrets shorter than this are accepted but flagged
const MIN_SECRET_LEN: usize = 32;

/// Token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub session_id: Uuid,
    pub user_id: String,
    pub auth_level: AuthLevel,
    /// Expiry (unix seconds)
    pub exp: i64,
    /// Issued at (unix seconds)
    pub iat: i64,
}

/// Token signer
#[derive(Clone)]
pub enum TokenSigner {
    Hmac { key: Vec<u8> },
    Unsigned,
}

impl TokenSigner {
    /// HMAC signer when a secret is supplied, unsigned otherwise
    pub fn from_secret(secret: Option<&str>) -> Self {
        match secret {
            Some(secret) if !secret.is_empty() => {
                if secret.len() < MIN_SECRET_LEN {
                    warn!(
                        "Token secret is {} bytes; at least {} recommended",
                        secret.len(),
                        MIN_SECRET_LEN
                    );
                }
                TokenSigner::Hmac {
                    key: secret.as_bytes().to_vec(),
                }
            }
            _ => {
                warn!("No token secret configured: tokens are UNSIGNED and only session-checked");
                TokenSigner::Unsigned
            }
        }
    }

    /// Whether tokens carry an HMAC signature
    pub fn is_strong(&self) -> bool {
        matches!(self, TokenSigner::Hmac { .. })
    }

    fn mode(&self) -> &'static str {
        match self {
            TokenSigner::Hmac { .. } => SIGNED_MODE,
            TokenSigner::Unsigned => UNSIGNED_MODE,
        }
    }

    /// Serialize and sign claims
    pub fn encode(&self, claims: &Claims) -> Result<String, TokenError> {
        let payload =
            serde_json::to_vec(claims).map_err(|e| TokenError::Invalid(e.to_string()))?;
        let body = URL_SAFE_NO_PAD.encode(payload);
        let signing_input = format!("{}.{}", self.mode(), body);

        let signature = match self {
            TokenSigner::Hmac { key } => {
                let mut mac = mac(key)?;
                mac.update(signing_input.as_bytes());
                URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
            }
            TokenSigner::Unsigned => String::new(),
        };
        Ok(format!("{}.{}", signing_input, signature))
    }

    /// Check structure and signature, then decode claims.
    ///
    /// Expiry and session liveness are checked by the caller.
    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        let mut parts = token.split('.');
        let (Some(mode), Some(body), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Invalid("malformed token".into()));
        };

        if mode != self.mode() {
            return Err(TokenError::Invalid(format!(
                "token mode '{}' not accepted",
                mode
            )));
        }

        match self {
            TokenSigner::Hmac { key } => {
                let signature = URL_SAFE_NO_PAD
                    .decode(signature)
                    .map_err(|e| TokenError::Invalid(e.to_string()))?;
                let mut mac = mac(key)?;
                mac.update(mode.as_bytes());
                mac.update(b".");
                mac.update(body.as_bytes());
                mac.verify_slice(&signature)
                    .map_err(|_| TokenError::Invalid("bad signature".into()))?;
            }
            TokenSigner::Unsigned => {
                if !signature.is_empty() {
                    return Err(TokenError::Invalid("unexpected signature".into()));
                }
            }
        }

        let payload = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|e| TokenError::Invalid(e.to_string()))?;
        serde_json::from_slice(&payload).map_err(|e| TokenError::Invalid(e.to_string()))
    }
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenSigner::Hmac { .. } => f.write_str("TokenSigner::Hmac(..)"),
            TokenSigner::Unsigned => f.write_str("TokenSigner::Unsigned"),
        }
    }
}

fn mac(key: &[u8]) -> Result<HmacSha256, TokenError> {
    HmacSha256::new_from_slice(key).map_err(|e| TokenError::Invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> Claims {
        Claims {
            session_id: Uuid::new_v4(),
            user_id: "owner".into(),
            auth_level: AuthLevel::Medium,
            exp: 2_000_000_000,
            iat: 1_700_000_000,
        }
    }

    fn signer() -> TokenSigner {
        TokenSigner::from_secret(Some("0123456789abcdef0123456789abcdef"))
    }

    #[test]
    fn test_signed_roundtrip() {
        let signer = signer();
        assert!(signer.is_strong());
        let c = claims();
        let token = signer.encode(&c).unwrap();
        assert!(token.starts_with("hs256."));
        assert_eq!(signer.decode(&token).unwrap(), c);
    }

    #[test]
    fn test_tampered_claims_rejected() {
        let signer = signer();
        let token = signer.encode(&claims()).unwrap();

        let mut forged = claims();
        forged.auth_level = AuthLevel::High;
        let forged_body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let parts: Vec<&str> = token.split('.').collect();
        let tampered = format!("{}.{}.{}", parts[0], forged_body, parts[2]);

        assert!(matches!(signer.decode(&tampered), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let token = signer().encode(&claims()).unwrap();
        let other = TokenSigner::from_secret(Some("another secret entirely, 32 bytes!"));
        assert!(other.decode(&token).is_err());
    }

    #[test]
    fn test_unsigned_token_rejected_by_signed_verifier() {
        let unsigned = TokenSigner::from_secret(None);
        assert!(!unsigned.is_strong());
        let token = unsigned.encode(&claims()).unwrap();
        assert!(token.ends_with('.'));
        assert!(signer().decode(&token).is_err());
        assert!(unsigned.decode(&token).is_ok());
    }

    #[test]
    fn test_signed_token_rejected_by_unsigned_verifier() {
        let token = signer().encode(&claims()).unwrap();
        assert!(TokenSigner::Unsigned.decode(&token).is_err());
    }

    #[test]
    fn test_malformed() {
        let signer = signer();
        for bad in ["", "hs256", "hs256.abc", "a.b.c.d", "hs256.!!!.xyz"] {
            assert!(signer.decode(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_empty_secret_is_unsigned() {
        assert!(!TokenSigner::from_secret(Some("")).is_strong());
    }
}
