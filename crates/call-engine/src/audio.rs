//! Audio proxy tokens
//!
//! Recordings sit behind the provider's credentials. Instead of exposing
//! them, the engine hands out a short-lived capability for one call:
//!
//! ```text
//! token = base64url({"sid": <call session id>, "exp": <unix secs>}) "." hex(HMAC-SHA256(key, payload))
//! ```
//!
//! Tokens are stateless. With a configured secret they keep working across
//! restarts; without one a random per-process key is generated.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::warn;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use crate::config::AudioConfig;
use crate::error::{CallEngineError, Result};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioClaims {
    #[serde(rename = "sid")]
    pub call_session_id: String,
    #[serde(rename = "exp")]
    pub expires_at: i64,
}

/// An issued token with its expiry
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioToken {
    pub token: String,
    pub expires_at: i64,
}

pub struct AudioTokenIssuer {
    key: Vec<u8>,
    ttl_secs: i64,
}

impl AudioTokenIssuer {
    pub fn new(config: &AudioConfig) -> Self {
        let key = match config.token_secret.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(secret) => secret.as_bytes().to_vec(),
            None => {
                warn!("⚠️ audio.token_secret not set, audio tokens will not survive a restart");
                rand::random::<[u8; 32]>().to_vec()
            }
        };
        Self {
            key,
            ttl_secs: config.token_ttl_secs,
        }
    }

    pub fn issue(&self, call_session_id: &str) -> Result<AudioToken> {
        self.issue_at(call_session_id, Utc::now().timestamp())
    }

    fn issue_at(&self, call_session_id: &str, now: i64) -> Result<AudioToken> {
        let claims = AudioClaims {
            call_session_id: call_session_id.to_string(),
            expires_at: now + self.ttl_secs,
        };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let signature = hex::encode(self.mac(payload.as_bytes())?.finalize().into_bytes());
        Ok(AudioToken {
            token: format!("{}.{}", payload, signature),
            expires_at: claims.expires_at,
        })
    }

    /// Check signature and expiry; returns the call the token grants
    pub fn verify(&self, token: &str) -> Result<AudioClaims> {
        self.verify_at(token, Utc::now().timestamp())
    }

    fn verify_at(&self, token: &str, now: i64) -> Result<AudioClaims> {
        let (payload, signature) = token
            .split_once('.')
            .ok_or_else(|| CallEngineError::signature_mismatch("malformed audio token"))?;
        let signature =
            hex::decode(signature).map_err(|_| CallEngineError::signature_mismatch("malformed audio token"))?;
        self.mac(payload.as_bytes())?
            .verify_slice(&signature)
            .map_err(|_| CallEngineError::signature_mismatch("audio token signature"))?;

        let decoded = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| CallEngineError::signature_mismatch("malformed audio token"))?;
        let claims: AudioClaims = serde_json::from_slice(&decoded)
            .map_err(|_| CallEngineError::signature_mismatch("malformed audio token"))?;
        if claims.expires_at < now {
            return Err(CallEngineError::signature_mismatch("audio token expired"));
        }
        Ok(claims)
    }

    fn mac(&self, payload: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| CallEngineError::internal(format!("HMAC key rejected: {}", e)))?;
        mac.update(payload);
        Ok(mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer(secret: Option<&str>) -> AudioTokenIssuer {
        AudioTokenIssuer::new(&AudioConfig {
            token_secret: secret.map(str::to_string),
            token_ttl_secs: 3600,
        })
    }

    #[test]
    fn test_token_grants_its_call() {
        let issuer = issuer(Some("audio-secret"));
        let token = issuer.issue("CA123").unwrap();
        let claims = issuer.verify(&token.token).unwrap();
        assert_eq!(claims.call_session_id, "CA123");
        assert_eq!(claims.expires_at, token.expires_at);
    }

    #[test]
    fn test_expired_token_rejected() {
        let issuer = issuer(Some("audio-secret"));
        let token = issuer.issue_at("CA123", 1_000).unwrap();
        assert!(issuer.verify_at(&token.token, 1_000 + 3600).is_ok());
        assert!(matches!(
            issuer.verify_at(&token.token, 1_000 + 3601),
            Err(CallEngineError::SignatureMismatch(_))
        ));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let issuer = issuer(Some("audio-secret"));
        let token = issuer.issue("CA123").unwrap().token;
        let (_, signature) = token.split_once('.').unwrap();
        let forged_payload = URL_SAFE_NO_PAD.encode(br#"{"sid":"CA999","exp":99999999999}"#);
        let forged = format!("{}.{}", forged_payload, signature);
        assert!(issuer.verify(&forged).is_err());
        assert!(issuer.verify("not-a-token").is_err());
    }

    #[test]
    fn test_tokens_survive_restart_only_with_secret() {
        let token = issuer(Some("audio-secret")).issue("CA1").unwrap().token;
        assert!(issuer(Some("audio-secret")).verify(&token).is_ok());

        let ephemeral = issuer(None).issue("CA1").unwrap().token;
        assert!(issuer(None).verify(&ephemeral).is_err());
        assert_eq!(issuer(None).key.len(), 32);
    }
}
