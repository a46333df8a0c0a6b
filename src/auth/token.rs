use std::{collections::HashSet, sync::{Arc, RwLock}};

use anyhow::anyhow;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::db::Role;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub role: Role,
    /// Expiry as a unix timestamp in seconds.
    pub exp: i64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("bad token signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("token revoked")]
    Revoked,
}

/// Verifies bearer tokens issued by the platform's token service.
pub trait TokenGate: Send + Sync {
    fn verify(&self, token: &str) -> Result<Claims, TokenError>;
}

pub type SharedTokenGate = Arc<dyn TokenGate>;

/// `base64url(claims json) "." base64url(hmac-sha256)` tokens under a shared secret.
pub struct HmacTokenGate {
    mac: HmacSha256,
    revoked: RwLock<HashSet<String>>,
}

impl HmacTokenGate {
    pub fn new(secret: impl AsRef<[u8]>) -> anyhow::Result<Self> {
        let mac = HmacSha256::new_from_slice(secret.as_ref()).map_err(|_| anyhow!("invalid token secret"))?;
        Ok(Self { mac, revoked: RwLock::new(HashSet::new()) })
    }

    fn mac(&self) -> HmacSha256 {
        self.mac.clone()
    }

    pub fn mint(&self, user_id: i64, role: Role, ttl: Duration) -> String {
        let claims = Claims { sub: user_id, role, exp: (Utc::now() + ttl).timestamp() };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap_or_default());

        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        format!("{payload}.{signature}")
    }

    pub fn revoke(&self, token: &str) {
        self.revoked.write().unwrap_or_else(|e| e.into_inner()).insert(token.to_owned());
    }
}

impl TokenGate for HmacTokenGate {
    fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let (payload, signature) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| TokenError::Malformed)?;

        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).map_err(|_| TokenError::BadSignature)?;

        if self.revoked.read().unwrap_or_else(|e| e.into_inner()).contains(token) {
            return Err(TokenError::Revoked);
        }

        let payload = URL_SAFE_NO_PAD.decode(payload).map_err(|_| TokenError::Malformed)?;
        let claims: Claims = serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;
        if claims.exp <= Utc::now().timestamp() {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-0123456789";

    #[test]
    fn minted_token_verifies() {
        let gate = HmacTokenGate::new(SECRET).unwrap();
        let token = gate.mint(42, Role::Student, Duration::hours(1));
        let claims = gate.verify(&token).unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.role, Role::Student);
    }

    #[test]
    fn rejects_foreign_signature() {
        let token = HmacTokenGate::new("another-secret-9876543210").unwrap().mint(42, Role::Instructor, Duration::hours(1));
        assert_eq!(HmacTokenGate::new(SECRET).unwrap().verify(&token), Err(TokenError::BadSignature));
    }

    #[test]
    fn rejects_tampered_claims() {
        let gate = HmacTokenGate::new(SECRET).unwrap();
        let token = gate.mint(42, Role::Student, Duration::hours(1));
        let (_, signature) = token.split_once('.').unwrap();
        let forged = URL_SAFE_NO_PAD.encode(br#"{"sub":42,"role":"INSTRUCTOR","exp":99999999999}"#);
        assert_eq!(gate.verify(&format!("{forged}.{signature}")), Err(TokenError::BadSignature));
    }

    #[test]
    fn rejects_expired_and_revoked() {
        let gate = HmacTokenGate::new(SECRET).unwrap();
        let expired = gate.mint(1, Role::Student, Duration::seconds(-5));
        assert_eq!(gate.verify(&expired), Err(TokenError::Expired));

        let token = gate.mint(1, Role::Student, Duration::hours(1));
        gate.revoke(&token);
        assert_eq!(gate.verify(&token), Err(TokenError::Revoked));
    }

    #[test]
    fn rejects_garbage() {
        let gate = HmacTokenGate::new(SECRET).unwrap();
        assert_eq!(gate.verify("not-a-token"), Err(TokenError::Malformed));
        assert_eq!(gate.verify("abc.###"), Err(TokenError::Malformed));
    }
}
