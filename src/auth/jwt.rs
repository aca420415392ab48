use std::{sync::Arc, time::Duration};

use axum::extract::FromRef;
use dashmap::DashMap;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use thiserror::Error;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::{
    auth::{claims::Claims, repo_types::Role},
    config::JwtConfig,
    state::AppState,
};

const LEEWAY_SECS: u64 = 5;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("token expired")]
    Expired,
    #[error("token signature invalid")]
    SignatureInvalid,
}

#[derive(Debug)]
pub struct IssuedToken {
    pub token: String,
    pub jti: Uuid,
    pub expires_at: OffsetDateTime,
}

/// Signs and verifies session tokens. Cloning shares the revocation lists.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
    revoked: Arc<DashMap<Uuid, usize>>,       // jti -> exp
    revoked_users: Arc<DashMap<Uuid, usize>>, // user id -> cutoff; tokens issued at or before it are dead
}

impl FromRef<AppState> for TokenService {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

impl TokenService {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::from_secs((cfg.ttl_minutes.max(1) as u64) * 60),
            revoked: Arc::new(DashMap::new()),
            revoked_users: Arc::new(DashMap::new()),
        }
    }

    pub fn issue(&self, user_id: Uuid, role: Role) -> anyhow::Result<IssuedToken> {
        let now = OffsetDateTime::now_utc();
        let expires_at = now + TimeDuration::seconds(self.ttl.as_secs() as i64);
        let jti = Uuid::new_v4();
        let claims = Claims {
            sub: user_id,
            role,
            iat: now.unix_timestamp() as usize,
            exp: expires_at.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti,
        };
        let token = self.sign(&claims)?;
        debug!(user_id = %user_id, role = ?role, "jwt signed");
        Ok(IssuedToken {
            token,
            jti,
            expires_at,
        })
    }

    fn sign(&self, claims: &Claims) -> anyhow::Result<String> {
        Ok(encode(&Header::new(Algorithm::HS256), claims, &self.encoding)?)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECS;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => TokenError::Expired,
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidIssuer
                | ErrorKind::InvalidAudience
                | ErrorKind::InvalidAlgorithm => TokenError::SignatureInvalid,
                _ => TokenError::Malformed,
            }
        })?;

        if self.revoked.contains_key(&data.claims.jti) {
            return Err(TokenError::Expired);
        }
        if let Some(cutoff) = self.revoked_users.get(&data.claims.sub) {
            if data.claims.iat <= *cutoff {
                return Err(TokenError::Expired);
            }
        }
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }

    /// Denies the token for the rest of its lifetime and prunes stale entries.
    pub fn revoke(&self, claims: &Claims) {
        let now = OffsetDateTime::now_utc().unix_timestamp() as usize;
        self.revoked
            .retain(|_, exp| exp.saturating_add(LEEWAY_SECS as usize) >= now);
        self.revoked.insert(claims.jti, claims.exp);
    }

    /// Kills every token issued to `user_id` up to now. Used when the account
    /// itself goes away.
    pub fn revoke_user(&self, user_id: Uuid) {
        let now = OffsetDateTime::now_utc().unix_timestamp() as usize;
        let horizon = self.ttl.as_secs() as usize + LEEWAY_SECS as usize;
        self.revoked_users
            .retain(|_, cutoff| cutoff.saturating_add(horizon) >= now);
        self.revoked_users.insert(user_id, now);
    }

    #[cfg(test)]
    pub(crate) fn revoked_len(&self) -> usize {
        self.revoked.len()
    }
}
