use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use tracing::error;

use crate::config::PasswordConfig;

/// Argon2id hasher with fixed cost parameters.
///
/// Also holds a hash of a random throwaway password, so that a login for an
/// unknown account can burn the same verification cost as a real one.
#[derive(Clone)]
pub struct Hasher {
    argon2: Argon2<'static>,
    params: Params,
    dummy_hash: Arc<str>,
    #[cfg(test)]
    verifications: Arc<AtomicUsize>,
}

impl Hasher {
    pub fn new(cfg: &PasswordConfig) -> anyhow::Result<Self> {
        let params = Params::new(cfg.memory_kib, cfg.iterations, 1, None)
            .map_err(|e| anyhow::anyhow!("invalid argon2 params: {}", e))?;
        Self::with_params(params)
    }

    fn with_params(params: Params) -> anyhow::Result<Self> {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.clone());

        let throwaway: String = OsRng
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let dummy_hash = hash_with(&argon2, &throwaway)?.into();

        Ok(Self {
            argon2,
            params,
            dummy_hash,
            #[cfg(test)]
            verifications: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub async fn hash(&self, plain: String) -> anyhow::Result<String> {
        let argon2 = self.argon2.clone();
        tokio::task::spawn_blocking(move || hash_with(&argon2, &plain))
            .await
            .context("hash task panicked")?
    }

    /// Verifies `plain` against a stored PHC string. The comparison itself is
    /// constant-time inside `argon2`.
    pub async fn verify(&self, plain: String, hash: String) -> anyhow::Result<bool> {
        #[cfg(test)]
        self.verifications.fetch_add(1, Ordering::SeqCst);

        let argon2 = self.argon2.clone();
        tokio::task::spawn_blocking(move || verify_with(&argon2, &plain, &hash))
            .await
            .context("verify task panicked")?
    }

    /// Runs a full verification against the throwaway hash and discards it.
    pub async fn verify_dummy(&self, plain: String) {
        let hash = self.dummy_hash.to_string();
        let _ = self.verify(plain, hash).await;
    }

    /// True when a stored hash was made with other parameters than the current
    /// ones. Such hashes are replaced at the next successful login, which keeps
    /// real and dummy verifications at the same cost.
    pub fn needs_rehash(&self, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return true;
        };
        if parsed.algorithm.as_str() != "argon2id" {
            return true;
        }
        match Params::try_from(&parsed) {
            Ok(p) => {
                p.m_cost() != self.params.m_cost()
                    || p.t_cost() != self.params.t_cost()
                    || p.p_cost() != self.params.p_cost()
            }
            Err(_) => true,
        }
    }

    #[cfg(test)]
    pub(crate) fn verification_count(&self) -> usize {
        self.verifications.load(Ordering::SeqCst)
    }
}

fn hash_with(argon2: &Argon2<'_>, plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

fn verify_with(argon2: &Argon2<'_>, plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(argon2.verify_password(plain.as_bytes(), &parsed).is_ok())
}

#[cfg(test)]
pub(crate) fn test_hasher(memory_kib: u32, iterations: u32) -> Hasher {
    // Test-only: skips the production cost floor enforced by config.
    Hasher::with_params(Params::new(memory_kib, iterations, 1, None).unwrap()).unwrap()
}

#[cfg(test)]
pub(crate) fn fast_hasher() -> Hasher {
    test_hasher(64, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_and_verify_roundtrip() {
        let hasher = fast_hasher();
        let hash = hasher.hash("Secur3P@ssw0rd!".into()).await.expect("hashing should succeed");
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher
            .verify("Secur3P@ssw0rd!".into(), hash)
            .await
            .expect("verify should succeed"));
    }

    #[tokio::test]
    async fn verify_rejects_wrong_password() {
        let hasher = fast_hasher();
        let hash = hasher.hash("correct-horse-battery-staple".into()).await.unwrap();
        assert!(!hasher.verify("wrong-password".into(), hash).await.unwrap());
    }

    #[tokio::test]
    async fn verify_errors_on_malformed_hash() {
        let hasher = fast_hasher();
        let err = hasher
            .verify("anything".into(), "not-a-valid-hash".into())
            .await
            .unwrap_err();
        assert!(!err.to_string().is_empty());
    }

    #[tokio::test]
    async fn same_password_gets_distinct_salts() {
        let hasher = fast_hasher();
        let a = hasher.hash("repeat-me-please".into()).await.unwrap();
        let b = hasher.hash("repeat-me-please".into()).await.unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn production_params_are_embedded_in_hash() {
        let hasher = Hasher::new(&PasswordConfig {
            memory_kib: crate::config::MIN_ARGON2_MEMORY_KIB,
            iterations: crate::config::MIN_ARGON2_ITERATIONS,
        })
        .unwrap();
        assert!(hasher.dummy_hash.contains("m=19456,t=2,p=1"));
    }

    #[tokio::test]
    async fn rehash_needed_only_when_params_change() {
        let hasher = fast_hasher();
        let current = hasher.hash("some-password-1".into()).await.unwrap();
        assert!(!hasher.needs_rehash(&current));

        let older = test_hasher(32, 1).hash("some-password-1".into()).await.unwrap();
        assert!(hasher.needs_rehash(&older));
        assert!(hasher.needs_rehash("not-a-hash"));
    }

    #[tokio::test]
    async fn dummy_verification_is_counted_like_a_real_one() {
        let hasher = fast_hasher();
        hasher.verify_dummy("whatever".into()).await;
        assert_eq!(hasher.verification_count(), 1);
    }
}
