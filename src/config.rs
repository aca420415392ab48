use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;

/// Smallest Argon2 memory cost accepted from the environment (OWASP baseline).
pub const MIN_ARGON2_MEMORY_KIB: u32 = 19_456;
pub const MIN_ARGON2_ITERATIONS: u32 = 2;
const MIN_SECRET_BYTES: usize = 32;

#[derive(Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("ttl_minutes", &self.ttl_minutes)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub root: PathBuf,
    pub max_bytes: usize,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
}

#[derive(Clone, Deserialize)]
pub struct BootstrapAdmin {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BootstrapAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapAdmin")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub uploads: UploadConfig,
    pub password: PasswordConfig,
    pub bootstrap_admin: Option<BootstrapAdmin>,
    pub cors_allowed_origins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let jwt = JwtConfig {
            secret: load_secret()?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "safeboard".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "safeboard-users".into()),
            ttl_minutes: env_parse("JWT_TTL_MINUTES")?.unwrap_or(60),
        };
        anyhow::ensure!(jwt.ttl_minutes > 0, "JWT_TTL_MINUTES must be positive");

        let uploads = UploadConfig {
            root: std::env::var("UPLOAD_ROOT")
                .unwrap_or_else(|_| "./uploads".into())
                .into(),
            max_bytes: env_parse("UPLOAD_MAX_BYTES")?.unwrap_or(5 * 1024 * 1024),
        };
        anyhow::ensure!(uploads.max_bytes > 0, "UPLOAD_MAX_BYTES must be positive");

        let password = PasswordConfig {
            memory_kib: env_parse("ARGON2_MEMORY_KIB")?.unwrap_or(MIN_ARGON2_MEMORY_KIB),
            iterations: env_parse("ARGON2_ITERATIONS")?.unwrap_or(MIN_ARGON2_ITERATIONS),
        };
        validate_password_cost(&password)?;

        let bootstrap_admin = match (
            std::env::var("BOOTSTRAP_ADMIN_USERNAME").ok(),
            std::env::var("BOOTSTRAP_ADMIN_PASSWORD").ok(),
        ) {
            (Some(username), Some(password)) => Some(BootstrapAdmin { username, password }),
            (None, None) => None,
            _ => anyhow::bail!(
                "BOOTSTRAP_ADMIN_USERNAME and BOOTSTRAP_ADMIN_PASSWORD must be set together"
            ),
        };

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .map(|v| parse_origins(&v))
            .unwrap_or_default();

        Ok(Self {
            database_url,
            jwt,
            uploads,
            password,
            bootstrap_admin,
            cors_allowed_origins,
        })
    }
}

/// Prefers a mounted secret file over the plain environment variable.
fn load_secret() -> anyhow::Result<String> {
    let secret = match std::env::var("JWT_SECRET_FILE") {
        Ok(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("read JWT_SECRET_FILE {}", path))?
            .trim()
            .to_string(),
        Err(_) => std::env::var("JWT_SECRET").context("JWT_SECRET or JWT_SECRET_FILE is required")?,
    };
    validate_secret(&secret)?;
    Ok(secret)
}

pub(crate) fn validate_secret(secret: &str) -> anyhow::Result<()> {
    anyhow::ensure!(
        secret.len() >= MIN_SECRET_BYTES,
        "jwt signing secret must be at least {} bytes",
        MIN_SECRET_BYTES
    );
    Ok(())
}

pub(crate) fn validate_password_cost(cfg: &PasswordConfig) -> anyhow::Result<()> {
    anyhow::ensure!(
        cfg.memory_kib >= MIN_ARGON2_MEMORY_KIB,
        "ARGON2_MEMORY_KIB must be at least {}",
        MIN_ARGON2_MEMORY_KIB
    );
    anyhow::ensure!(
        cfg.iterations >= MIN_ARGON2_ITERATIONS,
        "ARGON2_ITERATIONS must be at least {}",
        MIN_ARGON2_ITERATIONS
    );
    Ok(())
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Unset or blank means "use the default". A value that does not parse is a
/// startup error rather than a silent fallback.
fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    parse_var(key, std::env::var(key).ok())
}

fn parse_var<T>(key: &str, raw: Option<String>) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} has invalid value {:?}: {}", key, v, e)),
    }
}
