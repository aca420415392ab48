use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

use super::{
    password::Hasher,
    repo::UserRepo,
    repo_types::{NewUser, ProfilePatch, Role, User},
};
use crate::{config::BootstrapAdmin, error::ApiError};

pub const MIN_PASSWORD_LEN: usize = 12;
pub const MAX_PASSWORD_LEN: usize = 128;

lazy_static! {
    static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.-]{3,32}$").unwrap();
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

#[derive(Debug, Error)]
pub enum AuthFailure {
    /// Unknown user and wrong password are deliberately the same variant.
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<AuthFailure> for ApiError {
    fn from(e: AuthFailure) -> Self {
        match e {
            AuthFailure::InvalidCredentials => ApiError::InvalidCredentials,
            AuthFailure::Store(e) => ApiError::Internal(e),
        }
    }
}

/// Looks the account up by exact username and checks the password.
///
/// Both failure paths run exactly one Argon2 verification.
pub async fn verify_credentials(
    users: &dyn UserRepo,
    hasher: &Hasher,
    username: &str,
    password: &str,
) -> Result<User, AuthFailure> {
    if password.len() > MAX_PASSWORD_LEN {
        return Err(AuthFailure::InvalidCredentials);
    }

    let Some(user) = users.find_by_username(username).await? else {
        hasher.verify_dummy(password.to_owned()).await;
        return Err(AuthFailure::InvalidCredentials);
    };

    let ok = hasher
        .verify(password.to_owned(), user.password_hash.clone())
        .await?;
    if !ok {
        return Err(AuthFailure::InvalidCredentials);
    }

    if hasher.needs_rehash(&user.password_hash) {
        upgrade_hash(users, hasher, &user, password).await;
    }
    Ok(user)
}

/// Re-hashes with the current parameters. Failure only costs the upgrade.
async fn upgrade_hash(users: &dyn UserRepo, hasher: &Hasher, user: &User, password: &str) {
    let result = match hasher.hash(password.to_owned()).await {
        Ok(fresh) => users.set_password_hash(user.id, &fresh).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => info!(user_id = %user.id, "password hash upgraded"),
        Err(e) => warn!(user_id = %user.id, error = ?e, "password hash upgrade failed"),
    }
}

pub fn validate_username(username: &str) -> Result<(), ApiError> {
    if !USERNAME_RE.is_match(username) {
        return Err(ApiError::validation(
            "username",
            "3-32 characters: letters, digits, '_', '.', '-'",
        ));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), ApiError> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(
            "password",
            format!("must be at least {} characters", MIN_PASSWORD_LEN),
        ));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(ApiError::validation(
            "password",
            format!("must be at most {} bytes", MAX_PASSWORD_LEN),
        ));
    }
    Ok(())
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), ApiError> {
    if value.chars().count() > max {
        return Err(ApiError::validation(
            field,
            format!("must be at most {} characters", max),
        ));
    }
    if value.chars().any(|c| c.is_control() && c != '\n' && c != '\t') {
        return Err(ApiError::validation(field, "contains control characters"));
    }
    Ok(())
}

pub fn validate_display_name(name: &str) -> Result<(), ApiError> {
    check_len("display_name", name, 64)
}

/// Trims every field and validates the non-empty ones.
pub fn normalize_profile(mut patch: ProfilePatch) -> Result<ProfilePatch, ApiError> {
    for field in [
        &mut patch.display_name,
        &mut patch.email,
        &mut patch.bio,
        &mut patch.website,
    ] {
        if let Some(v) = field {
            *v = v.trim().to_string();
        }
    }

    if let Some(name) = patch.display_name.as_deref() {
        validate_display_name(name)?;
    }
    if let Some(email) = patch.email.as_deref().filter(|e| !e.is_empty()) {
        check_len("email", email, 254)?;
        if !EMAIL_RE.is_match(email) {
            return Err(ApiError::validation("email", "not a valid email address"));
        }
    }
    if let Some(bio) = patch.bio.as_deref() {
        check_len("bio", bio, 1000)?;
    }
    if let Some(site) = patch.website.as_deref().filter(|w| !w.is_empty()) {
        check_len("website", site, 2048)?;
        let lower = site.to_ascii_lowercase();
        if !(lower.starts_with("https://") || lower.starts_with("http://")) {
            return Err(ApiError::validation("website", "must be an http(s) URL"));
        }
    }
    Ok(patch)
}

/// Creates the configured admin account on first start. Existing accounts are
/// left untouched.
pub async fn bootstrap_admin(
    users: &dyn UserRepo,
    hasher: &Hasher,
    admin: &BootstrapAdmin,
) -> anyhow::Result<()> {
    validate_username(&admin.username)
        .map_err(|e| anyhow::anyhow!("BOOTSTRAP_ADMIN_USERNAME: {}", e))?;
    validate_password(&admin.password)
        .map_err(|e| anyhow::anyhow!("BOOTSTRAP_ADMIN_PASSWORD: {}", e))?;

    if users.find_by_username(&admin.username).await?.is_some() {
        info!(username = %admin.username, "bootstrap admin already present");
        return Ok(());
    }

    let hash = hasher.hash(admin.password.clone()).await?;
    match users
        .create(NewUser {
            username: &admin.username,
            password_hash: &hash,
            role: Role::Admin,
            display_name: Some("Administrator"),
        })
        .await?
    {
        Some(user) => info!(user_id = %user.id, "bootstrap admin created"),
        None => warn!(username = %admin.username, "bootstrap admin raced with another writer"),
    }
    Ok(())
}
