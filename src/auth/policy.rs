//! Authorization rules, applied after authentication has attached claims.

use tracing::warn;
use uuid::Uuid;

use super::claims::Claims;
use crate::error::ApiError;

pub fn ensure_admin(claims: &Claims) -> Result<(), ApiError> {
    if claims.is_admin() {
        return Ok(());
    }
    warn!(user_id = %claims.sub, "admin operation denied");
    Err(ApiError::Forbidden)
}

/// Permits the operation when the caller owns the resource or is an admin.
/// A resource whose owner is gone (`None`) is admin-only.
pub fn ensure_owner_or_admin(claims: &Claims, owner_id: Option<Uuid>) -> Result<(), ApiError> {
    if can_access(claims, owner_id) {
        return Ok(());
    }
    warn!(user_id = %claims.sub, owner_id = ?owner_id, "ownership check denied");
    Err(ApiError::Forbidden)
}

pub fn can_access(claims: &Claims, owner_id: Option<Uuid>) -> bool {
    claims.is_admin() || owner_id == Some(claims.sub)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo_types::Role;

    fn claims(role: Role) -> Claims {
        Claims {
            sub: Uuid::new_v4(),
            role,
            iat: 0,
            exp: 0,
            iss: "iss".into(),
            aud: "aud".into(),
            jti: Uuid::new_v4(),
        }
    }

    #[test]
    fn owner_is_allowed() {
        let c = claims(Role::User);
        assert!(ensure_owner_or_admin(&c, Some(c.sub)).is_ok());
    }

    #[test]
    fn stranger_is_forbidden() {
        let c = claims(Role::User);
        let err = ensure_owner_or_admin(&c, Some(Uuid::new_v4())).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden));
    }

    #[test]
    fn orphaned_resource_is_admin_only() {
        assert!(ensure_owner_or_admin(&claims(Role::User), None).is_err());
        assert!(ensure_owner_or_admin(&claims(Role::Admin), None).is_ok());
    }

    #[test]
    fn admin_overrides_ownership() {
        let c = claims(Role::Admin);
        assert!(ensure_owner_or_admin(&c, Some(Uuid::new_v4())).is_ok());
        assert!(ensure_admin(&c).is_ok());
        assert!(ensure_admin(&claims(Role::User)).is_err());
    }
}
