use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sync_errors::AppError;
use uuid::Uuid;

use crate::scope::Scope;

/// The authenticated caller, resolved by the auth gate and inserted as a
/// request extension. Handlers pull it out with the `FromRequestParts` impl
/// below instead of re-parsing the `Authorization` header themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub key_id: Uuid,
    pub is_admin: bool,
    pub scopes: Vec<Scope>,
}

impl Principal {
    #[must_use]
    pub fn has_scope(&self, scope: Scope) -> bool {
        self.scopes.contains(&scope)
    }

    /// Admin gate: the key must carry the admin flag *and* the specific
    /// admin scope the endpoint requires.
    #[must_use]
    pub fn has_admin_scope(&self, scope: Scope) -> bool {
        self.is_admin && self.has_scope(scope)
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::AdminResource;

    fn principal() -> Principal {
        Principal {
            user_id: Uuid::nil(),
            key_id: Uuid::nil(),
            is_admin: false,
            scopes: vec![Scope::Sync],
        }
    }

    #[test]
    fn has_scope_checks_membership() {
        let p = principal();
        assert!(p.has_scope(Scope::Sync));
        assert!(!p.has_scope(Scope::AdminExport));
    }

    #[test]
    fn admin_scope_requires_both_flag_and_scope() {
        let mut p = principal();
        p.scopes.push(Scope::AdminRead(AdminResource::Server));
        assert!(!p.has_admin_scope(Scope::AdminRead(AdminResource::Server)));
        p.is_admin = true;
        assert!(p.has_admin_scope(Scope::AdminRead(AdminResource::Server)));
    }
}
