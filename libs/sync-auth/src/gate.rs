use std::sync::Arc;

use sync_db::CatalogStore;
use sync_errors::AppError;
use sync_security::{parse_scope_list, Principal, Scope};

/// Pulls the bearer token out of an `Authorization` header, verifies it
/// against the catalog store, and resolves the caller's [`Principal`].
pub struct AuthGate {
    catalog: Arc<CatalogStore>,
}

impl AuthGate {
    #[must_use]
    pub fn new(catalog: Arc<CatalogStore>) -> Self {
        Self { catalog }
    }

    /// # Errors
    ///
    /// `unauthorized` for a missing/malformed header or an unknown/expired
    /// key.
    pub async fn resolve(&self, authorization: Option<&str>) -> Result<Principal, AppError> {
        let token = extract_bearer_token(authorization).ok_or(AppError::Unauthorized)?;
        let (key, user) = self
            .catalog
            .verify_api_key(token)
            .await
            .map_err(|err| {
                tracing::warn!(error = %err, "catalog error during auth");
                AppError::internal("catalog store error")
            })?
            .ok_or(AppError::Unauthorized)?;
        let scopes = parse_scope_list(&key.scopes).unwrap_or_default();
        Ok(Principal {
            user_id: user.id,
            key_id: key.id,
            is_admin: user.is_admin,
            scopes,
        })
    }
}

fn extract_bearer_token(header: Option<&str>) -> Option<&str> {
    let header = header?;
    let rest = header.strip_prefix("Bearer ")?;
    let token = rest.trim();
    (!token.is_empty()).then_some(token)
}

/// Validates a comma-separated scope list at API-key creation time.
///
/// # Errors
///
/// `bad_request` if any token is not `sync` or a declared admin scope.
pub fn validate_scopes(raw: &str) -> Result<(), AppError> {
    parse_scope_list(raw)
        .map(|_| ())
        .map_err(|err| AppError::bad_request(format!("invalid scope: {err}")))
}

/// Gates an admin endpoint on both the `is_admin` flag and the specific
/// scope the key was issued, returning `insufficient_admin_scope` otherwise.
///
/// # Errors
///
/// `insufficient_admin_scope` if the principal lacks either the admin flag
/// or the requested scope.
pub fn require_admin_scope(principal: &Principal, scope: Scope) -> Result<(), AppError> {
    if principal.has_admin_scope(scope) {
        Ok(())
    } else {
        Err(AppError::InsufficientAdminScope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bearer_token() {
        assert_eq!(extract_bearer_token(Some("Bearer abc123")), Some("abc123"));
        assert_eq!(extract_bearer_token(Some("Basic abc123")), None);
        assert_eq!(extract_bearer_token(None), None);
        assert_eq!(extract_bearer_token(Some("Bearer ")), None);
    }

    #[test]
    fn validates_known_scopes_only() {
        assert!(validate_scopes("sync,admin:read:server").is_ok());
        assert!(validate_scopes("sync,bogus").is_err());
    }
}
