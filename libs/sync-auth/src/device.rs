use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng as _;
use sync_db::{CatalogStore, DbError, DeviceAuthRequest, DeviceAuthStatus};
use sync_errors::AppError;
use uuid::Uuid;

/// Ambiguity-free alphabet for human-entered codes: no vowels, no `0/1/O/I`.
const USER_CODE_ALPHABET: &[u8] = b"BCDFGHJKLMNPQRSTVWXZ23456789";
const USER_CODE_LEN: usize = 6;
const DEVICE_CODE_BYTES: usize = 32;
const API_KEY_TTL_DAYS: i64 = 365;
/// Bound on user-code draw/retry when the partial unique index over
/// `pending` requests rejects a collision (see
/// [`DeviceAuthService::insert_with_fresh_user_code`]).
const USER_CODE_MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone)]
pub struct StartResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: i64,
    pub interval: i64,
}

#[derive(Debug, Clone)]
pub enum PollResponse {
    Pending,
    Complete {
        api_key: String,
        user_id: Uuid,
        email: String,
        expires_at: Option<DateTime<Utc>>,
    },
}

fn random_device_code() -> String {
    let mut bytes = [0u8; DEVICE_CODE_BYTES];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

fn random_user_code() -> String {
    let mut rng = rand::rng();
    (0..USER_CODE_LEN)
        .map(|_| {
            let idx = rng.random_range(0..USER_CODE_ALPHABET.len());
            USER_CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// Drives the device-code (`pending -> verified -> used`, or `-> expired`)
/// authorization flow used by the CLI/IDE client.
pub struct DeviceAuthService {
    catalog: Arc<CatalogStore>,
    base_url: String,
    allow_signup: bool,
}

impl DeviceAuthService {
    #[must_use]
    pub fn new(catalog: Arc<CatalogStore>, base_url: String, allow_signup: bool) -> Self {
        Self {
            catalog,
            base_url,
            allow_signup,
        }
    }

    /// # Errors
    ///
    /// `signup_disabled` if the email has no existing account and signup is
    /// disabled; `internal` if no unused user-code can be drawn after
    /// [`USER_CODE_MAX_ATTEMPTS`] tries (the pending set would have to be
    /// saturated for this to happen).
    pub async fn start(&self, email: &str) -> Result<StartResponse, AppError> {
        let existing = self
            .catalog
            .get_user_by_email(email)
            .await
            .map_err(internal)?;
        if existing.is_none() && !self.allow_signup {
            return Err(AppError::SignupDisabled);
        }
        let device_code = random_device_code();
        let request = self.insert_with_fresh_user_code(email, &device_code).await?;
        Ok(StartResponse {
            device_code: request.device_code,
            user_code: request.user_code,
            verification_uri: format!("{}/auth/verify", self.base_url),
            expires_in: 900,
            interval: 5,
        })
    }

    /// Draws a `user_code` and inserts the request, redrawing on a
    /// collision with another currently-pending request rather than
    /// silently resolving to whichever row sorts first.
    async fn insert_with_fresh_user_code(
        &self,
        email: &str,
        device_code: &str,
    ) -> Result<DeviceAuthRequest, AppError> {
        for _ in 0..USER_CODE_MAX_ATTEMPTS {
            let user_code = random_user_code();
            match self
                .catalog
                .create_device_auth_request(email, device_code, &user_code)
                .await
            {
                Ok(request) => return Ok(request),
                Err(DbError::AlreadyExists(_)) => continue,
                Err(err) => return Err(internal(err)),
            }
        }
        Err(AppError::internal("could not allocate a unique device-auth user code"))
    }

    /// Called from the `/auth/verify` HTML form handler.
    ///
    /// # Errors
    ///
    /// `not_found` if no pending, non-expired request matches `user_code`;
    /// `signup_disabled` if the requester has no account and signup is off.
    pub async fn verify(&self, user_code: &str) -> Result<(), AppError> {
        let request = self
            .catalog
            .get_pending_device_auth_by_user_code(user_code)
            .await
            .map_err(internal)?
            .ok_or(AppError::NotFound)?;

        let user = match self
            .catalog
            .get_user_by_email(&request.email)
            .await
            .map_err(internal)?
        {
            Some(user) => user,
            None if self.allow_signup => self.catalog.create_user(&request.email).await.map_err(internal)?,
            None => return Err(AppError::SignupDisabled),
        };

        self.catalog
            .mark_device_auth_verified(request.id, user.id)
            .await
            .map_err(internal)?;
        self.catalog
            .record_auth_event(Some(&request.email), "verified")
            .await
            .map_err(internal)?;
        Ok(())
    }

    /// # Errors
    ///
    /// `not_found` for an unknown device code; `expired`/`already_used` for
    /// requests in those terminal states.
    pub async fn poll(&self, device_code: &str) -> Result<PollResponse, AppError> {
        let request = self
            .catalog
            .get_device_auth_by_device_code(device_code)
            .await
            .map_err(internal)?
            .ok_or(AppError::NotFound)?;

        match request.status {
            DeviceAuthStatus::Expired => Err(AppError::Expired),
            DeviceAuthStatus::Used => Err(AppError::AlreadyUsed),
            DeviceAuthStatus::Pending => Ok(PollResponse::Pending),
            DeviceAuthStatus::Verified => {
                let user_id = request.user_id.ok_or_else(|| {
                    AppError::internal("verified device-auth request missing user_id")
                })?;
                let expires_at = Utc::now() + Duration::days(API_KEY_TTL_DAYS);
                let new_key = self
                    .catalog
                    .generate_api_key(user_id, "device-code login", "sync", Some(expires_at))
                    .await
                    .map_err(internal)?;
                let transitioned = self
                    .catalog
                    .try_mark_device_auth_used(device_code, new_key.record.id)
                    .await
                    .map_err(internal)?;
                if transitioned.is_none() {
                    self.catalog
                        .revoke_api_key(new_key.record.id)
                        .await
                        .map_err(internal)?;
                    return Err(AppError::AlreadyUsed);
                }
                Ok(PollResponse::Complete {
                    api_key: new_key.plaintext,
                    user_id,
                    email: request.email,
                    expires_at: Some(expires_at),
                })
            }
        }
    }

    /// Marks still-pending, now-expired requests as `expired`. Run by a
    /// background sweep every 5 minutes.
    pub async fn sweep_expired(&self) -> Result<u64, AppError> {
        self.catalog.sweep_expired_device_auth().await.map_err(internal)
    }
}

fn internal(err: sync_db::DbError) -> AppError {
    tracing::warn!(error = %err, "catalog error in device auth flow");
    AppError::internal("catalog store error")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_store() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    async fn service(allow_signup: bool) -> (DeviceAuthService, tempfile::TempDir) {
        let dir = catalog_store();
        let catalog = Arc::new(
            CatalogStore::open(&dir.path().join("server.db"))
                .await
                .unwrap(),
        );
        (
            DeviceAuthService::new(catalog, "http://localhost:8080".into(), allow_signup),
            dir,
        )
    }

    #[tokio::test]
    async fn full_flow_completes_with_api_key() {
        let (svc, _dir) = service(true).await;
        let start = svc.start("alice@example.com").await.unwrap();
        svc.verify(&start.user_code).await.unwrap();
        match svc.poll(&start.device_code).await.unwrap() {
            PollResponse::Complete { email, .. } => assert_eq!(email, "alice@example.com"),
            PollResponse::Pending => panic!("expected complete"),
        }
    }

    #[tokio::test]
    async fn repolling_after_use_is_already_used() {
        let (svc, _dir) = service(true).await;
        let start = svc.start("alice@example.com").await.unwrap();
        svc.verify(&start.user_code).await.unwrap();
        svc.poll(&start.device_code).await.unwrap();
        let err = svc.poll(&start.device_code).await.unwrap_err();
        assert_eq!(err, AppError::AlreadyUsed);
    }

    #[tokio::test]
    async fn polling_before_verification_is_pending() {
        let (svc, _dir) = service(true).await;
        let start = svc.start("alice@example.com").await.unwrap();
        match svc.poll(&start.device_code).await.unwrap() {
            PollResponse::Pending => {}
            PollResponse::Complete { .. } => panic!("expected pending"),
        }
    }

    #[tokio::test]
    async fn signup_disabled_rejects_unknown_email() {
        let (svc, _dir) = service(false).await;
        let err = svc.start("nobody@example.com").await.unwrap_err();
        assert_eq!(err, AppError::SignupDisabled);
    }

    #[tokio::test]
    async fn user_code_alphabet_has_no_ambiguous_characters() {
        for _ in 0..50 {
            let code = random_user_code();
            assert_eq!(code.len(), USER_CODE_LEN);
            assert!(code.chars().all(|c| USER_CODE_ALPHABET.contains(&(c as u8))));
        }
    }
}
