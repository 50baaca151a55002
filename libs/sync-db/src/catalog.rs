use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rand::Rng as _;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::DbError;
use crate::models::{
    ApiKey, AuthEvent, DeviceAuthRequest, DeviceAuthStatus, EndpointClass, Membership, NewApiKey,
    Project, RateLimitEvent, RoleRow, SyncCursor, User,
};

const DEVICE_CODE_TTL_MINS: i64 = 15;

fn random_api_key_plaintext() -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    format!("sk_{}", URL_SAFE_NO_PAD.encode(bytes))
}

fn hash_api_key(plaintext: &str) -> String {
    let digest = Sha256::digest(plaintext.as_bytes());
    hex::encode(digest)
}

/// Process-wide catalog: users, API keys, projects, memberships, device-auth
/// requests, sync cursors and observability events. Backed by a single
/// SQLite file opened with a single-writer connection pool.
#[derive(Clone)]
pub struct CatalogStore {
    pool: SqlitePool,
}

impl CatalogStore {
    /// Opens (creating if absent) the catalog database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sql`] if the file cannot be opened or migrated.
    pub async fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .foreign_keys(true)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(opts).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), DbError> {
        for stmt in include_str!("migrations/001_catalog.sql").split(';') {
            let stmt = stmt.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(&self.pool).await?;
            }
        }
        Ok(())
    }

    // ── Users ──────────────────────────────────────────────────────────

    /// Creates a user. The first user created in an empty catalog is
    /// implicitly made admin.
    pub async fn create_user(&self, email: &str) -> Result<User, DbError> {
        let is_first = self.count_admins().await? == 0 && self.count_users().await? == 0;
        let id = Uuid::new_v4();
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO users (id, email, verified_at, is_admin, created_at, updated_at)
             VALUES (?, ?, NULL, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(email.to_lowercase())
        .bind(is_first)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;
        if let Err(err) = result {
            if DbError::is_unique_violation(&err) {
                return Err(DbError::AlreadyExists(format!("user {email}")));
            }
            return Err(err.into());
        }
        self.get_user(id)
            .await?
            .ok_or_else(|| DbError::Sql(sqlx::Error::RowNotFound))
    }

    pub async fn count_users(&self) -> Result<i64, DbError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_projects(&self) -> Result<i64, DbError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM projects WHERE deleted_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn get_user(&self, id: Uuid) -> Result<Option<User>, DbError> {
        Ok(sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DbError> {
        Ok(sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(email.to_lowercase())
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn list_users(&self) -> Result<Vec<User>, DbError> {
        Ok(sqlx::query_as("SELECT * FROM users ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn mark_email_verified(&self, id: Uuid) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET verified_at = ?, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Sets the admin flag. Refuses to clear the last admin.
    pub async fn set_admin(&self, id: Uuid, is_admin: bool) -> Result<(), DbError> {
        if !is_admin && self.count_admins().await? <= 1 {
            let is_currently_admin = self
                .get_user(id)
                .await?
                .is_some_and(|u| u.is_admin);
            if is_currently_admin {
                return Err(DbError::LastOwner);
            }
        }
        sqlx::query("UPDATE users SET is_admin = ?, updated_at = ? WHERE id = ?")
            .bind(is_admin)
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_admins(&self) -> Result<i64, DbError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE is_admin = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ── API keys ───────────────────────────────────────────────────────

    pub async fn generate_api_key(
        &self,
        user_id: Uuid,
        name: &str,
        scopes: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<NewApiKey, DbError> {
        let plaintext = random_api_key_plaintext();
        let hash = hash_api_key(&plaintext);
        let prefix: String = plaintext.chars().take(9).collect();
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO api_keys (id, user_id, hash, prefix, name, scopes, expires_at, last_used_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?)",
        )
        .bind(id.to_string())
        .bind(user_id.to_string())
        .bind(&hash)
        .bind(&prefix)
        .bind(name)
        .bind(scopes)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        let record: ApiKey = sqlx::query_as("SELECT * FROM api_keys WHERE id = ?")
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(NewApiKey { record, plaintext })
    }

    /// Verifies a bearer token's plaintext against the stored hash. Returns
    /// `None` for unknown or expired keys; otherwise touches `last_used_at`.
    pub async fn verify_api_key(&self, plaintext: &str) -> Result<Option<(ApiKey, User)>, DbError> {
        let hash = hash_api_key(plaintext);
        let Some(key): Option<ApiKey> = sqlx::query_as("SELECT * FROM api_keys WHERE hash = ?")
            .bind(&hash)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        if key.expires_at.is_some_and(|exp| exp < Utc::now()) {
            return Ok(None);
        }
        let Some(user) = self.get_user(key.user_id).await? else {
            return Ok(None);
        };
        sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(key.id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(Some((key, user)))
    }

    pub async fn revoke_api_key(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_api_keys(&self, user_id: Uuid) -> Result<Vec<ApiKey>, DbError> {
        Ok(
            sqlx::query_as("SELECT * FROM api_keys WHERE user_id = ? ORDER BY created_at")
                .bind(user_id.to_string())
                .fetch_all(&self.pool)
                .await?,
        )
    }

    // ── Projects ───────────────────────────────────────────────────────

    /// Creates a project and its owner membership in a single transaction.
    pub async fn create_project(
        &self,
        id: &str,
        name: &str,
        description: Option<&str>,
        owner_user_id: Uuid,
    ) -> Result<Project, DbError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let insert = sqlx::query(
            "INSERT INTO projects (id, name, description, created_at, updated_at, deleted_at)
             VALUES (?, ?, ?, ?, ?, NULL)",
        )
        .bind(id)
        .bind(name)
        .bind(description)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await;
        if let Err(err) = insert {
            if DbError::is_unique_violation(&err) {
                return Err(DbError::AlreadyExists(format!("project {id}")));
            }
            return Err(err.into());
        }
        sqlx::query(
            "INSERT INTO memberships (project_id, user_id, role, created_at) VALUES (?, ?, 'owner', ?)",
        )
        .bind(id)
        .bind(owner_user_id.to_string())
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let project: Project = sqlx::query_as("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(project)
    }

    pub async fn get_project(
        &self,
        id: &str,
        include_deleted: bool,
    ) -> Result<Option<Project>, DbError> {
        let project: Option<Project> = sqlx::query_as("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(project.filter(|p| include_deleted || !p.is_deleted()))
    }

    pub async fn list_projects_for_user(&self, user_id: Uuid) -> Result<Vec<Project>, DbError> {
        Ok(sqlx::query_as(
            "SELECT p.* FROM projects p
             JOIN memberships m ON m.project_id = p.id
             WHERE m.user_id = ? AND p.deleted_at IS NULL
             ORDER BY p.created_at",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn update_project(
        &self,
        id: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<Project>, DbError> {
        let Some(existing) = self.get_project(id, false).await? else {
            return Ok(None);
        };
        let name = name.unwrap_or(&existing.name);
        sqlx::query("UPDATE projects SET name = ?, description = ?, updated_at = ? WHERE id = ?")
            .bind(name)
            .bind(description.or(existing.description.as_deref()))
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.get_project(id, false).await
    }

    /// Cursor-paginated project listing for the admin surface. `after_id` is
    /// the opaque cursor's decoded payload (the last-seen project id);
    /// ordering is by `id` so offset-drift under concurrent inserts cannot
    /// skip or repeat rows.
    pub async fn list_projects_admin(
        &self,
        after_id: Option<&str>,
        limit: i64,
        include_deleted: bool,
    ) -> Result<Vec<Project>, DbError> {
        let mut builder: sqlx::QueryBuilder<'_, sqlx::Sqlite> =
            sqlx::QueryBuilder::new("SELECT * FROM projects WHERE 1 = 1");
        if !include_deleted {
            builder.push(" AND deleted_at IS NULL");
        }
        if let Some(after_id) = after_id {
            builder.push(" AND id > ").push_bind(after_id.to_owned());
        }
        builder.push(" ORDER BY id ASC LIMIT ").push_bind(limit);
        Ok(builder
            .build_query_as::<Project>()
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn soft_delete_project(&self, id: &str) -> Result<bool, DbError> {
        let result =
            sqlx::query("UPDATE projects SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(Utc::now())
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Memberships ────────────────────────────────────────────────────

    pub async fn add_membership(
        &self,
        project_id: &str,
        user_id: Uuid,
        role: RoleRow,
    ) -> Result<Membership, DbError> {
        let result = sqlx::query(
            "INSERT INTO memberships (project_id, user_id, role, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(project_id)
        .bind(user_id.to_string())
        .bind(role)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;
        if let Err(err) = result {
            if DbError::is_unique_violation(&err) {
                return Err(DbError::AlreadyExists(format!(
                    "membership {project_id}/{user_id}"
                )));
            }
            return Err(err.into());
        }
        self.get_membership(project_id, user_id)
            .await?
            .ok_or_else(|| DbError::Sql(sqlx::Error::RowNotFound))
    }

    pub async fn get_membership(
        &self,
        project_id: &str,
        user_id: Uuid,
    ) -> Result<Option<Membership>, DbError> {
        Ok(sqlx::query_as(
            "SELECT * FROM memberships WHERE project_id = ? AND user_id = ?",
        )
        .bind(project_id)
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn list_memberships(&self, project_id: &str) -> Result<Vec<Membership>, DbError> {
        Ok(sqlx::query_as(
            "SELECT * FROM memberships WHERE project_id = ? ORDER BY created_at",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn count_owners(&self, project_id: &str) -> Result<i64, DbError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM memberships WHERE project_id = ? AND role = 'owner'",
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Updates a member's role. Refuses to demote the last remaining owner.
    pub async fn update_membership_role(
        &self,
        project_id: &str,
        user_id: Uuid,
        role: RoleRow,
    ) -> Result<Option<Membership>, DbError> {
        let Some(existing) = self.get_membership(project_id, user_id).await? else {
            return Ok(None);
        };
        if existing.role == RoleRow::Owner && role != RoleRow::Owner && self.count_owners(project_id).await? <= 1 {
            return Err(DbError::LastOwner);
        }
        sqlx::query("UPDATE memberships SET role = ? WHERE project_id = ? AND user_id = ?")
            .bind(role)
            .bind(project_id)
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        self.get_membership(project_id, user_id).await
    }

    /// Removes a member. Refuses to remove the last remaining owner.
    pub async fn remove_membership(
        &self,
        project_id: &str,
        user_id: Uuid,
    ) -> Result<bool, DbError> {
        let Some(existing) = self.get_membership(project_id, user_id).await? else {
            return Ok(false);
        };
        if existing.role == RoleRow::Owner && self.count_owners(project_id).await? <= 1 {
            return Err(DbError::LastOwner);
        }
        let result = sqlx::query("DELETE FROM memberships WHERE project_id = ? AND user_id = ?")
            .bind(project_id)
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Device-code auth ───────────────────────────────────────────────

    /// Fails with [`DbError::AlreadyExists`] if `user_code` collides with
    /// another currently-pending request (enforced by a partial unique
    /// index); the caller is expected to draw a fresh code and retry.
    pub async fn create_device_auth_request(
        &self,
        email: &str,
        device_code: &str,
        user_code: &str,
    ) -> Result<DeviceAuthRequest, DbError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let expires_at = now + Duration::minutes(DEVICE_CODE_TTL_MINS);
        let result = sqlx::query(
            "INSERT INTO device_auth_requests
             (id, email, device_code, user_code, status, user_id, api_key_id, expires_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, 'pending', NULL, NULL, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(email.to_lowercase())
        .bind(device_code)
        .bind(user_code)
        .bind(expires_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;
        if let Err(err) = result {
            if DbError::is_unique_violation(&err) {
                return Err(DbError::AlreadyExists(format!("user_code {user_code}")));
            }
            return Err(err.into());
        }
        self.get_device_auth_by_device_code(device_code)
            .await?
            .ok_or_else(|| DbError::Sql(sqlx::Error::RowNotFound))
    }

    pub async fn get_device_auth_by_device_code(
        &self,
        device_code: &str,
    ) -> Result<Option<DeviceAuthRequest>, DbError> {
        Ok(sqlx::query_as(
            "SELECT * FROM device_auth_requests WHERE device_code = ?",
        )
        .bind(device_code)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Looks up a request by user-code, restricted to `pending` and
    /// not-yet-expired requests. The partial unique index on
    /// `(user_code) WHERE status = 'pending'` guarantees at most one row
    /// ever matches; `LIMIT 1` is belt-and-suspenders, not a tiebreaker.
    pub async fn get_pending_device_auth_by_user_code(
        &self,
        user_code: &str,
    ) -> Result<Option<DeviceAuthRequest>, DbError> {
        Ok(sqlx::query_as(
            "SELECT * FROM device_auth_requests
             WHERE user_code = ? AND status = 'pending' AND expires_at > ?
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_code)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn mark_device_auth_verified(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<DeviceAuthRequest>, DbError> {
        sqlx::query(
            "UPDATE device_auth_requests SET status = 'verified', user_id = ?, updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(user_id.to_string())
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(sqlx::query_as("SELECT * FROM device_auth_requests WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Conditionally transitions `verified` → `used`. Returns `None` if the
    /// request was not in `verified` state (already used, never verified, or
    /// unknown) — the caller distinguishes those by a separate lookup.
    pub async fn try_mark_device_auth_used(
        &self,
        device_code: &str,
        api_key_id: Uuid,
    ) -> Result<Option<DeviceAuthRequest>, DbError> {
        let result = sqlx::query(
            "UPDATE device_auth_requests SET status = 'used', api_key_id = ?, updated_at = ?
             WHERE device_code = ? AND status = 'verified'",
        )
        .bind(api_key_id.to_string())
        .bind(Utc::now())
        .bind(device_code)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_device_auth_by_device_code(device_code).await
    }

    /// Marks still-pending, now-expired requests as `expired`. Returns the
    /// number of rows transitioned.
    pub async fn sweep_expired_device_auth(&self) -> Result<u64, DbError> {
        let result = sqlx::query(
            "UPDATE device_auth_requests SET status = 'expired', updated_at = ?
             WHERE status = 'pending' AND expires_at <= ?",
        )
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ── Sync cursors ───────────────────────────────────────────────────

    pub async fn upsert_cursor(
        &self,
        project_id: &str,
        client_id: &str,
        last_server_seq: i64,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO sync_cursors (project_id, client_id, last_server_seq, last_sync_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (project_id, client_id)
             DO UPDATE SET last_server_seq = excluded.last_server_seq, last_sync_at = excluded.last_sync_at",
        )
        .bind(project_id)
        .bind(client_id)
        .bind(last_server_seq)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_cursor(
        &self,
        project_id: &str,
        client_id: &str,
    ) -> Result<Option<SyncCursor>, DbError> {
        Ok(sqlx::query_as(
            "SELECT * FROM sync_cursors WHERE project_id = ? AND client_id = ?",
        )
        .bind(project_id)
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn list_cursors(&self, project_id: &str) -> Result<Vec<SyncCursor>, DbError> {
        Ok(
            sqlx::query_as("SELECT * FROM sync_cursors WHERE project_id = ? ORDER BY client_id")
                .bind(project_id)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    // ── Observability events ──────────────────────────────────────────

    pub async fn record_auth_event(&self, email: Option<&str>, kind: &str) -> Result<(), DbError> {
        sqlx::query("INSERT INTO auth_events (email, kind, created_at) VALUES (?, ?, ?)")
            .bind(email)
            .bind(kind)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn record_rate_limit_event(
        &self,
        principal_key: &str,
        endpoint_class: EndpointClass,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO rate_limit_events (principal_key, endpoint_class, created_at) VALUES (?, ?, ?)",
        )
        .bind(principal_key)
        .bind(endpoint_class)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_auth_events(&self, limit: i64) -> Result<Vec<AuthEvent>, DbError> {
        Ok(sqlx::query_as(
            "SELECT * FROM auth_events ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn recent_rate_limit_events(&self, limit: i64) -> Result<Vec<RateLimitEvent>, DbError> {
        Ok(sqlx::query_as(
            "SELECT * FROM rate_limit_events ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn cleanup_auth_events(&self, retention: Duration) -> Result<u64, DbError> {
        let cutoff = Utc::now() - retention;
        let result = sqlx::query("DELETE FROM auth_events WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn cleanup_rate_limit_events(&self, retention: Duration) -> Result<u64, DbError> {
        let cutoff = Utc::now() - retention;
        let result = sqlx::query("DELETE FROM rate_limit_events WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Lightweight liveness probe for `/healthz`.
    pub async fn ping(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> CatalogStore {
        let dir = tempfile::tempdir().unwrap();
        CatalogStore::open(&dir.path().join("server.db"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn first_user_is_implicitly_admin() {
        let db = store().await;
        let first = db.create_user("alice@example.com").await.unwrap();
        assert!(first.is_admin);
        let second = db.create_user("bob@example.com").await.unwrap();
        assert!(!second.is_admin);
    }

    #[tokio::test]
    async fn duplicate_email_rejected() {
        let db = store().await;
        db.create_user("alice@example.com").await.unwrap();
        let err = db.create_user("ALICE@example.com").await.unwrap_err();
        assert!(matches!(err, DbError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn create_project_inserts_owner_membership() {
        let db = store().await;
        let owner = db.create_user("alice@example.com").await.unwrap();
        let project = db
            .create_project("proj_1", "Demo", None, owner.id)
            .await
            .unwrap();
        let membership = db.get_membership(&project.id, owner.id).await.unwrap();
        assert_eq!(membership.unwrap().role, RoleRow::Owner);
    }

    #[tokio::test]
    async fn removing_last_owner_fails() {
        let db = store().await;
        let owner = db.create_user("alice@example.com").await.unwrap();
        let project = db
            .create_project("proj_1", "Demo", None, owner.id)
            .await
            .unwrap();
        let err = db
            .remove_membership(&project.id, owner.id)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::LastOwner));
    }

    #[tokio::test]
    async fn removing_non_last_owner_succeeds() {
        let db = store().await;
        let owner = db.create_user("alice@example.com").await.unwrap();
        let co_owner = db.create_user("bob@example.com").await.unwrap();
        let project = db
            .create_project("proj_1", "Demo", None, owner.id)
            .await
            .unwrap();
        db.add_membership(&project.id, co_owner.id, RoleRow::Owner)
            .await
            .unwrap();
        assert!(db.remove_membership(&project.id, owner.id).await.unwrap());
    }

    #[tokio::test]
    async fn list_projects_admin_paginates_by_id() {
        let db = store().await;
        let owner = db.create_user("alice@example.com").await.unwrap();
        db.create_project("proj_a", "A", None, owner.id).await.unwrap();
        db.create_project("proj_b", "B", None, owner.id).await.unwrap();
        db.create_project("proj_c", "C", None, owner.id).await.unwrap();

        let page1 = db.list_projects_admin(None, 2, false).await.unwrap();
        assert_eq!(page1.len(), 2);
        assert_eq!(page1[0].id, "proj_a");

        let page2 = db
            .list_projects_admin(Some(&page1[1].id), 2, false)
            .await
            .unwrap();
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].id, "proj_c");
    }

    #[tokio::test]
    async fn list_projects_admin_excludes_soft_deleted_unless_requested() {
        let db = store().await;
        let owner = db.create_user("alice@example.com").await.unwrap();
        let project = db
            .create_project("proj_a", "A", None, owner.id)
            .await
            .unwrap();
        db.soft_delete_project(&project.id).await.unwrap();

        assert!(db.list_projects_admin(None, 10, false).await.unwrap().is_empty());
        assert_eq!(db.list_projects_admin(None, 10, true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn api_key_round_trips() {
        let db = store().await;
        let user = db.create_user("alice@example.com").await.unwrap();
        let created = db
            .generate_api_key(user.id, "laptop", "sync", None)
            .await
            .unwrap();
        let (key, verified_user) = db
            .verify_api_key(&created.plaintext)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(key.id, created.record.id);
        assert_eq!(verified_user.id, user.id);
        assert!(db.verify_api_key("sk_bogus").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn device_auth_used_transition_is_single_use() {
        let db = store().await;
        let req = db
            .create_device_auth_request("alice@example.com", "devcode123", "ABCDEF")
            .await
            .unwrap();
        let user = db.create_user("alice@example.com").await.unwrap();
        db.mark_device_auth_verified(req.id, user.id).await.unwrap();
        let key = db
            .generate_api_key(user.id, "cli", "sync", None)
            .await
            .unwrap();
        let first = db
            .try_mark_device_auth_used(&req.device_code, key.record.id)
            .await
            .unwrap();
        assert!(first.is_some());
        let second = db
            .try_mark_device_auth_used(&req.device_code, key.record.id)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn duplicate_pending_user_code_is_rejected() {
        let db = store().await;
        db.create_device_auth_request("alice@example.com", "devcode-a", "ABCDEF")
            .await
            .unwrap();
        let err = db
            .create_device_auth_request("bob@example.com", "devcode-b", "ABCDEF")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn user_code_is_reusable_once_no_longer_pending() {
        let db = store().await;
        let req = db
            .create_device_auth_request("alice@example.com", "devcode-a", "ABCDEF")
            .await
            .unwrap();
        let user = db.create_user("alice@example.com").await.unwrap();
        db.mark_device_auth_verified(req.id, user.id).await.unwrap();
        db.generate_api_key(user.id, "cli", "sync", None).await.unwrap();

        // req is now `verified`, not `pending`, so the code is free again.
        db.create_device_auth_request("bob@example.com", "devcode-b", "ABCDEF")
            .await
            .unwrap();
    }
}
