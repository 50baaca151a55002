use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub verified_at: Option<DateTime<Utc>>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub hash: String,
    pub prefix: String,
    pub name: String,
    pub scopes: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Returned exactly once, at creation time.
#[derive(Debug, Clone, Serialize)]
pub struct NewApiKey {
    pub record: ApiKey,
    pub plaintext: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Project {
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RoleRow {
    Owner,
    Writer,
    Reader,
}

impl From<RoleRow> for sync_security::Role {
    fn from(r: RoleRow) -> Self {
        match r {
            RoleRow::Owner => sync_security::Role::Owner,
            RoleRow::Writer => sync_security::Role::Writer,
            RoleRow::Reader => sync_security::Role::Reader,
        }
    }
}

impl From<sync_security::Role> for RoleRow {
    fn from(r: sync_security::Role) -> Self {
        match r {
            sync_security::Role::Owner => RoleRow::Owner,
            sync_security::Role::Writer => RoleRow::Writer,
            sync_security::Role::Reader => RoleRow::Reader,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Membership {
    pub project_id: String,
    pub user_id: Uuid,
    pub role: RoleRow,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeviceAuthStatus {
    Pending,
    Verified,
    Used,
    Expired,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeviceAuthRequest {
    pub id: Uuid,
    pub email: String,
    pub device_code: String,
    pub user_code: String,
    pub status: DeviceAuthStatus,
    pub user_id: Option<Uuid>,
    pub api_key_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    pub server_seq: i64,
    pub device_id: String,
    pub session_id: String,
    pub client_action_id: i64,
    pub action_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub payload: String,
    pub client_ts: DateTime<Utc>,
    pub server_ts: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SyncCursor {
    pub project_id: String,
    pub client_id: String,
    pub last_server_seq: i64,
    pub last_sync_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EndpointClass {
    Auth,
    Push,
    Pull,
    Other,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuthEvent {
    pub id: i64,
    pub email: Option<String>,
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RateLimitEvent {
    pub id: i64,
    pub principal_key: String,
    pub endpoint_class: EndpointClass,
    pub created_at: DateTime<Utc>,
}

/// Fixed allow-list from the data model (§3 Event).
pub const ALLOWED_ENTITY_TYPES: &[&str] =
    &["issue", "comment", "label", "attachment", "project_meta"];
