use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::sync::RwLock;

use crate::error::DbError;
use crate::models::{Event, ALLOWED_ENTITY_TYPES};

/// One event as submitted by a client, before a server sequence is assigned.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub client_action_id: i64,
    pub action_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub payload: String,
    pub client_ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted { client_action_id: i64, server_seq: i64 },
    Duplicate { client_action_id: i64, server_seq: i64 },
}

#[derive(Debug, Clone, Default)]
pub struct PushResult {
    pub accepted: usize,
    pub outcomes: Vec<PushOutcome>,
}

#[derive(Debug, Clone)]
pub struct PullResult {
    pub events: Vec<Event>,
    pub last_server_seq: i64,
    pub has_more: bool,
}

#[derive(Debug, Clone)]
pub struct StatusResult {
    pub count: i64,
    pub max_server_seq: i64,
    pub latest_event_at: Option<DateTime<Utc>>,
}

/// A single project's event-log database. Opened with `max_connections(1)`
/// so every write is serialized on one connection, matching the
/// single-writer discipline the catalog store also follows.
#[derive(Clone)]
pub struct ProjectHandle {
    pool: SqlitePool,
}

impl ProjectHandle {
    async fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .foreign_keys(true)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        let handle = Self { pool };
        handle.migrate().await?;
        Ok(handle)
    }

    async fn migrate(&self) -> Result<(), DbError> {
        for stmt in include_str!("migrations/002_events.sql").split(';') {
            let stmt = stmt.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(&self.pool).await?;
            }
        }
        Ok(())
    }

    /// Appends a batch of events with at-most-once semantics keyed on
    /// `(device_id, session_id, client_action_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if any event names an entity type outside the
    /// allow-list, or if the underlying transaction fails.
    pub async fn push(
        &self,
        device_id: &str,
        session_id: &str,
        events: &[NewEvent],
    ) -> Result<PushResult, DbError> {
        for event in events {
            if !ALLOWED_ENTITY_TYPES.contains(&event.entity_type.as_str()) {
                return Err(DbError::Sql(sqlx::Error::Protocol(format!(
                    "unknown entity type {}",
                    event.entity_type
                ))));
            }
        }

        let mut tx = self.pool.begin().await?;
        let mut result = PushResult::default();
        for event in events {
            let existing: Option<(i64,)> = sqlx::query_as(
                "SELECT server_seq FROM events WHERE device_id = ? AND session_id = ? AND client_action_id = ?",
            )
            .bind(device_id)
            .bind(session_id)
            .bind(event.client_action_id)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some((server_seq,)) = existing {
                result.outcomes.push(PushOutcome::Duplicate {
                    client_action_id: event.client_action_id,
                    server_seq,
                });
                continue;
            }

            let now = Utc::now();
            let inserted = sqlx::query(
                "INSERT INTO events
                 (device_id, session_id, client_action_id, action_type, entity_type, entity_id, payload, client_ts, server_ts)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(device_id)
            .bind(session_id)
            .bind(event.client_action_id)
            .bind(&event.action_type)
            .bind(&event.entity_type)
            .bind(&event.entity_id)
            .bind(&event.payload)
            .bind(event.client_ts)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            let server_seq = inserted.last_insert_rowid();
            result.accepted += 1;
            result.outcomes.push(PushOutcome::Accepted {
                client_action_id: event.client_action_id,
                server_seq,
            });
        }
        tx.commit().await?;
        Ok(result)
    }

    /// Returns events with `server_seq > after_server_seq`, ascending, up to
    /// `limit`, excluding `exclude_client`'s own events.
    pub async fn pull(
        &self,
        after_server_seq: i64,
        limit: i64,
        exclude_client: Option<&str>,
    ) -> Result<PullResult, DbError> {
        let events: Vec<Event> = sqlx::query_as(
            "SELECT * FROM events
             WHERE server_seq > ? AND (? IS NULL OR device_id != ?)
             ORDER BY server_seq ASC LIMIT ?",
        )
        .bind(after_server_seq)
        .bind(exclude_client)
        .bind(exclude_client)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let last_server_seq = events.last().map_or(after_server_seq, |e| e.server_seq);
        let fetched = i64::try_from(events.len()).unwrap_or(i64::MAX);
        let has_more: bool = if fetched == limit {
            let (count,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM events WHERE server_seq > ? AND (? IS NULL OR device_id != ?)",
            )
            .bind(last_server_seq)
            .bind(exclude_client)
            .bind(exclude_client)
            .fetch_one(&self.pool)
            .await?;
            count > 0
        } else {
            false
        };

        Ok(PullResult {
            events,
            last_server_seq,
            has_more,
        })
    }

    pub async fn status(&self) -> Result<StatusResult, DbError> {
        let row: (i64, Option<i64>, Option<DateTime<Utc>>) = sqlx::query_as(
            "SELECT COUNT(*), MAX(server_seq), MAX(server_ts) FROM events",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(StatusResult {
            count: row.0,
            max_server_seq: row.1.unwrap_or(0),
            latest_event_at: row.2,
        })
    }

    /// Current tip (`0` for an empty log).
    pub async fn head_seq(&self) -> Result<i64, DbError> {
        Ok(self.status().await?.max_server_seq)
    }

    /// Reads events `from_seq..=to_seq` in ascending order, for snapshot replay.
    pub async fn read_range(&self, from_seq: i64, to_seq: i64) -> Result<Vec<Event>, DbError> {
        Ok(sqlx::query_as(
            "SELECT * FROM events WHERE server_seq > ? AND server_seq <= ? ORDER BY server_seq ASC",
        )
        .bind(from_seq)
        .bind(to_seq)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Filtered event listing for the admin events endpoint. Builds the
    /// `WHERE` clause dynamically from whichever filters are set.
    pub async fn query_admin(&self, filter: &EventFilter) -> Result<Vec<Event>, DbError> {
        let mut builder: sqlx::QueryBuilder<'_, sqlx::Sqlite> =
            sqlx::QueryBuilder::new("SELECT * FROM events WHERE 1 = 1");
        if let Some(entity_type) = &filter.entity_type {
            builder.push(" AND entity_type = ").push_bind(entity_type);
        }
        if let Some(action_type) = &filter.action_type {
            builder.push(" AND action_type = ").push_bind(action_type);
        }
        if let Some(device_id) = &filter.device_id {
            builder.push(" AND device_id = ").push_bind(device_id);
        }
        if let Some(session_id) = &filter.session_id {
            builder.push(" AND session_id = ").push_bind(session_id);
        }
        if let Some(entity_id) = &filter.entity_id {
            builder.push(" AND entity_id = ").push_bind(entity_id);
        }
        if let Some(from) = filter.from {
            builder.push(" AND server_ts >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            builder.push(" AND server_ts <= ").push_bind(to);
        }
        if let Some(after_seq) = filter.after_seq {
            builder.push(" AND server_seq > ").push_bind(after_seq);
        }
        builder
            .push(" ORDER BY server_seq ASC LIMIT ")
            .push_bind(filter.limit);
        Ok(builder
            .build_query_as::<Event>()
            .fetch_all(&self.pool)
            .await?)
    }
}

/// Filters accepted by the admin events endpoint (all optional).
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub entity_type: Option<String>,
    pub action_type: Option<String>,
    pub device_id: Option<String>,
    pub session_id: Option<String>,
    pub entity_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub after_seq: Option<i64>,
    pub limit: i64,
}

fn event_db_path(data_dir: &Path, project_id: &str) -> PathBuf {
    data_dir.join(project_id).join("events.db")
}

/// Lazily-opened map from project id to that project's event-log database.
/// Guarded by a read-write lock; writers only hold it during open/create.
pub struct ProjectDbPool {
    data_dir: PathBuf,
    handles: RwLock<HashMap<String, Arc<ProjectHandle>>>,
}

impl ProjectDbPool {
    #[must_use]
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the handle for `project_id`. Fails with
    /// [`DbError::ProjectNotFound`] if no database file exists yet — callers
    /// must have created the project first.
    pub async fn get(&self, project_id: &str) -> Result<Arc<ProjectHandle>, DbError> {
        if let Some(handle) = self.handles.read().await.get(project_id) {
            return Ok(handle.clone());
        }
        let mut handles = self.handles.write().await;
        if let Some(handle) = handles.get(project_id) {
            return Ok(handle.clone());
        }
        let path = event_db_path(&self.data_dir, project_id);
        if !path.exists() {
            return Err(DbError::ProjectNotFound(project_id.to_owned()));
        }
        let handle = Arc::new(ProjectHandle::open(&path).await?);
        handles.insert(project_id.to_owned(), handle.clone());
        Ok(handle)
    }

    /// Creates (or returns the existing handle for) `project_id`'s database.
    pub async fn create(&self, project_id: &str) -> Result<Arc<ProjectHandle>, DbError> {
        if let Some(handle) = self.handles.read().await.get(project_id) {
            return Ok(handle.clone());
        }
        let mut handles = self.handles.write().await;
        if let Some(handle) = handles.get(project_id) {
            return Ok(handle.clone());
        }
        let path = event_db_path(&self.data_dir, project_id);
        let handle = Arc::new(ProjectHandle::open(&path).await?);
        handles.insert(project_id.to_owned(), handle.clone());
        Ok(handle)
    }

    /// Drops every open handle, letting sqlx perform its WAL checkpoint on
    /// close of the last clone.
    pub async fn close_all(&self) {
        let mut handles = self.handles.write().await;
        for (project_id, handle) in handles.drain() {
            handle.pool.close().await;
            tracing::debug!(project_id, "closed project database");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_event(client_action_id: i64) -> NewEvent {
        NewEvent {
            client_action_id,
            action_type: "create".into(),
            entity_type: "issue".into(),
            entity_id: format!("issue-{client_action_id}"),
            payload: "{}".into(),
            client_ts: Utc::now(),
        }
    }

    async fn handle() -> ProjectHandle {
        let dir = tempfile::tempdir().unwrap();
        ProjectHandle::open(&dir.path().join("events.db"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn push_assigns_dense_monotonic_sequence() {
        let h = handle().await;
        let events = vec![new_event(1), new_event(2), new_event(3)];
        let result = h.push("d1", "s1", &events).await.unwrap();
        assert_eq!(result.accepted, 3);
        let seqs: Vec<i64> = result
            .outcomes
            .iter()
            .map(|o| match o {
                PushOutcome::Accepted { server_seq, .. } => *server_seq,
                PushOutcome::Duplicate { server_seq, .. } => *server_seq,
            })
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn push_is_idempotent_on_replay() {
        let h = handle().await;
        let events = vec![new_event(1), new_event(2)];
        h.push("d1", "s1", &events).await.unwrap();
        let replay = h.push("d1", "s1", &events).await.unwrap();
        assert_eq!(replay.accepted, 0);
        assert!(replay
            .outcomes
            .iter()
            .all(|o| matches!(o, PushOutcome::Duplicate { .. })));
    }

    #[tokio::test]
    async fn pull_excludes_originating_device_and_paginates() {
        let h = handle().await;
        h.push("d1", "s1", &[new_event(1), new_event(2), new_event(3)])
            .await
            .unwrap();
        h.push("d2", "s1", &[new_event(1), new_event(2)])
            .await
            .unwrap();

        let excluded = h.pull(0, 10, Some("d1")).await.unwrap();
        assert_eq!(excluded.events.len(), 2);

        let paged = h.pull(0, 2, None).await.unwrap();
        assert_eq!(paged.events.len(), 2);
        assert!(paged.has_more);
        assert_eq!(paged.last_server_seq, 2);
    }

    #[tokio::test]
    async fn unknown_entity_type_rejected() {
        let h = handle().await;
        let mut event = new_event(1);
        event.entity_type = "bogus".into();
        assert!(h.push("d1", "s1", &[event]).await.is_err());
    }

    #[tokio::test]
    async fn query_admin_filters_by_entity_type_and_after_seq() {
        let h = handle().await;
        let mut comment = new_event(2);
        comment.entity_type = "comment".into();
        h.push("d1", "s1", &[new_event(1), comment, new_event(3)])
            .await
            .unwrap();
        let filter = EventFilter {
            entity_type: Some("issue".into()),
            limit: 10,
            ..Default::default()
        };
        let rows = h.query_admin(&filter).await.unwrap();
        assert_eq!(rows.len(), 2);

        let filter = EventFilter {
            after_seq: Some(1),
            limit: 10,
            ..Default::default()
        };
        let rows = h.query_admin(&filter).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|e| e.server_seq > 1));
    }
}
