use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::SqlitePool;
use sync_db::ProjectHandle;

use crate::applier::EventApplier;
use crate::error::SnapshotError;
use crate::filter::Filter;

const REPLAY_BATCH_SIZE: i64 = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotMeta {
    pub snapshot_seq: i64,
    pub head_seq: i64,
    pub staleness: i64,
    pub entity_counts: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryRow {
    pub entity_type: String,
    pub entity_id: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryPage {
    pub rows: Vec<QueryRow>,
    pub next_cursor: Option<String>,
}

/// Replays a project's event log into a cached, queryable materialized
/// view. Exactly one cached artifact exists per project at a time; a
/// higher-sequence build evicts every lower one.
pub struct SnapshotEngine {
    data_dir: PathBuf,
    applier: Arc<dyn EventApplier>,
}

impl SnapshotEngine {
    #[must_use]
    pub fn new(data_dir: PathBuf, applier: Arc<dyn EventApplier>) -> Self {
        Self { data_dir, applier }
    }

    fn snapshot_dir(&self, project_id: &str) -> PathBuf {
        self.data_dir.join("snapshots").join(project_id)
    }

    async fn current_cached_seq(&self, project_id: &str) -> Result<Option<i64>, SnapshotError> {
        let dir = self.snapshot_dir(project_id);
        if !dir.exists() {
            return Ok(None);
        }
        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut best: Option<i64> = None;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".db") {
                if let Ok(seq) = stem.parse::<i64>() {
                    best = Some(best.map_or(seq, |b: i64| b.max(seq)));
                }
            }
        }
        Ok(best)
    }

    /// Returns the meta summary: cached/head sequence, staleness, and
    /// per-entity-type counts (empty if nothing is cached yet).
    pub async fn meta(
        &self,
        project: &ProjectHandle,
        project_id: &str,
    ) -> Result<SnapshotMeta, SnapshotError> {
        let head_seq = project.head_seq().await?;
        let snapshot_seq = self.current_cached_seq(project_id).await?.unwrap_or(0);
        let entity_counts = if snapshot_seq > 0 {
            let path = self.snapshot_dir(project_id).join(format!("{snapshot_seq}.db"));
            let pool = open_readonly(&path).await?;
            let mut conn = pool.acquire().await?;
            let counts = self.applier.entity_counts(&mut conn).await?;
            pool.close().await;
            counts.into_iter().collect()
        } else {
            BTreeMap::new()
        };
        Ok(SnapshotMeta {
            snapshot_seq,
            head_seq,
            staleness: head_seq - snapshot_seq,
            entity_counts,
        })
    }

    /// Returns the path to a snapshot artifact covering `1..=head_seq`,
    /// building and publishing one if the cache is stale or empty.
    ///
    /// # Errors
    ///
    /// `SnapshotError::NoEvents` if the project's log is empty.
    pub async fn ensure_built(
        &self,
        project: &ProjectHandle,
        project_id: &str,
    ) -> Result<PathBuf, SnapshotError> {
        let head_seq = project.head_seq().await?;
        if head_seq == 0 {
            return Err(SnapshotError::NoEvents);
        }
        if let Some(cached) = self.current_cached_seq(project_id).await? {
            if cached == head_seq {
                return Ok(self.snapshot_dir(project_id).join(format!("{head_seq}.db")));
            }
        }
        self.build(project, project_id, head_seq).await
    }

    async fn build(
        &self,
        project: &ProjectHandle,
        project_id: &str,
        target_seq: i64,
    ) -> Result<PathBuf, SnapshotError> {
        let snapshot_dir = self.snapshot_dir(project_id);
        tokio::fs::create_dir_all(&snapshot_dir).await?;
        // Built outside the cache dir so a crash mid-build never leaves a
        // partial file where `current_cached_seq`/eviction look for one.
        let tmp_dir = self.data_dir.join("snapshot-build").join(project_id);
        tokio::fs::create_dir_all(&tmp_dir).await?;

        let tmp_path = tmp_dir.join(format!("build-{}.db", uuid::Uuid::new_v4()));
        {
            let pool = open_readwrite(&tmp_path).await?;
            let mut conn = pool.acquire().await?;
            self.applier.init_schema(&mut conn).await?;

            let mut from_seq = 0;
            while from_seq < target_seq {
                let to_seq = (from_seq + REPLAY_BATCH_SIZE).min(target_seq);
                let batch = project.read_range(from_seq, to_seq).await?;
                let mut tx = pool.begin().await?;
                self.applier.apply(&mut *tx, &batch).await?;
                tx.commit().await?;
                from_seq = to_seq;
            }
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                .execute(&pool)
                .await?;
            pool.close().await;
        }

        let cache_file = snapshot_dir.join(format!("{target_seq}.db"));
        match self.publish(&tmp_path, &snapshot_dir, target_seq).await {
            Ok(()) => {
                self.evict_other_snapshots(&snapshot_dir, target_seq).await?;
                Ok(cache_file)
            }
            Err(err) => {
                tracing::warn!(error = %err, project_id, target_seq, "snapshot publish failed, serving from temp path");
                Ok(tmp_path)
            }
        }
    }

    async fn publish(
        &self,
        tmp_path: &Path,
        snapshot_dir: &Path,
        target_seq: i64,
    ) -> Result<(), SnapshotError> {
        let staged = snapshot_dir.join(format!("{target_seq}.db.tmp.{}", std::process::id()));
        tokio::fs::copy(tmp_path, &staged).await?;
        tokio::fs::rename(&staged, snapshot_dir.join(format!("{target_seq}.db"))).await?;
        let _ = tokio::fs::remove_file(tmp_path).await;
        Ok(())
    }

    async fn evict_other_snapshots(
        &self,
        snapshot_dir: &Path,
        keep_seq: i64,
    ) -> Result<(), SnapshotError> {
        let keep_name = format!("{keep_seq}.db");
        let mut entries = tokio::fs::read_dir(snapshot_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(".db") && *name != *keep_name {
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }
        Ok(())
    }

    /// Runs the filter grammar against the cached snapshot, building one on
    /// demand if events exist but no cache does.
    ///
    /// # Errors
    ///
    /// `SnapshotError::Unavailable` when neither a cache nor any events
    /// exist; `SnapshotError::InvalidQuery` for a malformed `q`.
    pub async fn query(
        &self,
        project: &ProjectHandle,
        project_id: &str,
        q: Option<&str>,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<QueryPage, SnapshotError> {
        let filter = Filter::parse(q)?;
        let head_seq = project.head_seq().await?;
        let cached = self.current_cached_seq(project_id).await?;
        let path = match cached {
            Some(seq) => self.snapshot_dir(project_id).join(format!("{seq}.db")),
            None if head_seq == 0 => return Err(SnapshotError::Unavailable),
            None => self.ensure_built(project, project_id).await?,
        };

        let pool = open_readonly(&path).await?;
        let rows: Vec<(String, String, String)> =
            sqlx::query_as("SELECT entity_type, entity_id, payload FROM entities")
                .fetch_all(&pool)
                .await?;
        pool.close().await;

        let mut matched: Vec<(String, String, Value)> = rows
            .into_iter()
            .filter_map(|(entity_type, entity_id, payload)| {
                let value: Value = serde_json::from_str(&payload).ok()?;
                filter.matches(&value).then_some((entity_type, entity_id, value))
            })
            .collect();
        matched.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

        let start = match cursor {
            Some(token) => decode_cursor(token)?,
            None => (String::new(), String::new()),
        };
        let mut iter = matched
            .into_iter()
            .skip_while(|(et, eid, _)| cursor.is_some() && (et.clone(), eid.clone()) <= start);

        let mut rows = Vec::with_capacity(limit);
        for _ in 0..limit {
            let Some((entity_type, entity_id, payload)) = iter.next() else {
                break;
            };
            rows.push(QueryRow {
                entity_type,
                entity_id,
                payload,
            });
        }
        let next_cursor = if let Some(last) = rows.last() {
            if iter.next().is_some() {
                Some(encode_cursor(&last.entity_type, &last.entity_id))
            } else {
                None
            }
        } else {
            None
        };

        Ok(QueryPage { rows, next_cursor })
    }
}

fn encode_cursor(entity_type: &str, entity_id: &str) -> String {
    URL_SAFE_NO_PAD.encode(format!("{entity_type}\u{0}{entity_id}"))
}

fn decode_cursor(token: &str) -> Result<(String, String), SnapshotError> {
    let raw = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| SnapshotError::InvalidQuery("malformed cursor".to_owned()))?;
    let raw = String::from_utf8(raw)
        .map_err(|_| SnapshotError::InvalidQuery("malformed cursor".to_owned()))?;
    let mut parts = raw.splitn(2, '\u{0}');
    let entity_type = parts
        .next()
        .ok_or_else(|| SnapshotError::InvalidQuery("malformed cursor".to_owned()))?;
    let entity_id = parts
        .next()
        .ok_or_else(|| SnapshotError::InvalidQuery("malformed cursor".to_owned()))?;
    Ok((entity_type.to_owned(), entity_id.to_owned()))
}

async fn open_readwrite(path: &Path) -> Result<SqlitePool, SnapshotError> {
    let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
        .map_err(SnapshotError::Sql)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .create_if_missing(true);
    Ok(SqlitePool::connect_with(opts).await?)
}

async fn open_readonly(path: &Path) -> Result<SqlitePool, SnapshotError> {
    let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
        .map_err(SnapshotError::Sql)?
        .read_only(true);
    Ok(SqlitePool::connect_with(opts).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::GenericEntityApplier;
    use sync_db::{NewEvent, ProjectDbPool};

    async fn pool_and_project() -> (tempfile::TempDir, Arc<ProjectHandle>, ProjectDbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = ProjectDbPool::new(dir.path().to_path_buf());
        let project = pool.create("proj_1").await.unwrap();
        (dir, project, pool)
    }

    fn event(action_id: i64, entity_id: &str, status: &str) -> NewEvent {
        NewEvent {
            client_action_id: action_id,
            action_type: "upsert".into(),
            entity_type: "issue".into(),
            entity_id: entity_id.into(),
            payload: format!("{{\"status\":\"{status}\"}}"),
            client_ts: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn meta_reports_zero_before_any_build() {
        let (dir, project, _pool) = pool_and_project().await;
        let engine = SnapshotEngine::new(dir.path().to_path_buf(), Arc::new(GenericEntityApplier));
        project
            .push("d1", "s1", &[event(1, "issue-1", "open")])
            .await
            .unwrap();
        let meta = engine.meta(&project, "proj_1").await.unwrap();
        assert_eq!(meta.snapshot_seq, 0);
        assert_eq!(meta.head_seq, 1);
        assert_eq!(meta.staleness, 1);
    }

    #[tokio::test]
    async fn build_publishes_and_evicts_old_versions() {
        let (dir, project, _pool) = pool_and_project().await;
        let engine = SnapshotEngine::new(dir.path().to_path_buf(), Arc::new(GenericEntityApplier));
        project
            .push("d1", "s1", &[event(1, "issue-1", "open"), event(2, "issue-2", "open")])
            .await
            .unwrap();
        let first = engine.ensure_built(&project, "proj_1").await.unwrap();
        assert!(first.ends_with("2.db"));

        project
            .push("d1", "s1", &[event(3, "issue-3", "open")])
            .await
            .unwrap();
        let second = engine.ensure_built(&project, "proj_1").await.unwrap();
        assert!(second.ends_with("3.db"));
        assert!(!first.exists());
        assert!(second.exists());
    }

    #[tokio::test]
    async fn query_without_cache_builds_on_demand() {
        let (dir, project, _pool) = pool_and_project().await;
        let engine = SnapshotEngine::new(dir.path().to_path_buf(), Arc::new(GenericEntityApplier));
        project
            .push("d1", "s1", &[event(1, "issue-1", "open"), event(2, "issue-2", "closed")])
            .await
            .unwrap();
        let page = engine
            .query(&project, "proj_1", None, None, 10)
            .await
            .unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].entity_id, "issue-1");
    }

    #[tokio::test]
    async fn query_with_no_events_is_unavailable() {
        let (dir, project, _pool) = pool_and_project().await;
        let engine = SnapshotEngine::new(dir.path().to_path_buf(), Arc::new(GenericEntityApplier));
        let err = engine.query(&project, "proj_1", None, None, 10).await;
        assert!(matches!(err, Err(SnapshotError::Unavailable)));
    }
}
