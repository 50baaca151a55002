use async_trait::async_trait;
use sqlx::SqliteConnection;
use sync_db::Event;

use crate::error::SnapshotError;

/// The seam between the snapshot engine and entity-specific reducers.
///
/// Given an initialized schema and events in ascending `server_seq` order,
/// an applier must produce the same resulting tables regardless of how the
/// events are batched. The engine does not interpret payloads itself.
#[async_trait]
pub trait EventApplier: Send + Sync {
    /// Creates whatever tables this applier needs in a freshly-created
    /// snapshot database.
    async fn init_schema(&self, conn: &mut SqliteConnection) -> Result<(), SnapshotError>;

    /// Applies one batch of events, in order, within the caller's
    /// transaction.
    async fn apply(
        &self,
        conn: &mut SqliteConnection,
        events: &[Event],
    ) -> Result<(), SnapshotError>;

    /// Per-entity-type row counts, for the snapshot meta endpoint.
    async fn entity_counts(
        &self,
        conn: &mut SqliteConnection,
    ) -> Result<Vec<(String, i64)>, SnapshotError>;
}

/// Generic applier sufficient to exercise every testable property without a
/// product-specific reducer: one row per `(entity_type, entity_id)`,
/// last-write-wins by ascending `server_seq`.
pub struct GenericEntityApplier;

#[async_trait]
impl EventApplier for GenericEntityApplier {
    async fn init_schema(&self, conn: &mut SqliteConnection) -> Result<(), SnapshotError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS entities (
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                updated_at_seq INTEGER NOT NULL,
                PRIMARY KEY (entity_type, entity_id)
            )",
        )
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn apply(
        &self,
        conn: &mut SqliteConnection,
        events: &[Event],
    ) -> Result<(), SnapshotError> {
        for event in events {
            sqlx::query(
                "INSERT INTO entities (entity_type, entity_id, payload, updated_at_seq)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT (entity_type, entity_id) DO UPDATE SET
                     payload = excluded.payload,
                     updated_at_seq = excluded.updated_at_seq
                 WHERE excluded.updated_at_seq > entities.updated_at_seq",
            )
            .bind(&event.entity_type)
            .bind(&event.entity_id)
            .bind(&event.payload)
            .bind(event.server_seq)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    async fn entity_counts(
        &self,
        conn: &mut SqliteConnection,
    ) -> Result<Vec<(String, i64)>, SnapshotError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT entity_type, COUNT(*) FROM entities GROUP BY entity_type",
        )
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }
}
