//! Entity replica operations.

use super::LocalStore;
use crate::error::Result;
use chrono::{DateTime, Utc};
use ledgersync_engine::{EntityKind, EntityPayload, EntityRecord};
use sqlx::FromRow;

/// Row shape of the `entities` table.
#[derive(Debug, FromRow)]
struct StoredEntity {
    id: String,
    kind: String,
    payload: String,
    updated_at: DateTime<Utc>,
    last_synced_at: Option<DateTime<Utc>>,
    external_id: Option<String>,
}

impl StoredEntity {
    fn to_record(&self) -> Result<EntityRecord> {
        let kind: EntityKind = self.kind.parse().map_err(crate::error::SyncError::Engine)?;
        let payload: EntityPayload = serde_json::from_str(&self.payload)?;
        Ok(EntityRecord {
            id: self.id.clone(),
            kind,
            payload,
            updated_at: self.updated_at,
            last_synced_at: self.last_synced_at,
            external_id: self.external_id.clone(),
        })
    }
}

impl LocalStore {
    /// Insert or replace the local copy of a record. Idempotent.
    pub async fn upsert_entity(&self, record: &EntityRecord) -> Result<()> {
        let mut conn = self.pool().acquire().await?;
        Self::upsert_entity_on(&mut conn, record).await
    }

    /// Upsert on an explicit connection so callers can scope the write
    /// inside a larger transaction.
    pub(super) async fn upsert_entity_on(
        conn: &mut sqlx::SqliteConnection,
        record: &EntityRecord,
    ) -> Result<()> {
        let payload = serde_json::to_string(&record.payload)?;
        sqlx::query(
            r#"
            INSERT INTO entities (id, kind, payload, updated_at, last_synced_at, external_id)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (kind, id) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at,
                last_synced_at = excluded.last_synced_at,
                external_id = COALESCE(excluded.external_id, entities.external_id)
            "#,
        )
        .bind(&record.id)
        .bind(record.kind.as_str())
        .bind(payload)
        .bind(record.updated_at)
        .bind(record.last_synced_at)
        .bind(&record.external_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn get_entity(&self, kind: EntityKind, id: &str) -> Result<Option<EntityRecord>> {
        let row = sqlx::query_as::<_, StoredEntity>(
            "SELECT id, kind, payload, updated_at, last_synced_at, external_id
             FROM entities WHERE kind = ? AND id = ?",
        )
        .bind(kind.as_str())
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        row.map(|r| r.to_record()).transpose()
    }

    pub async fn mark_entity_synced(
        &self,
        kind: EntityKind,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE entities SET last_synced_at = ? WHERE kind = ? AND id = ?")
            .bind(at)
            .bind(kind.as_str())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Remove the local copy. Used when a Missing conflict resolves in
    /// the remote's favor.
    pub async fn delete_entity(&self, kind: EntityKind, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM entities WHERE kind = ? AND id = ?")
            .bind(kind.as_str())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// All local records of one kind. Used to spot records the remote
    /// stopped returning.
    pub async fn entities(&self, kind: EntityKind) -> Result<Vec<EntityRecord>> {
        let rows = sqlx::query_as::<_, StoredEntity>(
            "SELECT id, kind, payload, updated_at, last_synced_at, external_id
             FROM entities WHERE kind = ? ORDER BY id ASC",
        )
        .bind(kind.as_str())
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(|r| r.to_record()).collect()
    }

    pub async fn entity_count(&self, kind: EntityKind) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities WHERE kind = ?")
            .bind(kind.as_str())
            .fetch_one(self.pool())
            .await?;
        Ok(count as u64)
    }
}
