//! Conflict persistence.

use super::LocalStore;
use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use ledgersync_engine::{ConflictStatus, ConflictType, EntityRecord, SyncConflict};
use sqlx::FromRow;

#[derive(Debug, FromRow)]
struct StoredConflict {
    id: String,
    kind: String,
    entity_id: String,
    conflict_type: String,
    local: String,
    remote: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl StoredConflict {
    fn to_conflict(&self) -> Result<SyncConflict> {
        let local: EntityRecord = serde_json::from_str(&self.local)?;
        let remote: Option<EntityRecord> =
            self.remote.as_deref().map(serde_json::from_str).transpose()?;
        let conflict_type: ConflictType =
            self.conflict_type.parse().map_err(SyncError::Engine)?;
        let status: ConflictStatus = self.status.parse().map_err(SyncError::Engine)?;
        Ok(SyncConflict {
            id: self.id.clone(),
            kind: self.kind.parse().map_err(SyncError::Engine)?,
            entity_id: self.entity_id.clone(),
            conflict_type,
            local,
            remote,
            status,
            created_at: self.created_at,
            resolved_at: self.resolved_at,
        })
    }
}

impl LocalStore {
    pub async fn add_conflict(&self, conflict: &SyncConflict) -> Result<()> {
        let local = serde_json::to_string(&conflict.local)?;
        let remote = conflict
            .remote
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            "INSERT OR REPLACE INTO conflicts
                 (id, kind, entity_id, conflict_type, local, remote, status, created_at,
                  resolved_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&conflict.id)
        .bind(conflict.kind.as_str())
        .bind(&conflict.entity_id)
        .bind(conflict.conflict_type.as_str())
        .bind(local)
        .bind(remote)
        .bind(conflict.status.as_str())
        .bind(conflict.created_at)
        .bind(conflict.resolved_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_conflict(&self, id: &str) -> Result<Option<SyncConflict>> {
        let row = sqlx::query_as::<_, StoredConflict>(
            "SELECT id, kind, entity_id, conflict_type, local, remote, status, created_at,
                    resolved_at
             FROM conflicts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| r.to_conflict()).transpose()
    }

    pub async fn pending_conflicts(&self) -> Result<Vec<SyncConflict>> {
        let rows = sqlx::query_as::<_, StoredConflict>(
            "SELECT id, kind, entity_id, conflict_type, local, remote, status, created_at,
                    resolved_at
             FROM conflicts WHERE status = 'pending' ORDER BY created_at ASC",
        )
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(|r| r.to_conflict()).collect()
    }

    /// Flip a pending conflict to resolved. Fails with `ConflictNotFound`
    /// for unknown ids and for conflicts already resolved, so a stale
    /// resolve cannot apply twice.
    pub async fn resolve_conflict_row(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let affected = sqlx::query(
            "UPDATE conflicts SET status = 'resolved', resolved_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(at)
        .bind(id)
        .execute(self.pool())
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(SyncError::ConflictNotFound(id.to_string()));
        }
        Ok(())
    }
}
