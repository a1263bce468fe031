//! Pending-change queue persistence and the dead-letter table.

use super::LocalStore;
use crate::error::Result;
use chrono::{DateTime, Utc};
use ledgersync_engine::{EntityPayload, PendingChange, QueuePolicy};
use sqlx::FromRow;
use tracing::warn;

/// Row shape of the `pending_changes` table. `seq` preserves arrival
/// order for tie-breaking.
#[derive(Debug, FromRow)]
struct StoredChange {
    id: String,
    kind: String,
    entity_id: String,
    action: String,
    payload: Option<String>,
    created_at: DateTime<Utc>,
    retry_count: i64,
    priority: String,
    synced: bool,
}

impl StoredChange {
    fn to_change(&self) -> Result<PendingChange> {
        let payload: Option<EntityPayload> = self
            .payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(PendingChange {
            id: self.id.clone(),
            kind: self.kind.parse().map_err(crate::error::SyncError::Engine)?,
            entity_id: self.entity_id.clone(),
            action: self
                .action
                .parse()
                .map_err(crate::error::SyncError::Engine)?,
            payload,
            created_at: self.created_at,
            retry_count: self.retry_count as u32,
            priority: self
                .priority
                .parse()
                .map_err(crate::error::SyncError::Engine)?,
            synced: self.synced,
        })
    }
}

/// A change that will never be dispatched again.
#[derive(Debug, Clone, FromRow)]
pub struct FailedChange {
    pub id: String,
    pub kind: String,
    pub entity_id: String,
    pub action: String,
    pub payload: Option<String>,
    pub retry_count: i64,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// What `enqueue_change` did about queue bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvictionOutcome {
    pub evicted: u64,
}

impl LocalStore {
    /// Persist a change. When the unsynced backlog is at capacity, the
    /// oldest ~10% are evicted first; the count is returned so callers
    /// can surface the loss.
    pub async fn enqueue_change(
        &self,
        change: &PendingChange,
        policy: &QueuePolicy,
    ) -> Result<EvictionOutcome> {
        let mut tx = self.pool().begin().await?;
        let outcome = Self::enqueue_change_on(&mut tx, change, policy).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Enqueue on an explicit connection; the caller owns the transaction.
    async fn enqueue_change_on(
        conn: &mut sqlx::SqliteConnection,
        change: &PendingChange,
        policy: &QueuePolicy,
    ) -> Result<EvictionOutcome> {
        let backlog: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM pending_changes WHERE synced = 0")
                .fetch_one(&mut *conn)
                .await?;

        let mut outcome = EvictionOutcome::default();
        if policy.overflowed(backlog as usize) {
            let evicted = sqlx::query(
                "DELETE FROM pending_changes WHERE seq IN (
                     SELECT seq FROM pending_changes WHERE synced = 0
                     ORDER BY seq ASC LIMIT ?
                 )",
            )
            .bind(policy.eviction_count() as i64)
            .execute(&mut *conn)
            .await?
            .rows_affected();
            outcome.evicted = evicted;
            warn!(evicted, "offline queue overflow, oldest changes dropped");
        }

        let payload = change
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            "INSERT INTO pending_changes
                 (id, kind, entity_id, action, payload, created_at, retry_count, priority, synced)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&change.id)
        .bind(change.kind.as_str())
        .bind(&change.entity_id)
        .bind(change.action.as_str())
        .bind(payload)
        .bind(change.created_at)
        .bind(change.retry_count as i64)
        .bind(change.priority.as_str())
        .bind(change.synced)
        .execute(&mut *conn)
        .await?;

        Ok(outcome)
    }

    /// Write a local edit and queue its change in one transaction.
    /// Either both land or neither does.
    pub async fn stage_local_change(
        &self,
        record: &ledgersync_engine::EntityRecord,
        change: &PendingChange,
        policy: &QueuePolicy,
    ) -> Result<EvictionOutcome> {
        let mut tx = self.pool().begin().await?;
        Self::upsert_entity_on(&mut tx, record).await?;
        let outcome = Self::enqueue_change_on(&mut tx, change, policy).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Unsynced changes in drain order.
    pub async fn pending_changes(&self) -> Result<Vec<PendingChange>> {
        let rows = sqlx::query_as::<_, StoredChange>(
            "SELECT id, kind, entity_id, action, payload, created_at, retry_count, priority, synced
             FROM pending_changes WHERE synced = 0 ORDER BY seq ASC",
        )
        .fetch_all(self.pool())
        .await?;

        let mut changes = rows
            .iter()
            .map(|r| r.to_change())
            .collect::<Result<Vec<_>>>()?;
        QueuePolicy::sort_for_drain(&mut changes);
        Ok(changes)
    }

    pub async fn pending_count(&self) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM pending_changes WHERE synced = 0")
                .fetch_one(self.pool())
                .await?;
        Ok(count as u64)
    }

    pub async fn mark_change_synced(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE pending_changes SET synced = 1 WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Increment and return the change's retry count.
    pub async fn bump_retry(&self, id: &str) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "UPDATE pending_changes SET retry_count = retry_count + 1
             WHERE id = ? RETURNING retry_count",
        )
        .bind(id)
        .fetch_one(self.pool())
        .await?;
        Ok(count as u32)
    }

    /// Move a change to `failed_changes`. It will never be dispatched
    /// again, but it stays queryable.
    pub async fn dead_letter(&self, id: &str, reason: &str, at: DateTime<Utc>) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query(
            "INSERT INTO failed_changes
                 (id, kind, entity_id, action, payload, created_at, retry_count, priority,
                  reason, failed_at)
             SELECT id, kind, entity_id, action, payload, created_at, retry_count, priority, ?, ?
             FROM pending_changes WHERE id = ?",
        )
        .bind(reason)
        .bind(at)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM pending_changes WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn failed_changes(&self) -> Result<Vec<FailedChange>> {
        let rows = sqlx::query_as::<_, FailedChange>(
            "SELECT id, kind, entity_id, action, payload, retry_count, reason, failed_at
             FROM failed_changes ORDER BY failed_at DESC",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }
}
