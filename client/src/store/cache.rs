//! Small TTL key/value cache.
//!
//! Holds pagination cursors between interrupted syncs and staleness
//! marks pushed over the realtime channel. Expired entries are dropped
//! on read; `purge_expired_cache` sweeps the rest.

use super::LocalStore;
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};

impl LocalStore {
    pub async fn cache_put(&self, key: &str, value: &str, ttl_minutes: i64) -> Result<()> {
        let expires_at = Utc::now() + Duration::minutes(ttl_minutes);
        sqlx::query(
            "INSERT INTO cache (key, value, expires_at) VALUES (?, ?, ?)
             ON CONFLICT (key) DO UPDATE SET
                 value = excluded.value,
                 expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn cache_get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String, DateTime<Utc>)> =
            sqlx::query_as("SELECT value, expires_at FROM cache WHERE key = ?")
                .bind(key)
                .fetch_optional(self.pool())
                .await?;

        match row {
            Some((value, expires_at)) if expires_at > Utc::now() => Ok(Some(value)),
            Some(_) => {
                sqlx::query("DELETE FROM cache WHERE key = ?")
                    .bind(key)
                    .execute(self.pool())
                    .await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub async fn cache_delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM cache WHERE key = ?")
            .bind(key)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn purge_expired_cache(&self) -> Result<u64> {
        let purged = sqlx::query("DELETE FROM cache WHERE expires_at <= ?")
            .bind(Utc::now())
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_roundtrips() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store.cache_put("cursor:voucher", "7", 30).await.unwrap();
        assert_eq!(
            store.cache_get("cursor:voucher").await.unwrap().as_deref(),
            Some("7")
        );
    }

    #[tokio::test]
    async fn put_overwrites() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store.cache_put("k", "1", 30).await.unwrap();
        store.cache_put("k", "2", 30).await.unwrap();
        assert_eq!(store.cache_get("k").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn expired_entry_is_dropped_on_read() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store.cache_put("k", "v", -1).await.unwrap();
        assert!(store.cache_get("k").await.unwrap().is_none());
        // Gone entirely, not just hidden.
        assert_eq!(store.purge_expired_cache().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn purge_sweeps_only_expired() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store.cache_put("stale", "x", -5).await.unwrap();
        store.cache_put("fresh", "y", 30).await.unwrap();

        assert_eq!(store.purge_expired_cache().await.unwrap(), 1);
        assert_eq!(store.cache_get("fresh").await.unwrap().as_deref(), Some("y"));
    }
}
