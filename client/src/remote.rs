//! Remote adapter: the client's only view of the server.
//!
//! Everything upstream of the store goes through [`RemoteAdapter`], so
//! tests substitute a mock and the ledger-system bridge is just another
//! `HttpRemote` pointed at a different base URL.

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgersync_engine::{EntityKind, EntityRecord};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

/// One page of a listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub has_more: bool,
}

#[async_trait]
pub trait RemoteAdapter: Send + Sync {
    /// Records of `kind` changed since `since`, paged.
    async fn list(
        &self,
        kind: EntityKind,
        since: Option<DateTime<Utc>>,
        page: u32,
        page_size: u32,
    ) -> Result<Page<EntityRecord>>;

    /// Create the record remotely; the returned copy carries the
    /// server-assigned `external_id`.
    async fn create(&self, kind: EntityKind, record: &EntityRecord) -> Result<EntityRecord>;

    async fn update(&self, kind: EntityKind, record: &EntityRecord) -> Result<EntityRecord>;

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<()>;
}

/// REST collection segment per kind.
fn collection(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Company => "companies",
        EntityKind::Voucher => "vouchers",
        EntityKind::Item => "items",
        EntityKind::Party => "parties",
    }
}

/// JSON-over-HTTP implementation with bearer auth.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: Url,
    token: String,
}

impl HttpRemote {
    pub fn new(base_url: Url, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            token: token.into(),
        }
    }

    fn endpoint(&self, kind: EntityKind, id: Option<&str>) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| SyncError::Connectivity("base URL cannot be a base".to_string()))?;
            segments.pop_if_empty().push(collection(kind));
            if let Some(id) = id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SyncError::from_status(status.as_u16(), body))
    }
}

#[async_trait]
impl RemoteAdapter for HttpRemote {
    async fn list(
        &self,
        kind: EntityKind,
        since: Option<DateTime<Utc>>,
        page: u32,
        page_size: u32,
    ) -> Result<Page<EntityRecord>> {
        let mut url = self.endpoint(kind, None)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("page", &page.to_string());
            query.append_pair("pageSize", &page_size.to_string());
            if let Some(since) = since {
                query.append_pair("since", &since.timestamp_millis().to_string());
            }
        }

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let page = Self::check(response).await?.json().await?;
        Ok(page)
    }

    async fn create(&self, kind: EntityKind, record: &EntityRecord) -> Result<EntityRecord> {
        let response = self
            .client
            .post(self.endpoint(kind, None)?)
            .bearer_auth(&self.token)
            .json(record)
            .send()
            .await?;
        let record = Self::check(response).await?.json().await?;
        Ok(record)
    }

    async fn update(&self, kind: EntityKind, record: &EntityRecord) -> Result<EntityRecord> {
        let response = self
            .client
            .put(self.endpoint(kind, Some(&record.id))?)
            .bearer_auth(&self.token)
            .json(record)
            .send()
            .await?;
        let record = Self::check(response).await?.json().await?;
        Ok(record)
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.endpoint(kind, Some(id))?)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let status = response.status();
        // Deleting something already gone is success for our purposes.
        if status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_per_kind() {
        let remote = HttpRemote::new("https://api.example.com/v1".parse().unwrap(), "tok");
        assert_eq!(
            remote.endpoint(EntityKind::Company, None).unwrap().as_str(),
            "https://api.example.com/v1/companies"
        );
        assert_eq!(
            remote
                .endpoint(EntityKind::Voucher, Some("v-1"))
                .unwrap()
                .as_str(),
            "https://api.example.com/v1/vouchers/v-1"
        );
    }

    #[test]
    fn page_deserializes_camel_case() {
        let json = r#"{"items":[],"page":2,"pageSize":100,"hasMore":false}"#;
        let page: Page<EntityRecord> = serde_json::from_str(json).unwrap();
        assert_eq!(page.page, 2);
        assert_eq!(page.page_size, 100);
        assert!(!page.has_more);
    }
}
