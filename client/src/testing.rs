//! Shared test double for the remote adapter.

use crate::error::{Result, SyncError};
use crate::remote::{Page, RemoteAdapter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgersync_engine::{EntityKind, EntityRecord};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

/// In-memory [`RemoteAdapter`] with scriptable failures.
#[derive(Default)]
pub(crate) struct MockRemote {
    /// Records served by `list`, keyed by kind.
    records: Mutex<HashMap<EntityKind, Vec<EntityRecord>>>,
    /// Errors returned (in order) before calls start succeeding.
    failures: Mutex<VecDeque<SyncError>>,
    /// Kinds whose listing endpoint answers 404.
    unlisted: Mutex<HashSet<EntityKind>>,
    created: Mutex<Vec<EntityRecord>>,
    updated: Mutex<Vec<EntityRecord>>,
    deleted: Mutex<Vec<String>>,
}

impl MockRemote {
    pub fn seed(&self, kind: EntityKind, records: Vec<EntityRecord>) {
        self.records.lock().unwrap().insert(kind, records);
    }

    pub fn fail_next(&self, err: SyncError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn unlist(&self, kind: EntityKind) {
        self.unlisted.lock().unwrap().insert(kind);
    }

    pub fn created_ids(&self) -> Vec<String> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.id.clone())
            .collect()
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    fn take_failure(&self) -> Option<SyncError> {
        self.failures.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl RemoteAdapter for MockRemote {
    async fn list(
        &self,
        kind: EntityKind,
        since: Option<DateTime<Utc>>,
        page: u32,
        page_size: u32,
    ) -> Result<Page<EntityRecord>> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        if self.unlisted.lock().unwrap().contains(&kind) {
            return Err(SyncError::RemoteRejected {
                status: 404,
                body: "no such collection".to_string(),
            });
        }
        let records = self.records.lock().unwrap();
        let all: Vec<EntityRecord> = records
            .get(&kind)
            .map(|rs| {
                rs.iter()
                    .filter(|r| since.map_or(true, |s| r.updated_at >= s))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let start = (page as usize) * (page_size as usize);
        let items: Vec<EntityRecord> = all
            .iter()
            .skip(start)
            .take(page_size as usize)
            .cloned()
            .collect();
        let has_more = start + items.len() < all.len();
        Ok(Page {
            items,
            page,
            page_size,
            has_more,
        })
    }

    async fn create(&self, _kind: EntityKind, record: &EntityRecord) -> Result<EntityRecord> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let mut server_copy = record.clone();
        server_copy.external_id = Some(format!("srv-{}", record.id));
        self.created.lock().unwrap().push(server_copy.clone());
        Ok(server_copy)
    }

    async fn update(&self, _kind: EntityKind, record: &EntityRecord) -> Result<EntityRecord> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.updated.lock().unwrap().push(record.clone());
        Ok(record.clone())
    }

    async fn delete(&self, _kind: EntityKind, id: &str) -> Result<()> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.deleted.lock().unwrap().push(id.to_string());
        Ok(())
    }
}
