//! Conflict detection.
//!
//! A conflict pairs the local copy of an entity with whatever the remote
//! currently holds. Detection is a pure function of the two records'
//! timestamps against the local `last_synced_at` watermark, so the same
//! inputs always classify the same way regardless of which sync phase
//! observed them.

use crate::entity::{EntityKind, EntityRecord};
use crate::ConflictId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the local and remote copies disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Both sides edited since the last sync and the edits differ in time.
    DataMismatch,
    /// A never-synced local record collides with one already on the remote.
    Duplicate,
    /// The local record has unsynced edits but the remote no longer has it.
    Missing,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::DataMismatch => "data_mismatch",
            ConflictType::Duplicate => "duplicate",
            ConflictType::Missing => "missing",
        }
    }
}

impl std::str::FromStr for ConflictType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "data_mismatch" => Ok(ConflictType::DataMismatch),
            "duplicate" => Ok(ConflictType::Duplicate),
            "missing" => Ok(ConflictType::Missing),
            other => Err(crate::Error::InvalidPayload(format!(
                "unknown conflict type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Pending,
    Resolved,
}

impl ConflictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStatus::Pending => "pending",
            ConflictStatus::Resolved => "resolved",
        }
    }
}

impl std::str::FromStr for ConflictStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ConflictStatus::Pending),
            "resolved" => Ok(ConflictStatus::Resolved),
            other => Err(crate::Error::InvalidPayload(format!(
                "unknown conflict status: {other}"
            ))),
        }
    }
}

/// A detected disagreement awaiting resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    pub id: ConflictId,
    pub kind: EntityKind,
    pub entity_id: String,
    pub conflict_type: ConflictType,
    /// Local copy at detection time.
    pub local: EntityRecord,
    /// Remote copy at detection time. `None` for [`ConflictType::Missing`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<EntityRecord>,
    pub status: ConflictStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl SyncConflict {
    fn new(
        id: impl Into<ConflictId>,
        conflict_type: ConflictType,
        local: EntityRecord,
        remote: Option<EntityRecord>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: local.kind,
            entity_id: local.id.clone(),
            conflict_type,
            local,
            remote,
            status: ConflictStatus::Pending,
            created_at: at,
            resolved_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ConflictStatus::Pending
    }

    pub fn mark_resolved(&mut self, at: DateTime<Utc>) {
        self.status = ConflictStatus::Resolved;
        self.resolved_at = Some(at);
    }
}

/// Classify a local/remote pair seen during a pull. Returns `None` when
/// the remote copy can be applied (or ignored) without losing local work.
///
/// A record that has never synced cannot share a watermark with the
/// remote, so any remote counterpart is a [`ConflictType::Duplicate`].
/// Otherwise both sides must have moved past `last_synced_at`, and at
/// different instants, for a [`ConflictType::DataMismatch`].
pub fn detect(
    id: impl Into<ConflictId>,
    local: &EntityRecord,
    remote: &EntityRecord,
    at: DateTime<Utc>,
) -> Option<SyncConflict> {
    let Some(last_synced) = local.last_synced_at else {
        return Some(SyncConflict::new(
            id,
            ConflictType::Duplicate,
            local.clone(),
            Some(remote.clone()),
            at,
        ));
    };

    let local_moved = local.updated_at > last_synced;
    let remote_moved = remote.updated_at > last_synced;
    if local_moved && remote_moved && local.updated_at != remote.updated_at {
        return Some(SyncConflict::new(
            id,
            ConflictType::DataMismatch,
            local.clone(),
            Some(remote.clone()),
            at,
        ));
    }
    None
}

/// Classify a local record whose entity the remote no longer returns.
/// Only a previously-synced record with unsynced edits conflicts; a
/// never-synced record simply has not been pushed yet, and a clean one
/// was deleted remotely and can be dropped.
pub fn detect_missing(
    id: impl Into<ConflictId>,
    local: &EntityRecord,
    at: DateTime<Utc>,
) -> Option<SyncConflict> {
    if local.last_synced_at.is_some() && local.is_dirty() {
        return Some(SyncConflict::new(
            id,
            ConflictType::Missing,
            local.clone(),
            None,
            at,
        ));
    }
    None
}
