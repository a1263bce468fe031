//! Pending changes - local mutations awaiting remote confirmation.
//!
//! A change is created the instant a local mutation happens (offline, or
//! speculatively before the remote confirms). The queue manager is the
//! only mutator of `retry_count` and `synced`.

use crate::{entity::EntityPayload, entity::EntityRecord, ChangeId, EntityId, EntityKind, Error};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What the change does to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "create" => Ok(ChangeAction::Create),
            "update" => Ok(ChangeAction::Update),
            "delete" => Ok(ChangeAction::Delete),
            other => Err(Error::UnknownChangeAction(other.to_string())),
        }
    }
}

/// Dispatch priority. Variant order matters: `High > Medium > Low`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(Error::UnknownPriority(other.to_string())),
        }
    }
}

/// A locally made mutation not yet confirmed by the remote side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    /// Change identifier (not the entity id)
    pub id: ChangeId,
    /// Kind of the target entity
    pub kind: EntityKind,
    /// Target entity id
    pub entity_id: EntityId,
    /// Create, update, or delete
    pub action: ChangeAction,
    /// Payload to push; `None` for deletes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<EntityPayload>,
    /// When the local mutation happened
    pub created_at: DateTime<Utc>,
    /// Dispatch attempts so far; mutated only by the queue manager
    pub retry_count: u32,
    /// Drain priority
    pub priority: Priority,
    /// Flipped true once the remote acknowledged the change
    pub synced: bool,
}

impl PendingChange {
    /// Change that creates `record` remotely.
    pub fn create(
        id: impl Into<ChangeId>,
        record: &EntityRecord,
        priority: Priority,
        at: DateTime<Utc>,
    ) -> Self {
        Self::for_record(id, record, ChangeAction::Create, priority, at)
    }

    /// Change that pushes the current state of `record`.
    pub fn update(
        id: impl Into<ChangeId>,
        record: &EntityRecord,
        priority: Priority,
        at: DateTime<Utc>,
    ) -> Self {
        Self::for_record(id, record, ChangeAction::Update, priority, at)
    }

    /// Change that deletes the entity remotely. Carries no payload.
    pub fn delete(
        id: impl Into<ChangeId>,
        kind: EntityKind,
        entity_id: impl Into<EntityId>,
        priority: Priority,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            entity_id: entity_id.into(),
            action: ChangeAction::Delete,
            payload: None,
            created_at: at,
            retry_count: 0,
            priority,
            synced: false,
        }
    }

    fn for_record(
        id: impl Into<ChangeId>,
        record: &EntityRecord,
        action: ChangeAction,
        priority: Priority,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: record.kind,
            entity_id: record.id.clone(),
            action,
            payload: Some(record.payload.clone()),
            created_at: at,
            retry_count: 0,
            priority,
            synced: false,
        }
    }

    /// Reconstruct the entity record this change would push.
    /// `None` for deletes, which carry no payload.
    pub fn to_record(&self) -> Option<EntityRecord> {
        self.payload.as_ref().map(|payload| EntityRecord {
            id: self.entity_id.clone(),
            kind: self.kind,
            payload: payload.clone(),
            updated_at: self.created_at,
            last_synced_at: None,
            external_id: None,
        })
    }
}
