//! Conflict resolution.
//!
//! The resolver turns a pending [`SyncConflict`] plus a chosen strategy
//! into a [`ResolutionOutcome`] the caller applies: push a record to the
//! remote, overwrite the local copy, or leave the conflict parked for a
//! person to look at. Resolution never does IO; it only decides.

use crate::conflict::{ConflictType, SyncConflict};
use crate::entity::{EntityKind, EntityPayload, EntityRecord};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which side wins a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Keep the local edits, push them to the remote.
    Local,
    /// Take the remote copy, discard local edits.
    Remote,
    /// Combine both payloads via the configured merge function.
    Merge,
    /// Park the conflict until a user picks a side.
    #[default]
    Manual,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::Local => "local",
            ResolutionStrategy::Remote => "remote",
            ResolutionStrategy::Merge => "merge",
            ResolutionStrategy::Manual => "manual",
        }
    }
}

impl std::str::FromStr for ResolutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(ResolutionStrategy::Local),
            "remote" => Ok(ResolutionStrategy::Remote),
            "merge" => Ok(ResolutionStrategy::Merge),
            "manual" => Ok(ResolutionStrategy::Manual),
            other => Err(Error::InvalidPayload(format!(
                "unknown resolution strategy: {other}"
            ))),
        }
    }
}

/// Combines a local and remote payload into one. Must return a payload of
/// the same kind as its inputs.
pub type MergeFn = Arc<dyn Fn(&EntityPayload, &EntityPayload) -> EntityPayload + Send + Sync>;

/// What the caller must do to finish a resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionOutcome {
    /// Push this record to the remote, then mark it synced.
    PushLocal(EntityRecord),
    /// Overwrite the local copy with this record.
    ApplyRemote(EntityRecord),
    /// Push this merged record to the remote and store it locally.
    PushMerged(EntityRecord),
    /// Nothing to do yet; the conflict stays pending.
    AwaitManual,
    /// Delete the local copy; the remote side no longer has it.
    DropLocal { kind: EntityKind, entity_id: String },
}

/// Stateless decision-maker for conflicts.
#[derive(Clone, Default)]
pub struct Resolver {
    default_strategy: ResolutionStrategy,
    merge_fn: Option<MergeFn>,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("default_strategy", &self.default_strategy)
            .field("merge_fn", &self.merge_fn.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl Resolver {
    pub fn new(default_strategy: ResolutionStrategy) -> Self {
        Self {
            default_strategy,
            merge_fn: None,
        }
    }

    pub fn with_merge_fn(mut self, merge_fn: MergeFn) -> Self {
        self.merge_fn = Some(merge_fn);
        self
    }

    pub fn default_strategy(&self) -> ResolutionStrategy {
        self.default_strategy
    }

    /// Decide how `conflict` resolves. `strategy` overrides the default
    /// when given. Already-resolved conflicts are rejected so a stale
    /// resolve request cannot clobber an earlier decision.
    pub fn resolve(
        &self,
        conflict: &SyncConflict,
        strategy: Option<ResolutionStrategy>,
        at: DateTime<Utc>,
    ) -> Result<ResolutionOutcome> {
        if !conflict.is_pending() {
            return Err(Error::ConflictNotFound(conflict.id.clone()));
        }
        let strategy = strategy.unwrap_or(self.default_strategy);

        match strategy {
            ResolutionStrategy::Manual => Ok(ResolutionOutcome::AwaitManual),
            ResolutionStrategy::Local => {
                let mut record = conflict.local.clone();
                record.updated_at = at;
                Ok(ResolutionOutcome::PushLocal(record))
            }
            ResolutionStrategy::Remote => match (&conflict.remote, conflict.conflict_type) {
                (Some(remote), _) => Ok(ResolutionOutcome::ApplyRemote(remote.clone())),
                (None, ConflictType::Missing) => Ok(ResolutionOutcome::DropLocal {
                    kind: conflict.kind,
                    entity_id: conflict.entity_id.clone(),
                }),
                (None, _) => Err(Error::MissingRemoteSide(conflict.id.clone())),
            },
            ResolutionStrategy::Merge => {
                let merge_fn = self.merge_fn.as_ref().ok_or(Error::MergeFnMissing)?;
                let remote = conflict
                    .remote
                    .as_ref()
                    .ok_or_else(|| Error::MissingRemoteSide(conflict.id.clone()))?;
                let merged = merge_fn(&conflict.local.payload, &remote.payload);
                if merged.kind() != conflict.local.payload.kind() {
                    return Err(Error::PayloadKindMismatch {
                        expected: conflict.local.payload.kind(),
                        got: merged.kind(),
                    });
                }
                let mut record = conflict.local.clone();
                record.payload = merged;
                record.updated_at = at;
                Ok(ResolutionOutcome::PushMerged(record))
            }
        }
    }
}
