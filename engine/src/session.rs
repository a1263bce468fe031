//! Sync session bookkeeping.
//!
//! A session records one full pull cycle: per-phase counters, errors
//! carried to completion, and a terminal status. Sessions are plain data;
//! the orchestration that feeds them lives in the client crate.

use crate::entity::EntityKind;
use crate::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Syncing,
    Completed,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Syncing => "syncing",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Error)
    }
}

/// An error the session survived (or died on).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionError {
    /// Phase the error occurred in, when attributable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntityKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub message: String,
}

/// Per-phase tallies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseCounts {
    /// Records the remote returned for this phase.
    pub pulled: u64,
    /// Records written (or updated) locally.
    pub upserted: u64,
    /// Conflicts detected and parked.
    pub conflicts: u64,
    /// Records that failed to apply.
    pub failed: u64,
    /// Records skipped (phase unavailable or record unusable).
    pub skipped: u64,
}

/// Progress notification emitted while a phase runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub kind: EntityKind,
    pub processed: u64,
    /// Total for the phase when the remote reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// One pull cycle from start to terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSession {
    pub id: SessionId,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Counters keyed by phase, in phase order.
    pub phases: BTreeMap<EntityKind, PhaseCounts>,
    /// Running count of records the remote returned across phases.
    pub total_items: u64,
    /// Running count of records applied, one increment per record even
    /// on duplicate delivery.
    pub processed_items: u64,
    pub errors: Vec<SessionError>,
    /// True when the session was requested with force (ignore throttle).
    pub forced: bool,
}

impl SyncSession {
    pub fn begin(id: impl Into<SessionId>, forced: bool, at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            status: SessionStatus::Syncing,
            started_at: at,
            finished_at: None,
            phases: BTreeMap::new(),
            total_items: 0,
            processed_items: 0,
            errors: Vec::new(),
            forced,
        }
    }

    /// Counter slot for a phase, created on first touch.
    pub fn phase_mut(&mut self, kind: EntityKind) -> &mut PhaseCounts {
        self.phases.entry(kind).or_default()
    }

    pub fn record_error(
        &mut self,
        kind: Option<EntityKind>,
        entity_id: Option<String>,
        message: impl Into<String>,
    ) {
        self.errors.push(SessionError {
            kind,
            entity_id,
            message: message.into(),
        });
    }

    /// A session with recoverable errors still completes; only abort paths
    /// call [`SyncSession::fail`].
    pub fn complete(&mut self, at: DateTime<Utc>) {
        self.status = SessionStatus::Completed;
        self.finished_at = Some(at);
    }

    pub fn fail(&mut self, message: impl Into<String>, at: DateTime<Utc>) {
        self.record_error(None, None, message);
        self.status = SessionStatus::Error;
        self.finished_at = Some(at);
    }

    pub fn total_pulled(&self) -> u64 {
        self.phases.values().map(|c| c.pulled).sum()
    }

    pub fn total_conflicts(&self) -> u64 {
        self.phases.values().map(|c| c.conflicts).sum()
    }

    /// One-line summary for logs: `companies 12/12, vouchers 40/38+2c`.
    pub fn summary(&self) -> String {
        let mut parts = Vec::with_capacity(self.phases.len());
        for (kind, counts) in &self.phases {
            let mut part = format!("{kind} {}/{}", counts.pulled, counts.upserted);
            if counts.conflicts > 0 {
                part.push_str(&format!("+{}c", counts.conflicts));
            }
            if counts.failed > 0 {
                part.push_str(&format!("+{}f", counts.failed));
            }
            parts.push(part);
        }
        if parts.is_empty() {
            "no phases ran".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Bounded record of recent sessions, newest first.
#[derive(Debug, Clone, Default)]
pub struct SessionHistory {
    sessions: VecDeque<SyncSession>,
    capacity: usize,
}

impl SessionHistory {
    pub const DEFAULT_CAPACITY: usize = 50;

    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: VecDeque::with_capacity(capacity.min(Self::DEFAULT_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, session: SyncSession) {
        if self.sessions.len() == self.capacity {
            self.sessions.pop_back();
        }
        self.sessions.push_front(session);
    }

    pub fn latest(&self) -> Option<&SyncSession> {
        self.sessions.front()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SyncSession> {
        self.sessions.iter()
    }
}
