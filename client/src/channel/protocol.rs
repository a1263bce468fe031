//! Realtime channel message protocol.
//!
//! Every frame is a JSON envelope `{type, data, timestamp}`. Type names
//! are kebab-case on the wire (`sync-request`, `data-update`).

use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use ledgersync_engine::{EntityKind, PendingChange, SyncConflict};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire wrapper around every message in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// Command carried by a `sync-request` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncCommand {
    Start,
    Stop,
    Force,
}

/// Messages the server pushes to us.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Server asks the client to run (or stop) a sync.
    SyncRequest { command: SyncCommand },
    /// An entity changed on another client; ours is stale.
    DataUpdate { kind: EntityKind, entity_id: String },
    /// Server-side conflict detection pushed down to us.
    SyncConflict { conflict: Box<SyncConflict> },
}

#[derive(Debug, Deserialize)]
struct SyncRequestData {
    command: SyncCommand,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataUpdateData {
    kind: EntityKind,
    entity_id: String,
}

impl ServerEvent {
    /// Decode an inbound envelope. Unknown types are `Ok(None)` so newer
    /// servers can add frames without breaking older clients.
    pub fn from_envelope(envelope: &Envelope) -> Result<Option<Self>> {
        let event = match envelope.kind.as_str() {
            "sync-request" => {
                let data: SyncRequestData = serde_json::from_value(envelope.data.clone())?;
                Some(ServerEvent::SyncRequest {
                    command: data.command,
                })
            }
            "data-update" => {
                let data: DataUpdateData = serde_json::from_value(envelope.data.clone())?;
                Some(ServerEvent::DataUpdate {
                    kind: data.kind,
                    entity_id: data.entity_id,
                })
            }
            "sync-conflict" => {
                let conflict: SyncConflict = serde_json::from_value(envelope.data.clone())?;
                Some(ServerEvent::SyncConflict {
                    conflict: Box::new(conflict),
                })
            }
            _ => None,
        };
        Ok(event)
    }
}

/// Messages we send to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Announce a locally queued change.
    SyncData { change: PendingChange },
    Subscribe { kind: EntityKind },
    Unsubscribe { kind: EntityKind },
    Heartbeat,
}

impl ClientEvent {
    pub fn into_envelope(self, at: DateTime<Utc>) -> Result<Envelope> {
        let (kind, data) = match self {
            ClientEvent::SyncData { change } => ("sync-data", serde_json::to_value(&change)?),
            ClientEvent::Subscribe { kind } => {
                ("subscribe", serde_json::json!({ "kind": kind }))
            }
            ClientEvent::Unsubscribe { kind } => {
                ("unsubscribe", serde_json::json!({ "kind": kind }))
            }
            ClientEvent::Heartbeat => ("heartbeat", Value::Null),
        };
        Ok(Envelope {
            kind: kind.to_string(),
            data,
            timestamp: at,
        })
    }

    pub fn to_text(self, at: DateTime<Utc>) -> Result<String> {
        let envelope = self.into_envelope(at)?;
        serde_json::to_string(&envelope).map_err(SyncError::Serialization)
    }
}
