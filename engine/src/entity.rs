//! Entity records and typed payloads.
//!
//! Every synchronized business object is an [`EntityRecord`] carrying a
//! typed payload plus the two timestamps the conflict detector works on:
//! `updated_at` (set by whichever side last mutated the record) and
//! `last_synced_at` (set only when the record is reconciled with the
//! remote).

use crate::{error::Result, EntityId, Error};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The entity types the sync engine moves, in sync-phase order.
///
/// Vouchers and items reference companies, so companies always sync first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Company,
    Voucher,
    Item,
    Party,
}

/// Fixed phase order for a sync session.
pub const PHASE_ORDER: [EntityKind; 4] = [
    EntityKind::Company,
    EntityKind::Voucher,
    EntityKind::Item,
    EntityKind::Party,
];

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Company => "company",
            EntityKind::Voucher => "voucher",
            EntityKind::Item => "item",
            EntityKind::Party => "party",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "company" => Ok(EntityKind::Company),
            "voucher" => Ok(EntityKind::Voucher),
            "item" => Ok(EntityKind::Item),
            "party" => Ok(EntityKind::Party),
            other => Err(Error::UnknownEntityKind(other.to_string())),
        }
    }
}

/// Company master data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gstin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// An accounting voucher. Tax computation and numbering schemes live
/// upstream; the sync engine only moves the fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voucher {
    pub voucher_no: String,
    pub voucher_type: String,
    pub date: DateTime<Utc>,
    pub amount: f64,
    pub company_id: String,
}

/// An inventory item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub name: String,
    pub unit: String,
    pub rate: f64,
    pub quantity: f64,
}

/// Typed payload per entity kind.
///
/// The tag travels on the wire and into the local store, so payloads are
/// never untyped blobs past the adapter boundary. Parties stay opaque:
/// the parties phase is generic and downstream may not implement it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntityPayload {
    Company(Company),
    Voucher(Voucher),
    Item(Item),
    Party(serde_json::Value),
}

impl EntityPayload {
    /// The entity kind this payload belongs to.
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityPayload::Company(_) => EntityKind::Company,
            EntityPayload::Voucher(_) => EntityKind::Voucher,
            EntityPayload::Item(_) => EntityKind::Item,
            EntityPayload::Party(_) => EntityKind::Party,
        }
    }
}

/// A synchronized business record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    /// Unique identifier, shared between client and server
    pub id: EntityId,
    /// Entity kind (matches `payload`)
    pub kind: EntityKind,
    /// Typed domain payload
    pub payload: EntityPayload,
    /// Last mutation time, set by whichever side mutated
    pub updated_at: DateTime<Utc>,
    /// Time this record was last reconciled with the remote.
    /// `None` means the record was created locally and never synced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Identifier in the external ledger system, assigned on first export
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

impl EntityRecord {
    /// Create a new locally-authored record. `kind` is derived from the
    /// payload so the two can never disagree.
    pub fn new(id: impl Into<EntityId>, payload: EntityPayload, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            kind: payload.kind(),
            payload,
            updated_at,
            last_synced_at: None,
            external_id: None,
        }
    }

    /// True when the record carries a local edit the remote has not seen.
    /// A never-synced record is always dirty.
    pub fn is_dirty(&self) -> bool {
        match self.last_synced_at {
            None => true,
            Some(last_synced) => self.updated_at > last_synced,
        }
    }

    /// Record a local mutation.
    pub fn touch(&mut self, payload: EntityPayload, at: DateTime<Utc>) -> Result<()> {
        if payload.kind() != self.kind {
            return Err(Error::PayloadKindMismatch {
                expected: self.kind,
                got: payload.kind(),
            });
        }
        self.payload = payload;
        self.updated_at = at;
        Ok(())
    }

    /// Mark the record reconciled with the remote as of `at`.
    pub fn mark_synced(&mut self, at: DateTime<Utc>) {
        self.last_synced_at = Some(at);
    }
}
