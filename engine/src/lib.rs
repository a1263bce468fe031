//! # LedgerSync Engine
//!
//! The deterministic core of the LedgerSync synchronization engine.
//!
//! This crate holds every piece of sync logic that can be expressed without
//! IO: entity records and their sync metadata, the pending-change model,
//! the offline queue policy (ordering, overflow, retry arithmetic), conflict
//! detection and resolution, and sync-session accounting. The async client
//! crate layers storage and network on top of these types.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine has no knowledge of files, sockets, or clocks -
//!   callers pass timestamps in
//! - **Deterministic**: the same inputs always produce the same decisions
//! - **Testable**: pure logic, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Entity Records
//!
//! Business data is stored as [`EntityRecord`]s: a unique id, a typed
//! [`EntityPayload`] (company, voucher, inventory item, or party), an
//! `updated_at` stamp written by whichever side last mutated the record,
//! and a `last_synced_at` stamp written only when the record is reconciled
//! with the remote. A record whose `updated_at` is ahead of its
//! `last_synced_at` carries an unpushed local edit.
//!
//! ### Pending Changes
//!
//! Local mutations are expressed as [`PendingChange`]s queued for dispatch,
//! not as direct remote calls. [`QueuePolicy`] decides drain order
//! (priority, then age), overflow eviction, and the linear retry backoff.
//!
//! ### Conflicts
//!
//! [`conflict::detect`] implements a conservative last-writer-wins rule:
//! a conflict exists only when *both* sides mutated a record since its
//! last reconciliation. The [`Resolver`] turns a detected [`SyncConflict`]
//! plus a [`ResolutionStrategy`] into a [`ResolutionOutcome`] the caller
//! persists and pushes.
//!
//! ### Sessions
//!
//! Every sync run is accounted for in a [`SyncSession`] with per-kind
//! [`PhaseCounts`], an error list that tolerates partial failure, and a
//! capped [`SessionHistory`].

pub mod change;
pub mod conflict;
pub mod entity;
pub mod error;
pub mod queue;
pub mod resolve;
pub mod session;

// Re-export main types at crate root
pub use change::{ChangeAction, PendingChange, Priority};
pub use conflict::{ConflictStatus, ConflictType, SyncConflict};
pub use entity::{Company, EntityKind, EntityPayload, EntityRecord, Item, Voucher, PHASE_ORDER};
pub use error::Error;
pub use queue::QueuePolicy;
pub use resolve::{MergeFn, ResolutionOutcome, ResolutionStrategy, Resolver};
pub use session::{
    PhaseCounts, SessionError, SessionHistory, SessionStatus, SyncProgress, SyncSession,
};

/// Type aliases for clarity
pub type EntityId = String;
pub type ChangeId = String;
pub type ConflictId = String;
pub type SessionId = String;
