//! Error types for the LedgerSync engine.

use crate::entity::EntityKind;
use crate::ConflictId;
use thiserror::Error;

/// All possible errors from the LedgerSync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unknown entity kind: {0}")]
    UnknownEntityKind(String),

    #[error("unknown change action: {0}")]
    UnknownChangeAction(String),

    #[error("unknown priority: {0}")]
    UnknownPriority(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("payload kind mismatch: expected {expected}, got {got}")]
    PayloadKindMismatch {
        expected: EntityKind,
        got: EntityKind,
    },

    // Raised both for unknown ids and for already-resolved conflicts, so
    // double-resolution is a caller bug surfaced loudly, not a no-op.
    #[error("conflict not found: {0}")]
    ConflictNotFound(ConflictId),

    #[error("merge strategy selected but no merge function configured")]
    MergeFnMissing,

    #[error("conflict has no remote side: {0}")]
    MissingRemoteSide(ConflictId),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
