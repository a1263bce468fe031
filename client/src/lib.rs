//! LedgerSync client: the occasionally-connected half of the sync engine.
//!
//! This crate wraps the pure `ledgersync-engine` core with everything
//! that touches the outside world:
//!
//! - [`store::LocalStore`]: SQLite replica, offline queue, conflicts,
//!   and a small TTL cache
//! - [`remote::RemoteAdapter`]: the HTTP boundary to the sync server
//!   (or the ledger-system bridge)
//! - [`channel::RealtimeChannel`]: persistent websocket with reconnect
//!   and heartbeats
//! - [`queue::OfflineQueueManager`]: durable outbound changes and their
//!   sequential dispatch
//! - [`orchestrator::SyncOrchestrator`]: phased pull sessions and
//!   conflict routing
//!
//! The `ledgersync` binary wires these into a background daemon.

pub mod channel;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod queue;
pub mod remote;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{ChannelConfig, ChannelEvent, RealtimeChannel};
pub use config::Config;
pub use error::{Result, SyncError};
pub use orchestrator::{
    OrchestratorConfig, SyncEvent, SyncOptions, SyncOrchestrator, SyncStatus,
};
pub use queue::{DrainReport, EnqueueReceipt, OfflineQueueManager, SyncGate};
pub use remote::{HttpRemote, Page, RemoteAdapter};
pub use store::LocalStore;
