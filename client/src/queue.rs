//! Offline queue manager: durable outbound changes and their dispatch.
//!
//! Changes accumulate in the local store while offline and drain
//! sequentially once connectivity returns, preserving causal order of
//! edits to the same entity. Drain shares the coarse [`SyncGate`] with
//! the orchestrator so a drain never interleaves with a pull session.

use crate::channel::protocol::ClientEvent;
use crate::error::{Result, SyncError};
use crate::remote::RemoteAdapter;
use crate::store::LocalStore;
use chrono::Utc;
use ledgersync_engine::{ChangeAction, EntityRecord, PendingChange, QueuePolicy};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Coarse busy flag shared by the queue drain and the pull orchestrator.
/// One holder at a time per process.
#[derive(Debug, Clone, Default)]
pub struct SyncGate {
    busy: Arc<AtomicBool>,
}

impl SyncGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the gate, or `None` when sync work is already running.
    pub fn try_acquire(&self) -> Option<GateGuard> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(GateGuard {
                busy: Arc::clone(&self.busy),
            })
        } else {
            None
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the gate on drop, including on error paths.
#[derive(Debug)]
pub struct GateGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// What happened to an enqueued change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueReceipt {
    pub change_id: String,
    /// Oldest changes dropped to make room. Zero in the common case.
    pub evicted: u64,
    /// True when the change was pushed immediately after persisting.
    pub dispatched: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    pub dispatched: u64,
    pub dead_lettered: u64,
    /// Changes still queued when the drain stopped early.
    pub remaining: u64,
}

enum Dispatch {
    Sent,
    DeadLettered,
    /// Connectivity gone; stop the drain, keep the change queued.
    Abort,
}

pub struct OfflineQueueManager<R> {
    store: LocalStore,
    remote: Arc<R>,
    policy: QueuePolicy,
    gate: SyncGate,
    online: AtomicBool,
    /// Realtime-channel handle for `sync-data` announcements.
    announcer: Option<mpsc::Sender<ClientEvent>>,
}

impl<R: RemoteAdapter + 'static> OfflineQueueManager<R> {
    pub fn new(store: LocalStore, remote: Arc<R>, policy: QueuePolicy, gate: SyncGate) -> Self {
        Self {
            store,
            remote,
            policy,
            gate,
            online: AtomicBool::new(true),
            announcer: None,
        }
    }

    /// Announce dispatched local mutations to the server over the
    /// realtime channel.
    pub fn with_announcer(mut self, announcer: mpsc::Sender<ClientEvent>) -> Self {
        self.announcer = Some(announcer);
        self
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    /// Persist a local edit and its change atomically, then drain
    /// immediately when we are online and nothing else is syncing.
    pub async fn enqueue(
        &self,
        record: Option<&EntityRecord>,
        change: PendingChange,
    ) -> Result<EnqueueReceipt> {
        let change_id = change.id.clone();
        let outcome = match record {
            Some(record) => {
                self.store
                    .stage_local_change(record, &change, &self.policy)
                    .await?
            }
            None => self.store.enqueue_change(&change, &self.policy).await?,
        };

        let mut dispatched = false;
        if self.is_online() && !self.gate.is_busy() {
            match self.drain().await {
                Ok(report) => dispatched = report.dispatched > 0,
                Err(SyncError::AlreadyInProgress) | Err(SyncError::Offline) => {}
                Err(err) => return Err(err),
            }
        }

        Ok(EnqueueReceipt {
            change_id,
            evicted: outcome.evicted,
            dispatched,
        })
    }

    /// Push every queued change, oldest-and-highest-priority first.
    pub async fn drain(&self) -> Result<DrainReport> {
        if !self.is_online() {
            return Err(SyncError::Offline);
        }
        let _guard = self
            .gate
            .try_acquire()
            .ok_or(SyncError::AlreadyInProgress)?;

        let changes = self.store.pending_changes().await?;
        let total = changes.len() as u64;
        let mut report = DrainReport::default();

        for change in changes {
            match self.dispatch_with_retry(&change).await? {
                Dispatch::Sent => report.dispatched += 1,
                Dispatch::DeadLettered => report.dead_lettered += 1,
                Dispatch::Abort => break,
            }
        }

        report.remaining = total - report.dispatched - report.dead_lettered;
        if report.dispatched > 0 || report.dead_lettered > 0 {
            info!(
                dispatched = report.dispatched,
                dead_lettered = report.dead_lettered,
                remaining = report.remaining,
                "queue drained"
            );
        }
        Ok(report)
    }

    /// Dispatch one change, retrying transient failures inline with
    /// linear backoff until the policy ceiling.
    async fn dispatch_with_retry(&self, change: &PendingChange) -> Result<Dispatch> {
        loop {
            match self.dispatch_once(change).await {
                Ok(()) => {
                    self.store.mark_change_synced(&change.id).await?;
                    self.announce(change);
                    debug!(change = %change.id, "change dispatched");
                    return Ok(Dispatch::Sent);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err @ SyncError::RemoteRejected { .. }) => {
                    warn!(change = %change.id, %err, "change rejected, dead-lettering");
                    self.store
                        .dead_letter(&change.id, &err.to_string(), Utc::now())
                        .await?;
                    return Ok(Dispatch::DeadLettered);
                }
                Err(err @ SyncError::Connectivity(_)) => {
                    // Outages keep the change queued with its retry
                    // budget intact; only real server attempts count.
                    warn!(change = %change.id, %err, "connectivity lost, pausing queue");
                    self.set_online(false);
                    return Ok(Dispatch::Abort);
                }
                Err(err) if err.should_retry() => {
                    let retry_count = self.store.bump_retry(&change.id).await?;
                    if self.policy.exhausted(retry_count) {
                        warn!(change = %change.id, retry_count, "retries exhausted");
                        self.store
                            .dead_letter(&change.id, &err.to_string(), Utc::now())
                            .await?;
                        return Ok(Dispatch::DeadLettered);
                    }
                    tokio::time::sleep(self.policy.backoff_delay(retry_count)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Push a `sync-data` frame for a dispatched change. Best effort:
    /// a full or disconnected channel drops the announcement.
    fn announce(&self, change: &PendingChange) {
        if let Some(tx) = &self.announcer {
            let _ = tx.try_send(ClientEvent::SyncData {
                change: change.clone(),
            });
        }
    }

    async fn dispatch_once(&self, change: &PendingChange) -> Result<()> {
        match change.action {
            ChangeAction::Create => {
                let record = change
                    .to_record()
                    .ok_or_else(|| SyncError::Channel("create change without payload".into()))?;
                let server_copy = self.remote.create(change.kind, &record).await?;
                self.apply_ack(server_copy).await
            }
            ChangeAction::Update => {
                let record = change
                    .to_record()
                    .ok_or_else(|| SyncError::Channel("update change without payload".into()))?;
                let server_copy = self.remote.update(change.kind, &record).await?;
                self.apply_ack(server_copy).await
            }
            ChangeAction::Delete => {
                self.remote.delete(change.kind, &change.entity_id).await?;
                self.store
                    .delete_entity(change.kind, &change.entity_id)
                    .await
            }
        }
    }

    /// Fold the server's acknowledged copy back into the replica and
    /// stamp the sync watermark.
    async fn apply_ack(&self, mut server_copy: EntityRecord) -> Result<()> {
        let now = Utc::now();
        server_copy.last_synced_at = Some(now);
        self.store.upsert_entity(&server_copy).await?;
        Ok(())
    }

    /// Periodic drain on `interval`, cancelled through `shutdown`.
    pub fn spawn_scheduler(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // skip the immediate first tick
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.drain().await {
                            Ok(_) => {}
                            Err(SyncError::Offline) | Err(SyncError::AlreadyInProgress) => {}
                            Err(err) => warn!(%err, "scheduled drain failed"),
                        }
                    }
                    _ = shutdown.changed() => {
                        debug!("queue scheduler stopped");
                        return;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRemote;
    use chrono::{DateTime, TimeZone, Utc};
    use ledgersync_engine::{Company, EntityKind, EntityPayload, Priority};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn company(id: &str, name: &str) -> EntityRecord {
        EntityRecord::new(
            id.to_string(),
            EntityPayload::Company(Company {
                name: name.into(),
                gstin: None,
                state: None,
            }),
            ts(100),
        )
    }

    fn fast_policy() -> QueuePolicy {
        QueuePolicy {
            base_delay: Duration::from_millis(1),
            ..QueuePolicy::default()
        }
    }

    async fn manager(remote: Arc<MockRemote>) -> OfflineQueueManager<MockRemote> {
        let store = LocalStore::open_in_memory().await.unwrap();
        OfflineQueueManager::new(store, remote, fast_policy(), SyncGate::new())
    }

    #[test]
    fn gate_is_exclusive() {
        let gate = SyncGate::new();
        let guard = gate.try_acquire().unwrap();
        assert!(gate.is_busy());
        assert!(gate.try_acquire().is_none());
        drop(guard);
        assert!(!gate.is_busy());
        assert!(gate.try_acquire().is_some());
    }

    #[tokio::test]
    async fn enqueue_online_dispatches_immediately() {
        let remote = Arc::new(MockRemote::default());
        let mgr = manager(Arc::clone(&remote)).await;

        let record = company("co-1", "Acme");
        let change = PendingChange::create("ch-1", &record, Priority::Medium, ts(100));
        let receipt = mgr.enqueue(Some(&record), change).await.unwrap();

        assert!(receipt.dispatched);
        assert_eq!(receipt.evicted, 0);
        assert_eq!(remote.created_ids(), vec!["co-1"]);
        assert_eq!(mgr.store.pending_count().await.unwrap(), 0);

        // The ack stamped the watermark.
        let got = mgr
            .store
            .get_entity(EntityKind::Company, "co-1")
            .await
            .unwrap()
            .unwrap();
        assert!(got.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn enqueue_offline_keeps_change_queued() {
        let remote = Arc::new(MockRemote::default());
        let mgr = manager(Arc::clone(&remote)).await;
        mgr.set_online(false);

        let record = company("co-1", "Acme");
        let change = PendingChange::create("ch-1", &record, Priority::Medium, ts(100));
        let receipt = mgr.enqueue(Some(&record), change).await.unwrap();

        assert!(!receipt.dispatched);
        assert_eq!(mgr.store.pending_count().await.unwrap(), 1);
        assert!(remote.created_ids().is_empty());
    }

    #[tokio::test]
    async fn drain_while_offline_is_an_error() {
        let remote = Arc::new(MockRemote::default());
        let mgr = manager(remote).await;
        mgr.set_online(false);
        assert!(matches!(mgr.drain().await, Err(SyncError::Offline)));
    }

    #[tokio::test]
    async fn rejected_change_is_dead_lettered_not_retried() {
        let remote = Arc::new(MockRemote::default());
        remote.fail_next(SyncError::RemoteRejected {
            status: 422,
            body: "bad voucher".into(),
        });
        let mgr = manager(Arc::clone(&remote)).await;
        mgr.set_online(false);

        let record = company("co-1", "Acme");
        let change = PendingChange::create("ch-1", &record, Priority::Medium, ts(100));
        mgr.enqueue(Some(&record), change).await.unwrap();
        mgr.set_online(true);

        let report = mgr.drain().await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.dispatched, 0);

        let failed = mgr.store.failed_changes().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].retry_count, 0, "4xx must not burn retries");
    }

    #[tokio::test]
    async fn transient_errors_retry_then_dead_letter() {
        let remote = Arc::new(MockRemote::default());
        for _ in 0..5 {
            remote.fail_next(SyncError::TransientServer { status: 503 });
        }
        let mgr = manager(Arc::clone(&remote)).await;
        mgr.set_online(false);

        let record = company("co-1", "Acme");
        let change = PendingChange::create("ch-1", &record, Priority::Medium, ts(100));
        mgr.enqueue(Some(&record), change).await.unwrap();
        mgr.set_online(true);

        let report = mgr.drain().await.unwrap();
        assert_eq!(report.dead_lettered, 1);

        let failed = mgr.store.failed_changes().await.unwrap();
        assert_eq!(failed[0].retry_count, 3);
    }

    #[tokio::test]
    async fn transient_error_then_success_dispatches() {
        let remote = Arc::new(MockRemote::default());
        remote.fail_next(SyncError::TransientServer { status: 502 });
        let mgr = manager(Arc::clone(&remote)).await;
        mgr.set_online(false);

        let record = company("co-1", "Acme");
        let change = PendingChange::create("ch-1", &record, Priority::Medium, ts(100));
        mgr.enqueue(Some(&record), change).await.unwrap();
        mgr.set_online(true);

        let report = mgr.drain().await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.dead_lettered, 0);
        assert_eq!(remote.created_ids(), vec!["co-1"]);
    }

    #[tokio::test]
    async fn connectivity_failure_aborts_drain_and_goes_offline() {
        let remote = Arc::new(MockRemote::default());
        remote.fail_next(SyncError::Connectivity("connection refused".into()));
        let mgr = manager(Arc::clone(&remote)).await;
        mgr.set_online(false);

        for i in 0..3 {
            let record = company(&format!("co-{i}"), "Acme");
            let change =
                PendingChange::create(format!("ch-{i}"), &record, Priority::Medium, ts(100 + i));
            mgr.enqueue(Some(&record), change).await.unwrap();
        }
        mgr.set_online(true);

        let report = mgr.drain().await.unwrap();
        assert_eq!(report.dispatched, 0);
        assert_eq!(report.remaining, 3);
        assert!(!mgr.is_online());
        // Nothing was dead-lettered; the queue survives the outage.
        assert_eq!(mgr.store.pending_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn outages_do_not_burn_the_retry_budget() {
        let remote = Arc::new(MockRemote::default());
        for _ in 0..3 {
            remote.fail_next(SyncError::Connectivity("connection refused".into()));
        }
        let mgr = manager(Arc::clone(&remote)).await;
        mgr.set_online(false);

        let record = company("co-1", "Acme");
        let change = PendingChange::create("ch-1", &record, Priority::Medium, ts(100));
        mgr.enqueue(Some(&record), change).await.unwrap();

        // Three reconnect attempts that all end in an outage.
        for _ in 0..3 {
            mgr.set_online(true);
            let report = mgr.drain().await.unwrap();
            assert_eq!(report.remaining, 1);
        }
        let pending = mgr.store.pending_changes().await.unwrap();
        assert_eq!(pending[0].retry_count, 0, "outages must not count as retries");

        // The full retry budget is still available for real failures.
        remote.fail_next(SyncError::TransientServer { status: 503 });
        remote.fail_next(SyncError::TransientServer { status: 503 });
        mgr.set_online(true);
        let report = mgr.drain().await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.dead_lettered, 0);
    }

    #[tokio::test]
    async fn dispatched_changes_are_announced_on_the_channel() {
        let remote = Arc::new(MockRemote::default());
        let (tx, mut rx) = mpsc::channel(8);
        let store = LocalStore::open_in_memory().await.unwrap();
        let mgr = OfflineQueueManager::new(store, remote, fast_policy(), SyncGate::new())
            .with_announcer(tx);

        let record = company("co-1", "Acme");
        let change = PendingChange::create("ch-1", &record, Priority::Medium, ts(100));
        let receipt = mgr.enqueue(Some(&record), change).await.unwrap();
        assert!(receipt.dispatched);

        match rx.try_recv().unwrap() {
            ClientEvent::SyncData { change } => assert_eq!(change.id, "ch-1"),
            other => panic!("unexpected outbound frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_changes_remove_local_copy() {
        let remote = Arc::new(MockRemote::default());
        let mgr = manager(Arc::clone(&remote)).await;

        let record = company("co-1", "Acme");
        mgr.store.upsert_entity(&record).await.unwrap();

        let change =
            PendingChange::delete("ch-1", EntityKind::Company, "co-1", Priority::High, ts(200));
        let receipt = mgr.enqueue(None, change).await.unwrap();
        assert!(receipt.dispatched);
        assert_eq!(remote.deleted_ids(), vec!["co-1"]);
        assert!(mgr
            .store
            .get_entity(EntityKind::Company, "co-1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn auth_failure_aborts_with_error() {
        let remote = Arc::new(MockRemote::default());
        remote.fail_next(SyncError::RemoteRejected {
            status: 401,
            body: "token expired".into(),
        });
        let mgr = manager(Arc::clone(&remote)).await;
        mgr.set_online(false);

        let record = company("co-1", "Acme");
        let change = PendingChange::create("ch-1", &record, Priority::Medium, ts(100));
        mgr.enqueue(Some(&record), change).await.unwrap();
        mgr.set_online(true);

        let err = mgr.drain().await.unwrap_err();
        assert!(err.is_fatal());
        // Gate released despite the error path.
        assert!(!mgr.gate.is_busy());
    }
}
