//! Sync orchestrator: phased pulls, conflict routing, session lifecycle.
//!
//! One orchestrator per process. A session pulls companies, then
//! vouchers (bounded to a trailing window), then items, then parties,
//! upserting into the local store and classifying each record against
//! its local copy. Cancellation is cooperative between records; the
//! in-flight record always completes.

use crate::error::{Result, SyncError};
use crate::queue::SyncGate;
use crate::remote::RemoteAdapter;
use crate::store::LocalStore;
use chrono::{DateTime, Utc};
use ledgersync_engine::{
    conflict, EntityKind, EntityRecord, PendingChange, PhaseCounts, Priority, QueuePolicy,
    ResolutionOutcome, ResolutionStrategy, Resolver, SessionHistory, SessionStatus, SyncProgress,
    SyncSession, PHASE_ORDER,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Bypass min-interval throttling.
    pub forced: bool,
}

/// Notifications emitted while a session runs.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Started { session_id: String },
    Progress(SyncProgress),
    PhaseCompleted { kind: EntityKind, counts: PhaseCounts },
    PhaseSkipped { kind: EntityKind },
    ConflictDetected { conflict_id: String, kind: EntityKind, entity_id: String },
    QueueOverflow { evicted: u64 },
    Completed { session: SyncSession },
    Failed { session_id: String, message: String },
}

/// Snapshot of the orchestrator, queryable at any time.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub state: SessionStatus,
    pub current: Option<String>,
    pub last: Option<SyncSession>,
    pub pending_changes: u64,
}

/// Tunables the daemon wires in from config.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub min_sync_gap: Duration,
    pub voucher_window_days: i64,
    pub page_size: u32,
    pub history_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            min_sync_gap: Duration::from_secs(60),
            voucher_window_days: 30,
            page_size: 100,
            history_capacity: SessionHistory::DEFAULT_CAPACITY,
        }
    }
}

enum PhaseEnd {
    Completed,
    Skipped,
    Cancelled,
}

pub struct SyncOrchestrator<R> {
    store: LocalStore,
    remote: Arc<R>,
    resolver: Resolver,
    gate: SyncGate,
    policy: QueuePolicy,
    config: OrchestratorConfig,
    events: broadcast::Sender<SyncEvent>,
    cancel: watch::Sender<bool>,
    online: AtomicBool,
    current: Mutex<Option<String>>,
    history: Mutex<SessionHistory>,
    last_started: Mutex<Option<DateTime<Utc>>>,
}

impl<R: RemoteAdapter + 'static> SyncOrchestrator<R> {
    pub fn new(
        store: LocalStore,
        remote: Arc<R>,
        resolver: Resolver,
        gate: SyncGate,
        policy: QueuePolicy,
        config: OrchestratorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let (cancel, _) = watch::channel(false);
        Self {
            store,
            remote,
            resolver,
            gate,
            policy,
            config,
            events,
            cancel,
            online: AtomicBool::new(true),
            current: Mutex::new(None),
            history: Mutex::new(SessionHistory::new(config.history_capacity)),
            last_started: Mutex::new(None),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Run a full pull session. Precondition failures (offline, gate
    /// held, throttled) return `Err`; a session that started but aborted
    /// returns `Ok` with `status = Error`.
    pub async fn start_sync(&self, options: SyncOptions) -> Result<SyncSession> {
        if !self.is_online() {
            return Err(SyncError::Offline);
        }
        if !options.forced {
            let last = *self.last_started.lock().await;
            if let Some(last) = last {
                let gap = chrono::Duration::from_std(self.config.min_sync_gap)
                    .unwrap_or_else(|_| chrono::Duration::zero());
                if Utc::now() - last < gap {
                    return Err(SyncError::Throttled);
                }
            }
        }
        self.run(options).await
    }

    /// `start_sync` without throttling.
    pub async fn force_sync(&self) -> Result<SyncSession> {
        self.start_sync(SyncOptions { forced: true }).await
    }

    /// Ask the running session to stop. Takes effect between records.
    pub fn stop_sync(&self) {
        self.cancel.send_replace(true);
    }

    pub async fn status(&self) -> Result<SyncStatus> {
        let current = self.current.lock().await.clone();
        let history = self.history.lock().await;
        let state = if current.is_some() {
            SessionStatus::Syncing
        } else {
            history
                .latest()
                .map(|s| s.status)
                .unwrap_or(SessionStatus::Idle)
        };
        Ok(SyncStatus {
            state,
            current,
            last: history.latest().cloned(),
            pending_changes: self.store.pending_count().await?,
        })
    }

    async fn run(&self, options: SyncOptions) -> Result<SyncSession> {
        let _guard = self
            .gate
            .try_acquire()
            .ok_or(SyncError::AlreadyInProgress)?;
        self.cancel.send_replace(false);

        let now = Utc::now();
        *self.last_started.lock().await = Some(now);
        let mut session = SyncSession::begin(Uuid::new_v4().to_string(), options.forced, now);
        *self.current.lock().await = Some(session.id.clone());
        info!(session = %session.id, forced = options.forced, "sync session started");
        let _ = self.events.send(SyncEvent::Started {
            session_id: session.id.clone(),
        });

        for kind in PHASE_ORDER {
            if *self.cancel.borrow() {
                session.fail("sync stopped before completion", Utc::now());
                break;
            }
            match self.pull_phase(kind, &mut session).await {
                Ok(PhaseEnd::Completed) => {
                    let counts = *session.phase_mut(kind);
                    debug!(session = %session.id, %kind, ?counts, "phase completed");
                    let _ = self.events.send(SyncEvent::PhaseCompleted { kind, counts });
                }
                Ok(PhaseEnd::Skipped) => {
                    debug!(session = %session.id, %kind, "phase skipped");
                    let _ = self.events.send(SyncEvent::PhaseSkipped { kind });
                }
                Ok(PhaseEnd::Cancelled) => {
                    session.fail("sync stopped before completion", Utc::now());
                    break;
                }
                Err(err) => {
                    warn!(session = %session.id, %kind, %err, "session aborted");
                    session.fail(err.to_string(), Utc::now());
                    let _ = self.events.send(SyncEvent::Failed {
                        session_id: session.id.clone(),
                        message: err.to_string(),
                    });
                    if matches!(err, SyncError::Connectivity(_)) {
                        self.set_online(false);
                    }
                    break;
                }
            }
        }

        if session.status == SessionStatus::Syncing {
            session.complete(Utc::now());
            info!(session = %session.id, summary = %session.summary(), "sync session completed");
            let _ = self.events.send(SyncEvent::Completed {
                session: session.clone(),
            });
        }

        *self.current.lock().await = None;
        self.history.lock().await.push(session.clone());
        Ok(session)
    }

    /// Pull every page of one kind. The page cursor is cached so an
    /// interrupted first sync resumes where it stopped.
    async fn pull_phase(&self, kind: EntityKind, session: &mut SyncSession) -> Result<PhaseEnd> {
        let since = match kind {
            EntityKind::Voucher => {
                Some(Utc::now() - chrono::Duration::days(self.config.voucher_window_days))
            }
            _ => None,
        };

        let cursor_key = format!("cursor:{kind}");
        let mut page: u32 = match self.store.cache_get(&cursor_key).await? {
            Some(raw) => raw.parse().unwrap_or(0),
            None => 0,
        };

        // Ids the remote still returns; only meaningful for a full,
        // un-windowed listing started from the first page.
        let mut seen = (since.is_none() && page == 0).then(std::collections::HashSet::new);
        let mut processed: u64 = 0;

        loop {
            if *self.cancel.borrow() {
                return Ok(PhaseEnd::Cancelled);
            }

            let result = self
                .remote
                .list(kind, since, page, self.config.page_size)
                .await;
            let listing = match result {
                Ok(listing) => listing,
                Err(SyncError::RemoteRejected { status: 404, .. })
                    if kind == EntityKind::Party =>
                {
                    // Server without a parties collection; recorded no-op.
                    session.phase_mut(kind).skipped += 1;
                    return Ok(PhaseEnd::Skipped);
                }
                Err(err) if err.is_fatal() || matches!(err, SyncError::Connectivity(_)) => {
                    return Err(err);
                }
                Err(err) => {
                    session.record_error(Some(kind), None, err.to_string());
                    session.phase_mut(kind).failed += 1;
                    return Ok(PhaseEnd::Completed);
                }
            };

            let has_more = listing.has_more;
            // Extent is only known once the last page arrives.
            let phase_total = (!has_more).then(|| {
                u64::from(page) * u64::from(self.config.page_size) + listing.items.len() as u64
            });
            session.total_items += listing.items.len() as u64;
            for record in listing.items {
                session.phase_mut(kind).pulled += 1;
                if let Some(seen) = seen.as_mut() {
                    seen.insert(record.id.clone());
                }
                if let Err(err) = self.apply_remote(kind, record, session).await {
                    session.phase_mut(kind).failed += 1;
                    warn!(%kind, %err, "record failed to apply");
                }
                processed += 1;
                session.processed_items += 1;
                let _ = self.events.send(SyncEvent::Progress(SyncProgress {
                    kind,
                    processed,
                    total: phase_total,
                }));
                if *self.cancel.borrow() {
                    self.store
                        .cache_put(&cursor_key, &page.to_string(), 60)
                        .await?;
                    return Ok(PhaseEnd::Cancelled);
                }
            }

            if !has_more {
                self.store.cache_delete(&cursor_key).await?;
                break;
            }
            page += 1;
            self.store
                .cache_put(&cursor_key, &page.to_string(), 60)
                .await?;
        }

        if let Some(seen) = seen {
            self.flag_missing(kind, &seen, session).await?;
        }
        Ok(PhaseEnd::Completed)
    }

    /// Reconcile one pulled record against the local copy.
    async fn apply_remote(
        &self,
        kind: EntityKind,
        remote: EntityRecord,
        session: &mut SyncSession,
    ) -> Result<()> {
        let now = Utc::now();
        let Some(local) = self.store.get_entity(kind, &remote.id).await? else {
            let mut fresh = remote;
            fresh.last_synced_at = Some(now);
            self.store.upsert_entity(&fresh).await?;
            session.phase_mut(kind).upserted += 1;
            return Ok(());
        };

        if let Some(detected) =
            conflict::detect(Uuid::new_v4().to_string(), &local, &remote, now)
        {
            session.phase_mut(kind).conflicts += 1;
            session.record_error(
                Some(kind),
                Some(detected.entity_id.clone()),
                format!("{} conflict", detected.conflict_type.as_str()),
            );
            self.store.add_conflict(&detected).await?;

            if self.resolver.default_strategy() == ResolutionStrategy::Manual {
                let _ = self.events.send(SyncEvent::ConflictDetected {
                    conflict_id: detected.id.clone(),
                    kind,
                    entity_id: detected.entity_id.clone(),
                });
                return Ok(());
            }
            let outcome = self.resolver.resolve(&detected, None, now)?;
            self.apply_outcome(outcome).await?;
            self.store.resolve_conflict_row(&detected.id, now).await?;
            return Ok(());
        }

        if local.is_dirty() && remote.updated_at <= local.updated_at {
            // Local edits are ahead; the queue will push them.
            session.phase_mut(kind).skipped += 1;
            return Ok(());
        }

        let mut fresh = remote;
        fresh.last_synced_at = Some(now);
        self.store.upsert_entity(&fresh).await?;
        session.phase_mut(kind).upserted += 1;
        Ok(())
    }

    /// Flag previously synced, locally dirty records the remote no
    /// longer returns.
    async fn flag_missing(
        &self,
        kind: EntityKind,
        seen: &std::collections::HashSet<String>,
        session: &mut SyncSession,
    ) -> Result<()> {
        let now = Utc::now();
        for local in self.store.entities(kind).await? {
            if seen.contains(&local.id) {
                continue;
            }
            if let Some(detected) =
                conflict::detect_missing(Uuid::new_v4().to_string(), &local, now)
            {
                session.phase_mut(kind).conflicts += 1;
                self.store.add_conflict(&detected).await?;
                let _ = self.events.send(SyncEvent::ConflictDetected {
                    conflict_id: detected.id.clone(),
                    kind,
                    entity_id: detected.entity_id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Resolve a stored conflict with the standing or an explicit
    /// strategy.
    pub async fn resolve_conflict(
        &self,
        id: &str,
        strategy: Option<ResolutionStrategy>,
    ) -> Result<()> {
        let now = Utc::now();
        let stored = self
            .store
            .get_conflict(id)
            .await?
            .ok_or_else(|| SyncError::ConflictNotFound(id.to_string()))?;
        if !stored.is_pending() {
            return Err(SyncError::ConflictNotFound(id.to_string()));
        }

        let outcome = self
            .resolver
            .resolve(&stored, strategy, now)
            .map_err(SyncError::Engine)?;
        if matches!(outcome, ResolutionOutcome::AwaitManual) {
            return Ok(());
        }
        self.apply_outcome(outcome).await?;
        self.store.resolve_conflict_row(id, now).await?;
        info!(conflict = %id, "conflict resolved");
        Ok(())
    }

    async fn apply_outcome(&self, outcome: ResolutionOutcome) -> Result<()> {
        let now = Utc::now();
        match outcome {
            ResolutionOutcome::ApplyRemote(mut record) => {
                record.last_synced_at = Some(now);
                self.store.upsert_entity(&record).await?;
            }
            ResolutionOutcome::PushLocal(record) | ResolutionOutcome::PushMerged(record) => {
                let change = PendingChange::update(
                    Uuid::new_v4().to_string(),
                    &record,
                    Priority::High,
                    now,
                );
                let outcome = self
                    .store
                    .stage_local_change(&record, &change, &self.policy)
                    .await?;
                if outcome.evicted > 0 {
                    let _ = self.events.send(SyncEvent::QueueOverflow {
                        evicted: outcome.evicted,
                    });
                }
            }
            ResolutionOutcome::DropLocal { kind, entity_id } => {
                self.store.delete_entity(kind, &entity_id).await?;
            }
            ResolutionOutcome::AwaitManual => {}
        }
        Ok(())
    }
}
