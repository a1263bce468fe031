//! LedgerSync daemon - keeps a local business database in step with the
//! sync server.
//!
//! Wires the local store, offline queue, realtime channel, and sync
//! orchestrator together, then runs until ctrl-c: scheduled syncs on an
//! interval, immediate syncs on server request, and throttled syncs on
//! data-update pushes.

use ledgersync_client::channel::protocol::{ServerEvent, SyncCommand};
use ledgersync_client::{
    ChannelConfig, ChannelEvent, Config, HttpRemote, LocalStore, OfflineQueueManager,
    OrchestratorConfig, RealtimeChannel, SyncGate, SyncOptions, SyncOrchestrator,
};
use ledgersync_engine::{Resolver, PHASE_ORDER};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ledgersync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(api = %config.api_base_url, "starting ledgersync daemon");

    // Open the local store and run migrations
    let store = LocalStore::open(&config.database_path).await?;

    let remote = Arc::new(HttpRemote::new(
        config.api_base_url.clone(),
        config.api_token.clone(),
    ));
    let gate = SyncGate::new();
    let policy = config.queue_policy();

    // Realtime channel with all phases subscribed
    let channel = RealtimeChannel::connect(ChannelConfig::new(
        config.ws_url.clone(),
        config.api_token.clone(),
    ));
    for kind in PHASE_ORDER {
        channel.subscribe(kind).await?;
    }
    let mut channel_events = channel.subscribe_events();

    let queue = Arc::new(
        OfflineQueueManager::new(store.clone(), Arc::clone(&remote), policy, gate.clone())
            .with_announcer(channel.outbound()),
    );

    let orchestrator = Arc::new(SyncOrchestrator::new(
        store.clone(),
        Arc::clone(&remote),
        Resolver::default(),
        gate,
        policy,
        OrchestratorConfig {
            min_sync_gap: config.min_sync_gap,
            voucher_window_days: config.voucher_window_days,
            page_size: config.page_size,
            ..OrchestratorConfig::default()
        },
    ));

    // Periodic queue drain, stopped through the shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Arc::clone(&queue).spawn_scheduler(config.sync_interval, shutdown_rx);

    let mut sync_timer = tokio::time::interval(config.sync_interval);
    sync_timer.tick().await; // skip the immediate first tick

    tracing::info!("daemon running, ctrl-c to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
            _ = sync_timer.tick() => {
                spawn_sync(Arc::clone(&orchestrator), SyncOptions::default());
            }
            event = channel_events.recv() => {
                match event {
                    Ok(ChannelEvent::Connected) => {
                        queue.set_online(true);
                        orchestrator.set_online(true);
                        spawn_sync(Arc::clone(&orchestrator), SyncOptions::default());
                    }
                    Ok(ChannelEvent::Disconnected) => {
                        queue.set_online(false);
                        orchestrator.set_online(false);
                    }
                    Ok(ChannelEvent::Event(server_event)) => {
                        handle_server_event(
                            server_event,
                            &store,
                            &orchestrator,
                        )
                        .await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "channel events lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        tracing::warn!("channel event stream closed");
                        queue.set_online(false);
                        orchestrator.set_online(false);
                    }
                }
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = scheduler.await;
    channel.shutdown().await;
    store.close().await;
    Ok(())
}

/// Run a sync without blocking the event loop.
fn spawn_sync(orchestrator: Arc<SyncOrchestrator<HttpRemote>>, options: SyncOptions) {
    tokio::spawn(async move {
        use ledgersync_client::SyncError;
        match orchestrator.start_sync(options).await {
            Ok(session) => {
                tracing::info!(session = %session.id, summary = %session.summary(), "sync finished");
            }
            Err(SyncError::AlreadyInProgress) | Err(SyncError::Throttled) => {}
            Err(SyncError::Offline) => tracing::debug!("sync skipped, offline"),
            Err(err) => tracing::warn!(%err, "sync failed to start"),
        }
    });
}

/// What the daemon does with a pushed server event.
#[derive(Debug)]
enum EventAction {
    Sync(SyncOptions),
    StopSync,
    StoreConflict(Box<ledgersync_engine::SyncConflict>),
}

fn route_server_event(event: ServerEvent) -> EventAction {
    match event {
        ServerEvent::SyncRequest { command } => match command {
            SyncCommand::Start => EventAction::Sync(SyncOptions::default()),
            SyncCommand::Force => EventAction::Sync(SyncOptions { forced: true }),
            SyncCommand::Stop => EventAction::StopSync,
        },
        // Another client changed data; pick it up now instead of waiting
        // for the scheduled interval. Min-gap throttling bounds the rate.
        ServerEvent::DataUpdate { kind, entity_id } => {
            tracing::debug!(%kind, %entity_id, "remote change pushed, syncing");
            EventAction::Sync(SyncOptions::default())
        }
        ServerEvent::SyncConflict { conflict } => EventAction::StoreConflict(conflict),
    }
}

async fn handle_server_event(
    event: ServerEvent,
    store: &LocalStore,
    orchestrator: &Arc<SyncOrchestrator<HttpRemote>>,
) {
    match route_server_event(event) {
        EventAction::Sync(options) => spawn_sync(Arc::clone(orchestrator), options),
        EventAction::StopSync => orchestrator.stop_sync(),
        EventAction::StoreConflict(conflict) => {
            tracing::info!(conflict = %conflict.id, kind = %conflict.kind, "server pushed a conflict");
            if let Err(err) = store.add_conflict(&conflict).await {
                tracing::warn!(%err, "failed to persist pushed conflict");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgersync_engine::EntityKind;

    #[test]
    fn data_update_triggers_a_throttled_sync() {
        let action = route_server_event(ServerEvent::DataUpdate {
            kind: EntityKind::Voucher,
            entity_id: "v-1".to_string(),
        });
        assert!(matches!(
            action,
            EventAction::Sync(SyncOptions { forced: false })
        ));
    }

    #[test]
    fn force_request_bypasses_the_throttle() {
        let action = route_server_event(ServerEvent::SyncRequest {
            command: SyncCommand::Force,
        });
        assert!(matches!(
            action,
            EventAction::Sync(SyncOptions { forced: true })
        ));
    }

    #[test]
    fn stop_request_maps_to_stop() {
        let action = route_server_event(ServerEvent::SyncRequest {
            command: SyncCommand::Stop,
        });
        assert!(matches!(action, EventAction::StopSync));
    }
}
