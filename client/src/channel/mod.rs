//! Realtime channel: one persistent websocket to the sync server.
//!
//! The channel owns its connection in a background task. Consumers get a
//! broadcast stream of [`ChannelEvent`]s and push outbound frames through
//! an mpsc handle, so nothing outside this module touches the socket.
//! Reconnects are transparent: exponential backoff, bounded attempts,
//! and subscription replay once the connection is back.

pub mod protocol;

use crate::error::{Result, SyncError};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use protocol::{ClientEvent, Envelope, ServerEvent};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};
use url::Url;

/// What subscribers observe.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    Event(ServerEvent),
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: Url,
    pub token: String,
    pub heartbeat_interval: Duration,
    pub reconnect_base: Duration,
    pub max_reconnect_attempts: u32,
}

impl ChannelConfig {
    pub fn new(url: Url, token: impl Into<String>) -> Self {
        Self {
            url,
            token: token.into(),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_base: Duration::from_secs(1),
            max_reconnect_attempts: 5,
        }
    }
}

/// Handle to the background connection task.
pub struct RealtimeChannel {
    events: broadcast::Sender<ChannelEvent>,
    out_tx: mpsc::Sender<ClientEvent>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RealtimeChannel {
    /// Spawn the connection task. Connection failures surface as
    /// `Disconnected` events, not as an error here.
    pub fn connect(config: ChannelConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        let (out_tx, out_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run(config, events.clone(), out_rx, shutdown_rx));
        Self {
            events,
            out_tx,
            shutdown_tx,
            task,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    /// Handle for pushing outbound frames from outside the channel task.
    pub fn outbound(&self) -> mpsc::Sender<ClientEvent> {
        self.out_tx.clone()
    }

    /// Queue an outbound frame. Fails only when the task is gone.
    pub async fn send(&self, event: ClientEvent) -> Result<()> {
        self.out_tx
            .send(event)
            .await
            .map_err(|_| SyncError::Channel("channel task stopped".to_string()))
    }

    pub async fn subscribe(&self, kind: ledgersync_engine::EntityKind) -> Result<()> {
        self.send(ClientEvent::Subscribe { kind }).await
    }

    pub async fn unsubscribe(&self, kind: ledgersync_engine::EntityKind) -> Result<()> {
        self.send(ClientEvent::Unsubscribe { kind }).await
    }

    /// Tear down the connection and the background task.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

fn authorized_url(config: &ChannelConfig) -> Url {
    let mut url = config.url.clone();
    url.query_pairs_mut().append_pair("token", &config.token);
    url
}

async fn run(
    config: ChannelConfig,
    events: broadcast::Sender<ChannelEvent>,
    mut out_rx: mpsc::Receiver<ClientEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let url = authorized_url(&config);
    // Kinds to re-subscribe after a reconnect.
    let mut subscriptions: HashSet<ledgersync_engine::EntityKind> = HashSet::new();
    let mut attempts: u32 = 0;

    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        let stream = tokio::select! {
            result = connect_async(url.as_str()) => result,
            _ = shutdown_rx.changed() => return,
        };

        let (ws, _) = match stream {
            Ok(ok) => ok,
            Err(err) => {
                attempts += 1;
                if attempts >= config.max_reconnect_attempts {
                    error!(%err, attempts, "giving up on realtime channel");
                    let _ = events.send(ChannelEvent::Disconnected);
                    return;
                }
                let delay = backoff(config.reconnect_base, attempts);
                warn!(%err, attempts, ?delay, "connect failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => continue,
                    _ = shutdown_rx.changed() => return,
                }
            }
        };

        attempts = 0;
        info!(url = %config.url, "realtime channel connected");
        let _ = events.send(ChannelEvent::Connected);

        let (mut sink, mut source) = ws.split();

        // Replay subscriptions lost with the previous connection.
        for kind in &subscriptions {
            let event = ClientEvent::Subscribe { kind: *kind };
            if let Ok(text) = event.to_text(Utc::now()) {
                let _ = sink.send(Message::Text(text)).await;
            }
        }

        let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
        heartbeat.tick().await; // first tick fires immediately

        let disconnected = loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
                _ = heartbeat.tick() => {
                    let Ok(text) = ClientEvent::Heartbeat.to_text(Utc::now()) else {
                        continue;
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break true;
                    }
                }
                outbound = out_rx.recv() => {
                    let Some(event) = outbound else {
                        // All handles dropped; keep the read side alive.
                        continue;
                    };
                    match &event {
                        ClientEvent::Subscribe { kind } => {
                            subscriptions.insert(*kind);
                        }
                        ClientEvent::Unsubscribe { kind } => {
                            subscriptions.remove(kind);
                        }
                        _ => {}
                    }
                    match event.to_text(Utc::now()) {
                        Ok(text) => {
                            if sink.send(Message::Text(text)).await.is_err() {
                                break true;
                            }
                        }
                        Err(err) => warn!(%err, "dropping unencodable frame"),
                    }
                }
                inbound = source.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            handle_frame(&text, &events);
                        }
                        Some(Ok(Message::Close(_))) | None => break true,
                        Some(Ok(_)) => {} // ping/pong/binary: transport concern
                        Some(Err(err)) => {
                            warn!(%err, "websocket read error");
                            break true;
                        }
                    }
                }
            }
        };

        if disconnected {
            let _ = events.send(ChannelEvent::Disconnected);
            warn!("realtime channel disconnected, reconnecting");
        }
    }
}

fn handle_frame(text: &str, events: &broadcast::Sender<ChannelEvent>) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(env) => env,
        Err(err) => {
            warn!(%err, "malformed frame from server");
            return;
        }
    };
    match ServerEvent::from_envelope(&envelope) {
        Ok(Some(event)) => {
            let _ = events.send(ChannelEvent::Event(event));
        }
        Ok(None) => debug!(frame = %envelope.kind, "ignoring unknown frame type"),
        Err(err) => warn!(%err, frame = %envelope.kind, "undecodable frame data"),
    }
}

fn backoff(base: Duration, attempts: u32) -> Duration {
    let factor = 1u32 << attempts.saturating_sub(1).min(6);
    (base * factor).min(Duration::from_secs(60))
}
