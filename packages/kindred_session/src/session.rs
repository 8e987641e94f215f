//! The connection manager.
//!
//! Owns the single logical session: connect/disconnect lifecycle,
//! cross-observer singleton arbitration, reconnection with exponential
//! backoff, queue flushing on open, and the forced token sync that follows
//! it. Every UI observer talks to the same manager; exactly one writer
//! transitions the session status.

use kindred_protocol::ClientFrame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audio::AudioPlayer;
use crate::config::SessionConfig;
use crate::dispatch::Dispatcher;
use crate::events::{EventBroadcast, SessionEvent, create_event_broadcast};
use crate::metrics::SessionMetrics;
use crate::queue::OutboundQueue;
use crate::token::TokenSynchronizer;
use crate::transport::{Connector, TransportEvent, WsConnector};

/// Lifecycle of the single logical session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Mutable session state. Everything lives behind one lock so status
/// transitions, queue flushes, and wire writes stay serialized; the flush
/// on open is atomic with respect to concurrent `send` calls.
struct SessionState {
    status: SessionStatus,
    /// Consecutive reconnection attempts since the last successful open.
    attempt: u32,
    last_connect_at: Option<Instant>,
    token: Option<String>,
    queue: OutboundQueue,
    tokens: TokenSynchronizer,
    /// Writer channel of the live transport, if any.
    outbound: Option<mpsc::Sender<String>>,
    reconnect_cancel: Option<CancellationToken>,
    nudge_cancel: Option<CancellationToken>,
    /// Monotonic id per dial; stale connection tasks check it before
    /// touching shared state.
    epoch: u64,
}

struct Inner {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    state: Mutex<SessionState>,
    /// Arbitration lock: of any number of concurrent `connect` calls,
    /// exactly one proceeds to dial.
    dial_lock: AtomicBool,
    connected_tx: watch::Sender<bool>,
    events: EventBroadcast,
    dispatcher: Mutex<Dispatcher>,
    audio: Arc<AudioPlayer>,
    metrics: Arc<SessionMetrics>,
}

/// Handle to the singleton session. Cheap to clone; every clone observes
/// and drives the same underlying session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    pub fn with_connector(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        let metrics = Arc::new(SessionMetrics::new());
        let events = create_event_broadcast();
        let audio = Arc::new(AudioPlayer::new(config.audio.clone(), metrics.clone()));
        let dispatcher = Dispatcher::new(&config, events.clone(), audio.clone(), metrics.clone());
        let (connected_tx, _) = watch::channel(false);
        let state = SessionState {
            status: SessionStatus::Disconnected,
            attempt: 0,
            last_connect_at: None,
            token: config.token.clone(),
            queue: OutboundQueue::new(config.connect.queue_cap),
            tokens: TokenSynchronizer::new(),
            outbound: None,
            reconnect_cancel: None,
            nudge_cancel: None,
            epoch: 0,
        };
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                state: Mutex::new(state),
                dial_lock: AtomicBool::new(false),
                connected_tx,
                events,
                dispatcher: Mutex::new(dispatcher),
                audio,
                metrics,
            }),
        }
    }

    /// Process-wide shared instance. The config only matters on the first
    /// call; later callers get the existing manager regardless.
    pub fn global(config: SessionConfig) -> &'static SessionManager {
        static GLOBAL: OnceLock<SessionManager> = OnceLock::new();
        GLOBAL.get_or_init(|| SessionManager::new(config))
    }

    /// Open the session if nothing else is opening it. Safe to call from
    /// any number of observers at once: a live session, a dial already in
    /// flight, or an attempt within the cooldown all make this a no-op.
    pub async fn connect(&self) {
        // Fast path: a live session wins before any arbitration.
        {
            let state = self.inner.state.lock().await;
            if matches!(
                state.status,
                SessionStatus::Connecting | SessionStatus::Open
            ) {
                debug!("connect ignored: session already live");
                return;
            }
        }

        if self
            .inner
            .dial_lock
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("connect ignored: another dial is in flight");
            return;
        }

        let dial = {
            let mut state = self.inner.state.lock().await;
            // Re-check under the lock: a dial may have started or finished
            // between the fast path and acquiring the arbitration lock.
            if matches!(
                state.status,
                SessionStatus::Connecting | SessionStatus::Open
            ) {
                None
            } else if state
                .last_connect_at
                .is_some_and(|at| at.elapsed() < self.inner.config.cooldown())
            {
                debug!("connect ignored: within cooldown");
                None
            } else {
                if let Some(cancel) = state.reconnect_cancel.take() {
                    cancel.cancel();
                }
                state.status = SessionStatus::Connecting;
                state.last_connect_at = Some(Instant::now());
                state.epoch += 1;
                Some((state.epoch, dial_url(&self.inner.config.endpoint, state.token.as_deref())))
            }
        };

        match dial {
            Some((epoch, url)) => {
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    run_connection(inner, epoch, url).await;
                });
            }
            // The dial lock is only carried into a real dial.
            None => self.inner.dial_lock.store(false, Ordering::Release),
        }
    }

    /// Send a frame: immediately when open, otherwise buffered until the
    /// next open, with a single delayed connect nudge per burst.
    pub async fn send(&self, frame: ClientFrame) {
        let mut state = self.inner.state.lock().await;
        if state.status == SessionStatus::Open {
            if let Some(out) = state.outbound.clone() {
                match frame.to_json() {
                    Ok(json) => {
                        if out.send(json).await.is_ok() {
                            self.inner.metrics.record_sent();
                            return;
                        }
                        // Writer is gone; the close path will follow. Fall
                        // through and buffer the frame instead.
                    }
                    Err(e) => {
                        error!("failed to encode outbound frame: {}", e);
                        return;
                    }
                }
            }
        }
        let evicted = state.queue.push(frame, Instant::now());
        self.inner.metrics.record_queued();
        if evicted > 0 {
            self.inner.metrics.record_dropped(evicted);
        }
        self.schedule_connect_nudge(&mut state);
    }

    /// Send user text with a generated message id; returns the id.
    pub async fn send_text(&self, text: impl Into<String>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.send(ClientFrame::TextMessage {
            text: text.into(),
            id: id.clone(),
            metadata: None,
        })
        .await;
        id
    }

    /// Send a diagnostic ping; returns the generated id.
    pub async fn send_test(&self, text: impl Into<String>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.send(ClientFrame::TestMessage {
            text: text.into(),
            id: id.clone(),
        })
        .await;
        id
    }

    /// Close the session and cancel pending reconnect timers. Queued but
    /// unsent frames survive and flush on the next successful connect;
    /// call [`SessionManager::reset`] for a hard clear.
    pub async fn disconnect(&self) {
        let mut state = self.inner.state.lock().await;
        if let Some(cancel) = state.reconnect_cancel.take() {
            cancel.cancel();
        }
        if let Some(cancel) = state.nudge_cancel.take() {
            cancel.cancel();
        }
        match state.status {
            SessionStatus::Open => {
                info!("disconnecting");
                state.status = SessionStatus::Closing;
                // Dropping the writer closes the transport; the read loop
                // turns Closing into Disconnected without scheduling a retry.
                state.outbound = None;
            }
            SessionStatus::Connecting => {
                // No transport yet. The dial task observes the epoch bump
                // and abandons its handle when the dial completes.
                state.status = SessionStatus::Disconnected;
                state.epoch += 1;
            }
            SessionStatus::Closing | SessionStatus::Disconnected => {}
        }
        drop(state);
        set_connected(&self.inner, false);
    }

    /// Adopt a rotated auth token. On a live session the refresh frame is
    /// pushed immediately (idempotent); otherwise the token is used for
    /// the next dial and force-synced after the open.
    pub async fn update_token(&self, token: impl Into<String>) {
        let token = token.into();
        let mut state = self.inner.state.lock().await;
        state.token = Some(token.clone());
        if state.status != SessionStatus::Open {
            return;
        }
        let Some(out) = state.outbound.clone() else {
            return;
        };
        if let Some(frame) = state.tokens.sync(&token, false) {
            send_control_frame(&out, &frame, "token refresh").await;
        }
    }

    /// Hard reset: drop queued frames, forget the dedup record and the
    /// token guard. Does not touch a live connection.
    pub async fn reset(&self) {
        {
            let mut state = self.inner.state.lock().await;
            state.queue.clear();
            state.tokens.reset();
        }
        self.inner.dispatcher.lock().await.reset();
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.connected_tx.borrow()
    }

    /// Live connectivity signal; `changed()` wakes observers on transitions.
    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.inner.connected_tx.subscribe()
    }

    /// Subscribe to the session event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Mark local audio capture active/inactive; playback gain ducks while
    /// capture is on.
    pub fn set_capture_active(&self, active: bool) {
        self.inner.audio.set_capture_active(active);
    }

    /// True while an assistant reply is audibly playing.
    pub fn speaking(&self) -> watch::Receiver<bool> {
        self.inner.audio.speaking()
    }

    pub fn metrics(&self) -> Arc<SessionMetrics> {
        self.inner.metrics.clone()
    }

    pub async fn status(&self) -> SessionStatus {
        self.inner.state.lock().await.status
    }

    pub async fn queued_frames(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    /// Schedule one delayed connect; bursts of sends share a single nudge.
    fn schedule_connect_nudge(&self, state: &mut SessionState) {
        if matches!(
            state.status,
            SessionStatus::Connecting | SessionStatus::Open
        ) {
            return;
        }
        if state.nudge_cancel.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        state.nudge_cancel = Some(cancel.clone());
        let manager = self.clone();
        let delay = self.inner.config.send_nudge();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    manager.inner.state.lock().await.nudge_cancel = None;
                    reconnect::connect(manager).await;
                }
            }
        });
    }
}

/// Boxing shim for the reconnect/nudge tasks.
///
/// `connect` is an `async fn` whose returned future is `Send`, but the
/// recursive spawn sites (connect -> run_connection -> handle_close ->
/// connect, and connect -> schedule_connect_nudge -> connect) await it from
/// inside the same module where its opaque type is defined, which the
/// compiler cannot introspect for auto traits ("hidden types of an opaque
/// inside the defining scope"). Routing the recursive call through this
/// submodule erases the future into a concrete `Send` type outside that
/// scope, so the spawned tasks type-check without changing behavior.
mod reconnect {
    use super::SessionManager;
    use std::future::Future;
    use std::pin::Pin;

    pub(super) fn connect(manager: SessionManager) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move { manager.connect().await })
    }
}

fn dial_url(endpoint: &str, token: Option<&str>) -> String {
    match token {
        Some(token) if !token.is_empty() => format!("{endpoint}?token={token}"),
        _ => endpoint.to_string(),
    }
}

/// Exponential backoff: base doubled per consecutive attempt, capped.
fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exp = attempt.saturating_sub(1).min(10);
    let delay_ms = base_ms.saturating_mul(1u64 << exp).min(max_ms);
    Duration::from_millis(delay_ms)
}

/// Update the connectivity watch and emit an event on actual transitions.
fn set_connected(inner: &Inner, connected: bool) {
    let changed = inner.connected_tx.send_if_modified(|current| {
        if *current == connected {
            false
        } else {
            *current = connected;
            true
        }
    });
    if changed {
        let _ = inner
            .events
            .send(SessionEvent::ConnectivityChanged { connected });
    }
}

async fn send_control_frame(out: &mpsc::Sender<String>, frame: &ClientFrame, what: &str) {
    match frame.to_json() {
        Ok(json) => {
            if out.send(json).await.is_err() {
                warn!("transport died during {}", what);
            }
        }
        Err(e) => error!("failed to encode {} frame: {}", what, e),
    }
}

/// Drive one connection from dial to close.
async fn run_connection(inner: Arc<Inner>, epoch: u64, url: String) {
    let mut inbound = match inner.connector.dial(&url).await {
        Err(err) => {
            warn!(%err, "connection attempt failed");
            inner.dial_lock.store(false, Ordering::Release);
            handle_close(&inner, epoch).await;
            return;
        }
        Ok(handle) => {
            let mut state = inner.state.lock().await;
            if state.epoch != epoch || state.status != SessionStatus::Connecting {
                // Superseded while dialing (disconnect or a newer connect).
                debug!("abandoning superseded connection");
                drop(state);
                inner.dial_lock.store(false, Ordering::Release);
                return;
            }
            state.status = SessionStatus::Open;
            state.attempt = 0;
            state.outbound = Some(handle.outbound.clone());

            // Flush the queue in enqueue order, then force-sync the token.
            // Both go through the same writer while the state lock is held,
            // so the wire order is deterministic: queued frames first, one
            // refresh_token after, and no concurrent send can interleave.
            let queued = state.queue.drain();
            if !queued.is_empty() {
                info!(count = queued.len(), "flushing queued frames");
            }
            for frame in queued {
                match frame.payload.to_json() {
                    Ok(json) => {
                        if handle.outbound.send(json).await.is_err() {
                            warn!("transport died during queue flush");
                            break;
                        }
                        inner.metrics.record_flushed();
                    }
                    Err(e) => error!("failed to encode queued frame: {}", e),
                }
            }
            if let Some(token) = state.token.clone() {
                if let Some(frame) = state.tokens.sync(&token, true) {
                    send_control_frame(&handle.outbound, &frame, "token sync").await;
                }
            }
            drop(state);
            inner.dial_lock.store(false, Ordering::Release);
            set_connected(&inner, true);
            info!("session open");
            handle.inbound
        }
    };

    // Read loop: dispatch inbound frames until the transport closes.
    while let Some(event) = inbound.recv().await {
        match event {
            TransportEvent::Frame(text) => {
                inner.dispatcher.lock().await.handle_raw(&text);
            }
            TransportEvent::Closed => break,
        }
    }
    set_connected(&inner, false);
    handle_close(&inner, epoch).await;
}

/// Shared close path for failed dials and dropped connections: advance the
/// attempt counter and schedule the next reconnect, or give up until an
/// external trigger arrives.
async fn handle_close(inner: &Arc<Inner>, epoch: u64) {
    let scheduled = {
        let mut state = inner.state.lock().await;
        if state.epoch != epoch {
            // A newer connection owns the state.
            return;
        }
        state.outbound = None;
        if state.status == SessionStatus::Closing {
            info!("session closed");
            state.status = SessionStatus::Disconnected;
            return;
        }
        state.status = SessionStatus::Disconnected;
        state.attempt += 1;
        inner.metrics.record_reconnect_attempt();
        if state.attempt >= inner.config.connect.max_attempts {
            warn!(
                attempts = state.attempt,
                "retry budget exhausted; waiting for an external trigger"
            );
            return;
        }
        let delay = backoff_delay(
            state.attempt,
            inner.config.connect.backoff_base_ms,
            inner.config.connect.backoff_max_ms,
        );
        debug!(attempt = state.attempt, ?delay, "scheduling reconnect");
        let cancel = CancellationToken::new();
        state.reconnect_cancel = Some(cancel.clone());
        (delay, cancel)
    };

    let (delay, cancel) = scheduled;
    let inner = inner.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                let manager = SessionManager { inner };
                manager.inner.state.lock().await.reconnect_cancel = None;
                reconnect::connect(manager).await;
            }
        }
    });
}
