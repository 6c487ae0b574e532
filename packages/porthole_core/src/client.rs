//! Gateway client and connection supervision.
//!
//! [`GatewayClient`] owns one supervisor task that holds the only reconnect
//! loop. A session is one WebSocket connection: a writer task draining an
//! unbounded frame channel, and the receive loop that feeds the
//! [`EventRouter`]. When a session ends for any reason the supervisor backs
//! off on a capped schedule and tries again until [`disconnect`] cancels it.
//!
//! [`disconnect`]: GatewayClient::disconnect

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{Mutex, Notify, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::events::{
    ActivityRecord, ChannelStatus, ConnectionState, GatewayEvent, Session, UsageSnapshot,
};
use crate::protocol::{Frame, FrameBuffer, method};
use crate::router::{EventRouter, RouterOutcome};

/// Reconnect backoff schedule. Attempts past the end reuse the last entry.
const RECONNECT_DELAYS_MS: [u64; 7] = [1000, 2000, 4000, 8000, 15000, 30000, 60000];

/// Capped backoff ladder. Each `next_delay` call is one failure; a completed
/// handshake drops back to the first rung.
#[derive(Debug, Default)]
struct Backoff {
    failures: usize,
}

impl Backoff {
    fn next_delay(&mut self) -> Duration {
        let idx = self.failures.min(RECONNECT_DELAYS_MS.len() - 1);
        self.failures += 1;
        Duration::from_millis(RECONNECT_DELAYS_MS[idx])
    }

    fn reset(&mut self) {
        self.failures = 0;
    }
}

/// Latest-state snapshots, written by the receive loop and read by anyone.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub sessions: Mutex<Vec<Session>>,
    pub channels: Mutex<Vec<ChannelStatus>>,
    pub usage: Mutex<Option<UsageSnapshot>>,
    pub displayed: Mutex<Option<ActivityRecord>>,
}

struct Core {
    config: Arc<GatewayConfig>,
    events: broadcast::Sender<GatewayEvent>,
    shared: Arc<Shared>,
    state: Mutex<ConnectionState>,
    /// Sender into the live session's writer task. `None` between sessions.
    writer: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    /// Wakes the supervisor out of its backoff sleep for an early retry.
    kick: Notify,
}

impl Core {
    async fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock().await;
        if *state == next {
            return;
        }
        info!(from = %*state, to = %next, "gateway connection state");
        *state = next;
        drop(state);
        let _ = self.events.send(GatewayEvent::ConnectionStateChanged(next));
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), GatewayError> {
        let writer = self.writer.lock().await;
        let Some(tx) = writer.as_ref() else {
            return Err(GatewayError::NotConnected);
        };
        tx.send(Frame::request(method, params))
            .map_err(|_| GatewayError::NotConnected)
    }
}

struct Supervisor {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Handle to the gateway connection. Cheap to clone-share via `Arc` inside;
/// all methods take `&self`.
pub struct GatewayClient {
    core: Arc<Core>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            core: Arc::new(Core {
                config: Arc::new(config),
                events,
                shared: Arc::new(Shared::default()),
                state: Mutex::new(ConnectionState::Disconnected),
                writer: Mutex::new(None),
                kick: Notify::new(),
            }),
            supervisor: Mutex::new(None),
        }
    }

    /// Subscribe to observable events. Each receiver gets every event from
    /// this point on; slow receivers may observe lag and skip ahead.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.core.events.subscribe()
    }

    /// Start the supervisor. Idempotent while a supervisor is running.
    pub async fn connect(&self) {
        let mut slot = self.supervisor.lock().await;
        if let Some(sup) = slot.as_ref() {
            if !sup.task.is_finished() {
                debug!("connect called while already running");
                return;
            }
        }
        let cancel = CancellationToken::new();
        let core = self.core.clone();
        let task = tokio::spawn(supervise(core, cancel.clone()));
        *slot = Some(Supervisor { cancel, task });
    }

    /// Stop reconnecting and close the current session, if any.
    pub async fn disconnect(&self) {
        let sup = self.supervisor.lock().await.take();
        if let Some(sup) = sup {
            sup.cancel.cancel();
            if let Err(err) = sup.task.await {
                warn!(error = %err, "supervisor task panicked");
            }
        }
        *self.core.writer.lock().await = None;
        self.core.set_state(ConnectionState::Disconnected).await;
    }

    /// Request a deep health report, or nudge a running supervisor into an
    /// immediate reconnect attempt when there is no live connection.
    pub async fn check_health(&self) -> Result<(), GatewayError> {
        match self
            .core
            .send_request(method::HEALTH, Some(json!({"deep": true})))
            .await
        {
            Ok(()) => Ok(()),
            Err(GatewayError::NotConnected) => {
                // Only nudge a live supervisor; a stored permit would skip
                // the first backoff sleep of a later connect().
                let slot = self.supervisor.lock().await;
                match slot.as_ref() {
                    Some(sup) if !sup.task.is_finished() => {
                        self.core.kick.notify_one();
                        Ok(())
                    }
                    _ => Err(GatewayError::NotConnected),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Send a chat message to the main agent session.
    pub async fn send_chat_message(&self, message: &str) -> Result<(), GatewayError> {
        self.core
            .send_request(method::CHAT_SEND, Some(json!({"message": message})))
            .await
    }

    /// Ask for a fresh session list. The result arrives as
    /// [`GatewayEvent::SessionsChanged`].
    pub async fn request_sessions(&self) -> Result<(), GatewayError> {
        self.core.send_request(method::SESSIONS_LIST, None).await
    }

    /// Ask for a usage snapshot. The result arrives as
    /// [`GatewayEvent::UsageChanged`] if the gateway supports it.
    pub async fn request_usage(&self) -> Result<(), GatewayError> {
        self.core.send_request(method::USAGE, None).await
    }

    pub async fn start_channel(&self, channel: &str) -> Result<(), GatewayError> {
        self.core
            .send_request(method::CHANNEL_START, Some(json!({"channel": channel})))
            .await
    }

    pub async fn stop_channel(&self, channel: &str) -> Result<(), GatewayError> {
        self.core
            .send_request(method::CHANNEL_STOP, Some(json!({"channel": channel})))
            .await
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.core.state.lock().await
    }

    pub async fn sessions(&self) -> Vec<Session> {
        self.core.shared.sessions.lock().await.clone()
    }

    pub async fn channels(&self) -> Vec<ChannelStatus> {
        self.core.shared.channels.lock().await.clone()
    }

    pub async fn usage(&self) -> Option<UsageSnapshot> {
        self.core.shared.usage.lock().await.clone()
    }

    /// The activity record currently surfaced by the selector, if any.
    pub async fn displayed_activity(&self) -> Option<ActivityRecord> {
        self.core.shared.displayed.lock().await.clone()
    }
}

/// The single reconnect owner. Runs sessions back to back with capped
/// exponential backoff between them; the failure counter resets once a
/// session completes its handshake.
async fn supervise(core: Arc<Core>, cancel: CancellationToken) {
    let mut backoff = Backoff::default();
    loop {
        if cancel.is_cancelled() {
            break;
        }
        core.set_state(ConnectionState::Connecting).await;

        let handshaken = match run_session(&core, &cancel).await {
            Ok(done) => {
                // A mid-session stream error already moved us to Error.
                if *core.state.lock().await != ConnectionState::Error {
                    core.set_state(ConnectionState::Disconnected).await;
                }
                done
            }
            // Cancelled mid-connect: a requested shutdown is not a failure.
            Err(GatewayError::Shutdown) => break,
            Err(err) => {
                warn!(error = %err, url = %core.config.url, "gateway session failed");
                core.set_state(ConnectionState::Error).await;
                false
            }
        };
        *core.writer.lock().await = None;

        if cancel.is_cancelled() {
            break;
        }
        if handshaken {
            backoff.reset();
        }
        let delay = backoff.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = core.kick.notified() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
    core.set_state(ConnectionState::Disconnected).await;
}

/// One connection lifetime. Returns `Ok(true)` if the handshake completed at
/// some point, whatever ended the session.
async fn run_session(core: &Arc<Core>, cancel: &CancellationToken) -> Result<bool, GatewayError> {
    let (ws, _) = tokio::select! {
        _ = cancel.cancelled() => return Err(GatewayError::Shutdown),
        conn = connect_async(core.config.url.as_str()) => conn?,
    };
    debug!(url = %core.config.url, "websocket open, waiting for challenge");

    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();

    // Everything spawned for this session dies with this token.
    let session = cancel.child_token();

    let writer_cancel = session.clone();
    let writer_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                _ = writer_cancel.cancelled() => break,
                frame = rx.recv() => frame,
            };
            let Some(frame) = frame else { break };
            match frame.encode() {
                Ok(text) => {
                    if let Err(err) = sink.send(Message::Text(text.into())).await {
                        warn!(error = %err, "gateway send failed");
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "dropping unencodable frame"),
            }
        }
        let _ = sink.close().await;
    });

    let mut router = EventRouter::new(
        core.config.clone(),
        tx.clone(),
        core.events.clone(),
        core.shared.clone(),
    );
    let mut buffer = FrameBuffer::new();
    let mut handshaken = false;

    loop {
        let message = tokio::select! {
            _ = session.cancelled() => break,
            message = stream.next() => message,
        };
        match message {
            Some(Ok(Message::Text(text))) => {
                buffer.push_fragment(&text);
                let frame = match buffer.finish() {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(error = %err, "unparseable gateway frame, skipping");
                        continue;
                    }
                };
                if router.handle_frame(frame).await == RouterOutcome::HandshakeComplete
                    && !handshaken
                {
                    handshaken = true;
                    // Commands are accepted only from here on; before the
                    // handshake they would silently queue.
                    *core.writer.lock().await = Some(tx.clone());
                    core.set_state(ConnectionState::Connected).await;
                    spawn_refresh_tasks(core, &tx, &session);
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                debug!("gateway closed the connection");
                break;
            }
            Some(Ok(_)) => {} // ping/pong/binary, nothing to route
            Some(Err(err)) => {
                warn!(error = %err, "gateway stream error");
                core.set_state(ConnectionState::Error).await;
                break;
            }
        }
    }

    session.cancel();
    let _ = writer_task.await;
    Ok(handshaken)
}

/// After the handshake settles, fetch health, sessions and usage once, then
/// keep health fresh on an interval.
fn spawn_refresh_tasks(
    core: &Arc<Core>,
    tx: &mpsc::UnboundedSender<Frame>,
    session: &CancellationToken,
) {
    let settle = core.config.settle_delay;
    let burst_tx = tx.clone();
    let burst_cancel = session.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = burst_cancel.cancelled() => return,
            _ = tokio::time::sleep(settle) => {}
        }
        let _ = burst_tx.send(Frame::request(method::HEALTH, Some(json!({"deep": true}))));
        let _ = burst_tx.send(Frame::request(method::SESSIONS_LIST, None));
        let _ = burst_tx.send(Frame::request(method::USAGE, None));
    });

    let every = core.config.health_interval;
    let tick_tx = tx.clone();
    let tick_cancel = session.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await; // the burst above covers the first one
        loop {
            tokio::select! {
                _ = tick_cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let frame = Frame::request(method::HEALTH, Some(json!({"deep": true})));
            if tick_tx.send(frame).is_err() {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_caps_at_last_entry() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..9)
            .map(|_| backoff.next_delay().as_millis() as u64)
            .collect();
        assert_eq!(
            delays,
            [1000, 2000, 4000, 8000, 15000, 30000, 60000, 60000, 60000]
        );
    }

    #[test]
    fn backoff_reset_returns_to_first_rung() {
        let mut backoff = Backoff::default();
        for _ in 0..5 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_millis(30000));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn state_change_emitted_once_per_transition() {
        let client = GatewayClient::new(GatewayConfig::default());
        let mut rx = client.subscribe();

        client.core.set_state(ConnectionState::Connecting).await;
        client.core.set_state(ConnectionState::Connecting).await;
        client.core.set_state(ConnectionState::Error).await;

        match rx.try_recv().unwrap() {
            GatewayEvent::ConnectionStateChanged(s) => {
                assert_eq!(s, ConnectionState::Connecting)
            }
            other => panic!("unexpected event {other:?}"),
        }
        match rx.try_recv().unwrap() {
            GatewayEvent::ConnectionStateChanged(s) => assert_eq!(s, ConnectionState::Error),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn commands_fail_fast_when_disconnected() {
        let client = GatewayClient::new(GatewayConfig::default());
        assert!(matches!(
            client.send_chat_message("hi").await,
            Err(GatewayError::NotConnected)
        ));
        assert!(matches!(
            client.request_sessions().await,
            Err(GatewayError::NotConnected)
        ));
        // With no supervisor running there is nothing to nudge either.
        assert!(matches!(
            client.check_health().await,
            Err(GatewayError::NotConnected)
        ));
    }
}
