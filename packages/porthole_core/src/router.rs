//! Frame dispatch.
//!
//! Routes parsed frames to the session registry, activity selector and
//! notification classifier, and publishes the resulting observable events.
//! Responses carry no request id, so they are routed purely by payload shape
//! markers (`hello-ok`, `channels`, `sessions`, `usage`) — all markers found
//! in one payload are processed, they are not mutually exclusive.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::activity::ActivitySelector;
use crate::client::Shared;
use crate::config::GatewayConfig;
use crate::events::{ActivityRecord, ChannelStatus, GatewayEvent, NotificationEvent, UsageSnapshot};
use crate::protocol::{self, Frame, event_name, method};
use crate::sessions::SessionRegistry;

/// What the connection owner should do after a frame was handled.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RouterOutcome {
    Continue,
    /// A `hello-ok` response arrived; the connection is authenticated.
    HandshakeComplete,
}

/// Dispatches inbound frames. Owned by the receive loop — all writes to the
/// registry, the selector and the shared snapshots happen from here.
pub(crate) struct EventRouter {
    config: Arc<GatewayConfig>,
    registry: SessionRegistry,
    selector: ActivitySelector,
    outbound: mpsc::UnboundedSender<Frame>,
    events: broadcast::Sender<GatewayEvent>,
    shared: Arc<Shared>,
}

impl EventRouter {
    pub fn new(
        config: Arc<GatewayConfig>,
        outbound: mpsc::UnboundedSender<Frame>,
        events: broadcast::Sender<GatewayEvent>,
        shared: Arc<Shared>,
    ) -> Self {
        let debounce = config.display_debounce;
        Self {
            config,
            registry: SessionRegistry::new(),
            selector: ActivitySelector::with_debounce(debounce),
            outbound,
            events,
            shared,
        }
    }

    pub async fn handle_frame(&mut self, frame: Frame) -> RouterOutcome {
        match frame {
            Frame::Req { method, .. } => {
                // The gateway never calls us; tolerate and drop.
                debug!(%method, "ignoring inbound request frame");
                RouterOutcome::Continue
            }
            Frame::Res { payload } => self.handle_response(&payload).await,
            Frame::Event {
                event,
                session_key,
                payload,
            } => {
                self.handle_event(&event, session_key.as_deref(), &payload)
                    .await;
                RouterOutcome::Continue
            }
        }
    }

    async fn handle_response(&mut self, payload: &Value) -> RouterOutcome {
        let mut outcome = RouterOutcome::Continue;
        if payload.get("type").and_then(Value::as_str) == Some("hello-ok") {
            outcome = RouterOutcome::HandshakeComplete;
        }
        if let Some(channels) = payload.get("channels") {
            self.apply_channels(channels).await;
        }
        if let Some(sessions) = payload.get("sessions") {
            self.apply_sessions(sessions).await;
        }
        if let Some(usage) = payload.get("usage") {
            self.apply_usage(usage).await;
        }
        outcome
    }

    async fn handle_event(&mut self, name: &str, session_key: Option<&str>, payload: &Value) {
        match name {
            event_name::CONNECT_CHALLENGE => {
                let nonce = payload.get("nonce").and_then(Value::as_str).unwrap_or("");
                debug!(%nonce, "answering connect challenge");
                self.send(protocol::handshake_request(&self.config));
            }
            event_name::AGENT => self.apply_agent(session_key, payload).await,
            event_name::CHAT => self.apply_chat(payload),
            event_name::HEALTH => {
                if let Some(channels) = payload.get("channels") {
                    self.apply_channels(channels).await;
                }
            }
            event_name::SESSION => {
                debug!("session lifecycle event, refreshing session list");
                self.send(Frame::request(method::SESSIONS_LIST, None));
            }
            other => {
                // Forward compatible: unknown events are ignored.
                debug!(event = %other, "ignoring unknown event");
            }
        }
    }

    async fn apply_agent(&mut self, session_key: Option<&str>, payload: &Value) {
        let Some(key) = session_key else {
            warn!("agent event without sessionKey, dropping");
            return;
        };
        let is_main = self.registry.is_main(key);
        let Some(record) = ActivityRecord::from_agent_event(key, is_main, payload) else {
            warn!(session = %key, "agent event without a recognizable stream");
            return;
        };
        if let Some(change) = self.selector.observe(record, Instant::now()) {
            *self.shared.displayed.lock().await = change.clone();
            self.emit(GatewayEvent::ActivityChanged(change));
        }
    }

    fn apply_chat(&self, payload: &Value) {
        let role = payload.get("role").and_then(Value::as_str).unwrap_or("");
        if role != "assistant" {
            return;
        }
        let Some(text) = payload.get("text").and_then(Value::as_str) else {
            return;
        };
        self.emit(GatewayEvent::NotificationReceived(
            NotificationEvent::from_text(text),
        ));
    }

    async fn apply_channels(&self, value: &Value) {
        let channels = parse_channels(value);
        *self.shared.channels.lock().await = channels.clone();
        self.emit(GatewayEvent::ChannelHealthChanged(channels));
    }

    async fn apply_sessions(&mut self, value: &Value) {
        let snapshot = self.registry.replace_from_payload(value);
        *self.shared.sessions.lock().await = snapshot.clone();
        self.emit(GatewayEvent::SessionsChanged(snapshot));
    }

    async fn apply_usage(&self, value: &Value) {
        // Not every gateway implements usage; odd shapes here mean the
        // feature is unavailable, not that anything is wrong.
        if !value.is_object() || value.get("error").is_some() {
            return;
        }
        let Ok(snapshot) = serde_json::from_value::<UsageSnapshot>(value.clone()) else {
            return;
        };
        *self.shared.usage.lock().await = Some(snapshot.clone());
        self.emit(GatewayEvent::UsageChanged(snapshot));
    }

    fn send(&self, frame: Frame) {
        if self.outbound.send(frame).is_err() {
            warn!("outbound channel closed, dropping request");
        }
    }

    fn emit(&self, event: GatewayEvent) {
        // No subscribers is fine — the tray may not have attached yet.
        let _ = self.events.send(event);
    }
}

/// Channels arrive either as an array of objects or as a map keyed by name,
/// with bare status strings tolerated in map form.
fn parse_channels(value: &Value) -> Vec<ChannelStatus> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| channel_from_entry(None, v))
            .collect(),
        Value::Object(map) => map
            .iter()
            .filter_map(|(name, v)| channel_from_entry(Some(name), v))
            .collect(),
        _ => Vec::new(),
    }
}

fn channel_from_entry(name: Option<&str>, value: &Value) -> Option<ChannelStatus> {
    match value {
        Value::String(status) => Some(ChannelStatus {
            name: name?.to_string(),
            status: status.clone(),
            linked: matches!(status.as_str(), "linked" | "connected" | "ok"),
            auth_age: None,
            error: None,
            kind: None,
        }),
        Value::Object(obj) => {
            let name = name
                .map(str::to_string)
                .or_else(|| obj.get("name").and_then(Value::as_str).map(str::to_string))?;
            Some(ChannelStatus {
                name,
                status: obj
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                linked: obj.get("linked").and_then(Value::as_bool).unwrap_or(false),
                auth_age: obj.get("authAge").and_then(Value::as_u64),
                error: obj.get("error").and_then(Value::as_str).map(str::to_string),
                kind: obj.get("type").and_then(Value::as_str).map(str::to_string),
            })
        }
        _ => None,
    }
}
