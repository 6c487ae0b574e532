//! Observable data types published by the client core.
//!
//! Consumers subscribe via [`GatewayClient::subscribe`](crate::GatewayClient::subscribe)
//! and receive [`GatewayEvent`] values over a tokio broadcast channel — no
//! inheritance, no callbacks registered into the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::{NotificationCategory, classify};

/// Maximum notification message length before truncation.
pub const MAX_NOTIFICATION_LEN: usize = 200;

/// Connection lifecycle state. Exactly one value holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// A logical unit of agent work known to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    /// Stable unique identifier, e.g. `agent:main:main`.
    pub key: String,
    pub is_main: bool,
    pub status: String,
    pub model: Option<String>,
    pub channel: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub current_activity: Option<String>,
    pub last_seen: DateTime<Utc>,
}

/// What kind of work a session is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Idle,
    Job,
    Exec,
    Read,
    Write,
    Edit,
    Search,
    Browser,
    Message,
    Tool,
}

/// Latest activity reported by one session. One record per session, newer
/// records overwrite older ones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityRecord {
    pub session_key: String,
    pub is_main: bool,
    pub kind: ActivityKind,
    pub state: String,
    pub tool_name: Option<String>,
    /// Short human-readable description, derived from tool arguments.
    pub label: String,
}

/// Most recent token usage reported by the gateway. No history is kept.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageSnapshot {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    pub request_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Health of one gateway channel (messaging surface, integration, …).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStatus {
    pub name: String,
    pub status: String,
    pub linked: bool,
    pub auth_age: Option<u64>,
    pub error: Option<String>,
    /// Wire field `type`.
    pub kind: Option<String>,
}

/// A user-facing notification derived from gateway chat traffic.
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationEvent {
    pub title: String,
    pub message: String,
    pub category: NotificationCategory,
}

impl NotificationEvent {
    /// Classify `text` and build a notification with the category's fixed
    /// title. Messages longer than [`MAX_NOTIFICATION_LEN`] chars are cut to
    /// one char less plus an ellipsis, so the result never exceeds the limit.
    pub fn from_text(text: &str) -> Self {
        let category = classify(text);
        let message = if text.chars().count() > MAX_NOTIFICATION_LEN {
            let cut: String = text.chars().take(MAX_NOTIFICATION_LEN - 1).collect();
            format!("{cut}…")
        } else {
            text.to_string()
        };
        Self {
            title: category.title().to_string(),
            message,
            category,
        }
    }
}

/// Events surfaced to external collaborators (tray UI, toasts, …).
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    ConnectionStateChanged(ConnectionState),
    NotificationReceived(NotificationEvent),
    /// The displayed session's activity changed; `None` means nothing is
    /// active anywhere.
    ActivityChanged(Option<ActivityRecord>),
    ChannelHealthChanged(Vec<ChannelStatus>),
    /// Full replacement session list, main session first.
    SessionsChanged(Vec<Session>),
    UsageChanged(UsageSnapshot),
}
