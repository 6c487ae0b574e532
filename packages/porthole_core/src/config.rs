//! Client configuration.
//!
//! Everything the core needs is injected through [`GatewayConfig`] — there is
//! no global state, no config file, and no on-disk persistence. The embedding
//! application (tray icon, settings UI, …) owns all of that and hands the
//! resolved values in here.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Descriptor for this client, sent in the `connect` handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: String,
    pub version: String,
    pub platform: String,
    pub mode: String,
    pub display_name: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            id: "porthole".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform: std::env::consts::OS.to_string(),
            mode: "companion".to_string(),
            display_name: "Porthole".to_string(),
        }
    }
}

/// Configuration for a [`GatewayClient`](crate::GatewayClient).
///
/// `url` and `token` are the only values without a usable default; the
/// handshake identity fields default to a read-mostly companion client.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// WebSocket URL of the gateway, e.g. `ws://127.0.0.1:18789`.
    pub url: String,
    /// Bearer token forwarded verbatim in the handshake `auth` object.
    /// The core does not validate or refresh it.
    pub token: String,
    pub client: ClientInfo,
    pub role: String,
    pub scopes: Vec<String>,
    pub caps: Vec<String>,
    pub commands: Vec<String>,
    /// Free-form permissions object forwarded in the handshake.
    pub permissions: Value,
    pub locale: String,
    pub user_agent: String,
    pub min_protocol: u32,
    pub max_protocol: u32,
    /// Pause after `hello-ok` before firing the initial health/sessions/usage
    /// refresh burst.
    pub settle_delay: Duration,
    /// Interval between periodic deep health checks while connected.
    pub health_interval: Duration,
    /// Minimum time between displayed-session switches for non-main sessions.
    pub display_debounce: Duration,
    /// Capacity of the broadcast channel carrying observable events.
    pub event_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:18789".to_string(),
            token: String::new(),
            client: ClientInfo::default(),
            role: "operator".to_string(),
            scopes: vec![
                "sessions".to_string(),
                "chat".to_string(),
                "health".to_string(),
                "usage".to_string(),
                "channels".to_string(),
            ],
            caps: Vec::new(),
            commands: Vec::new(),
            permissions: Value::Object(serde_json::Map::new()),
            locale: "en-US".to_string(),
            user_agent: format!("porthole/{}", env!("CARGO_PKG_VERSION")),
            min_protocol: 1,
            max_protocol: 1,
            settle_delay: Duration::from_millis(300),
            health_interval: Duration::from_secs(30),
            display_debounce: Duration::from_secs(3),
            event_capacity: 256,
        }
    }
}

impl GatewayConfig {
    /// Config pointing at `url`, authenticating with `token`.
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            ..Self::default()
        }
    }
}
