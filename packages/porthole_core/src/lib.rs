//! Core client for a personal-agent gateway.
//!
//! Maintains one long-lived, authenticated WebSocket to the gateway, keeps
//! local snapshots of what the agent is doing (sessions, activity, channel
//! health, usage), and publishes changes over a broadcast channel. Embedding
//! applications (a tray icon, a status bar widget) subscribe to
//! [`GatewayEvent`]s and issue the occasional command; everything stateful
//! lives in here.
//!
//! ```no_run
//! use porthole_core::{GatewayClient, GatewayConfig, GatewayEvent};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = GatewayClient::new(GatewayConfig::new(
//!         "ws://127.0.0.1:18789",
//!         std::env::var("GATEWAY_TOKEN").unwrap_or_default(),
//!     ));
//!     let mut events = client.subscribe();
//!     client.connect().await;
//!
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             GatewayEvent::NotificationReceived(n) => println!("{}: {}", n.title, n.message),
//!             GatewayEvent::ConnectionStateChanged(s) => println!("gateway is {s}"),
//!             _ => {}
//!         }
//!     }
//! }
//! ```

pub mod activity;
pub mod classify;
mod client;
pub mod config;
mod error;
pub mod events;
pub mod protocol;
pub mod sessions;

mod router;

pub use activity::{ActivitySelector, DISPLAY_DEBOUNCE, derive_label, shorten_path};
pub use classify::{NotificationCategory, classify};
pub use client::GatewayClient;
pub use config::{ClientInfo, GatewayConfig};
pub use error::GatewayError;
pub use events::{
    ActivityKind, ActivityRecord, ChannelStatus, ConnectionState, GatewayEvent,
    MAX_NOTIFICATION_LEN, NotificationEvent, Session, UsageSnapshot,
};
pub use sessions::SessionRegistry;
