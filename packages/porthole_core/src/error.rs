use tokio_tungstenite::tungstenite;

/// Errors surfaced to callers of the gateway client.
///
/// Transport and protocol failures that occur inside the receive loop are
/// handled internally (logged, reconnect scheduled) and never reach callers
/// through this type; only explicit commands return it.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// WebSocket connect/send/receive failure.
    #[error("transport: {0}")]
    Transport(#[from] tungstenite::Error),

    /// Malformed or unencodable wire data.
    #[error("protocol: {0}")]
    Protocol(#[from] serde_json::Error),

    /// A command was issued while the client has no live connection.
    #[error("not connected to gateway")]
    NotConnected,

    /// The client was shut down and will not reconnect.
    #[error("client was shut down")]
    Shutdown,
}
