//! Wire protocol codec.
//!
//! The gateway speaks JSON text frames with a top-level `type` discriminator:
//! requests (`req`), responses (`res`) and push events (`event`). Responses
//! carry no request id — they are matched purely by payload shape, which is
//! fine because every outbound call here is a periodic poll rather than a
//! one-shot RPC.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::GatewayConfig;

/// Request method names.
pub mod method {
    pub const CONNECT: &str = "connect";
    pub const HEALTH: &str = "health";
    pub const CHAT_SEND: &str = "chat.send";
    pub const SESSIONS_LIST: &str = "sessions.list";
    pub const USAGE: &str = "usage";
    pub const CHANNEL_START: &str = "channel.start";
    pub const CHANNEL_STOP: &str = "channel.stop";
}

/// Push event names the core understands. Anything else is ignored.
pub mod event_name {
    pub const CONNECT_CHALLENGE: &str = "connect.challenge";
    pub const AGENT: &str = "agent";
    pub const HEALTH: &str = "health";
    pub const CHAT: &str = "chat";
    pub const SESSION: &str = "session";
}

/// One wire frame, either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Req {
        id: String,
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
    Res {
        #[serde(default)]
        payload: Value,
    },
    Event {
        event: String,
        #[serde(rename = "sessionKey", default, skip_serializing_if = "Option::is_none")]
        session_key: Option<String>,
        #[serde(default)]
        payload: Value,
    },
}

impl Frame {
    /// Build an outbound request with a fresh unique id.
    pub fn request(method: impl Into<String>, params: Option<Value>) -> Self {
        Frame::Req {
            id: Uuid::new_v4().to_string(),
            method: method.into(),
            params,
        }
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Build the `connect` identification request answering a challenge.
pub fn handshake_request(config: &GatewayConfig) -> Frame {
    let params = serde_json::json!({
        "minProtocol": config.min_protocol,
        "maxProtocol": config.max_protocol,
        "client": {
            "id": config.client.id,
            "version": config.client.version,
            "platform": config.client.platform,
            "mode": config.client.mode,
            "displayName": config.client.display_name,
        },
        "role": config.role,
        "scopes": config.scopes,
        "caps": config.caps,
        "commands": config.commands,
        "permissions": config.permissions,
        "auth": { "token": config.token },
        "locale": config.locale,
        "userAgent": config.user_agent,
    });
    Frame::request(method::CONNECT, Some(params))
}

/// Accumulates text fragments until the transport signals end-of-message,
/// then parses the whole buffer as one JSON document.
///
/// Malformed buffers are reported as an error and the buffer is cleared
/// either way, so one bad frame never poisons the next.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: String,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment of an in-flight message.
    pub fn push_fragment(&mut self, fragment: &str) {
        self.buf.push_str(fragment);
    }

    /// End-of-message boundary: parse everything accumulated so far and
    /// reset the buffer.
    pub fn finish(&mut self) -> serde_json::Result<Frame> {
        let doc = std::mem::take(&mut self.buf);
        serde_json::from_str(&doc)
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrip_preserves_method_and_params() {
        let frame = Frame::request(
            method::CHAT_SEND,
            Some(serde_json::json!({"message": "hello — 🦀"})),
        );
        let wire = frame.encode().unwrap();

        let mut buf = FrameBuffer::new();
        buf.push_fragment(&wire);
        let parsed = buf.finish().unwrap();

        match (frame, parsed) {
            (
                Frame::Req { method: m1, params: p1, id: id1 },
                Frame::Req { method: m2, params: p2, id: id2 },
            ) => {
                assert_eq!(m1, m2);
                assert_eq!(p1, p2);
                assert_eq!(id1, id2);
            }
            other => panic!("expected req frames, got {other:?}"),
        }
    }

    #[test]
    fn request_envelope_shape() {
        let wire = Frame::request(method::HEALTH, Some(serde_json::json!({"deep": true})))
            .encode()
            .unwrap();
        let v: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(v["type"], "req");
        assert_eq!(v["method"], "health");
        assert_eq!(v["params"]["deep"], true);
        // id must be present and parse as a uuid
        let id = v["id"].as_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }

    #[test]
    fn fresh_id_per_request() {
        let a = Frame::request(method::USAGE, None);
        let b = Frame::request(method::USAGE, None);
        match (a, b) {
            (Frame::Req { id: ia, .. }, Frame::Req { id: ib, .. }) => assert_ne!(ia, ib),
            _ => unreachable!(),
        }
    }

    #[test]
    fn params_omitted_when_none() {
        let wire = Frame::request(method::SESSIONS_LIST, None).encode().unwrap();
        assert!(!wire.contains("params"));
    }

    #[test]
    fn fragmented_message_assembles() {
        let wire = r#"{"type":"event","event":"agent","sessionKey":"s1","payload":{"stream":"tool"}}"#;
        let mut buf = FrameBuffer::new();
        for chunk in [&wire[..10], &wire[10..25], &wire[25..]] {
            buf.push_fragment(chunk);
        }
        match buf.finish().unwrap() {
            Frame::Event { event, session_key, payload } => {
                assert_eq!(event, "agent");
                assert_eq!(session_key.as_deref(), Some("s1"));
                assert_eq!(payload["stream"], "tool");
            }
            other => panic!("expected event frame, got {other:?}"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn malformed_json_clears_buffer() {
        let mut buf = FrameBuffer::new();
        buf.push_fragment("{not json");
        assert!(buf.finish().is_err());
        assert!(buf.is_empty());

        // Next message parses fine.
        buf.push_fragment(r#"{"type":"res","payload":{}}"#);
        assert!(buf.finish().is_ok());
    }

    #[test]
    fn response_with_missing_payload_defaults_to_null() {
        let parsed: Frame = serde_json::from_str(r#"{"type":"res"}"#).unwrap();
        match parsed {
            Frame::Res { payload } => assert!(payload.is_null()),
            other => panic!("expected res frame, got {other:?}"),
        }
    }

    #[test]
    fn handshake_request_carries_identity_and_token() {
        let mut config = GatewayConfig::new("ws://localhost:1", "tok-123");
        config.client.display_name = "Test Porthole".to_string();

        let wire = handshake_request(&config).encode().unwrap();
        let v: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(v["method"], "connect");
        let p = &v["params"];
        assert_eq!(p["minProtocol"], 1);
        assert_eq!(p["maxProtocol"], 1);
        assert_eq!(p["client"]["displayName"], "Test Porthole");
        assert_eq!(p["auth"]["token"], "tok-123");
        assert!(p["scopes"].is_array());
        assert!(p["permissions"].is_object());
        assert!(p["userAgent"].as_str().unwrap().starts_with("porthole/"));
    }
}
