//! Session registry.
//!
//! The gateway reports sessions in two wire shapes: an ordered array of
//! objects with explicit `key` fields, or a keyed map whose values may be
//! objects, bare status strings, or stray numbers. Both normalize into one
//! canonical table here. Each successful parse replaces the whole table —
//! there is no incremental merge.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::events::Session;

/// Map keys that are always metadata, never sessions, whatever their value.
const METADATA_KEYS: &[&str] = &["recent", "count", "path", "defaults", "ts"];

/// Result of probing one keyed-map entry: a typed session, or an explicit
/// "not a session" marker. Never silent coercion.
#[derive(Debug)]
enum EntryDecode {
    Session(Session),
    Skip,
}

/// Canonical session table, main session first, remainder by most recently
/// seen.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    table: Vec<Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole table from a sessions payload (either wire shape).
    /// Returns the new presentation-ordered snapshot.
    pub fn replace_from_payload(&mut self, payload: &Value) -> Vec<Session> {
        let now = Utc::now();
        let mut table: Vec<Session> = Vec::new();

        let mut push = |session: Session| {
            // At most one session per key; later entries win.
            if let Some(existing) = table.iter_mut().find(|s| s.key == session.key) {
                *existing = session;
            } else {
                table.push(session);
            }
        };

        match payload {
            Value::Array(items) => {
                for item in items {
                    if let Some(session) = decode_listed(item, now) {
                        push(session);
                    }
                }
            }
            Value::Object(map) => {
                for (key, value) in map {
                    if let EntryDecode::Session(session) = decode_keyed(key, value, now) {
                        push(session);
                    }
                }
            }
            _ => {}
        }

        table.sort_by(|a, b| {
            b.is_main
                .cmp(&a.is_main)
                .then(b.last_seen.cmp(&a.last_seen))
        });
        self.table = table;
        self.table.clone()
    }

    /// Presentation-ordered copy of the current table.
    pub fn snapshot(&self) -> Vec<Session> {
        self.table.clone()
    }

    /// Whether `key` is the main session, preferring registry knowledge over
    /// the key-pattern heuristic.
    pub fn is_main(&self, key: &str) -> bool {
        self.table
            .iter()
            .find(|s| s.key == key)
            .map(|s| s.is_main)
            .unwrap_or_else(|| infer_main(key))
    }
}

/// Array shape: objects with an explicit `key` field. Anything else is
/// dropped.
fn decode_listed(value: &Value, now: DateTime<Utc>) -> Option<Session> {
    let obj = value.as_object()?;
    let key = obj.get("key")?.as_str()?.to_string();
    Some(session_from_fields(key, obj, now))
}

/// Keyed-map shape: probe the key, then the value, in a fixed order.
fn decode_keyed(key: &str, value: &Value, now: DateTime<Utc>) -> EntryDecode {
    if METADATA_KEYS.contains(&key) {
        return EntryDecode::Skip;
    }
    // A key with no colon that mentions neither agents nor sessions is
    // unrelated metadata.
    if !key.contains(':') && !key.contains("agent") && !key.contains("session") {
        return EntryDecode::Skip;
    }

    match value {
        Value::Object(obj) => {
            EntryDecode::Session(session_from_fields(key.to_string(), obj, now))
        }
        Value::String(s) if looks_like_path(s) => EntryDecode::Skip,
        Value::String(s) => EntryDecode::Session(Session {
            key: key.to_string(),
            is_main: infer_main(key),
            status: s.clone(),
            model: None,
            channel: None,
            started_at: None,
            current_activity: None,
            last_seen: now,
        }),
        // Numbers are counters or timestamps, not sessions.
        _ => EntryDecode::Skip,
    }
}

fn session_from_fields(key: String, obj: &Map<String, Value>, now: DateTime<Utc>) -> Session {
    // The key-pattern heuristic is a floor: an explicit isMain can only ever
    // raise it to true.
    let explicit_main = obj.get("isMain").and_then(Value::as_bool).unwrap_or(false);
    let is_main = explicit_main || infer_main(&key);

    Session {
        is_main,
        status: obj
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        model: string_field(obj, "model"),
        channel: string_field(obj, "channel"),
        started_at: obj.get("startedAt").and_then(parse_timestamp),
        current_activity: string_field(obj, "currentActivity"),
        last_seen: obj
            .get("lastSeen")
            .and_then(parse_timestamp)
            .unwrap_or(now),
        key,
    }
}

fn string_field(obj: &Map<String, Value>, name: &str) -> Option<String> {
    obj.get(name).and_then(Value::as_str).map(str::to_string)
}

/// RFC 3339 string or epoch milliseconds; anything else is dropped.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// Main-session key patterns: `main`, `…:main`, or a `:main:main` segment.
pub(crate) fn infer_main(key: &str) -> bool {
    key == "main" || key.ends_with(":main") || key.contains(":main:main")
}

/// Bare string values that look like filesystem paths are leftover metadata,
/// not status strings.
fn looks_like_path(s: &str) -> bool {
    s.contains('/') || s.starts_with('~')
}
