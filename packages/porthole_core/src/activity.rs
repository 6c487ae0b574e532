//! Activity tracking and displayed-session selection.
//!
//! Several sessions (main agent, sub-agents, scheduled jobs) can report
//! activity at once, but only one may be surfaced to observers at a time.
//! The selector keeps a per-session cache of the latest record and debounces
//! switches between non-main sessions so the surfaced activity doesn't
//! flicker. The main session always preempts immediately.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::events::{ActivityKind, ActivityRecord};

/// Labels longer than this are cut to one char less plus an ellipsis.
pub(crate) const MAX_LABEL_LEN: usize = 60;

/// Default minimum time between displayed-session switches.
pub const DISPLAY_DEBOUNCE: Duration = Duration::from_secs(3);

/// Resolves which single session's activity is surfaced.
#[derive(Debug)]
pub struct ActivitySelector {
    cache: HashMap<String, ActivityRecord>,
    displayed: Option<String>,
    last_switch: Instant,
    /// Last record handed to observers, for change detection.
    surfaced: Option<ActivityRecord>,
    debounce: Duration,
}

impl ActivitySelector {
    pub fn new() -> Self {
        Self::with_debounce(DISPLAY_DEBOUNCE)
    }

    pub fn with_debounce(debounce: Duration) -> Self {
        Self {
            cache: HashMap::new(),
            displayed: None,
            last_switch: Instant::now(),
            surfaced: None,
            debounce,
        }
    }

    /// Feed one incoming activity record and resolve the displayed session.
    ///
    /// Returns `Some(new_surfaced)` when the surfaced activity changed
    /// (`Some(None)` meaning nothing is active anywhere), `None` when it
    /// didn't.
    pub fn observe(
        &mut self,
        record: ActivityRecord,
        now: Instant,
    ) -> Option<Option<ActivityRecord>> {
        let key = record.session_key.clone();
        let main_preempt = record.is_main && record.kind != ActivityKind::Idle;
        self.cache.insert(key.clone(), record);

        if main_preempt {
            // Main always wins, no debounce.
            self.displayed = Some(key);
            self.last_switch = now;
        } else {
            let hold = self
                .displayed
                .as_ref()
                .and_then(|d| self.cache.get(d))
                .map(|r| r.kind != ActivityKind::Idle)
                .unwrap_or(false)
                && now.duration_since(self.last_switch) < self.debounce;

            if !hold {
                let next = self
                    .cache
                    .values()
                    .find(|r| r.is_main && r.kind != ActivityKind::Idle)
                    .map(|r| r.session_key.clone())
                    .or_else(|| {
                        let r = self.cache.get(&key)?;
                        (r.kind != ActivityKind::Idle).then(|| key.clone())
                    });
                if next != self.displayed {
                    self.displayed = next;
                    self.last_switch = now;
                }
            }
        }

        let current = self
            .displayed
            .as_ref()
            .and_then(|d| self.cache.get(d))
            .cloned();
        if current != self.surfaced {
            self.surfaced = current.clone();
            Some(current)
        } else {
            None
        }
    }

    /// Currently surfaced activity, if any.
    pub fn displayed(&self) -> Option<&ActivityRecord> {
        self.displayed.as_ref().and_then(|d| self.cache.get(d))
    }

    /// Forget everything (used when a connection is torn down).
    pub fn clear(&mut self) {
        self.cache.clear();
        self.displayed = None;
        self.surfaced = None;
    }
}

impl Default for ActivitySelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityRecord {
    /// Build a record from an `agent` event payload
    /// (`{"stream": "job"|"tool", "data": {...}}`).
    ///
    /// Returns `None` when the payload carries no recognizable stream.
    pub fn from_agent_event(session_key: &str, is_main: bool, payload: &Value) -> Option<Self> {
        let stream = payload.get("stream")?.as_str()?;
        let null = Value::Null;
        let data = payload.get("data").unwrap_or(&null);
        let state = data
            .get("state")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match stream {
            "job" => {
                let kind = if matches!(state.as_str(), "done" | "error") {
                    ActivityKind::Idle
                } else {
                    ActivityKind::Job
                };
                let label = data
                    .get("label")
                    .and_then(Value::as_str)
                    .unwrap_or("job")
                    .to_string();
                Some(Self {
                    session_key: session_key.to_string(),
                    is_main,
                    kind,
                    state,
                    tool_name: None,
                    label: truncate_label(&label),
                })
            }
            "tool" => {
                let tool = data.get("tool").and_then(Value::as_str).unwrap_or("tool");
                let phase = data.get("phase").and_then(Value::as_str);
                let kind = if phase == Some("result") {
                    // A tool result means the work is over, whatever the tool.
                    ActivityKind::Idle
                } else {
                    kind_for_tool(tool)
                };
                Some(Self {
                    session_key: session_key.to_string(),
                    is_main,
                    kind,
                    state,
                    tool_name: Some(tool.to_string()),
                    label: derive_label(data, tool),
                })
            }
            _ => None,
        }
    }
}

fn kind_for_tool(name: &str) -> ActivityKind {
    match name {
        "exec" => ActivityKind::Exec,
        "read" => ActivityKind::Read,
        "write" => ActivityKind::Write,
        "edit" => ActivityKind::Edit,
        "web_search" | "web_fetch" => ActivityKind::Search,
        "browser" => ActivityKind::Browser,
        "message" => ActivityKind::Message,
        _ => ActivityKind::Tool,
    }
}

/// Derive a short label from structured tool arguments, in fixed precedence:
/// command → path/file_path → query → url → bare tool name.
pub fn derive_label(data: &Value, tool: &str) -> String {
    let args = data.get("args").unwrap_or(data);

    if let Some(cmd) = args.get("command").and_then(Value::as_str) {
        let first_line = cmd.lines().next().unwrap_or(cmd);
        return truncate_label(first_line);
    }
    if let Some(path) = args
        .get("path")
        .or_else(|| args.get("file_path"))
        .and_then(Value::as_str)
    {
        return shorten_path(path);
    }
    if let Some(query) = args.get("query").and_then(Value::as_str) {
        return truncate_label(query);
    }
    if let Some(url) = args.get("url").and_then(Value::as_str) {
        return truncate_label(url);
    }
    tool.to_string()
}

/// Render a path as `…/<parent>/<leaf>` when it has more than two segments,
/// else just the leaf.
pub fn shorten_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [] => String::new(),
        [.., parent, leaf] if segments.len() > 2 => format!("…/{parent}/{leaf}"),
        rest => (*rest.last().unwrap_or(&"")).to_string(),
    }
}

/// Cut to `MAX_LABEL_LEN - 1` chars plus a single ellipsis when too long.
pub fn truncate_label(s: &str) -> String {
    if s.chars().count() <= MAX_LABEL_LEN {
        s.to_string()
    } else {
        let cut: String = s.chars().take(MAX_LABEL_LEN - 1).collect();
        format!("{cut}…")
    }
}
