//! Notification classification.
//!
//! A pure keyword match over free text, used to pick a category (and display
//! title) for chat-driven notifications. Groups are tested in a fixed order
//! and the first hit wins, so e.g. "build failed on CI" lands in `Build`
//! before the CI/deploy group is ever consulted.

use serde::Serialize;

/// Category a notification text was filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationCategory {
    Health,
    Urgent,
    Reminder,
    Stock,
    Email,
    Calendar,
    Error,
    Build,
    Deploy,
    General,
}

impl NotificationCategory {
    /// Fixed display title for this category.
    pub fn title(self) -> &'static str {
        match self {
            Self::Health => "Health Alert",
            Self::Urgent => "Urgent",
            Self::Reminder => "Reminder",
            Self::Stock => "Back in Stock",
            Self::Email => "Email",
            Self::Calendar => "Calendar",
            Self::Error => "Error",
            Self::Build => "Build",
            Self::Deploy => "Deployment",
            Self::General => "Notification",
        }
    }
}

use NotificationCategory as C;

/// Keyword groups in evaluation order. `Error` is checked before `Build` so
/// genuine error reports don't get filed as build chatter.
const GROUPS: &[(C, &[&str])] = &[
    (C::Health, &["glucose", "blood sugar", "heart rate", "blood pressure", "insulin"]),
    (C::Urgent, &["urgent", "critical", "emergency"]),
    (C::Reminder, &["reminder"]),
    (C::Stock, &["back in stock", "restocked", "in stock", "available again"]),
    (C::Email, &["email", "inbox", "mailbox"]),
    (C::Calendar, &["calendar", "meeting", "appointment"]),
    (C::Error, &["error", "exception", "crash"]),
    (C::Build, &["build", "compile"]),
    (C::Deploy, &["deploy", "pipeline", "ci"]),
];

/// Map free text to a notification category. Case-insensitive, first
/// matching group wins, unknown text falls back to `General`.
pub fn classify(text: &str) -> NotificationCategory {
    let lower = text.to_lowercase();
    for (category, keywords) in GROUPS {
        if keywords.iter().any(|k| lower.contains(k)) {
            return *category;
        }
    }
    C::General
}
