//! Shared protocol types: monitors, priorities, feedback kinds.

use serde::{Deserialize, Serialize};

/// Broadcast sentinel, recognized only inside `target_monitor_ids` lists.
///
/// Never a valid monitor ID — the registry refuses to mint or accept it.
pub const ALL_MONITORS: &str = "ALL";

/// A named logical destination for directives, independent of any physical
/// device. Several casters may render the same monitor; one caster may
/// render several.
///
/// `description` and `color` are presentation hints; peers must tolerate
/// their absence and ignore optional fields they don't know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMonitor {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Priority levels for kanpe directives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    High,
    Urgent,
}

/// Classification of caster feedback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackType {
    #[default]
    Ack,
    Question,
    Issue,
    Info,
}

/// Reduced view of the most recent directive a caster displayed.
///
/// Surfaced through the local control API (`get_state`) and used by
/// `react_to_latest` to build reply feedback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestMessageInfo {
    pub id: String,
    pub content: String,
    pub priority: Priority,
    pub target_monitor_ids: Vec<String>,
}

/// The display filter predicate.
///
/// A directive is renderable iff its target list contains the `ALL`
/// sentinel or intersects the monitors this caster displays. Monitor IDs
/// are opaque strings; no ordering is assumed.
pub fn targets_match(targets: &[String], displayed: &[String]) -> bool {
    targets
        .iter()
        .any(|t| t == ALL_MONITORS || displayed.iter().any(|d| d == t))
}

/// Mint a fresh v4 UUID string.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Milliseconds since the Unix epoch on the local clock.
///
/// Timestamps are hints for operators, not ordering keys — no clock sync
/// is assumed between peers.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
