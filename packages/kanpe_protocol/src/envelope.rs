//! The envelope enum and its codec.
//!
//! Every wire message is a JSON object tagged by `type` with `id` and
//! `timestamp` always present; tag-specific data sits under `payload`
//! (`ping`/`pong` carry none). Envelopes are immutable once minted —
//! handlers never mutate them, they mint new ones.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{FeedbackType, Priority, VirtualMonitor, new_id, now_millis};

/// A single wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// First frame a caster sends after the socket opens.
    ClientHello {
        id: String,
        timestamp: i64,
        payload: ClientHelloPayload,
    },
    /// Hub's reply confirming registration; always followed by a
    /// `monitor_list_sync` before any directive.
    ServerWelcome {
        id: String,
        timestamp: i64,
        payload: ServerWelcomePayload,
    },
    /// Full registry snapshot, part of the handshake.
    MonitorListSync {
        id: String,
        timestamp: i64,
        payload: MonitorListSyncPayload,
    },
    /// Registry delta: a monitor was added.
    MonitorAdded {
        id: String,
        timestamp: i64,
        payload: MonitorAddedPayload,
    },
    /// Registry delta: a monitor was removed.
    MonitorRemoved {
        id: String,
        timestamp: i64,
        payload: MonitorRemovedPayload,
    },
    /// Registry delta: a monitor was edited in place.
    MonitorUpdated {
        id: String,
        timestamp: i64,
        payload: MonitorUpdatedPayload,
    },
    /// A cue card directive.
    KanpeMessage {
        id: String,
        timestamp: i64,
        payload: KanpeMessagePayload,
    },
    /// Raise a transient visual signal on the targeted monitors.
    FlashCommand {
        id: String,
        timestamp: i64,
        payload: FlashCommandPayload,
    },
    /// Clear the current message on the targeted monitors.
    ClearCommand {
        id: String,
        timestamp: i64,
        payload: ClearCommandPayload,
    },
    /// Typed feedback from a caster; never rebroadcast.
    FeedbackMessage {
        id: String,
        timestamp: i64,
        payload: FeedbackMessagePayload,
    },
    /// Keepalive probe, from either side.
    Ping { id: String, timestamp: i64 },
    /// Keepalive reply; echoes the probe's `id`.
    Pong { id: String, timestamp: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientHelloPayload {
    pub client_name: String,
    /// Monitor IDs this caster displays; may be empty (receive-only, e.g.
    /// a bridge that renders nothing itself).
    pub display_monitor_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerWelcomePayload {
    pub server_name: String,
    pub assigned_client_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorListSyncPayload {
    pub monitors: Vec<VirtualMonitor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorAddedPayload {
    pub monitor: VirtualMonitor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorRemovedPayload {
    pub monitor_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorUpdatedPayload {
    pub monitor: VirtualMonitor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KanpeMessagePayload {
    pub content: String,
    /// Ordered, non-empty; elements are monitor IDs or the `ALL` sentinel.
    pub target_monitor_ids: Vec<String>,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashCommandPayload {
    pub target_monitor_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearCommandPayload {
    pub target_monitor_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackMessagePayload {
    pub content: String,
    pub client_name: String,
    /// `id` of the kanpe being replied to, or empty for standalone feedback.
    pub reply_to_message_id: String,
    pub feedback_type: FeedbackType,
}

impl Envelope {
    pub fn client_hello(client_name: String, display_monitor_ids: Vec<String>) -> Self {
        Self::ClientHello {
            id: new_id(),
            timestamp: now_millis(),
            payload: ClientHelloPayload {
                client_name,
                display_monitor_ids,
            },
        }
    }

    pub fn server_welcome(server_name: String, assigned_client_id: String) -> Self {
        Self::ServerWelcome {
            id: new_id(),
            timestamp: now_millis(),
            payload: ServerWelcomePayload {
                server_name,
                assigned_client_id,
            },
        }
    }

    pub fn monitor_list_sync(monitors: Vec<VirtualMonitor>) -> Self {
        Self::MonitorListSync {
            id: new_id(),
            timestamp: now_millis(),
            payload: MonitorListSyncPayload { monitors },
        }
    }

    pub fn monitor_added(monitor: VirtualMonitor) -> Self {
        Self::MonitorAdded {
            id: new_id(),
            timestamp: now_millis(),
            payload: MonitorAddedPayload { monitor },
        }
    }

    pub fn monitor_removed(monitor_id: String) -> Self {
        Self::MonitorRemoved {
            id: new_id(),
            timestamp: now_millis(),
            payload: MonitorRemovedPayload { monitor_id },
        }
    }

    pub fn monitor_updated(monitor: VirtualMonitor) -> Self {
        Self::MonitorUpdated {
            id: new_id(),
            timestamp: now_millis(),
            payload: MonitorUpdatedPayload { monitor },
        }
    }

    pub fn kanpe(content: String, target_monitor_ids: Vec<String>, priority: Priority) -> Self {
        Self::KanpeMessage {
            id: new_id(),
            timestamp: now_millis(),
            payload: KanpeMessagePayload {
                content,
                target_monitor_ids,
                priority,
            },
        }
    }

    pub fn flash(target_monitor_ids: Vec<String>) -> Self {
        Self::FlashCommand {
            id: new_id(),
            timestamp: now_millis(),
            payload: FlashCommandPayload { target_monitor_ids },
        }
    }

    pub fn clear(target_monitor_ids: Vec<String>) -> Self {
        Self::ClearCommand {
            id: new_id(),
            timestamp: now_millis(),
            payload: ClearCommandPayload { target_monitor_ids },
        }
    }

    pub fn feedback(
        content: String,
        client_name: String,
        reply_to_message_id: String,
        feedback_type: FeedbackType,
    ) -> Self {
        Self::FeedbackMessage {
            id: new_id(),
            timestamp: now_millis(),
            payload: FeedbackMessagePayload {
                content,
                client_name,
                reply_to_message_id,
                feedback_type,
            },
        }
    }

    pub fn ping() -> Self {
        Self::Ping {
            id: new_id(),
            timestamp: now_millis(),
        }
    }

    /// A pong answering a specific probe: carries the ping's `id` so the
    /// prober can correlate.
    pub fn pong_for(ping_id: &str) -> Self {
        Self::Pong {
            id: ping_id.to_string(),
            timestamp: now_millis(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::ClientHello { id, .. }
            | Self::ServerWelcome { id, .. }
            | Self::MonitorListSync { id, .. }
            | Self::MonitorAdded { id, .. }
            | Self::MonitorRemoved { id, .. }
            | Self::MonitorUpdated { id, .. }
            | Self::KanpeMessage { id, .. }
            | Self::FlashCommand { id, .. }
            | Self::ClearCommand { id, .. }
            | Self::FeedbackMessage { id, .. }
            | Self::Ping { id, .. }
            | Self::Pong { id, .. } => id,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Self::ClientHello { timestamp, .. }
            | Self::ServerWelcome { timestamp, .. }
            | Self::MonitorListSync { timestamp, .. }
            | Self::MonitorAdded { timestamp, .. }
            | Self::MonitorRemoved { timestamp, .. }
            | Self::MonitorUpdated { timestamp, .. }
            | Self::KanpeMessage { timestamp, .. }
            | Self::FlashCommand { timestamp, .. }
            | Self::ClearCommand { timestamp, .. }
            | Self::FeedbackMessage { timestamp, .. }
            | Self::Ping { timestamp, .. }
            | Self::Pong { timestamp, .. } => *timestamp,
        }
    }

    /// The wire tag, for logs.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::ClientHello { .. } => "client_hello",
            Self::ServerWelcome { .. } => "server_welcome",
            Self::MonitorListSync { .. } => "monitor_list_sync",
            Self::MonitorAdded { .. } => "monitor_added",
            Self::MonitorRemoved { .. } => "monitor_removed",
            Self::MonitorUpdated { .. } => "monitor_updated",
            Self::KanpeMessage { .. } => "kanpe_message",
            Self::FlashCommand { .. } => "flash_command",
            Self::ClearCommand { .. } => "clear_command",
            Self::FeedbackMessage { .. } => "feedback_message",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
        }
    }

    /// True for the directive tags the hub records in history and casters
    /// run through the display filter.
    pub fn is_directive(&self) -> bool {
        matches!(
            self,
            Self::KanpeMessage { .. } | Self::FlashCommand { .. } | Self::ClearCommand { .. }
        )
    }
}

/// Serialize an envelope to its wire form.
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Parse a text frame into an envelope.
///
/// Any shape problem — bad JSON, unknown tag, missing `id`/`timestamp`,
/// payload of the wrong type — is `MalformedEnvelope`. Unknown fields
/// inside payloads are ignored for forward compatibility.
pub fn decode(text: &str) -> Result<Envelope, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}
