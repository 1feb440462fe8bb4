//! Typed event stream from the hub to its shell adapters.
//!
//! The desktop window, web page, and Stream Deck plugin are external
//! collaborators; they subscribe to this broadcast channel and translate
//! events into whatever notification mechanism they use.

use serde::{Deserialize, Serialize};

use kanpe_protocol::{FeedbackMessagePayload, VirtualMonitor};

/// Snapshot of one connected caster, as shown to the director UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: String,
    pub name: String,
    pub display_monitor_ids: Vec<String>,
    /// Milliseconds since epoch of the last inbound frame.
    pub last_seen: i64,
    /// Frames dropped from this subscriber's outbox so far.
    pub dropped_frames: u64,
}

/// Events emitted by the hub.
#[derive(Debug, Clone)]
pub enum HubEvent {
    ServerStarted { port: u16 },
    ServerStopped,
    ClientConnected { client: ClientInfo },
    ClientDisconnected { client_id: String, reason: String },
    FeedbackReceived {
        client_id: String,
        envelope_id: String,
        payload: FeedbackMessagePayload,
    },
    MonitorAdded { monitor: VirtualMonitor },
    MonitorRemoved { monitor_id: String },
    MonitorUpdated { monitor: VirtualMonitor },
}
