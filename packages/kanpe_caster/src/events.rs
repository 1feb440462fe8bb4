//! Typed event stream from the session to its shell adapters.
//!
//! Every envelope the session receives reaches this bus; the `displayed`
//! flag on directive events carries the display-filter verdict so the UI
//! renders only what this caster's monitors select.

use kanpe_protocol::{KanpeMessagePayload, VirtualMonitor};

/// Events emitted by the caster session.
#[derive(Debug, Clone)]
pub enum CasterEvent {
    ConnectionEstablished { server_address: String },
    ConnectionLost { reason: String },
    ServerWelcomeReceived {
        server_name: String,
        assigned_client_id: String,
    },
    KanpeMessageReceived {
        envelope_id: String,
        payload: KanpeMessagePayload,
        displayed: bool,
    },
    FlashReceived {
        target_monitor_ids: Vec<String>,
        displayed: bool,
    },
    ClearReceived {
        target_monitor_ids: Vec<String>,
        displayed: bool,
    },
    MonitorListReceived { monitors: Vec<VirtualMonitor> },
    MonitorAdded { monitor: VirtualMonitor },
    MonitorRemoved { monitor_id: String },
    MonitorUpdated { monitor: VirtualMonitor },
}
