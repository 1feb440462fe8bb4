//! Wire protocol for the Bi-Kanpe cue card fabric.
//!
//! Everything that crosses a socket lives here: the envelope enum, its
//! payload structs, the shared protocol types, and the codec functions.
//! Both the director hub and the caster client depend on this package and
//! nothing else protocol-shaped exists anywhere else.

mod envelope;
mod error;
mod types;

pub use envelope::{
    ClearCommandPayload, ClientHelloPayload, Envelope, FeedbackMessagePayload, FlashCommandPayload,
    KanpeMessagePayload, MonitorAddedPayload, MonitorListSyncPayload, MonitorRemovedPayload,
    MonitorUpdatedPayload, ServerWelcomePayload, decode, encode,
};
pub use error::ProtocolError;
pub use types::{
    ALL_MONITORS, FeedbackType, LatestMessageInfo, Priority, VirtualMonitor, new_id, now_millis,
    targets_match,
};
