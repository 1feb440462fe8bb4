//! Loopback-only control API for the Bi-Kanpe caster process.
//!
//! Stream Deck plugins and web caster bridges drive the local session
//! through this surface: one JSON request in, one JSON response out, over
//! a WebSocket that only loopback peers may open.

mod protocol;
mod server;

pub use protocol::{BridgeRequest, BridgeResponse};
pub use server::{BridgeError, BridgeServer, BridgeStatus};
