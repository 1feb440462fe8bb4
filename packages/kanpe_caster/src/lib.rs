//! Caster-side client session for the Bi-Kanpe cue card fabric.
//!
//! Dials the director hub, completes the hello/welcome handshake, mirrors
//! the monitor registry, filters directives against the monitors this
//! caster displays, and reconnects with jittered exponential backoff when
//! the hub goes away.

mod backoff;
mod error;
mod events;
mod mirror;
mod session;

pub use backoff::{Backoff, BackoffConfig};
pub use error::CasterError;
pub use events::CasterEvent;
pub use session::{CasterSession, SessionConfig, SessionState};
