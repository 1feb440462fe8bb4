//! Hub metrics for observability.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide hub counters. Cheap atomics, readable at any time.
#[derive(Debug, Default)]
pub struct HubMetrics {
    /// Currently active subscriber connections.
    pub active_connections: AtomicU64,
    /// Total connections accepted since hub creation.
    pub total_connections: AtomicU64,
    /// Envelopes accepted onto the broadcast path.
    pub envelopes_broadcast: AtomicU64,
    /// Feedback envelopes recorded.
    pub feedback_received: AtomicU64,
    /// Frames dropped across all outboxes.
    pub frames_dropped: AtomicU64,
    /// Connections closed for protocol violations or malformed frames.
    pub protocol_violations: AtomicU64,
    /// Connections closed for missed keepalives.
    pub timeouts: AtomicU64,
    /// Subscribers disconnected for sustained overflow.
    pub slow_consumer_disconnects: AtomicU64,
}

impl HubMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn envelope_broadcast(&self) {
        self.envelopes_broadcast.fetch_add(1, Ordering::Relaxed);
    }

    pub fn feedback_recorded(&self) {
        self.feedback_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_dropped_add(&self, n: u64) {
        self.frames_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn protocol_violation(&self) {
        self.protocol_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn slow_consumer(&self) {
        self.slow_consumer_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            envelopes_broadcast: self.envelopes_broadcast.load(Ordering::Relaxed),
            feedback_received: self.feedback_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            protocol_violations: self.protocol_violations.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            slow_consumer_disconnects: self.slow_consumer_disconnects.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counter values, for logs and status surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub active_connections: u64,
    pub total_connections: u64,
    pub envelopes_broadcast: u64,
    pub feedback_received: u64,
    pub frames_dropped: u64,
    pub protocol_violations: u64,
    pub timeouts: u64,
    pub slow_consumer_disconnects: u64,
}
