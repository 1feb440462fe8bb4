//! Authoritative virtual monitor registry.
//!
//! Lives inside the hub's shared state and is only touched under the hub
//! lock; delta emission happens on the same critical section as the
//! mutation so deltas reach subscribers in FIFO order.

use kanpe_protocol::{ALL_MONITORS, VirtualMonitor};

use crate::error::HubError;
use crate::hub::MonitorUpdate;

pub(crate) struct MonitorRegistry {
    /// Insertion-ordered; snapshots and `monitor_list_sync` preserve it.
    monitors: Vec<VirtualMonitor>,
    /// Monotonic mint counter. Never rewinds, so IDs are never reused
    /// within a server lifetime even after removals.
    next_id: u64,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self {
            monitors: Vec::new(),
            next_id: 1,
        }
    }

    /// Mint a monitor. The registry owns ID assignment; `ALL` can never
    /// come out of the mint.
    pub fn add(
        &mut self,
        name: String,
        description: Option<String>,
        color: Option<String>,
    ) -> Result<VirtualMonitor, HubError> {
        if name.trim().is_empty() {
            return Err(HubError::InvalidArgument("monitor name is empty".into()));
        }
        let id = format!("m{}", self.next_id);
        self.next_id += 1;
        let monitor = VirtualMonitor {
            id,
            name,
            description,
            color,
        };
        self.monitors.push(monitor.clone());
        Ok(monitor)
    }

    /// Remove by ID. Idempotent: an absent ID is a no-op and the caller
    /// must not emit a delta for it.
    pub fn remove(&mut self, id: &str) -> Option<VirtualMonitor> {
        let pos = self.monitors.iter().position(|m| m.id == id)?;
        Some(self.monitors.remove(pos))
    }

    /// Apply field updates in place.
    pub fn update(&mut self, id: &str, fields: MonitorUpdate) -> Result<VirtualMonitor, HubError> {
        if let Some(name) = &fields.name {
            if name.trim().is_empty() {
                return Err(HubError::InvalidArgument("monitor name is empty".into()));
            }
        }
        let monitor = self
            .monitors
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| HubError::NotFound(id.to_string()))?;
        if let Some(name) = fields.name {
            monitor.name = name;
        }
        if let Some(description) = fields.description {
            monitor.description = Some(description);
        }
        if let Some(color) = fields.color {
            monitor.color = Some(color);
        }
        Ok(monitor.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.monitors.iter().any(|m| m.id == id)
    }

    /// Every target must be a known monitor ID or the `ALL` sentinel.
    pub fn validate_targets(&self, targets: &[String]) -> Result<(), HubError> {
        for target in targets {
            if target != ALL_MONITORS && !self.contains(target) {
                return Err(HubError::InvalidArgument(format!(
                    "unknown target monitor: {target}"
                )));
            }
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<VirtualMonitor> {
        self.monitors.clone()
    }
}
