//! Local mirror of the hub's monitor registry.
//!
//! Replaced wholesale on `monitor_list_sync`, mutated in place on deltas.
//! The caster UI reads only from here.

use kanpe_protocol::VirtualMonitor;

#[derive(Debug, Default)]
pub(crate) struct MonitorMirror {
    monitors: Vec<VirtualMonitor>,
}

impl MonitorMirror {
    pub fn replace(&mut self, monitors: Vec<VirtualMonitor>) {
        self.monitors = monitors;
    }

    pub fn add(&mut self, monitor: VirtualMonitor) {
        match self.monitors.iter_mut().find(|m| m.id == monitor.id) {
            Some(existing) => *existing = monitor,
            None => self.monitors.push(monitor),
        }
    }

    pub fn remove(&mut self, monitor_id: &str) {
        self.monitors.retain(|m| m.id != monitor_id);
    }

    /// Deltas for monitors we never heard of are ignored; the next sync
    /// reconciles.
    pub fn update(&mut self, monitor: VirtualMonitor) {
        if let Some(existing) = self.monitors.iter_mut().find(|m| m.id == monitor.id) {
            *existing = monitor;
        }
    }

    pub fn snapshot(&self) -> Vec<VirtualMonitor> {
        self.monitors.clone()
    }

    pub fn clear(&mut self) {
        self.monitors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(id: &str, name: &str) -> VirtualMonitor {
        VirtualMonitor {
            id: id.into(),
            name: name.into(),
            description: None,
            color: None,
        }
    }

    #[test]
    fn sync_replaces_wholesale() {
        let mut mirror = MonitorMirror::default();
        mirror.replace(vec![monitor("m1", "Host")]);
        mirror.replace(vec![monitor("m2", "Actor"), monitor("m3", "Band")]);
        let ids: Vec<_> = mirror.snapshot().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["m2", "m3"]);
    }

    #[test]
    fn add_is_upsert() {
        let mut mirror = MonitorMirror::default();
        mirror.add(monitor("m1", "Host"));
        mirror.add(monitor("m1", "Main Host"));
        let snap = mirror.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].name, "Main Host");
    }

    #[test]
    fn remove_and_unknown_update_are_quiet() {
        let mut mirror = MonitorMirror::default();
        mirror.add(monitor("m1", "Host"));
        mirror.remove("m9");
        mirror.update(monitor("m9", "Ghost"));
        assert_eq!(mirror.snapshot().len(), 1);
        mirror.remove("m1");
        assert!(mirror.snapshot().is_empty());
    }
}
