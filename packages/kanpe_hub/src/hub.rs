//! The hub: lifecycle, shared state, broadcast engine, send primitives.
//!
//! One owned state value per process, behind a coarse tokio mutex that is
//! never held across a suspension point. The broadcast path locks, pushes
//! the encoded frame into every subscriber outbox, and unlocks — that
//! single critical section is what makes cross-subscriber ordering hold.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use kanpe_protocol::{ALL_MONITORS, Envelope, Priority, VirtualMonitor, encode};

use crate::config::HubConfig;
use crate::connection;
use crate::error::{DisconnectReason, HubError};
use crate::events::{ClientInfo, HubEvent};
use crate::history::History;
use crate::metrics::{HubMetrics, MetricsSnapshot};
use crate::outbox::Outbox;
use crate::registry::MonitorRegistry;

/// Field updates for `update_monitor`; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct MonitorUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
}

/// Handle to one subscriber connection, owned by the client table.
pub(crate) struct SubscriberHandle {
    pub name: String,
    pub display_monitor_ids: Vec<String>,
    pub outbox: Arc<Outbox>,
    pub cancel: CancellationToken,
    /// Reason set by whoever initiates the close, read by the connection
    /// task on cancellation.
    pub close_reason: Arc<StdMutex<Option<DisconnectReason>>>,
    /// Milliseconds since epoch of the last inbound frame.
    pub last_seen: Arc<AtomicI64>,
}

impl SubscriberHandle {
    fn info(&self, client_id: &str) -> ClientInfo {
        ClientInfo {
            client_id: client_id.to_string(),
            name: self.name.clone(),
            display_monitor_ids: self.display_monitor_ids.clone(),
            last_seen: self.last_seen.load(Ordering::Relaxed),
            dropped_frames: self.outbox.dropped(),
        }
    }

    fn request_close(&self, reason: DisconnectReason) {
        let mut slot = self.close_reason.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(reason);
        }
        drop(slot);
        self.cancel.cancel();
    }
}

/// Everything mutated under the coarse lock.
pub(crate) struct HubShared {
    pub running: bool,
    pub registry: MonitorRegistry,
    pub clients: HashMap<String, SubscriberHandle>,
    pub history: History,
}

impl HubShared {
    /// Push an encoded frame into every outbox. Returns the IDs of
    /// subscribers that crossed the slow-consumer drop limit.
    fn fanout(&mut self, text: &str, metrics: &HubMetrics, drop_limit: u64) -> Vec<String> {
        let mut slow = Vec::new();
        for (client_id, sub) in &self.clients {
            let before = sub.outbox.dropped();
            let after = sub.outbox.push(text.to_string());
            if after > before {
                metrics.frames_dropped_add(after - before);
            }
            if after >= drop_limit {
                slow.push(client_id.clone());
            }
        }
        slow
    }
}

struct Lifecycle {
    port: u16,
    shutdown: CancellationToken,
    serve_task: JoinHandle<()>,
}

pub(crate) struct HubInner {
    pub config: HubConfig,
    pub shared: Mutex<HubShared>,
    pub metrics: Arc<HubMetrics>,
    events: broadcast::Sender<HubEvent>,
    lifecycle: Mutex<Option<Lifecycle>>,
}

impl HubInner {
    pub fn emit(&self, event: HubEvent) {
        // No subscribers is fine — events are fire-and-forget.
        let _ = self.events.send(event);
    }
}

/// The director-side server. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        let history_capacity = config.history_capacity;
        Self {
            inner: Arc::new(HubInner {
                config,
                shared: Mutex::new(HubShared {
                    running: false,
                    registry: MonitorRegistry::new(),
                    clients: HashMap::new(),
                    history: History::new(history_capacity),
                }),
                metrics: Arc::new(HubMetrics::new()),
                events,
                lifecycle: Mutex::new(None),
            }),
        }
    }

    /// Subscribe to the hub's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.inner.events.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lifecycle.lock().await.is_some()
    }

    /// The bound port while running.
    pub async fn port(&self) -> Option<u16> {
        self.inner.lifecycle.lock().await.as_ref().map(|l| l.port)
    }

    /// Bind the listener and start accepting casters on `/ws`.
    ///
    /// Pass port 0 for an ephemeral port; the bound port is returned
    /// either way.
    pub async fn start(&self, port: u16) -> Result<u16, HubError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if let Some(active) = lifecycle.as_ref() {
            return Err(HubError::AlreadyRunning(active.port));
        }

        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|source| HubError::BindFailed { port, source })?;
        let bound_port = listener
            .local_addr()
            .map_err(|source| HubError::BindFailed { port, source })?
            .port();

        let app = Router::new()
            .route("/ws", get(connection::ws_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.inner.clone());

        // running must be visible before the accept loop can hand a
        // socket to the connection handler
        self.inner.shared.lock().await.running = true;

        let shutdown = CancellationToken::new();
        let serve_shutdown = shutdown.clone();
        let serve_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(serve_shutdown.cancelled_owned())
                .await
            {
                warn!("hub listener error: {e}");
            }
        });
        *lifecycle = Some(Lifecycle {
            port: bound_port,
            shutdown,
            serve_task,
        });
        drop(lifecycle);

        info!(port = bound_port, "hub listening");
        self.inner.emit(HubEvent::ServerStarted { port: bound_port });
        Ok(bound_port)
    }

    /// Graceful shutdown: stop accepting, close-frame every subscriber,
    /// give outboxes a bounded drain grace, then tear down. A no-op when
    /// already stopped.
    pub async fn stop(&self) -> Result<(), HubError> {
        let Some(lifecycle) = self.inner.lifecycle.lock().await.take() else {
            return Ok(());
        };
        info!(port = lifecycle.port, "hub stopping");
        lifecycle.shutdown.cancel();

        let subscribers: Vec<(String, SubscriberHandle)> = {
            let mut shared = self.inner.shared.lock().await;
            shared.running = false;
            shared.clients.drain().collect()
        };

        for (_, sub) in &subscribers {
            sub.outbox.push_close();
        }

        let deadline = Instant::now() + self.inner.config.shutdown_grace;
        while Instant::now() < deadline
            && subscribers.iter().any(|(_, sub)| !sub.outbox.is_drained())
        {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        for (client_id, sub) in subscribers {
            sub.request_close(DisconnectReason::ServerShutdown);
            self.inner.emit(HubEvent::ClientDisconnected {
                client_id,
                reason: DisconnectReason::ServerShutdown.as_str().to_string(),
            });
        }

        let _ = lifecycle.serve_task.await;
        self.inner.emit(HubEvent::ServerStopped);
        Ok(())
    }

    /// Broadcast a cue card directive. Targets must be non-empty and each
    /// must be a known monitor or the `ALL` sentinel; a list containing
    /// the sentinel is rewritten to exactly `["ALL"]`.
    pub async fn send_kanpe(
        &self,
        target_monitor_ids: Vec<String>,
        content: String,
        priority: Priority,
    ) -> Result<Envelope, HubError> {
        if content.trim().is_empty() {
            return Err(HubError::InvalidArgument("kanpe content is empty".into()));
        }
        let targets = normalize_targets(target_monitor_ids)?;
        let envelope = Envelope::kanpe(content, targets, priority);
        self.broadcast_directive(envelope).await
    }

    /// Broadcast a flash to the targeted monitors.
    pub async fn send_flash(&self, target_monitor_ids: Vec<String>) -> Result<Envelope, HubError> {
        let targets = normalize_targets(target_monitor_ids)?;
        self.broadcast_directive(Envelope::flash(targets)).await
    }

    /// Broadcast a clear to the targeted monitors.
    pub async fn send_clear(&self, target_monitor_ids: Vec<String>) -> Result<Envelope, HubError> {
        let targets = normalize_targets(target_monitor_ids)?;
        self.broadcast_directive(Envelope::clear(targets)).await
    }

    async fn broadcast_directive(&self, envelope: Envelope) -> Result<Envelope, HubError> {
        let text = encode(&envelope)
            .map_err(|e| HubError::InvalidArgument(format!("unencodable envelope: {e}")))?;
        let targets = directive_targets(&envelope);

        let slow = {
            let mut shared = self.inner.shared.lock().await;
            if !shared.running {
                return Err(HubError::NotRunning);
            }
            shared.registry.validate_targets(targets)?;
            shared.history.record_directive(&envelope);
            shared.fanout(
                &text,
                &self.inner.metrics,
                self.inner.config.slow_consumer_drop_limit,
            )
        };
        self.inner.metrics.envelope_broadcast();
        self.disconnect_slow(slow).await;
        Ok(envelope)
    }

    /// Mint a monitor and broadcast the delta.
    pub async fn add_monitor(
        &self,
        name: String,
        description: Option<String>,
        color: Option<String>,
    ) -> Result<VirtualMonitor, HubError> {
        let (monitor, slow) = {
            let mut shared = self.inner.shared.lock().await;
            let monitor = shared.registry.add(name, description, color)?;
            let text = encode(&Envelope::monitor_added(monitor.clone()))
                .map_err(|e| HubError::InvalidArgument(format!("unencodable envelope: {e}")))?;
            let slow = shared.fanout(
                &text,
                &self.inner.metrics,
                self.inner.config.slow_consumer_drop_limit,
            );
            (monitor, slow)
        };
        info!(monitor_id = %monitor.id, name = %monitor.name, "monitor added");
        self.inner.emit(HubEvent::MonitorAdded {
            monitor: monitor.clone(),
        });
        self.disconnect_slow(slow).await;
        Ok(monitor)
    }

    /// Remove a monitor. Idempotent: removing an absent ID is a silent
    /// no-op with no delta.
    pub async fn remove_monitor(&self, monitor_id: &str) -> Result<(), HubError> {
        let slow = {
            let mut shared = self.inner.shared.lock().await;
            if shared.registry.remove(monitor_id).is_none() {
                return Ok(());
            }
            let text = encode(&Envelope::monitor_removed(monitor_id.to_string()))
                .map_err(|e| HubError::InvalidArgument(format!("unencodable envelope: {e}")))?;
            shared.fanout(
                &text,
                &self.inner.metrics,
                self.inner.config.slow_consumer_drop_limit,
            )
        };
        info!(monitor_id, "monitor removed");
        self.inner.emit(HubEvent::MonitorRemoved {
            monitor_id: monitor_id.to_string(),
        });
        self.disconnect_slow(slow).await;
        Ok(())
    }

    /// Update a monitor in place and broadcast the delta.
    pub async fn update_monitor(
        &self,
        monitor_id: &str,
        fields: MonitorUpdate,
    ) -> Result<VirtualMonitor, HubError> {
        let (monitor, slow) = {
            let mut shared = self.inner.shared.lock().await;
            let monitor = shared.registry.update(monitor_id, fields)?;
            let text = encode(&Envelope::monitor_updated(monitor.clone()))
                .map_err(|e| HubError::InvalidArgument(format!("unencodable envelope: {e}")))?;
            let slow = shared.fanout(
                &text,
                &self.inner.metrics,
                self.inner.config.slow_consumer_drop_limit,
            );
            (monitor, slow)
        };
        info!(monitor_id, "monitor updated");
        self.inner.emit(HubEvent::MonitorUpdated {
            monitor: monitor.clone(),
        });
        self.disconnect_slow(slow).await;
        Ok(monitor)
    }

    /// Seed the stock monitor set a fresh director session offers.
    /// Runs through the normal `add` path so connected clients (if any)
    /// see ordinary deltas.
    pub async fn seed_default_monitors(&self) -> Result<Vec<VirtualMonitor>, HubError> {
        let defaults = [
            ("Monitor A", "モニター A", "#3b82f6"),
            ("Monitor B", "モニター B", "#10b981"),
            ("Monitor C", "モニター C", "#f59e0b"),
            ("Monitor D", "モニター D", "#ef4444"),
        ];
        let mut seeded = Vec::with_capacity(defaults.len());
        for (name, description, color) in defaults {
            seeded.push(
                self.add_monitor(
                    name.to_string(),
                    Some(description.to_string()),
                    Some(color.to_string()),
                )
                .await?,
            );
        }
        Ok(seeded)
    }

    pub async fn list_monitors(&self) -> Vec<VirtualMonitor> {
        self.inner.shared.lock().await.registry.snapshot()
    }

    pub async fn list_clients(&self) -> Vec<ClientInfo> {
        let shared = self.inner.shared.lock().await;
        shared
            .clients
            .iter()
            .map(|(id, sub)| sub.info(id))
            .collect()
    }

    /// Snapshot of the sent-directive ring.
    pub async fn history_directives(&self) -> Vec<Envelope> {
        self.inner.shared.lock().await.history.directives()
    }

    /// Snapshot of the received-feedback ring.
    pub async fn history_feedback(&self) -> Vec<Envelope> {
        self.inner.shared.lock().await.history.feedback()
    }

    /// Tear down subscribers that crossed the slow-consumer limit. Only
    /// the listed subscribers are touched.
    async fn disconnect_slow(&self, client_ids: Vec<String>) {
        for client_id in client_ids {
            let shared = self.inner.shared.lock().await;
            let Some(sub) = shared.clients.get(&client_id) else {
                continue;
            };
            warn!(
                client_id = %client_id,
                dropped = sub.outbox.dropped(),
                code = DisconnectReason::SlowConsumer.as_str(),
                "disconnecting slow consumer"
            );
            sub.request_close(DisconnectReason::SlowConsumer);
        }
    }
}

/// Reject empty target lists and collapse any list containing the `ALL`
/// sentinel to exactly `["ALL"]`.
fn normalize_targets(targets: Vec<String>) -> Result<Vec<String>, HubError> {
    if targets.is_empty() {
        return Err(HubError::InvalidArgument("target_monitor_ids is empty".into()));
    }
    if targets.iter().any(|t| t == ALL_MONITORS) {
        return Ok(vec![ALL_MONITORS.to_string()]);
    }
    Ok(targets)
}

fn directive_targets(envelope: &Envelope) -> &[String] {
    match envelope {
        Envelope::KanpeMessage { payload, .. } => &payload.target_monitor_ids,
        Envelope::FlashCommand { payload, .. } => &payload.target_monitor_ids,
        Envelope::ClearCommand { payload, .. } => &payload.target_monitor_ids,
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_rejects_empty() {
        let err = normalize_targets(vec![]).unwrap_err();
        assert_eq!(err.error_code(), "invalid_argument");
    }

    #[test]
    fn normalize_collapses_sentinel() {
        let targets = normalize_targets(vec!["m1".into(), "ALL".into(), "m2".into()]).unwrap();
        assert_eq!(targets, vec!["ALL".to_string()]);
    }

    #[test]
    fn normalize_keeps_plain_lists() {
        let targets = normalize_targets(vec!["m1".into(), "m2".into()]).unwrap();
        assert_eq!(targets, vec!["m1".to_string(), "m2".to_string()]);
    }

    #[tokio::test]
    async fn send_requires_running() {
        let hub = Hub::new(HubConfig::default());
        let err = hub
            .send_kanpe(vec!["ALL".into()], "Go".into(), Priority::Normal)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "not_running");
    }

    #[tokio::test]
    async fn send_rejects_empty_content() {
        let hub = Hub::new(HubConfig::default());
        let err = hub
            .send_kanpe(vec!["ALL".into()], "   ".into(), Priority::Normal)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_argument");
    }

    #[tokio::test]
    async fn registry_ops_work_while_stopped() {
        let hub = Hub::new(HubConfig::default());
        let monitor = hub.add_monitor("Host".into(), None, None).await.unwrap();
        assert_eq!(hub.list_monitors().await.len(), 1);
        hub.remove_monitor(&monitor.id).await.unwrap();
        assert!(hub.list_monitors().await.is_empty());
        // Idempotent second remove.
        hub.remove_monitor(&monitor.id).await.unwrap();
    }

    #[tokio::test]
    async fn update_unknown_monitor_is_not_found() {
        let hub = Hub::new(HubConfig::default());
        let err = hub
            .update_monitor("m404", MonitorUpdate::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "not_found");
    }

    #[tokio::test]
    async fn seed_defaults_yields_four() {
        let hub = Hub::new(HubConfig::default());
        let seeded = hub.seed_default_monitors().await.unwrap();
        assert_eq!(seeded.len(), 4);
        assert_eq!(hub.list_monitors().await.len(), 4);
    }

    #[tokio::test]
    async fn stop_when_stopped_is_noop() {
        let hub = Hub::new(HubConfig::default());
        hub.stop().await.unwrap();
    }
}
