//! Device use case implementation.
//!
//! `DeviceUseCase` is the explicitly-owned coordinator between the transport
//! adapter, the session store, the admission controller, and the
//! optimization engine. There is no ambient global instance: whoever owns
//! the process entry point constructs one and hands out `Arc` handles.

use std::sync::Arc;

use btmux_core::admission::{self, AdmissionDecision};
use btmux_core::config::BtmuxConfig;
use btmux_core::error::{BtmuxError, Result};
use btmux_core::session::{DriverStats, Session};
use btmux_core::store::SessionStore;
use btmux_engine::anomaly::{AnomalyAnalyzer, PredictedConnection};
use btmux_engine::optimizer::Optimizer;
use btmux_types::{DeviceClass, DeviceEvent, DisconnectReason, Priority, TransportKind};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::cycle::CycleReport;
use crate::ports::{DeviceEventListener, ListenerRegistry, SystemLoadEstimator, TransportCommand};

/// Outcome of a connection request after admission control.
///
/// Rejection is an expected result, not an error: the caller may retry
/// later or let the user free a slot manually.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionOutcome {
    Admitted { session: Session },
    AdmittedAfterEviction {
        session: Session,
        evicted_address: String,
    },
    Rejected,
}

pub struct DeviceUseCase {
    /// The single shared mutable resource of the core.
    store: Arc<SessionStore>,
    /// Scoring strategy (learned backend with rule fallback, or rules only).
    optimizer: Optimizer,
    analyzer: AnomalyAnalyzer,
    load_estimator: Arc<dyn SystemLoadEstimator>,
    /// Outbound command port to the transport adapter.
    transport: Arc<dyn TransportCommand>,
    listeners: ListenerRegistry,
    config: BtmuxConfig,
    /// Last published cycle report, for the read-only consumer API.
    last_report: RwLock<Option<CycleReport>>,
}

impl DeviceUseCase {
    /// Creates a new `DeviceUseCase`.
    ///
    /// # Arguments
    ///
    /// * `config` - Resolved configuration (capacity, interval, profiles)
    /// * `optimizer` - Scoring strategy
    /// * `load_estimator` - Platform system-load source
    /// * `transport` - Outbound command port to the transport adapter
    pub fn new(
        config: BtmuxConfig,
        optimizer: Optimizer,
        load_estimator: Arc<dyn SystemLoadEstimator>,
        transport: Arc<dyn TransportCommand>,
    ) -> Self {
        Self {
            store: Arc::new(SessionStore::with_max_sessions(config.max_sessions)),
            optimizer,
            analyzer: AnomalyAnalyzer::new(),
            load_estimator,
            transport,
            listeners: ListenerRegistry::new(),
            config,
            last_report: RwLock::new(None),
        }
    }

    /// Registers a listener for device events. Listeners are notified in
    /// registration order.
    pub fn register_listener(&self, listener: Arc<dyn DeviceEventListener>) {
        self.listeners.register(listener);
    }

    /// Handles a transport-level connect for `address`.
    ///
    /// The admission priority is resolved from the active profile. When the
    /// store is full, the lowest-priority (oldest-first) session is evicted
    /// if and only if the request outranks it; otherwise the request is
    /// rejected and counted as a connection failure.
    ///
    /// # Errors
    ///
    /// Only unrecoverable store errors (`InvariantViolation`) are returned;
    /// rejection is reported through [`AdmissionOutcome::Rejected`].
    pub async fn on_connected(
        &self,
        address: &str,
        device_class: DeviceClass,
        transport: TransportKind,
    ) -> Result<AdmissionOutcome> {
        let priority = self.config.resolve_priority(device_class);
        let active = self.store.snapshot_active().await;
        let decision =
            admission::decide_with_capacity(&active, priority, self.store.max_sessions());

        let evicted = match decision {
            AdmissionDecision::Admit => None,
            AdmissionDecision::AdmitAfterEviction { evicted_address } => {
                // The decision is advisory: the victim may have disconnected
                // since the snapshot. Only report an eviction we performed.
                if self.store.remove_session(&evicted_address).await {
                    info!(
                        target: "admission",
                        evicted = %evicted_address,
                        incoming = %address,
                        "evicted session to admit higher-priority device"
                    );
                    self.listeners.emit(&DeviceEvent::Evicted {
                        address: evicted_address.clone(),
                    });
                    Some(evicted_address)
                } else {
                    None
                }
            }
            AdmissionDecision::Reject => {
                warn!(
                    target: "admission",
                    address,
                    %priority,
                    "connection rejected: no evictable session"
                );
                self.store.record_connection_failure().await;
                return Ok(AdmissionOutcome::Rejected);
            }
        };

        match self
            .store
            .upsert_session(address, priority, device_class, transport)
            .await
        {
            Ok(session) => {
                self.listeners.emit(&DeviceEvent::Connected {
                    address: address.to_string(),
                    device_class,
                });
                Ok(match evicted {
                    Some(evicted_address) => AdmissionOutcome::AdmittedAfterEviction {
                        session,
                        evicted_address,
                    },
                    None => AdmissionOutcome::Admitted { session },
                })
            }
            // A connect raced us into a now-full store. Treat as rejection.
            Err(err) if err.is_capacity_exceeded() => {
                self.store.record_connection_failure().await;
                Ok(AdmissionOutcome::Rejected)
            }
            Err(err) => Err(err),
        }
    }

    /// Handles a transport-level disconnect. Absence is a no-op: the
    /// session may already have been evicted or removed.
    pub async fn on_disconnected(&self, address: &str, reason: DisconnectReason) {
        if self.store.remove_session(address).await {
            info!(target: "session", address, %reason, "session disconnected");
            self.listeners.emit(&DeviceEvent::Disconnected {
                address: address.to_string(),
                reason,
            });
        }
    }

    /// User-initiated disconnect.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` when the device is not connected. Unlike
    /// transport races, a user pointing at a missing session is an error.
    pub async fn disconnect(&self, address: &str) -> Result<()> {
        if self.store.remove_session(address).await {
            self.listeners.emit(&DeviceEvent::Disconnected {
                address: address.to_string(),
                reason: DisconnectReason::Requested,
            });
            Ok(())
        } else {
            Err(BtmuxError::session_not_found(address))
        }
    }

    /// Records transferred bytes. No-op for unknown sessions (a data event
    /// may arrive after its disconnect; arrival order per device is still
    /// respected).
    pub async fn on_data_transferred(&self, address: &str, bytes: u64) {
        self.store.record_traffic(address, bytes).await;
    }

    /// Records a signal-strength sample. No-op for unknown sessions.
    pub async fn on_signal_sample(&self, address: &str, dbm: i32) {
        self.store.record_signal(address, dbm).await;
    }

    /// Records the friendly name the transport resolved for a device.
    /// No-op for unknown sessions; name resolution often completes after
    /// a short-lived session is already gone.
    pub async fn on_name_resolved(&self, address: &str, name: &str) {
        self.store
            .with_session_mut(address, |session| {
                session.device_name = Some(name.to_string());
            })
            .await;
    }

    /// Changes a session's priority on user request.
    pub async fn set_priority(&self, address: &str, priority: Priority) -> Result<()> {
        self.store.set_priority(address, priority).await?;
        self.listeners.emit(&DeviceEvent::PriorityChanged {
            address: address.to_string(),
            priority,
        });
        Ok(())
    }

    /// Sends an opaque command payload to a connected device.
    ///
    /// The payload is never parsed here; encoding is the transport
    /// adapter's concern.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` when the device is not connected, or the
    /// transport's error when sending fails.
    pub async fn send_command(&self, address: &str, payload: &[u8]) -> Result<()> {
        let connected = self
            .store
            .with_session_mut(address, |_| ())
            .await
            .is_some();
        if !connected {
            return Err(BtmuxError::session_not_found(address));
        }
        self.transport.send(address, payload).await
    }

    // ========================================================================
    // Read-only consumer API (polled by UI / external API layers)
    // ========================================================================

    /// Point-in-time copy of all active sessions.
    pub async fn active_sessions(&self) -> Vec<Session> {
        self.store.snapshot_active().await
    }

    /// The most recent published optimization cycle report, if any.
    pub async fn last_cycle_report(&self) -> Option<CycleReport> {
        self.last_report.read().await.clone()
    }

    /// Accumulated statistics.
    pub async fn stats(&self) -> DriverStats {
        self.store.stats().await
    }

    /// Devices predicted to connect soon, most likely first.
    pub async fn predicted_connections(&self) -> Vec<PredictedConnection> {
        let patterns = self.store.patterns().await;
        self.analyzer.predict(&patterns)
    }

    // Internal accessors for the cycle module.
    pub(crate) fn store(&self) -> &SessionStore {
        &self.store
    }

    pub(crate) fn optimizer(&self) -> &Optimizer {
        &self.optimizer
    }

    pub(crate) fn analyzer(&self) -> &AnomalyAnalyzer {
        &self.analyzer
    }

    pub(crate) fn load_estimator(&self) -> &dyn SystemLoadEstimator {
        self.load_estimator.as_ref()
    }

    pub(crate) fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub(crate) fn last_report_slot(&self) -> &RwLock<Option<CycleReport>> {
        &self.last_report
    }

    /// The configured cycle interval.
    pub fn cycle_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.cycle_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedLoadEstimator;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct NullTransport;

    #[async_trait]
    impl TransportCommand for NullTransport {
        async fn send(&self, _address: &str, _payload: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    struct RecordingListener {
        events: Mutex<Vec<DeviceEvent>>,
    }

    impl DeviceEventListener for RecordingListener {
        fn on_event(&self, event: &DeviceEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn usecase() -> DeviceUseCase {
        DeviceUseCase::new(
            BtmuxConfig::default(),
            Optimizer::rule_based(),
            Arc::new(FixedLoadEstimator(0.3)),
            Arc::new(NullTransport),
        )
    }

    #[tokio::test]
    async fn test_connect_resolves_priority_from_profile() {
        let usecase = usecase();
        let outcome = usecase
            .on_connected("audio-1", DeviceClass::Audio, TransportKind::Classic)
            .await
            .unwrap();
        match outcome {
            AdmissionOutcome::Admitted { session } => {
                assert_eq!(session.priority, Priority::Critical);
            }
            other => panic!("expected Admitted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_full_store_evicts_lowest_priority() {
        let usecase = usecase();
        // Fill all 7 slots: one critical, six low-priority IoT devices.
        usecase
            .on_connected("audio-1", DeviceClass::Audio, TransportKind::Classic)
            .await
            .unwrap();
        for i in 0..6 {
            usecase
                .on_connected(&format!("iot-{i}"), DeviceClass::GenericIot, TransportKind::Ble)
                .await
                .unwrap();
        }
        assert_eq!(usecase.active_sessions().await.len(), 7);

        // An input device (High) outranks the IoT sessions (Low); the
        // oldest IoT session goes.
        let outcome = usecase
            .on_connected("keyboard", DeviceClass::Input, TransportKind::Classic)
            .await
            .unwrap();
        match outcome {
            AdmissionOutcome::AdmittedAfterEviction { evicted_address, .. } => {
                assert_eq!(evicted_address, "iot-0");
            }
            other => panic!("expected eviction, got {other:?}"),
        }
        assert_eq!(usecase.active_sessions().await.len(), 7);
    }

    #[tokio::test]
    async fn test_rejection_when_not_strictly_higher() {
        let usecase = usecase();
        for i in 0..7 {
            usecase
                .on_connected(&format!("audio-{i}"), DeviceClass::Audio, TransportKind::Classic)
                .await
                .unwrap();
        }

        // GenericIot resolves to Low; every active session is Critical.
        let outcome = usecase
            .on_connected("iot-late", DeviceClass::GenericIot, TransportKind::Ble)
            .await
            .unwrap();
        assert_eq!(outcome, AdmissionOutcome::Rejected);
        assert_eq!(usecase.stats().await.connection_failures, 1);
        assert_eq!(usecase.active_sessions().await.len(), 7);
    }

    #[tokio::test]
    async fn test_user_disconnect_missing_is_error() {
        let usecase = usecase();
        let err = usecase.disconnect("ghost").await.unwrap_err();
        assert!(err.is_session_not_found());

        // Transport-reported disconnects for unknown devices are silent.
        usecase
            .on_disconnected("ghost", DisconnectReason::LinkLost)
            .await;
    }

    #[tokio::test]
    async fn test_send_command_requires_session() {
        let usecase = usecase();
        let err = usecase.send_command("ghost", &[0x01]).await.unwrap_err();
        assert!(err.is_session_not_found());

        usecase
            .on_connected("ac-1", DeviceClass::AirConditioner, TransportKind::Ble)
            .await
            .unwrap();
        usecase
            .send_command("ac-1", &[btmux_types::iot_command::SET_TEMPERATURE, 22])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_events_fired_in_lifecycle_order() {
        let usecase = usecase();
        let listener = Arc::new(RecordingListener {
            events: Mutex::new(Vec::new()),
        });
        usecase.register_listener(listener.clone());

        usecase
            .on_connected("dev", DeviceClass::Phone, TransportKind::Classic)
            .await
            .unwrap();
        usecase.set_priority("dev", Priority::High).await.unwrap();
        usecase.disconnect("dev").await.unwrap();

        let events = listener.events.lock().unwrap();
        assert!(matches!(events[0], DeviceEvent::Connected { .. }));
        assert!(matches!(
            events[1],
            DeviceEvent::PriorityChanged {
                priority: Priority::High,
                ..
            }
        ));
        assert!(matches!(
            events[2],
            DeviceEvent::Disconnected {
                reason: DisconnectReason::Requested,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_traffic_and_signal_are_race_tolerant() {
        let usecase = usecase();
        usecase
            .on_connected("dev", DeviceClass::Phone, TransportKind::Classic)
            .await
            .unwrap();
        usecase.disconnect("dev").await.unwrap();

        // Late events after the disconnect must be absorbed quietly.
        usecase.on_data_transferred("dev", 2_048).await;
        usecase.on_signal_sample("dev", -70).await;
        assert_eq!(usecase.stats().await.total_bytes_transferred, 0);
    }
}
