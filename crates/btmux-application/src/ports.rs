//! Collaborator ports consumed by the use-case layer.
//!
//! The core never talks to a radio, the platform, or a UI directly; it goes
//! through these narrow seams. Production adapters live outside this
//! workspace, test doubles live next to the tests.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use btmux_core::error::Result;
use btmux_types::DeviceEvent;

/// Outbound command channel to a device's transport adapter.
///
/// The payload is opaque: device-specific command encoding (temperature-set,
/// mode-set, ...) is entirely the adapter's concern.
#[async_trait]
pub trait TransportCommand: Send + Sync {
    async fn send(&self, address: &str, payload: &[u8]) -> Result<()>;
}

/// Platform-supplied estimate of overall system load in [0,1].
pub trait SystemLoadEstimator: Send + Sync {
    fn current_load(&self) -> f64;
}

/// Load estimator that always reports the configured value. Used when no
/// platform estimator is wired in.
pub struct FixedLoadEstimator(pub f64);

impl SystemLoadEstimator for FixedLoadEstimator {
    fn current_load(&self) -> f64 {
        self.0.clamp(0.0, 1.0)
    }
}

/// Observer of session lifecycle and optimization events.
pub trait DeviceEventListener: Send + Sync {
    fn on_event(&self, event: &DeviceEvent);
}

/// Registry of event listeners.
///
/// Listeners are notified in registration order. The listener list is
/// snapshotted before dispatch, so a listener registering or deregistering
/// during a notification affects the next dispatch, not the current one.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Arc<dyn DeviceEventListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn DeviceEventListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    pub fn emit(&self, event: &DeviceEvent) {
        let snapshot: Vec<Arc<dyn DeviceEventListener>> =
            self.listeners.read().unwrap().clone();
        for listener in snapshot {
            listener.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl DeviceEventListener for Recorder {
        fn on_event(&self, _event: &DeviceEvent) {
            self.log.lock().unwrap().push(self.label);
        }
    }

    #[test]
    fn test_listeners_notified_in_registration_order() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second", "third"] {
            registry.register(Arc::new(Recorder {
                label,
                log: log.clone(),
            }));
        }

        registry.emit(&DeviceEvent::Evicted {
            address: "aa:bb".to_string(),
        });

        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    struct SelfRegistering {
        registry: Arc<ListenerRegistry>,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl DeviceEventListener for SelfRegistering {
        fn on_event(&self, _event: &DeviceEvent) {
            self.log.lock().unwrap().push("outer");
            // Mutating the registry mid-dispatch must not affect the
            // current notification round.
            self.registry.register(Arc::new(Recorder {
                label: "inner",
                log: self.log.clone(),
            }));
        }
    }

    #[test]
    fn test_mutation_during_dispatch_affects_next_round_only() {
        let registry = Arc::new(ListenerRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(Arc::new(SelfRegistering {
            registry: registry.clone(),
            log: log.clone(),
        }));

        let event = DeviceEvent::Evicted {
            address: "aa:bb".to_string(),
        };
        registry.emit(&event);
        assert_eq!(*log.lock().unwrap(), vec!["outer"]);

        registry.emit(&event);
        assert_eq!(*log.lock().unwrap(), vec!["outer", "outer", "inner"]);
    }
}
