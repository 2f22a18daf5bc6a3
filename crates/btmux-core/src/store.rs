//! The session store: the single shared mutable resource of the core.
//!
//! Holds the set of active sessions, the per-address behavior history rings,
//! the connection patterns, and the accumulated statistics. All mutation
//! goes through the atomic operations below; no raw map access escapes this
//! boundary. A coarse whole-store lock is used: cardinality is bounded at
//! `max_sessions` (7 by default), and the optimization cycle gets a
//! consistent point-in-time snapshot out of it.

use std::collections::{HashMap, VecDeque};

use btmux_types::{DeviceClass, Priority, TransportKind};
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::admission::MAX_SESSIONS;
use crate::error::{BtmuxError, Result};
use crate::session::{
    BehaviorRecord, ConnectionPattern, DriverStats, Session, BEHAVIOR_HISTORY_LIMIT,
};

struct StoreInner {
    sessions: HashMap<String, Session>,
    /// Insertion order of active addresses, for deterministic snapshots.
    order: Vec<String>,
    /// Bounded behavior rings, keyed by address. Survive session removal.
    history: HashMap<String, VecDeque<BehaviorRecord>>,
    /// Longitudinal connect statistics, keyed by address. Never deleted.
    patterns: HashMap<String, ConnectionPattern>,
    stats: DriverStats,
    /// Set when an invariant violation is observed. A poisoned store
    /// refuses all further admissions; the process should be restarted.
    poisoned: bool,
}

/// Thread-safe mapping from device address to [`Session`], plus per-address
/// behavior history and connection patterns.
///
/// Safe for concurrent writes from transport-event handlers and concurrent
/// reads from the optimization cycle.
pub struct SessionStore {
    max_sessions: usize,
    inner: RwLock<StoreInner>,
}

impl SessionStore {
    /// Creates a store with the default capacity of [`MAX_SESSIONS`].
    pub fn new() -> Self {
        Self::with_max_sessions(MAX_SESSIONS)
    }

    /// Creates a store with a custom capacity.
    pub fn with_max_sessions(max_sessions: usize) -> Self {
        Self {
            max_sessions,
            inner: RwLock::new(StoreInner {
                sessions: HashMap::new(),
                order: Vec::new(),
                history: HashMap::new(),
                patterns: HashMap::new(),
                stats: DriverStats::new(Utc::now()),
                poisoned: false,
            }),
        }
    }

    /// Returns the configured capacity.
    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Creates a session for `address`, or refreshes the priority of an
    /// already-active one.
    ///
    /// A refresh does not consume a slot and does not count as a new
    /// connection; patterns track transport-level connects, which arrive as
    /// fresh calls after a disconnect.
    ///
    /// # Errors
    ///
    /// * `CapacityExceeded` if the store is full and the caller has not
    ///   first freed a slot via the admission controller.
    /// * `InvariantViolation` if the store is poisoned, or if the active
    ///   count is ever observed above the capacity (which also poisons it).
    pub async fn upsert_session(
        &self,
        address: &str,
        priority: Priority,
        device_class: DeviceClass,
        transport: TransportKind,
    ) -> Result<Session> {
        let mut inner = self.inner.write().await;

        if inner.poisoned {
            return Err(BtmuxError::invariant("store is poisoned"));
        }

        if let Some(existing) = inner.sessions.get_mut(address) {
            existing.priority = priority;
            return Ok(existing.clone());
        }

        if inner.sessions.len() >= self.max_sessions {
            return Err(BtmuxError::capacity_exceeded(
                inner.sessions.len(),
                self.max_sessions,
            ));
        }

        let now = Utc::now();
        let session = Session::new(address, priority, device_class, transport, now);
        inner.sessions.insert(address.to_string(), session.clone());
        inner.order.push(address.to_string());

        inner
            .patterns
            .entry(address.to_string())
            .and_modify(|p| p.record_connection(now))
            .or_insert_with(|| ConnectionPattern::first_connection(now));

        inner.stats.total_connections += 1;
        inner.stats.active_connections = inner.sessions.len();

        if inner.sessions.len() > self.max_sessions {
            inner.poisoned = true;
            warn!(
                target: "store",
                active = inner.sessions.len(),
                max = self.max_sessions,
                "active session count exceeds capacity; store poisoned"
            );
            return Err(BtmuxError::invariant(format!(
                "{} active sessions exceed the maximum of {}",
                inner.sessions.len(),
                self.max_sessions,
            )));
        }

        Ok(session)
    }

    /// Removes the session for `address`.
    ///
    /// Returns `false` if no such session exists. Absence is not an error,
    /// since the session may have raced a disconnect.
    pub async fn remove_session(&self, address: &str) -> bool {
        let mut inner = self.inner.write().await;
        let removed = inner.sessions.remove(address).is_some();
        if removed {
            inner.order.retain(|a| a != address);
            inner.stats.active_connections = inner.sessions.len();
        }
        removed
    }

    /// Adds `bytes` to the session's transfer counter. No-op when the
    /// session is absent (it may have raced a disconnect).
    pub async fn record_traffic(&self, address: &str, bytes: u64) {
        let mut inner = self.inner.write().await;
        if let Some(session) = inner.sessions.get_mut(address) {
            session.bytes_transferred += bytes;
            inner.stats.total_bytes_transferred += bytes;
        }
    }

    /// Updates the session's last-sampled signal strength. No-op when the
    /// session is absent.
    pub async fn record_signal(&self, address: &str, dbm: i32) {
        let mut inner = self.inner.write().await;
        if let Some(session) = inner.sessions.get_mut(address) {
            session.signal_strength = dbm;
        }
    }

    /// Changes the priority of an active session.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` when the address has no active session;
    /// this is a user-initiated operation, so absence is a true error.
    pub async fn set_priority(&self, address: &str, priority: Priority) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(address) {
            Some(session) => {
                session.priority = priority;
                Ok(())
            }
            None => Err(BtmuxError::session_not_found(address)),
        }
    }

    /// Applies a closure to the live session, returning its result, or
    /// `None` when the session is absent. This is how the optimizer writes
    /// treatment fields back without the session escaping the lock.
    pub async fn with_session_mut<R>(
        &self,
        address: &str,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.write().await;
        inner.sessions.get_mut(address).map(f)
    }

    /// Appends a behavior record to the address's ring, evicting the oldest
    /// entry beyond [`BEHAVIOR_HISTORY_LIMIT`].
    pub async fn append_behavior(&self, address: &str, record: BehaviorRecord) {
        let mut inner = self.inner.write().await;
        let ring = inner.history.entry(address.to_string()).or_default();
        ring.push_back(record);
        while ring.len() > BEHAVIOR_HISTORY_LIMIT {
            ring.pop_front();
        }
    }

    /// Returns a copy of the behavior history for `address`, oldest first.
    pub async fn behavior_history(&self, address: &str) -> Vec<BehaviorRecord> {
        let inner = self.inner.read().await;
        inner
            .history
            .get(address)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns a point-in-time copy of all active sessions in insertion
    /// order. Callers must not depend on the order for correctness, only
    /// for deterministic output.
    pub async fn snapshot_active(&self) -> Vec<Session> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|address| inner.sessions.get(address).cloned())
            .collect()
    }

    /// Number of currently active sessions.
    pub async fn active_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// The connection pattern for `address`, if the device has ever
    /// connected.
    pub async fn connection_pattern(&self, address: &str) -> Option<ConnectionPattern> {
        self.inner.read().await.patterns.get(address).cloned()
    }

    /// All known connection patterns, keyed by address.
    pub async fn patterns(&self) -> Vec<(String, ConnectionPattern)> {
        let inner = self.inner.read().await;
        inner
            .patterns
            .iter()
            .map(|(address, pattern)| (address.clone(), pattern.clone()))
            .collect()
    }

    /// A copy of the accumulated statistics.
    pub async fn stats(&self) -> DriverStats {
        let inner = self.inner.read().await;
        let mut stats = inner.stats.clone();
        stats.active_connections = inner.sessions.len();
        stats
    }

    /// Counts one applied optimization toward the statistics.
    pub async fn record_optimization(&self, succeeded: bool) {
        let mut inner = self.inner.write().await;
        inner.stats.optimizations_applied += 1;
        if succeeded {
            inner.stats.optimizations_succeeded += 1;
        }
    }

    /// Counts one rejected admission toward the statistics.
    pub async fn record_connection_failure(&self) {
        self.inner.write().await.stats.connection_failures += 1;
    }

    /// Whether an invariant violation has shut the store down.
    pub async fn is_poisoned(&self) -> bool {
        self.inner.read().await.poisoned
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
