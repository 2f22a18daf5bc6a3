//! Session domain models.
//!
//! This module contains the core entities the session store operates on:
//! the live `Session`, the per-device `BehaviorRecord` history sample,
//! the longitudinal `ConnectionPattern`, and the accumulated `DriverStats`.
//! These are "pure" models independent of any storage or wire format.

use btmux_types::{DeviceClass, Priority, TransportKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One active logical connection to a remote device.
///
/// Created on a successful transport-level connect, destroyed on disconnect
/// (explicit, eviction, or failure). The address is the stable key; the
/// device class and transport are immutable after creation, everything else
/// is live state mutated by the transport adapter and the optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub address: String,
    pub device_name: Option<String>,
    pub priority: Priority,
    pub device_class: DeviceClass,
    pub transport: TransportKind,
    pub connected_at: DateTime<Utc>,
    /// Monotone counter written by the transport adapter.
    pub bytes_transferred: u64,
    /// Last-sampled signal quality, dBm scale.
    pub signal_strength: i32,
    /// Live treatment fields written back by the optimizer.
    pub bandwidth_share: f64,
    pub aggressive_power_saving: bool,
    pub low_latency: bool,
}

impl Session {
    pub fn new(
        address: impl Into<String>,
        priority: Priority,
        device_class: DeviceClass,
        transport: TransportKind,
        connected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            address: address.into(),
            device_name: None,
            priority,
            device_class,
            transport,
            connected_at,
            bytes_transferred: 0,
            signal_strength: 0,
            bandwidth_share: 0.0,
            aggressive_power_saving: false,
            low_latency: false,
        }
    }

    /// Seconds this session has been connected at `now`. Never negative.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> f64 {
        let millis = now.signed_duration_since(self.connected_at).num_milliseconds();
        (millis.max(0) as f64) / 1000.0
    }

    /// Instantaneous data rate in bytes per second at `now`.
    ///
    /// Returns 0 when no time has elapsed, so a connect and a rate sample
    /// in the same instant cannot divide by zero.
    pub fn data_rate(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = self.elapsed_seconds(now);
        if elapsed <= 0.0 {
            0.0
        } else {
            self.bytes_transferred as f64 / elapsed
        }
    }
}

/// One historical sample for a device, appended at each optimization cycle.
///
/// Kept in a bounded ring of the most recent 100 records per address; the
/// ring is keyed by address, not session identity, so it survives
/// disconnects and feeds longitudinal analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorRecord {
    pub timestamp: DateTime<Utc>,
    /// Bytes per second at sample time.
    pub data_rate: f64,
    pub signal_strength: i32,
    pub optimization_succeeded: bool,
}

/// Maximum behavior records retained per device address.
pub const BEHAVIOR_HISTORY_LIMIT: usize = 100;

/// Aggregated per-device statistic derived from repeated connect events.
///
/// Created on a device's first-ever connection, updated on every subsequent
/// one, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionPattern {
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_connections: u64,
    pub avg_connections_per_day: f64,
}

impl ConnectionPattern {
    /// Starts a pattern at a device's first connection.
    pub fn first_connection(at: DateTime<Utc>) -> Self {
        Self {
            first_seen: at,
            last_seen: at,
            total_connections: 1,
            avg_connections_per_day: 1.0,
        }
    }

    /// Folds in one more connect event and recomputes the daily average as
    /// `total_connections / max(days_since_first, 1)`.
    pub fn record_connection(&mut self, at: DateTime<Utc>) {
        self.last_seen = at;
        self.total_connections += 1;
        let days_since_first =
            at.signed_duration_since(self.first_seen).num_seconds() as f64 / 86_400.0;
        self.avg_connections_per_day =
            self.total_connections as f64 / days_since_first.max(1.0);
    }
}

/// Accumulated counters exposed through the read-only consumer API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverStats {
    pub started_at: DateTime<Utc>,
    pub total_connections: u64,
    pub active_connections: usize,
    pub total_bytes_transferred: u64,
    pub optimizations_applied: u64,
    pub optimizations_succeeded: u64,
    pub connection_failures: u64,
}

impl DriverStats {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            total_connections: 0,
            active_connections: 0,
            total_bytes_transferred: 0,
            optimizations_applied: 0,
            optimizations_succeeded: 0,
            connection_failures: 0,
        }
    }

    /// Fraction of applied optimizations that succeeded, 1.0 when none ran.
    pub fn success_rate(&self) -> f64 {
        if self.optimizations_applied == 0 {
            1.0
        } else {
            self.optimizations_succeeded as f64 / self.optimizations_applied as f64
        }
    }
}
