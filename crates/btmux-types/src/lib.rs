//! Shared types for the btmux session management stack.
//!
//! These types cross crate boundaries (core, engine, application, CLI) and
//! carry no behavior beyond simple conversions, so they live in a leaf crate
//! with no internal dependencies.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

/// Connection priority ordinal. Lower value means higher priority.
///
/// The ordinal values are a contract: the admission controller compares
/// them numerically and the feature extractor emits them as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[repr(u8)]
pub enum Priority {
    /// Audio devices, real-time data.
    Critical = 0,
    /// Input devices, wearables.
    High = 1,
    /// File transfers, IoT devices.
    Medium = 2,
    /// Background sync devices.
    Low = 3,
}

impl Priority {
    /// Returns the numeric ordinal (0 = most important).
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Builds a priority from its ordinal, clamping out-of-range input to `Low`.
    pub fn from_ordinal(ordinal: u8) -> Self {
        match ordinal {
            0 => Priority::Critical,
            1 => Priority::High,
            2 => Priority::Medium,
            _ => Priority::Low,
        }
    }

    /// One step more important, saturating at `Critical`.
    pub fn promoted(self) -> Self {
        Self::from_ordinal(self.ordinal().saturating_sub(1))
    }

    /// One step less important, saturating at `Low`.
    pub fn demoted(self) -> Self {
        Self::from_ordinal(self.ordinal().saturating_add(1))
    }
}

/// Device category. Immutable after session creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
pub enum DeviceClass {
    Audio,
    Input,
    Display,
    Phone,
    AirConditioner,
    Refrigerator,
    SmartTv,
    SmartSpeaker,
    GenericIot,
}

impl DeviceClass {
    /// Numeric code used as a feature value. Stable across releases.
    pub fn code(self) -> u8 {
        match self {
            DeviceClass::Audio => 0,
            DeviceClass::Input => 1,
            DeviceClass::Display => 2,
            DeviceClass::Phone => 3,
            DeviceClass::AirConditioner => 4,
            DeviceClass::Refrigerator => 5,
            DeviceClass::SmartTv => 6,
            DeviceClass::SmartSpeaker => 7,
            DeviceClass::GenericIot => 8,
        }
    }

    /// Whether this class belongs to the IoT family (home appliances and
    /// generic sensors). IoT devices default to low estimated power draw.
    pub fn is_iot(self) -> bool {
        matches!(
            self,
            DeviceClass::AirConditioner
                | DeviceClass::Refrigerator
                | DeviceClass::SmartTv
                | DeviceClass::SmartSpeaker
                | DeviceClass::GenericIot
        )
    }
}

/// Radio transport flavor of a session. Immutable after session creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum TransportKind {
    Ble,
    Classic,
}

/// Why a session ended, as reported by the transport adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum DisconnectReason {
    /// The remote device or the user closed the link.
    Requested,
    /// The link dropped (timeout, out of range, radio failure).
    LinkLost,
    /// The session was evicted to admit a higher-priority device.
    Evicted,
}

/// Severity of a detected behavior anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display)]
pub enum Severity {
    Medium,
    High,
}

/// Events broadcast to registered listeners (UI, transport adapter, API).
///
/// Listeners are notified in registration order; payloads are intentionally
/// small so events stay cheap to clone for every listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// A session was admitted and created.
    Connected {
        address: String,
        device_class: DeviceClass,
    },
    /// A session ended.
    Disconnected {
        address: String,
        reason: DisconnectReason,
    },
    /// A session was removed to free a slot for a higher-priority device.
    /// The transport adapter is expected to tear down the physical link.
    Evicted { address: String },
    /// A session's priority changed (user request or optimizer delta).
    PriorityChanged {
        address: String,
        priority: Priority,
    },
    /// An optimization cycle finished.
    CycleCompleted {
        sessions_optimized: usize,
        anomalies: usize,
    },
    /// A device's current traffic deviates from its historical baseline.
    AnomalyDetected { address: String, severity: Severity },
}

/// Opaque IoT command opcodes understood by transport adapters.
///
/// The core never interprets these; they exist so adapters and the CLI
/// agree on payload framing without a shared parser.
pub mod iot_command {
    pub const TURN_ON: u8 = 0x01;
    pub const TURN_OFF: u8 = 0x02;
    pub const SET_TEMPERATURE: u8 = 0x03;
    pub const GET_STATUS: u8 = 0x04;
    pub const SET_MODE: u8 = 0x05;
    pub const GET_SENSOR_DATA: u8 = 0x06;
}
