//! Feature extraction for session scoring.
//!
//! The vector layout is a contract shared by every scoring strategy: the
//! learned backend was trained against this exact ordering, and the
//! rule-based scorer indexes into it with the constants below. Outputs are
//! only comparable across strategies if both consume the same layout.

use btmux_core::session::{BehaviorRecord, Session};
use chrono::{DateTime, Utc};

/// Number of features per session. Scoring backends take exactly this many
/// inputs.
pub const FEATURE_COUNT: usize = 10;

/// A fixed-size session feature vector.
pub type FeatureVector = [f64; FEATURE_COUNT];

/// Index of each feature within the vector.
pub mod index {
    pub const PRIORITY: usize = 0;
    pub const DEVICE_CLASS: usize = 1;
    pub const IS_IOT: usize = 2;
    pub const SIGNAL_STRENGTH: usize = 3;
    pub const DATA_RATE: usize = 4;
    pub const ELAPSED_SECONDS: usize = 5;
    pub const BYTES_TRANSFERRED: usize = 6;
    pub const BEHAVIOR_SCORE: usize = 7;
    pub const SYSTEM_LOAD: usize = 8;
    pub const ESTIMATED_POWER: usize = 9;
}

/// Derives the feature vector for one session.
///
/// Pure: identical inputs always yield an identical vector. `now` is passed
/// in rather than sampled so cycle code can evaluate every session against
/// the same instant.
pub fn extract(
    session: &Session,
    history: &[BehaviorRecord],
    system_load: f64,
    now: DateTime<Utc>,
) -> FeatureVector {
    let data_rate = session.data_rate(now);
    let mut features = [0.0; FEATURE_COUNT];
    features[index::PRIORITY] = session.priority.ordinal() as f64;
    features[index::DEVICE_CLASS] = session.device_class.code() as f64;
    features[index::IS_IOT] = if session.device_class.is_iot() { 1.0 } else { 0.0 };
    features[index::SIGNAL_STRENGTH] = session.signal_strength as f64;
    features[index::DATA_RATE] = data_rate;
    features[index::ELAPSED_SECONDS] = session.elapsed_seconds(now);
    features[index::BYTES_TRANSFERRED] = session.bytes_transferred as f64;
    features[index::BEHAVIOR_SCORE] = behavior_score(history);
    features[index::SYSTEM_LOAD] = system_load.clamp(0.0, 1.0);
    features[index::ESTIMATED_POWER] = estimated_power(session, data_rate);
    features
}

/// Fraction of historical optimizations that succeeded.
///
/// Returns the neutral prior 0.5 when there is no history, so cold-start
/// devices are not biased in either direction.
pub fn behavior_score(history: &[BehaviorRecord]) -> f64 {
    if history.is_empty() {
        return 0.5;
    }
    let successes = history.iter().filter(|r| r.optimization_succeeded).count();
    successes as f64 / history.len() as f64
}

/// Heuristic power-draw estimate in [0,1].
///
/// Sustained high data rates dominate; otherwise IoT devices default low.
fn estimated_power(session: &Session, data_rate: f64) -> f64 {
    if data_rate > 1_000_000.0 {
        0.9
    } else if data_rate > 100_000.0 {
        0.6
    } else if session.device_class.is_iot() {
        0.3
    } else {
        0.4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btmux_types::{DeviceClass, Priority, TransportKind};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn record(succeeded: bool) -> BehaviorRecord {
        BehaviorRecord {
            timestamp: at(0),
            data_rate: 500.0,
            signal_strength: -60,
            optimization_succeeded: succeeded,
        }
    }

    #[test]
    fn test_extract_layout_and_values() {
        let mut session = Session::new(
            "aa:bb",
            Priority::Critical,
            DeviceClass::Audio,
            TransportKind::Classic,
            at(0),
        );
        session.bytes_transferred = 1_000_000;
        session.signal_strength = -62;

        let features = extract(&session, &[], 0.25, at(10));

        assert_eq!(features[index::PRIORITY], 0.0);
        assert_eq!(features[index::DEVICE_CLASS], DeviceClass::Audio.code() as f64);
        assert_eq!(features[index::IS_IOT], 0.0);
        assert_eq!(features[index::SIGNAL_STRENGTH], -62.0);
        assert_eq!(features[index::DATA_RATE], 100_000.0);
        assert_eq!(features[index::ELAPSED_SECONDS], 10.0);
        assert_eq!(features[index::BYTES_TRANSFERRED], 1_000_000.0);
        assert_eq!(features[index::BEHAVIOR_SCORE], 0.5);
        assert_eq!(features[index::SYSTEM_LOAD], 0.25);
        // 100,000 B/s sits on the boundary: not strictly greater, so the
        // 0.6 band does not apply to a non-IoT device.
        assert_eq!(features[index::ESTIMATED_POWER], 0.4);
    }

    #[test]
    fn test_extract_is_pure() {
        let session = Session::new(
            "aa:bb",
            Priority::Medium,
            DeviceClass::Refrigerator,
            TransportKind::Ble,
            at(0),
        );
        let history = vec![record(true), record(false)];

        let a = extract(&session, &history, 0.5, at(60));
        let b = extract(&session, &history, 0.5, at(60));
        assert_eq!(a, b);
    }

    #[test]
    fn test_behavior_score_round_trip() {
        let history: Vec<BehaviorRecord> =
            (0..10).map(|i| record(i % 2 == 0)).collect();
        // 5 successes out of 10.
        assert!((behavior_score(&history) - 0.5).abs() < 1e-9);

        let all_good: Vec<BehaviorRecord> = (0..7).map(|_| record(true)).collect();
        assert_eq!(behavior_score(&all_good), 1.0);
    }

    #[test]
    fn test_estimated_power_bands() {
        let mut iot = Session::new(
            "iot",
            Priority::Low,
            DeviceClass::GenericIot,
            TransportKind::Ble,
            at(0),
        );
        let features = extract(&iot, &[], 0.0, at(10));
        assert_eq!(features[index::ESTIMATED_POWER], 0.3);

        // A high data rate dominates the IoT default.
        iot.bytes_transferred = 20_000_000;
        let features = extract(&iot, &[], 0.0, at(10));
        assert_eq!(features[index::DATA_RATE], 2_000_000.0);
        assert_eq!(features[index::ESTIMATED_POWER], 0.9);
    }

    #[test]
    fn test_zero_elapsed_yields_zero_rate() {
        let mut session = Session::new(
            "aa:bb",
            Priority::Medium,
            DeviceClass::Phone,
            TransportKind::Classic,
            at(5),
        );
        session.bytes_transferred = 9_999;
        let features = extract(&session, &[], 0.0, at(5));
        assert_eq!(features[index::DATA_RATE], 0.0);
    }
}
