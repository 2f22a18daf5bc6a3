//! Anomaly detection and connection prediction.
//!
//! Both analyses run against the store's longitudinal records: anomaly
//! detection compares a session's current data rate to its historical mean,
//! prediction extrapolates from per-device connect patterns.

use btmux_core::session::{BehaviorRecord, ConnectionPattern};
use btmux_types::Severity;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Minimum behavior records before a device can be flagged. Fresh sessions
/// have too little history to separate anomaly from noise.
pub const MIN_HISTORY_FOR_ANOMALY: usize = 5;

/// Deviation ratio above which the rate is anomalous.
const HIGH_DEVIATION: f64 = 3.0;
/// Deviation ratio below which the rate is anomalous.
const LOW_DEVIATION: f64 = 0.3;
/// Ratio bands escalating severity to HIGH (and its mirror below).
const SEVERE_HIGH: f64 = 5.0;
const SEVERE_LOW: f64 = 0.2;

/// A flagged deviation of current behavior from the historical baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub address: String,
    pub severity: Severity,
    pub current_rate: f64,
    pub mean_rate: f64,
}

/// A device whose pattern suggests it will connect again soon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedConnection {
    pub address: String,
    /// Probability in (0.5, 1.0]; lower-probability patterns are not
    /// surfaced.
    pub probability: f64,
    pub predicted_at: DateTime<Utc>,
}

/// Compares current behavior to history and extrapolates connect patterns.
pub struct AnomalyAnalyzer {
    min_history: usize,
}

impl AnomalyAnalyzer {
    pub fn new() -> Self {
        Self {
            min_history: MIN_HISTORY_FOR_ANOMALY,
        }
    }

    /// Flags an anomaly when `current_rate` deviates from the historical
    /// mean by more than 3x above or below 0.3x. Devices with fewer than
    /// [`MIN_HISTORY_FOR_ANOMALY`] records are never flagged.
    pub fn detect(
        &self,
        address: &str,
        history: &[BehaviorRecord],
        current_rate: f64,
    ) -> Option<Anomaly> {
        if history.len() < self.min_history {
            return None;
        }

        let mean_rate =
            history.iter().map(|r| r.data_rate).sum::<f64>() / history.len() as f64;
        if mean_rate <= 0.0 {
            // No baseline to deviate from.
            return None;
        }

        let ratio = current_rate / mean_rate;
        if ratio <= HIGH_DEVIATION && ratio >= LOW_DEVIATION {
            return None;
        }

        let severity = if ratio > SEVERE_HIGH || ratio < SEVERE_LOW {
            Severity::High
        } else {
            Severity::Medium
        };

        warn!(
            target: "anomaly",
            address,
            current_rate,
            mean_rate,
            %severity,
            "data rate deviates from historical baseline"
        );

        Some(Anomaly {
            address: address.to_string(),
            severity,
            current_rate,
            mean_rate,
        })
    }

    /// Predicts upcoming connections from known patterns.
    ///
    /// For each pattern with more than one connection per day on average:
    /// probability `min(avg/10, 1)`, next connect at
    /// `last_seen + 86,400,000 ms / max(avg, 0.1)`. Only predictions with
    /// probability above 0.5 are surfaced, sorted descending.
    pub fn predict(&self, patterns: &[(String, ConnectionPattern)]) -> Vec<PredictedConnection> {
        let mut predictions: Vec<PredictedConnection> = patterns
            .iter()
            .filter(|(_, p)| p.avg_connections_per_day > 1.0)
            .map(|(address, p)| {
                let probability = (p.avg_connections_per_day / 10.0).min(1.0);
                let interval_ms = 86_400_000.0 / p.avg_connections_per_day.max(0.1);
                PredictedConnection {
                    address: address.clone(),
                    probability,
                    predicted_at: p.last_seen + Duration::milliseconds(interval_ms as i64),
                }
            })
            .filter(|prediction| prediction.probability > 0.5)
            .collect();

        predictions.sort_by(|a, b| {
            b.probability
                .partial_cmp(&a.probability)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        predictions
    }
}

impl Default for AnomalyAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
