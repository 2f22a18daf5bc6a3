//! Session scoring and result application.
//!
//! Scoring is polymorphic over a single capability: turn a feature vector
//! into five normalized scores. The learned backend is an opaque external
//! model behind [`ScoringBackend`]; when it is absent or fails, the
//! deterministic rule-based scorer takes over. Fallback is an expected
//! degraded mode, not an error.

use std::sync::Arc;

use async_trait::async_trait;
use btmux_core::error::Result;
use btmux_core::session::Session;
use btmux_types::Priority;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::features::{index, FeatureVector};

/// Number of scores produced per session. Scoring backends emit exactly
/// this many outputs.
pub const SCORE_COUNT: usize = 5;

/// Normalized recommendation scores for one session.
///
/// The first four are in [0,1]; `priority_adjustment` is in [-1,1], where
/// negative means demote and positive means promote.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizationScores {
    pub bandwidth_allocation: f64,
    pub power_management: f64,
    pub latency_reduction: f64,
    pub signal_optimization: f64,
    pub priority_adjustment: f64,
}

impl OptimizationScores {
    /// Builds scores from a raw backend output array, in contract order.
    pub fn from_array(raw: [f64; SCORE_COUNT]) -> Self {
        Self {
            bandwidth_allocation: raw[0],
            power_management: raw[1],
            latency_reduction: raw[2],
            signal_optimization: raw[3],
            priority_adjustment: raw[4],
        }
    }

    /// Clamps every score into its contract range. Out-of-range backend
    /// output is tolerated, never propagated.
    pub fn clamped(self) -> Self {
        Self {
            bandwidth_allocation: self.bandwidth_allocation.clamp(0.0, 1.0),
            power_management: self.power_management.clamp(0.0, 1.0),
            latency_reduction: self.latency_reduction.clamp(0.0, 1.0),
            signal_optimization: self.signal_optimization.clamp(0.0, 1.0),
            priority_adjustment: self.priority_adjustment.clamp(-1.0, 1.0),
        }
    }
}

/// An opaque externally-supplied scoring function (the trained model,
/// loaded once at startup).
#[async_trait]
pub trait ScoringBackend: Send + Sync {
    async fn score(&self, features: &FeatureVector) -> Result<[f64; SCORE_COUNT]>;
}

/// Deterministic rule-based scorer. Reproducible bit-for-bit given inputs.
pub struct RuleBasedScorer;

impl RuleBasedScorer {
    pub fn score(features: &FeatureVector) -> OptimizationScores {
        let priority = features[index::PRIORITY];
        let is_iot = features[index::IS_IOT] >= 0.5;
        let signal = features[index::SIGNAL_STRENGTH];
        let data_rate = features[index::DATA_RATE];
        let power = features[index::ESTIMATED_POWER];

        let bandwidth_allocation = if priority <= 1.0 {
            0.8
        } else if is_iot {
            0.3
        } else if data_rate > 1_000_000.0 {
            0.7
        } else {
            0.5
        };

        let power_management = if power > 0.7 {
            0.8
        } else if is_iot {
            0.6
        } else if priority <= 1.0 {
            0.2
        } else {
            0.5
        };

        let latency_reduction = if priority == 0.0 {
            1.0
        } else if priority == 1.0 {
            0.7
        } else {
            0.3
        };

        let signal_optimization = if signal < -80.0 {
            1.0
        } else if signal < -60.0 {
            0.6
        } else {
            0.2
        };

        // First matching rule wins; the conditions overlap, so the order
        // below is part of the contract.
        let priority_adjustment = if data_rate < 100.0 && priority < 2.0 {
            -0.5
        } else if signal < -90.0 {
            -0.3
        } else if power > 0.9 {
            -0.4
        } else {
            0.0
        };

        OptimizationScores {
            bandwidth_allocation,
            power_management,
            latency_reduction,
            signal_optimization,
            priority_adjustment,
        }
    }
}

/// How a score was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreSource {
    /// The learned backend answered.
    Backend,
    /// No backend is configured; rules are the normal path.
    Rules,
    /// A configured backend failed and rules took over for this call.
    FallbackAfterError,
}

/// Produces per-session scores via the configured strategy.
pub struct Optimizer {
    backend: Option<Arc<dyn ScoringBackend>>,
}

impl Optimizer {
    /// An optimizer that only uses the rule-based scorer.
    pub fn rule_based() -> Self {
        Self { backend: None }
    }

    /// An optimizer that prefers the learned backend and falls back to
    /// rules when it fails.
    pub fn with_backend(backend: Arc<dyn ScoringBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// Scores one feature vector. Never fails: backend errors degrade to
    /// the rule-based strategy, reported via the returned [`ScoreSource`]
    /// so the caller can log the degradation once per cycle rather than
    /// once per session.
    pub async fn score(&self, features: &FeatureVector) -> (OptimizationScores, ScoreSource) {
        match &self.backend {
            Some(backend) => match backend.score(features).await {
                Ok(raw) => (
                    OptimizationScores::from_array(raw).clamped(),
                    ScoreSource::Backend,
                ),
                Err(err) => {
                    debug!(target: "optimizer", error = %err, "scoring backend failed, using rules");
                    (RuleBasedScorer::score(features), ScoreSource::FallbackAfterError)
                }
            },
            None => (RuleBasedScorer::score(features), ScoreSource::Rules),
        }
    }
}

/// Ephemeral output of one optimizer invocation for one session.
///
/// Not persisted beyond being folded into a behavior record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub address: String,
    pub scores: OptimizationScores,
    /// Human-readable log of the treatments applied.
    pub actions: Vec<String>,
    pub success: bool,
    /// Set when the priority delta moved the session's priority.
    pub new_priority: Option<Priority>,
}

/// Score threshold above which a bandwidth or power recommendation becomes
/// an applied treatment.
const TREATMENT_THRESHOLD: f64 = 0.6;
/// Score threshold for latency and signal urgency actions.
const URGENCY_THRESHOLD: f64 = 0.5;
/// Absolute priority-adjustment score that moves the priority one step.
const PRIORITY_STEP_THRESHOLD: f64 = 0.3;

/// Translates scores into the session's live treatment fields and an action
/// log. Out-of-range scores are clamped, never rejected.
pub fn apply_result(session: &mut Session, scores: OptimizationScores) -> OptimizationResult {
    let scores = scores.clamped();
    let mut actions = Vec::new();

    session.bandwidth_share = scores.bandwidth_allocation;
    if scores.bandwidth_allocation > TREATMENT_THRESHOLD {
        actions.push(format!(
            "increase bandwidth allocation to {:.2}",
            scores.bandwidth_allocation
        ));
    }

    let aggressive = scores.power_management > TREATMENT_THRESHOLD;
    if aggressive && !session.aggressive_power_saving {
        actions.push("enable aggressive power saving".to_string());
    }
    session.aggressive_power_saving = aggressive;

    let low_latency = scores.latency_reduction > URGENCY_THRESHOLD;
    if low_latency && !session.low_latency {
        actions.push("prioritize latency reduction".to_string());
    }
    session.low_latency = low_latency;

    if scores.signal_optimization > URGENCY_THRESHOLD {
        actions.push(format!(
            "boost signal ({} dBm, urgency {:.2})",
            session.signal_strength, scores.signal_optimization
        ));
    }

    let mut new_priority = None;
    if scores.priority_adjustment <= -PRIORITY_STEP_THRESHOLD {
        let demoted = session.priority.demoted();
        if demoted != session.priority {
            session.priority = demoted;
            new_priority = Some(demoted);
            actions.push(format!("demote priority to {demoted}"));
        }
    } else if scores.priority_adjustment >= PRIORITY_STEP_THRESHOLD {
        let promoted = session.priority.promoted();
        if promoted != session.priority {
            session.priority = promoted;
            new_priority = Some(promoted);
            actions.push(format!("promote priority to {promoted}"));
        }
    }

    OptimizationResult {
        address: session.address.clone(),
        scores,
        actions,
        success: true,
        new_priority,
    }
}
