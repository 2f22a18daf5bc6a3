//! The btmux optimization engine: feature extraction, pluggable scoring,
//! and behavior analysis.

pub mod anomaly;
pub mod features;
pub mod optimizer;

pub use anomaly::{Anomaly, AnomalyAnalyzer, PredictedConnection};
pub use features::{extract, FeatureVector, FEATURE_COUNT};
pub use optimizer::{
    apply_result, OptimizationResult, OptimizationScores, Optimizer, RuleBasedScorer,
    ScoreSource, ScoringBackend, SCORE_COUNT,
};
