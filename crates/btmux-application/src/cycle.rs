//! The periodic optimization cycle.
//!
//! `run_cycle` is one pass over every active session: extract features,
//! score, apply treatments, append behavior, then compute system-wide
//! aggregates and run anomaly analysis. The scheduler wraps it in a fixed
//! interval with at-most-one-cycle semantics and a graceful shutdown that
//! interrupts only the inter-cycle wait, never a cycle in progress.

use std::collections::HashMap;
use std::time::Duration;

use std::sync::Arc;

use btmux_core::session::BehaviorRecord;
use btmux_engine::anomaly::Anomaly;
use btmux_engine::features::{self, index};
use btmux_engine::optimizer::{apply_result, OptimizationResult, ScoreSource};
use btmux_types::DeviceEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::usecase::DeviceUseCase;

/// A per-session failure inside one cycle. Failures are isolated: one bad
/// session never aborts the cycle for the others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFailure {
    pub address: String,
    pub error: String,
}

/// Share of total traffic above which a session counts as a bandwidth hog.
const HOG_TRAFFIC_SHARE: f64 = 0.3;

/// Consolidated result of one optimization cycle, published for external
/// consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sessions_optimized: usize,
    pub results: Vec<OptimizationResult>,
    pub failures: Vec<SessionFailure>,
    /// Sum of per-session data rates, bytes per second.
    pub total_bandwidth: f64,
    /// Up to three sessions individually exceeding 30% of total traffic,
    /// heaviest first.
    pub bandwidth_hogs: Vec<String>,
    /// Priority-weighted optimal bandwidth share per session:
    /// `(4 - priority) / sum(4 - priority_i)`.
    pub optimal_shares: HashMap<String, f64>,
    pub anomalies: Vec<Anomaly>,
    /// True when a configured scoring backend failed and the rule-based
    /// scorer took over for part of the cycle.
    pub degraded: bool,
}

impl DeviceUseCase {
    /// Runs one optimization cycle over all active sessions.
    ///
    /// With zero active sessions this is a complete no-op: no behavior
    /// records, no anomaly analysis, no published report. Otherwise the
    /// resulting report is published for the consumer API and a
    /// `CycleCompleted` event is emitted.
    pub async fn run_cycle(&self) -> CycleReport {
        let started_at = Utc::now();
        let sessions = self.store().snapshot_active().await;

        if sessions.is_empty() {
            debug!(target: "cycle", "no active sessions, skipping cycle");
            return CycleReport {
                started_at,
                finished_at: started_at,
                sessions_optimized: 0,
                results: Vec::new(),
                failures: Vec::new(),
                total_bandwidth: 0.0,
                bandwidth_hogs: Vec::new(),
                optimal_shares: HashMap::new(),
                anomalies: Vec::new(),
                degraded: false,
            };
        }

        let load = self.load_estimator().current_load();
        let now = Utc::now();

        let mut results = Vec::new();
        let mut failures = Vec::new();
        let mut anomalies = Vec::new();
        let mut degraded = false;

        for session in &sessions {
            let history = self.store().behavior_history(&session.address).await;
            let features = features::extract(session, &history, load, now);

            let (scores, source) = self.optimizer().score(&features).await;
            if source == ScoreSource::FallbackAfterError {
                degraded = true;
            }

            // Compare current behavior to history before this cycle's
            // record is appended.
            if let Some(anomaly) =
                self.analyzer()
                    .detect(&session.address, &history, features[index::DATA_RATE])
            {
                self.listeners().emit(&DeviceEvent::AnomalyDetected {
                    address: anomaly.address.clone(),
                    severity: anomaly.severity,
                });
                anomalies.push(anomaly);
            }

            let applied = self
                .store()
                .with_session_mut(&session.address, |live| apply_result(live, scores))
                .await;

            match applied {
                Some(result) => {
                    if let Some(priority) = result.new_priority {
                        self.listeners().emit(&DeviceEvent::PriorityChanged {
                            address: session.address.clone(),
                            priority,
                        });
                    }
                    self.store()
                        .append_behavior(
                            &session.address,
                            BehaviorRecord {
                                timestamp: now,
                                data_rate: features[index::DATA_RATE],
                                signal_strength: session.signal_strength,
                                optimization_succeeded: result.success,
                            },
                        )
                        .await;
                    self.store().record_optimization(result.success).await;
                    results.push(result);
                }
                None => {
                    // The session disconnected mid-cycle. Isolate and move
                    // on; the failed step still leaves a record, since the
                    // history ring is keyed by address and outlives the
                    // session.
                    error!(
                        target: "cycle",
                        address = %session.address,
                        "session disappeared mid-cycle, skipping"
                    );
                    self.store()
                        .append_behavior(
                            &session.address,
                            BehaviorRecord {
                                timestamp: now,
                                data_rate: features[index::DATA_RATE],
                                signal_strength: session.signal_strength,
                                optimization_succeeded: false,
                            },
                        )
                        .await;
                    failures.push(SessionFailure {
                        address: session.address.clone(),
                        error: "session disconnected mid-cycle".to_string(),
                    });
                }
            }
        }

        if degraded {
            // One line per cycle, not per session, to avoid log flooding.
            warn!(target: "cycle", "scoring backend unavailable, rule-based fallback used");
        }

        // System-wide aggregates, computed against post-treatment state.
        let current = self.store().snapshot_active().await;
        let total_bandwidth: f64 = current.iter().map(|s| s.data_rate(now)).sum();

        let total_traffic: u64 = current.iter().map(|s| s.bytes_transferred).sum();
        let mut hogs: Vec<&btmux_core::session::Session> = current
            .iter()
            .filter(|s| {
                total_traffic > 0
                    && s.bytes_transferred as f64 > HOG_TRAFFIC_SHARE * total_traffic as f64
            })
            .collect();
        hogs.sort_by(|a, b| b.bytes_transferred.cmp(&a.bytes_transferred));
        let bandwidth_hogs: Vec<String> =
            hogs.into_iter().take(3).map(|s| s.address.clone()).collect();

        let weight_sum: f64 = current
            .iter()
            .map(|s| (4 - s.priority.ordinal()) as f64)
            .sum();
        let optimal_shares: HashMap<String, f64> = current
            .iter()
            .map(|s| {
                let weight = (4 - s.priority.ordinal()) as f64;
                (s.address.clone(), weight / weight_sum)
            })
            .collect();

        let report = CycleReport {
            started_at,
            finished_at: Utc::now(),
            sessions_optimized: results.len(),
            results,
            failures,
            total_bandwidth,
            bandwidth_hogs,
            optimal_shares,
            anomalies,
            degraded,
        };

        *self.last_report_slot().write().await = Some(report.clone());
        self.listeners().emit(&DeviceEvent::CycleCompleted {
            sessions_optimized: report.sessions_optimized,
            anomalies: report.anomalies.len(),
        });
        info!(
            target: "cycle",
            optimized = report.sessions_optimized,
            failed = report.failures.len(),
            anomalies = report.anomalies.len(),
            total_bandwidth = report.total_bandwidth,
            "optimization cycle completed"
        );

        report
    }
}

/// Periodic driver for [`DeviceUseCase::run_cycle`].
///
/// At most one cycle runs at a time: the loop awaits the cycle inline and
/// late ticks are skipped rather than bursted. Shutdown cancels only the
/// inter-cycle wait; a cycle already in progress always finishes (it is
/// bounded by the per-cycle session count, inherently fast).
pub struct CycleScheduler {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl CycleScheduler {
    /// Spawns the scheduler with the given inter-cycle interval.
    pub fn start(usecase: Arc<DeviceUseCase>, period: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            // Skip ticks that fire while a cycle is still executing.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick of tokio's interval fires immediately; consume
            // it so the first cycle runs one full period after start.
            ticker.tick().await;
            info!(target: "cycle", period_secs = period.as_secs_f64(), "cycle scheduler started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!(target: "cycle", "cycle scheduler stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        usecase.run_cycle().await;
                    }
                }
            }
        });

        Self { cancel, handle }
    }

    /// Signals shutdown and waits for the loop to exit. An in-flight cycle
    /// finishes before the task completes.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedLoadEstimator, TransportCommand};
    use crate::usecase::DeviceUseCase;
    use async_trait::async_trait;
    use btmux_core::config::BtmuxConfig;
    use btmux_core::error::Result;
    use btmux_engine::features::FeatureVector;
    use btmux_engine::optimizer::{Optimizer, ScoringBackend, SCORE_COUNT};
    use btmux_types::{DeviceClass, DisconnectReason, TransportKind};
    use std::sync::OnceLock;

    struct NullTransport;

    #[async_trait]
    impl TransportCommand for NullTransport {
        async fn send(&self, _address: &str, _payload: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    /// Backend that disconnects the session it is scoring, forcing the
    /// apply step to find it gone.
    struct DisconnectingBackend {
        usecase: OnceLock<Arc<DeviceUseCase>>,
        victim: &'static str,
    }

    #[async_trait]
    impl ScoringBackend for DisconnectingBackend {
        async fn score(&self, _features: &FeatureVector) -> Result<[f64; SCORE_COUNT]> {
            if let Some(usecase) = self.usecase.get() {
                usecase
                    .on_disconnected(self.victim, DisconnectReason::LinkLost)
                    .await;
            }
            Ok([0.5; SCORE_COUNT])
        }
    }

    fn usecase() -> Arc<DeviceUseCase> {
        Arc::new(DeviceUseCase::new(
            BtmuxConfig::default(),
            Optimizer::rule_based(),
            Arc::new(FixedLoadEstimator(0.25)),
            Arc::new(NullTransport),
        ))
    }

    #[tokio::test]
    async fn test_empty_cycle_is_a_complete_noop() {
        let usecase = usecase();
        let report = usecase.run_cycle().await;

        assert_eq!(report.sessions_optimized, 0);
        assert!(report.anomalies.is_empty());
        // Nothing published.
        assert!(usecase.last_cycle_report().await.is_none());
        assert_eq!(usecase.stats().await.optimizations_applied, 0);
    }

    #[tokio::test]
    async fn test_cycle_optimizes_and_records_behavior() {
        let usecase = usecase();
        usecase
            .on_connected("audio-1", DeviceClass::Audio, TransportKind::Classic)
            .await
            .unwrap();
        usecase
            .on_connected("iot-1", DeviceClass::GenericIot, TransportKind::Ble)
            .await
            .unwrap();
        usecase.on_data_transferred("audio-1", 500_000).await;
        usecase.on_signal_sample("audio-1", -65).await;

        let report = usecase.run_cycle().await;

        assert_eq!(report.sessions_optimized, 2);
        assert!(report.failures.is_empty());
        assert!(!report.degraded);
        // Audio is priority 0: its rule-based bandwidth share is 0.8.
        let audio = report
            .results
            .iter()
            .find(|r| r.address == "audio-1")
            .unwrap();
        assert_eq!(audio.scores.bandwidth_allocation, 0.8);

        // One behavior record per optimized session.
        assert_eq!(usecase.stats().await.optimizations_applied, 2);
        let sessions = usecase.active_sessions().await;
        let audio_session = sessions.iter().find(|s| s.address == "audio-1").unwrap();
        assert_eq!(audio_session.bandwidth_share, 0.8);

        // Report published for consumers.
        assert_eq!(
            usecase.last_cycle_report().await.unwrap().sessions_optimized,
            2
        );
    }

    #[tokio::test]
    async fn test_optimal_shares_are_priority_weighted() {
        let usecase = usecase();
        // Audio resolves to Critical (weight 4), GenericIot to Low (weight 1).
        usecase
            .on_connected("audio-1", DeviceClass::Audio, TransportKind::Classic)
            .await
            .unwrap();
        usecase
            .on_connected("iot-1", DeviceClass::GenericIot, TransportKind::Ble)
            .await
            .unwrap();

        let report = usecase.run_cycle().await;
        assert!((report.optimal_shares["audio-1"] - 0.8).abs() < 1e-9);
        assert!((report.optimal_shares["iot-1"] - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_mid_cycle_disconnect_leaves_failed_record() {
        let backend = Arc::new(DisconnectingBackend {
            usecase: OnceLock::new(),
            victim: "victim",
        });
        let usecase = Arc::new(DeviceUseCase::new(
            BtmuxConfig::default(),
            Optimizer::with_backend(backend.clone()),
            Arc::new(FixedLoadEstimator(0.25)),
            Arc::new(NullTransport),
        ));
        backend.usecase.set(usecase.clone()).ok().unwrap();

        usecase
            .on_connected("victim", DeviceClass::Phone, TransportKind::Classic)
            .await
            .unwrap();

        let report = usecase.run_cycle().await;

        assert_eq!(report.sessions_optimized, 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].address, "victim");

        // The failed step is still visible in the behavior history, which
        // outlives the session, so the score on a reconnect reflects it.
        let history = usecase.store().behavior_history("victim").await;
        assert_eq!(history.len(), 1);
        assert!(!history[0].optimization_succeeded);
    }

    #[tokio::test]
    async fn test_bandwidth_hog_detection() {
        let usecase = usecase();
        usecase
            .on_connected("hog", DeviceClass::Phone, TransportKind::Classic)
            .await
            .unwrap();
        usecase
            .on_connected("quiet", DeviceClass::Phone, TransportKind::Classic)
            .await
            .unwrap();
        usecase.on_data_transferred("hog", 900_000).await;
        usecase.on_data_transferred("quiet", 100_000).await;

        let report = usecase.run_cycle().await;
        assert_eq!(report.bandwidth_hogs, vec!["hog".to_string()]);
    }

    #[tokio::test]
    async fn test_scheduler_runs_and_shuts_down() {
        let usecase = usecase();
        usecase
            .on_connected("dev", DeviceClass::Phone, TransportKind::Classic)
            .await
            .unwrap();

        let scheduler = CycleScheduler::start(usecase.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(120)).await;
        scheduler.shutdown().await;

        let report = usecase.last_cycle_report().await.expect("at least one cycle ran");
        assert_eq!(report.sessions_optimized, 1);
        let applied_after_shutdown = usecase.stats().await.optimizations_applied;
        assert!(applied_after_shutdown >= 1);

        // No new cycle may start after shutdown.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(
            usecase.stats().await.optimizations_applied,
            applied_after_shutdown
        );
    }
}
