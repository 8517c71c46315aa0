//! Rollout controller: staged promotion and rollback of model versions
//!
//! A candidate moves shadow → partial (configured stages) → active. Each
//! stage is judged over a window of live observations (candidate and active
//! model run on the same transactions) plus feedback that arrived after the
//! candidate was trained. Any failed criterion retires the candidate with a
//! reason code; the active model keeps serving throughout.
//!
//! Transitions are serialized: the scheduler's evaluation and a manual
//! rollback never interleave, and each status change is re-checked against
//! the stored status before it is written.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::config::RolloutConfig;
use crate::db::{Database, StatusChange};
use crate::error::{Error, Result};
use crate::models::{
    CategoryId, ModelStatus, ModelVersion, RetiredReason, RolloutEvent, RolloutEventKind,
};
use crate::registry::ModelRegistry;

/// Which side of a traffic split a transaction falls on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arm {
    Control,
    Treatment,
}

/// Deterministic traffic split: the same id always lands in the same bucket
pub fn traffic_arm(transaction_id: &str, percent: u8) -> Arm {
    let digest = Sha256::digest(transaction_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    let bucket = u64::from_be_bytes(bytes) % 100;
    if bucket < u64::from(percent) {
        Arm::Treatment
    } else {
        Arm::Control
    }
}

/// Active and candidate model run side by side on one transaction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub candidate_version: i64,
    pub active_category: CategoryId,
    pub candidate_category: CategoryId,
    pub active_latency_us: u64,
    pub candidate_latency_us: u64,
}

/// Latency samples kept per side; older samples drop off the front
const LATENCY_WINDOW: usize = 2048;

#[derive(Debug, Default)]
struct Window {
    candidate_version: Option<i64>,
    samples: usize,
    disagreements: usize,
    active_latencies: VecDeque<u64>,
    candidate_latencies: VecDeque<u64>,
}

fn push_latency(latencies: &mut VecDeque<u64>, value: u64) {
    if latencies.len() == LATENCY_WINDOW {
        latencies.pop_front();
    }
    latencies.push_back(value);
}

impl Window {
    fn stats(&self) -> WindowStats {
        WindowStats {
            candidate_version: self.candidate_version,
            samples: self.samples,
            disagreement_rate: if self.samples == 0 {
                0.0
            } else {
                self.disagreements as f64 / self.samples as f64
            },
            active_p95_us: p95(&self.active_latencies),
            candidate_p95_us: p95(&self.candidate_latencies),
        }
    }
}

fn p95(latencies: &VecDeque<u64>) -> u64 {
    if latencies.is_empty() {
        return 0;
    }
    let mut sorted: Vec<u64> = latencies.iter().copied().collect();
    sorted.sort_unstable();
    let rank = ((sorted.len() as f64) * 0.95).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Observation window for the current stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowStats {
    pub candidate_version: Option<i64>,
    pub samples: usize,
    pub disagreement_rate: f64,
    pub active_p95_us: u64,
    pub candidate_p95_us: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutStatus {
    pub active: Option<ModelVersion>,
    pub candidate: Option<ModelVersion>,
    pub window: WindowStats,
}

/// Result of one evaluation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RolloutDecision {
    NoCandidate,
    Hold {
        model_version: i64,
        reason: String,
    },
    Advanced {
        model_version: i64,
        rollout_percent: u8,
    },
    Promoted {
        model_version: i64,
        previous: Option<i64>,
    },
    RolledBack {
        model_version: i64,
        reason: RetiredReason,
        detail: String,
    },
}

/// Live accuracy of both models on the same feedback
#[derive(Debug, Clone, Copy, PartialEq)]
struct LiveAccuracy {
    samples: usize,
    active: f64,
    candidate: f64,
}

pub struct RolloutController {
    db: Database,
    registry: Arc<ModelRegistry>,
    window: Mutex<Window>,
    transitions: AsyncMutex<()>,
}

impl RolloutController {
    pub fn new(db: Database, registry: Arc<ModelRegistry>) -> Self {
        Self {
            db,
            registry,
            window: Mutex::new(Window::default()),
            transitions: AsyncMutex::new(()),
        }
    }

    fn with_window<T>(&self, f: impl FnOnce(&mut Window) -> T) -> T {
        let mut guard = match self.window.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Feed side-by-side observations from a processed chunk
    pub fn observe(&self, observations: &[Observation]) {
        if observations.is_empty() {
            return;
        }
        self.with_window(|w| {
            for obs in observations {
                if w.candidate_version != Some(obs.candidate_version) {
                    *w = Window {
                        candidate_version: Some(obs.candidate_version),
                        ..Window::default()
                    };
                }
                w.samples += 1;
                if obs.active_category != obs.candidate_category {
                    w.disagreements += 1;
                }
                push_latency(&mut w.active_latencies, obs.active_latency_us);
                push_latency(&mut w.candidate_latencies, obs.candidate_latency_us);
            }
        });
    }

    fn reset_window(&self) {
        self.with_window(|w| *w = Window::default());
    }

    pub fn window_stats(&self) -> WindowStats {
        self.with_window(|w| w.stats())
    }

    pub fn status(&self) -> Result<RolloutStatus> {
        let candidate = self.db.candidate_model_version()?;
        let mut window = self.window_stats();
        if window.candidate_version != candidate.as_ref().map(|c| c.id) {
            window = WindowStats::default();
        }
        Ok(RolloutStatus {
            active: self.db.active_model_version()?,
            candidate,
            window,
        })
    }

    pub fn events(&self, limit: i64) -> Result<Vec<RolloutEvent>> {
        self.db.list_rollout_events(limit)
    }

    /// Judge the current candidate and move it one step if warranted
    pub async fn evaluate(&self, config: &RolloutConfig) -> Result<RolloutDecision> {
        let _transition = self.transitions.lock().await;
        let Some(candidate) = self.db.candidate_model_version()? else {
            return Ok(RolloutDecision::NoCandidate);
        };

        let Some(active) = self.db.active_model_version()? else {
            info!("No active model, promoting v{} directly", candidate.id);
            return self.promote(&candidate, None).await;
        };

        if let Some(baseline) = candidate.baseline_accuracy {
            if candidate.validation_accuracy < baseline - config.accuracy_tolerance {
                let detail = format!(
                    "held-out accuracy {:.3} below active baseline {:.3}",
                    candidate.validation_accuracy, baseline
                );
                return self
                    .roll_back(&candidate, RetiredReason::HeldOutAccuracyRegression, detail)
                    .await;
            }
        }

        let window = self.window_stats();
        let samples = if window.candidate_version == Some(candidate.id) {
            window.samples
        } else {
            0
        };
        if samples < config.min_window {
            return Ok(self.hold(
                &candidate,
                format!("collecting observations ({}/{})", samples, config.min_window),
            ));
        }

        if window.disagreement_rate > config.max_disagreement {
            let detail = format!(
                "disagreement {:.3} exceeds {:.3} over {} samples",
                window.disagreement_rate, config.max_disagreement, samples
            );
            return self
                .roll_back(&candidate, RetiredReason::DisagreementTooHigh, detail)
                .await;
        }

        let latency_budget = window.active_p95_us.max(1) as f64 * config.max_latency_factor;
        if window.candidate_p95_us as f64 > latency_budget {
            let detail = format!(
                "p95 latency {}us exceeds {:.0}us ({}x active {}us)",
                window.candidate_p95_us,
                latency_budget,
                config.max_latency_factor,
                window.active_p95_us
            );
            return self
                .roll_back(&candidate, RetiredReason::LatencyRegression, detail)
                .await;
        }

        let accuracy = self.live_accuracy(&active, &candidate)?;
        if accuracy.samples < config.min_feedback {
            return Ok(self.hold(
                &candidate,
                format!(
                    "waiting for feedback ({}/{})",
                    accuracy.samples, config.min_feedback
                ),
            ));
        }
        if accuracy.candidate < accuracy.active - config.accuracy_tolerance {
            let detail = format!(
                "live accuracy {:.3} below active {:.3} over {} labels",
                accuracy.candidate, accuracy.active, accuracy.samples
            );
            return self
                .roll_back(&candidate, RetiredReason::AccuracyRegression, detail)
                .await;
        }

        let next_stage = match candidate.status {
            ModelStatus::Shadow => config.stages.first().copied(),
            ModelStatus::Partial => config
                .stages
                .iter()
                .copied()
                .find(|s| *s > candidate.rollout_percent),
            _ => None,
        };

        match next_stage {
            Some(percent) => self.advance(&candidate, percent).await,
            None => self.promote(&candidate, Some(&active)).await,
        }
    }

    /// Retire the active version and restore the most recently superseded one
    pub async fn rollback_active(&self, detail: Option<String>) -> Result<RolloutDecision> {
        let _transition = self.transitions.lock().await;
        let active = self
            .db
            .active_model_version()?
            .ok_or_else(|| Error::NotFound("no active model version".to_string()))?;
        let previous = self.db.last_superseded_model_version()?.ok_or_else(|| {
            Error::NotFound(format!(
                "no superseded version to restore in place of v{}",
                active.id
            ))
        })?;

        let detail = detail.unwrap_or_else(|| format!("manual rollback to v{}", previous.id));
        warn!("Rolling back active model v{} to v{}", active.id, previous.id);
        self.db.apply_status_changes(&[
            StatusChange::retire(
                &active,
                RolloutEventKind::RolledBack,
                RetiredReason::ManualRollback,
                Some(detail.clone()),
            ),
            StatusChange {
                model_version: previous.id,
                from_status: previous.status,
                kind: RolloutEventKind::RolledBack,
                to_status: ModelStatus::Active,
                rollout_percent: 100,
                retired_reason: None,
                reason: Some(format!("restored after v{} rollback", active.id)),
            },
        ])?;
        self.after_transition().await?;

        Ok(RolloutDecision::RolledBack {
            model_version: active.id,
            reason: RetiredReason::ManualRollback,
            detail,
        })
    }

    fn hold(&self, candidate: &ModelVersion, reason: String) -> RolloutDecision {
        debug!("Holding v{}: {}", candidate.id, reason);
        RolloutDecision::Hold {
            model_version: candidate.id,
            reason,
        }
    }

    async fn advance(&self, candidate: &ModelVersion, percent: u8) -> Result<RolloutDecision> {
        self.db.apply_status_changes(&[StatusChange {
            model_version: candidate.id,
            from_status: candidate.status,
            kind: RolloutEventKind::Advanced,
            to_status: ModelStatus::Partial,
            rollout_percent: percent,
            retired_reason: None,
            reason: None,
        }])?;
        info!(
            "Model v{} advanced to {}% of traffic",
            candidate.id, percent
        );
        self.after_transition().await?;
        Ok(RolloutDecision::Advanced {
            model_version: candidate.id,
            rollout_percent: percent,
        })
    }

    async fn promote(
        &self,
        candidate: &ModelVersion,
        previous: Option<&ModelVersion>,
    ) -> Result<RolloutDecision> {
        let mut changes = Vec::new();
        if let Some(previous) = previous {
            changes.push(StatusChange::retire(
                previous,
                RolloutEventKind::Retired,
                RetiredReason::Superseded,
                Some(format!("superseded by v{}", candidate.id)),
            ));
        }
        changes.push(StatusChange {
            model_version: candidate.id,
            from_status: candidate.status,
            kind: RolloutEventKind::Promoted,
            to_status: ModelStatus::Active,
            rollout_percent: 100,
            retired_reason: None,
            reason: None,
        });
        self.db.apply_status_changes(&changes)?;
        info!("Model v{} promoted to active", candidate.id);
        self.after_transition().await?;

        Ok(RolloutDecision::Promoted {
            model_version: candidate.id,
            previous: previous.map(|p| p.id),
        })
    }

    async fn roll_back(
        &self,
        candidate: &ModelVersion,
        reason: RetiredReason,
        detail: String,
    ) -> Result<RolloutDecision> {
        let err = Error::RolloutRegression {
            version: candidate.id,
            reason: detail.clone(),
        };
        warn!("{}; retiring candidate", err);

        self.db.apply_status_changes(&[StatusChange::retire(
            candidate,
            RolloutEventKind::RolledBack,
            reason,
            Some(detail.clone()),
        )])?;
        self.after_transition().await?;

        Ok(RolloutDecision::RolledBack {
            model_version: candidate.id,
            reason,
            detail,
        })
    }

    async fn after_transition(&self) -> Result<()> {
        self.reset_window();
        self.registry.refresh().await?;
        Ok(())
    }

    /// Compare both versions against feedback newer than the candidate's training data
    fn live_accuracy(&self, active: &ModelVersion, candidate: &ModelVersion) -> Result<LiveAccuracy> {
        let watermark = candidate.feedback_watermark;

        let mut labels: HashMap<String, CategoryId> = HashMap::new();
        for feedback in self.db.feedback_after(watermark)? {
            if let Some(label) = feedback.label() {
                labels.insert(feedback.transaction_id, label);
            }
        }

        let active_outputs = self.db.outputs_for_feedback(active.id, watermark)?;
        let candidate_outputs = self.db.outputs_for_feedback(candidate.id, watermark)?;

        let mut samples = 0usize;
        let mut active_hits = 0usize;
        let mut candidate_hits = 0usize;
        for (transaction_id, label) in &labels {
            if let (Some(a), Some(c)) = (
                active_outputs.get(transaction_id),
                candidate_outputs.get(transaction_id),
            ) {
                samples += 1;
                active_hits += usize::from(a == label);
                candidate_hits += usize::from(c == label);
            }
        }

        let rate = |hits: usize| {
            if samples == 0 {
                0.0
            } else {
                hits as f64 / samples as f64
            }
        };
        Ok(LiveAccuracy {
            samples,
            active: rate(active_hits),
            candidate: rate(candidate_hits),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traffic_arm_is_stable() {
        for id in ["a", "tx-1", "tx-2", "9f3c"] {
            assert_eq!(traffic_arm(id, 25), traffic_arm(id, 25));
        }
        assert_eq!(traffic_arm("anything", 0), Arm::Control);
        assert_eq!(traffic_arm("anything", 100), Arm::Treatment);
    }

    #[test]
    fn test_traffic_arm_is_monotonic_in_percent() {
        // A transaction in treatment at 10% stays in treatment at 50%
        for i in 0..500 {
            let id = format!("tx-{}", i);
            if traffic_arm(&id, 10) == Arm::Treatment {
                assert_eq!(traffic_arm(&id, 50), Arm::Treatment);
            }
        }
    }

    #[test]
    fn test_traffic_arm_split_is_roughly_proportional() {
        let treated = (0..10_000)
            .filter(|i| traffic_arm(&format!("tx-{}", i), 25) == Arm::Treatment)
            .count();
        assert!((2_000..3_000).contains(&treated), "{}", treated);
    }

    #[test]
    fn test_p95() {
        assert_eq!(p95(&VecDeque::new()), 0);
        assert_eq!(p95(&VecDeque::from(vec![7])), 7);
        let values: VecDeque<u64> = (1..=100).collect();
        assert_eq!(p95(&values), 95);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let db = Database::in_memory().unwrap();
        let controller = RolloutController::new(db.clone(), Arc::new(ModelRegistry::new(db)));
        let slow = (0..LATENCY_WINDOW).map(|_| Observation {
            candidate_version: 1,
            active_category: 1,
            candidate_category: 1,
            active_latency_us: 100,
            candidate_latency_us: 10_000,
        });
        controller.observe(&slow.collect::<Vec<_>>());
        assert_eq!(controller.window_stats().candidate_p95_us, 10_000);

        // A full window of fast samples pushes every slow one out
        let fast: Vec<_> = (0..LATENCY_WINDOW)
            .map(|_| Observation {
                candidate_version: 1,
                active_category: 1,
                candidate_category: 1,
                active_latency_us: 100,
                candidate_latency_us: 90,
            })
            .collect();
        controller.observe(&fast);

        let stats = controller.window_stats();
        assert_eq!(stats.samples, 2 * LATENCY_WINDOW);
        assert_eq!(stats.candidate_p95_us, 90);
        controller.with_window(|w| {
            assert_eq!(w.active_latencies.len(), LATENCY_WINDOW);
            assert_eq!(w.candidate_latencies.len(), LATENCY_WINDOW);
        });
    }

    #[test]
    fn test_window_resets_on_new_candidate() {
        let db = Database::in_memory().unwrap();
        let controller = RolloutController::new(db.clone(), Arc::new(ModelRegistry::new(db)));
        let obs = |version, agree: bool| Observation {
            candidate_version: version,
            active_category: 1,
            candidate_category: if agree { 1 } else { 2 },
            active_latency_us: 100,
            candidate_latency_us: 120,
        };

        controller.observe(&[obs(1, true), obs(1, false)]);
        let stats = controller.window_stats();
        assert_eq!(stats.samples, 2);
        assert_eq!(stats.disagreement_rate, 0.5);

        controller.observe(&[obs(2, true)]);
        let stats = controller.window_stats();
        assert_eq!(stats.candidate_version, Some(2));
        assert_eq!(stats.samples, 1);
        assert_eq!(stats.disagreement_rate, 0.0);
    }
}
