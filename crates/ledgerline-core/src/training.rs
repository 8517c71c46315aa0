//! Retraining pipeline
//!
//! The feedback log is the only training input. A run collects the latest
//! confirmed label per transaction, drops under-sampled categories, holds out
//! every k-th sample for validation, fits a new classifier and registers it as
//! a shadow candidate. Under-sampled categories the active model already
//! scores are carried over from it unchanged. The currently active model is scored on the same
//! held-out split so the rollout controller can compare the two.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classifier::Classifier;
use crate::config::{ClassifierConfig, TrainingConfig};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{CategoryId, ModelVersion, NewModelVersion};

/// Why a retraining run is due
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum RetrainTrigger {
    /// Feedback accumulated since the newest model reached the threshold
    FeedbackThreshold { since: i64 },
    /// The scheduled interval elapsed and there is new feedback
    Schedule,
    Forced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySampleCount {
    pub category_id: CategoryId,
    pub samples: usize,
}

/// Outcome of one training run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingReport {
    /// The registered candidate; None when the run was skipped
    pub model: Option<ModelVersion>,
    pub total_samples: usize,
    pub train_samples: usize,
    pub holdout_samples: usize,
    pub included: Vec<CategorySampleCount>,
    /// Categories left out for having too few samples
    pub excluded: Vec<CategorySampleCount>,
    /// Excluded categories whose scores come from the active model
    pub carried: Vec<CategoryId>,
    pub validation_accuracy: Option<f64>,
    /// Active model's accuracy on the same held-out split
    pub baseline_accuracy: Option<f64>,
    pub skipped: Option<String>,
}

type Sample = (Vec<String>, CategoryId);

pub struct TrainingPipeline {
    db: Database,
}

impl TrainingPipeline {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Check whether a run is due at `now`
    pub fn retrain_due(
        &self,
        config: &TrainingConfig,
        now: DateTime<Utc>,
    ) -> Result<Option<RetrainTrigger>> {
        let latest = self.db.latest_model_version()?;
        let watermark = latest.as_ref().map(|m| m.feedback_watermark).unwrap_or(0);
        let since = self.db.count_feedback_after(watermark)?;

        if since == 0 {
            return Ok(None);
        }
        if config.retrain_after_feedback > 0 && since >= config.retrain_after_feedback {
            return Ok(Some(RetrainTrigger::FeedbackThreshold { since }));
        }
        let interval = i64::try_from(config.schedule_hours)
            .ok()
            .filter(|h| *h > 0)
            .and_then(Duration::try_hours);
        if let Some(interval) = interval {
            let elapsed = latest.map_or(true, |m| now - m.trained_at >= interval);
            if elapsed {
                return Ok(Some(RetrainTrigger::Schedule));
            }
        }
        Ok(None)
    }

    /// Train a candidate from the full feedback log
    ///
    /// `active` is the currently serving classifier, scored on the held-out
    /// split as the baseline.
    pub fn run(
        &self,
        training: &TrainingConfig,
        classifier: &ClassifierConfig,
        active: Option<Arc<Classifier>>,
    ) -> Result<TrainingReport> {
        let watermark = self.db.max_feedback_id()?;
        let samples = self.labelled_samples(watermark)?;
        let mut report = TrainingReport {
            total_samples: samples.len(),
            ..TrainingReport::default()
        };

        let mut counts: BTreeMap<CategoryId, usize> = BTreeMap::new();
        for (_, category_id) in &samples {
            *counts.entry(*category_id).or_default() += 1;
        }
        for (&category_id, &count) in &counts {
            let entry = CategorySampleCount {
                category_id,
                samples: count,
            };
            if count >= training.min_samples_per_category {
                report.included.push(entry);
            } else {
                let err = Error::TrainingDataInsufficient(format!(
                    "category {} has {} samples, need {}",
                    category_id, count, training.min_samples_per_category
                ));
                warn!("Excluding from training: {}", err);
                report.excluded.push(entry);
            }
        }

        if report.included.len() < 2 {
            let err = Error::TrainingDataInsufficient(format!(
                "{} eligible categories, need at least 2",
                report.included.len()
            ));
            warn!("Training skipped: {}", err);
            report.skipped = Some(err.to_string());
            return Ok(report);
        }

        let eligible: Vec<Sample> = samples
            .into_iter()
            .filter(|(_, c)| report.included.iter().any(|i| i.category_id == *c))
            .collect();
        let (train, holdout) = split_holdout(eligible, training.holdout_every);
        report.train_samples = train.len();
        report.holdout_samples = holdout.len();

        // Tiny logs can leave nothing held out; score on the training set then
        let validation = if holdout.is_empty() { &train } else { &holdout };

        info!(
            "Training candidate on {} samples ({} held out, {} categories)",
            train.len(),
            holdout.len(),
            report.included.len()
        );
        let mut candidate = Classifier::train(&train, classifier)?;
        if let Some(prior) = active.as_deref() {
            let excluded: Vec<CategoryId> =
                report.excluded.iter().map(|e| e.category_id).collect();
            candidate = candidate.carry_from(prior, &excluded);
            report.carried = candidate.carried_classes();
            if !report.carried.is_empty() {
                info!("Carrying categories {:?} from the active model", report.carried);
            }
        }
        let validation_accuracy = accuracy(&candidate, validation);
        let baseline_accuracy = active.as_deref().map(|model| accuracy(model, validation));
        report.validation_accuracy = Some(validation_accuracy);
        report.baseline_accuracy = baseline_accuracy;

        debug!(
            "Validation accuracy {:.3} (baseline {:?})",
            validation_accuracy, baseline_accuracy
        );

        let model = self.db.insert_candidate_model(&NewModelVersion {
            training_sample_count: train.len() as i64,
            validation_accuracy,
            baseline_accuracy,
            feedback_watermark: watermark,
            artifact: candidate.to_json()?,
        })?;
        report.model = Some(model);
        Ok(report)
    }

    /// Latest confirmed label per transaction, in feedback-id order
    fn labelled_samples(&self, watermark: i64) -> Result<Vec<Sample>> {
        let mut latest: HashMap<String, (i64, Sample)> = HashMap::new();
        for entry in self.db.feedback_after(0)? {
            if entry.id > watermark {
                break;
            }
            match entry.label() {
                Some(label) => {
                    let tokens = entry.text.split_whitespace().map(str::to_string).collect();
                    latest.insert(entry.transaction_id.clone(), (entry.id, (tokens, label)));
                }
                // A plain rejection withdraws the earlier label
                None => {
                    latest.remove(&entry.transaction_id);
                }
            }
        }

        let mut ordered: Vec<(i64, Sample)> = latest.into_values().collect();
        ordered.sort_by_key(|(id, _)| *id);
        Ok(ordered.into_iter().map(|(_, sample)| sample).collect())
    }
}

/// Every `every`-th sample goes to the held-out split
fn split_holdout(samples: Vec<Sample>, every: usize) -> (Vec<Sample>, Vec<Sample>) {
    let mut train = Vec::new();
    let mut holdout = Vec::new();
    for (i, sample) in samples.into_iter().enumerate() {
        if every > 0 && (i + 1) % every == 0 {
            holdout.push(sample);
        } else {
            train.push(sample);
        }
    }
    (train, holdout)
}

fn accuracy(classifier: &Classifier, samples: &[Sample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let correct = samples
        .iter()
        .filter(|(tokens, label)| {
            classifier
                .predict(tokens)
                .first()
                .is_some_and(|top| top.category_id == *label)
        })
        .count();
    correct as f64 / samples.len() as f64
}
