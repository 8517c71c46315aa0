//! Engine facade
//!
//! Wires the store, configuration, model registry, cache, rollout controller
//! and batch orchestrator together. The CLI and the HTTP server both drive
//! the engine through this type.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::{CacheStats, PredictionCache};
use crate::config::{ConfigHandle, EngineConfig, Thresholds};
use crate::db::{Database, ImportSummary};
use crate::error::{Error, Result};
use crate::features::{FeatureExtractor, Features};
use crate::models::{
    CategorizationRule, Category, Feedback, FeedbackEvent, FeedbackStats, ModelVersion,
    NewFeedback, Prediction, RolloutEvent, Transaction, TransactionRecord,
};
use crate::orchestrator::{BatchOptions, BatchOrchestrator, BatchReport};
use crate::registry::ModelRegistry;
use crate::rollout::{RolloutController, RolloutDecision, RolloutStatus};
use crate::rules::{DisabledRule, RuleMatch};
use crate::taxonomy::{TaxonomyCache, TaxonomyFile};
use crate::training::{RetrainTrigger, TrainingPipeline, TrainingReport};

/// Result of running a sample transaction through the rule set
#[derive(Debug, Clone, Serialize)]
pub struct RuleTestResult {
    pub features: Features,
    /// Every matching rule, in evaluation order
    pub matching: Vec<CategorizationRule>,
    pub winner: Option<RuleMatch>,
}

/// Active rules plus the ones disabled at compile time
#[derive(Debug, Clone, Serialize)]
pub struct RuleListing {
    pub rules: Vec<CategorizationRule>,
    pub disabled: Vec<DisabledRule>,
}

/// Current prediction for a transaction with every earlier one
#[derive(Debug, Clone, Serialize)]
pub struct PredictionDetail {
    pub current: Prediction,
    /// Oldest first, including the current prediction
    pub history: Vec<Prediction>,
}

/// A training run and what triggered it
#[derive(Debug, Clone, Serialize)]
pub struct RetrainOutcome {
    pub trigger: RetrainTrigger,
    pub report: TrainingReport,
}

pub struct Engine {
    db: Database,
    config: Arc<ConfigHandle>,
    taxonomy: Arc<TaxonomyCache>,
    registry: Arc<ModelRegistry>,
    cache: Arc<PredictionCache>,
    rollout: Arc<RolloutController>,
    orchestrator: BatchOrchestrator,
}

impl Engine {
    pub fn new(db: Database, config: EngineConfig) -> Self {
        let cache = Arc::new(PredictionCache::new(&config.cache));
        let config = Arc::new(ConfigHandle::new(config));
        let taxonomy = Arc::new(TaxonomyCache::new(db.clone()));
        let registry = Arc::new(ModelRegistry::new(db.clone()));
        let rollout = Arc::new(RolloutController::new(db.clone(), registry.clone()));
        let orchestrator = BatchOrchestrator::new(
            db.clone(),
            config.clone(),
            taxonomy.clone(),
            registry.clone(),
            cache.clone(),
            rollout.clone(),
        );

        Self {
            db,
            config,
            taxonomy,
            registry,
            cache,
            rollout,
            orchestrator,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> Arc<EngineConfig> {
        self.config.snapshot()
    }

    // ========== Classification ==========

    pub async fn classify_batch(
        &self,
        records: Vec<TransactionRecord>,
        options: BatchOptions,
    ) -> Result<BatchReport> {
        self.orchestrator.run(records, options).await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Current predictions waiting on a reviewer, newest first
    pub fn review_queue(&self, limit: i64) -> Result<Vec<Prediction>> {
        self.db.review_queue(limit)
    }

    pub fn prediction(&self, transaction_id: &str) -> Result<PredictionDetail> {
        let current = self
            .db
            .current_prediction(transaction_id)?
            .ok_or_else(|| Error::NotFound(format!("prediction for transaction {}", transaction_id)))?;
        Ok(PredictionDetail {
            current,
            history: self.db.prediction_history(transaction_id)?,
        })
    }

    // ========== Feedback ==========

    /// Record a reviewer's decision on a transaction's current prediction
    pub fn record_feedback(&self, event: &FeedbackEvent) -> Result<Feedback> {
        let prediction = self.db.current_prediction(&event.transaction_id)?.ok_or_else(|| {
            Error::NotFound(format!("prediction for transaction {}", event.transaction_id))
        })?;

        if let Some(chosen) = event.chosen_category_id {
            if self.db.get_category(chosen)?.is_none() {
                return Err(Error::Input(format!("unknown category {}", chosen)));
            }
        }
        if event.accepted_suggestion
            && event.chosen_category_id.is_none()
            && prediction.category_id.is_none()
        {
            return Err(Error::Input(format!(
                "transaction {} has no suggestion to accept",
                event.transaction_id
            )));
        }

        let feedback = self.db.append_feedback(&NewFeedback {
            transaction_id: event.transaction_id.clone(),
            predicted_category_id: prediction.category_id,
            corrected_category_id: event.chosen_category_id,
            accepted: event.accepted_suggestion,
            text: prediction.text.clone(),
        })?;

        // A corrected transaction must not be answered from the cache again
        if feedback.label() != prediction.category_id && self.cache.invalidate(&prediction.fingerprint)
        {
            info!(
                "Invalidated cached prediction for {} after correction",
                event.transaction_id
            );
        }
        Ok(feedback)
    }

    pub fn list_feedback(&self, limit: i64, offset: i64) -> Result<Vec<Feedback>> {
        self.db.list_feedback(limit, offset)
    }

    pub fn feedback_stats(&self) -> Result<FeedbackStats> {
        self.db.feedback_stats()
    }

    // ========== Training ==========

    /// Run training if a trigger fired (or unconditionally when forced)
    pub async fn retrain(&self, force: bool) -> Result<Option<RetrainOutcome>> {
        let config = self.config.snapshot();
        let pipeline = TrainingPipeline::new(self.db.clone());

        let trigger = if force {
            RetrainTrigger::Forced
        } else {
            match pipeline.retrain_due(&config.training, Utc::now())? {
                Some(trigger) => trigger,
                None => return Ok(None),
            }
        };
        info!("Retraining ({:?})", trigger);

        let active = self.registry.snapshot().await.active.map(|m| m.classifier.clone());
        let report = tokio::task::spawn_blocking(move || {
            pipeline.run(&config.training, &config.classifier, active)
        })
        .await??;

        if report.model.is_some() {
            self.registry.refresh().await?;
        }
        Ok(Some(RetrainOutcome { trigger, report }))
    }

    pub fn models(&self) -> Result<Vec<ModelVersion>> {
        self.db.list_model_versions()
    }

    // ========== Rollout ==========

    pub async fn evaluate_rollout(&self) -> Result<RolloutDecision> {
        let config = self.config.snapshot();
        let decision = self.rollout.evaluate(&config.rollout).await?;
        if !matches!(decision, RolloutDecision::NoCandidate | RolloutDecision::Hold { .. }) {
            // Cached outputs belong to the previous serving version
            self.cache.clear();
        }
        Ok(decision)
    }

    pub async fn rollback(&self, reason: Option<String>) -> Result<RolloutDecision> {
        let decision = self.rollout.rollback_active(reason).await?;
        self.cache.clear();
        Ok(decision)
    }

    pub fn rollout_status(&self) -> Result<RolloutStatus> {
        self.rollout.status()
    }

    pub fn rollout_events(&self, limit: i64) -> Result<Vec<RolloutEvent>> {
        self.rollout.events(limit)
    }

    // ========== Configuration ==========

    pub fn thresholds(&self) -> Thresholds {
        self.config.snapshot().thresholds
    }

    /// Applies to batches started after the call
    pub fn set_thresholds(&self, thresholds: Thresholds) -> Result<()> {
        self.config.set_thresholds(thresholds)
    }

    // ========== Taxonomy and rules ==========

    pub fn import_taxonomy(&self, file: &TaxonomyFile) -> Result<ImportSummary> {
        let summary = self.db.import_taxonomy(file)?;
        let disabled = self.taxonomy.load()?.rules.disabled().len();
        if disabled > 0 {
            warn!("{} imported rules failed to compile and are disabled", disabled);
        }
        Ok(summary)
    }

    pub fn categories(&self) -> Result<Vec<Category>> {
        self.db.list_categories()
    }

    pub fn rules(&self) -> Result<RuleListing> {
        let compiled = self.taxonomy.load()?;
        Ok(RuleListing {
            rules: compiled.rules.rules().cloned().collect(),
            disabled: compiled.rules.disabled().to_vec(),
        })
    }

    /// Run a sample transaction through the rule set without persisting anything
    pub fn test_rules(&self, record: &TransactionRecord) -> Result<RuleTestResult> {
        let tx = Transaction::try_from(record)?;
        let features = FeatureExtractor::new(&self.config.snapshot().aliases).extract(&tx);
        let compiled = self.taxonomy.load()?;
        let engine = &compiled.rules;

        Ok(RuleTestResult {
            matching: engine.matching_rules(&features).into_iter().cloned().collect(),
            winner: engine.evaluate(&features),
            features,
        })
    }
}
