//! Per-transaction categorization pipeline
//!
//! validate → features → rules → cache → classifier → policy
//!
//! Everything a batch needs is frozen into a [`BatchContext`] up front (rule
//! set, thresholds, serving models), so all transactions in a batch see the
//! same configuration even if it changes mid-run.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::cache::{fingerprint, PredictionCache};
use crate::classifier::ClassifierOutput;
use crate::config::ClassifierConfig;
use crate::db::PredictionRecord;
use crate::features::FeatureExtractor;
use crate::models::{
    CategorizationResult, ModelOutput, PredictionSource, ResolutionNote, Transaction,
    TransactionRecord,
};
use crate::policy::{DecisionPolicy, Evidence};
use crate::registry::{RegistrySnapshot, ServingModel};
use crate::rollout::{traffic_arm, Arm, Observation};
use crate::taxonomy::CompiledTaxonomy;

/// Immutable inputs shared by every transaction in a batch
pub struct BatchContext {
    pub extractor: FeatureExtractor,
    /// Category tree and compiled rules, shared across batches
    pub taxonomy: Arc<CompiledTaxonomy>,
    pub policy: DecisionPolicy,
    pub models: RegistrySnapshot,
    /// None when caching is off for this batch
    pub cache: Option<Arc<PredictionCache>>,
    pub classifier: ClassifierConfig,
}

/// Everything produced for one transaction
#[derive(Debug, Clone)]
pub struct Categorized {
    pub result: CategorizationResult,
    /// What to persist; None when the input never validated
    pub record: Option<PredictionRecord>,
    pub outputs: Vec<ModelOutput>,
    pub observation: Option<Observation>,
    pub cache_lookup: bool,
    pub cache_hit: bool,
}

impl Categorized {
    pub fn failed(transaction_id: &str, note: ResolutionNote) -> Self {
        Self {
            result: CategorizationResult::unresolved(transaction_id, Some(note)),
            record: None,
            outputs: Vec::new(),
            observation: None,
            cache_lookup: false,
            cache_hit: false,
        }
    }
}

struct Timed {
    output: Option<ClassifierOutput>,
    latency_us: u64,
}

impl BatchContext {
    pub fn categorize(&self, record: &TransactionRecord) -> Categorized {
        let tx = match Transaction::try_from(record) {
            Ok(tx) => tx,
            Err(e) => {
                debug!("Transaction {:?} rejected: {}", record.id, e);
                return Categorized::failed(
                    &record.id,
                    ResolutionNote::InputError {
                        message: e.to_string(),
                    },
                );
            }
        };

        let features = self.extractor.extract(&tx);
        let fingerprint = fingerprint(&features);
        let tokens = features.tokens();
        let text = tokens.join(" ");

        let mut out = Categorized {
            result: CategorizationResult::unresolved(&tx.id, None),
            record: None,
            outputs: Vec::new(),
            observation: None,
            cache_lookup: false,
            cache_hit: false,
        };

        let evidence = if let Some(rule) = self.taxonomy.rules.evaluate(&features) {
            debug!("{}: rule {} matched", tx.id, rule.rule_id);
            Evidence::Rule(rule)
        } else {
            self.model_evidence(&tx.id, &fingerprint, &tokens, &mut out)
        };

        let mut result = self.policy.decide(&tx.id, evidence);
        result.is_business = result
            .category_id
            .and_then(|c| self.taxonomy.taxonomy.is_business(c));
        debug!(
            "{}: {} (category={:?}, confidence={:.3}, source={:?})",
            tx.id, result.outcome, result.category_id, result.confidence, result.source
        );

        out.record = Some(PredictionRecord {
            result: result.clone(),
            text,
            fingerprint,
        });
        out.result = result;
        out
    }

    /// Serving model output (cached or fresh), plus side-by-side candidate runs
    fn model_evidence(
        &self,
        transaction_id: &str,
        fingerprint: &str,
        tokens: &[String],
        out: &mut Categorized,
    ) -> Evidence {
        let active = self.models.active.as_ref();
        let candidate = self.models.candidate.as_ref();

        // Partial candidates take their share of traffic; shadows never serve
        let (serving, other) = match (active, candidate) {
            (a, Some(c)) if c.version.rollout_percent > 0 => {
                match traffic_arm(transaction_id, c.version.rollout_percent) {
                    Arm::Treatment => (Some(c), a),
                    Arm::Control => (a, Some(c)),
                }
            }
            (a, c) => (a, c),
        };

        let Some(serving) = serving else {
            // No serving model: still give a shadow candidate its run
            if let Some(shadow) = other {
                let timed = self.run(shadow, tokens);
                self.log_output(out, transaction_id, shadow, &timed, false);
            }
            return Evidence::Unavailable;
        };

        if let Some(cache) = &self.cache {
            out.cache_lookup = true;
            if let Some(output) = cache.get(fingerprint, serving.id()) {
                out.cache_hit = true;
                return Evidence::Classifier {
                    output,
                    model_version: serving.id(),
                    source: PredictionSource::Cache,
                };
            }
        }

        let served = self.run(serving, tokens);
        let Some(output) = served.output.clone() else {
            return Evidence::Unavailable;
        };
        if let Some(cache) = &self.cache {
            cache.insert(fingerprint.to_string(), output.clone(), serving.id());
        }

        if let Some(other) = other {
            let compared = self.run(other, tokens);
            self.log_output(out, transaction_id, serving, &served, true);
            self.log_output(out, transaction_id, other, &compared, false);

            let (active_run, candidate_run, candidate_version) =
                if serving.version.status.is_candidate() {
                    (&compared, &served, serving.id())
                } else {
                    (&served, &compared, other.id())
                };
            if let (Some(a), Some(c)) = (&active_run.output, &candidate_run.output) {
                out.observation = Some(Observation {
                    candidate_version,
                    active_category: a.category_id,
                    candidate_category: c.category_id,
                    active_latency_us: active_run.latency_us,
                    candidate_latency_us: candidate_run.latency_us,
                });
            }
        }

        Evidence::Classifier {
            output,
            model_version: serving.id(),
            source: PredictionSource::Model,
        }
    }

    fn run(&self, model: &ServingModel, tokens: &[String]) -> Timed {
        let started = Instant::now();
        let output = model.classifier.classify(tokens, &self.classifier);
        Timed {
            output,
            latency_us: started.elapsed().as_micros() as u64,
        }
    }

    fn log_output(
        &self,
        out: &mut Categorized,
        transaction_id: &str,
        model: &ServingModel,
        timed: &Timed,
        served: bool,
    ) {
        if let Some(output) = &timed.output {
            out.outputs.push(ModelOutput {
                transaction_id: transaction_id.to_string(),
                model_version: model.id(),
                category_id: output.category_id,
                confidence: output.confidence,
                latency_us: timed.latency_us as i64,
                served,
            });
        }
    }
}
