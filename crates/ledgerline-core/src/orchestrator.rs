//! Batch orchestration
//!
//! A batch is split into fixed-size chunks. Chunks run as tokio tasks, at
//! most `workers` at a time (a [`Semaphore`] bounds them). Each transaction
//! is categorized on the blocking pool under a timeout, and each finished
//! chunk is persisted before its results are reported. Results come back in
//! input order regardless of completion order.
//!
//! Store failures never fail the batch. If the rule set cannot be loaded,
//! every transaction resolves UNRESOLVED; if a chunk cannot be saved, that
//! chunk's results do.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::cache::PredictionCache;
use crate::categorizer::{BatchContext, Categorized};
use crate::config::ConfigHandle;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::features::FeatureExtractor;
use crate::models::{BatchSummary, CategorizationResult, Outcome, ResolutionNote, TransactionRecord};
use crate::policy::DecisionPolicy;
use crate::registry::ModelRegistry;
use crate::rollout::RolloutController;
use crate::taxonomy::TaxonomyCache;

/// Cooperative cancellation flag, checked at chunk boundaries
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Consult and fill the prediction cache
    pub use_cache: bool,
    pub cancel: CancellationToken,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            cancel: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchReport {
    pub results: Vec<CategorizationResult>,
    pub summary: BatchSummary,
}

#[derive(Debug, Default)]
struct ChunkOutcome {
    results: Vec<CategorizationResult>,
    cache_lookups: u64,
    cache_hits: u64,
    cancelled: bool,
}

pub struct BatchOrchestrator {
    db: Database,
    config: Arc<ConfigHandle>,
    taxonomy: Arc<TaxonomyCache>,
    registry: Arc<ModelRegistry>,
    cache: Arc<PredictionCache>,
    rollout: Arc<RolloutController>,
}

impl BatchOrchestrator {
    pub fn new(
        db: Database,
        config: Arc<ConfigHandle>,
        taxonomy: Arc<TaxonomyCache>,
        registry: Arc<ModelRegistry>,
        cache: Arc<PredictionCache>,
        rollout: Arc<RolloutController>,
    ) -> Self {
        Self {
            db,
            config,
            taxonomy,
            registry,
            cache,
            rollout,
        }
    }

    /// Freeze configuration, rules and serving models for one batch
    pub async fn context(&self, use_cache: bool) -> Result<BatchContext> {
        let config = self.config.snapshot();
        let taxonomy = self.taxonomy.load()?;
        let models = self.registry.snapshot().await;

        Ok(BatchContext {
            extractor: FeatureExtractor::new(&config.aliases),
            taxonomy,
            policy: DecisionPolicy::new(config.thresholds),
            models,
            cache: (use_cache && self.cache.is_enabled()).then(|| self.cache.clone()),
            classifier: config.classifier.clone(),
        })
    }

    pub async fn run(
        &self,
        records: Vec<TransactionRecord>,
        options: BatchOptions,
    ) -> Result<BatchReport> {
        let started = Instant::now();
        let config = self.config.snapshot();
        let total = records.len();
        let ctx = match self.context(options.use_cache).await {
            Ok(ctx) => Arc::new(ctx),
            Err(e) => return Ok(unavailable(&records, &e, started)),
        };

        info!(
            "Classifying batch of {} transactions ({} rules, model={})",
            total,
            ctx.taxonomy.rules.len(),
            ctx.models
                .active
                .as_ref()
                .map(|m| format!("v{}", m.id()))
                .unwrap_or_else(|| "none".to_string())
        );

        let semaphore = Arc::new(Semaphore::new(config.batch.workers));
        let timeout = config.batch.transaction_timeout;

        let mut chunks: Vec<Vec<TransactionRecord>> = Vec::new();
        let mut iter = records.into_iter().peekable();
        while iter.peek().is_some() {
            chunks.push(iter.by_ref().take(config.batch.chunk_size).collect());
        }

        let mut handles = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.into_iter().enumerate() {
            let ids: Vec<String> = chunk.iter().map(|r| r.id.clone()).collect();
            let task = process_chunk(
                index,
                chunk,
                ctx.clone(),
                semaphore.clone(),
                options.cancel.clone(),
                timeout,
                self.db.clone(),
                self.rollout.clone(),
            );
            handles.push((ids, tokio::spawn(task)));
        }

        let mut results = Vec::with_capacity(total);
        let mut cache_lookups = 0;
        let mut cache_hits = 0;
        let mut cancelled = false;

        for (ids, handle) in handles {
            match handle.await {
                Ok(outcome) => {
                    cache_lookups += outcome.cache_lookups;
                    cache_hits += outcome.cache_hits;
                    cancelled |= outcome.cancelled;
                    results.extend(outcome.results);
                }
                Err(e) => {
                    error!("Chunk task failed: {}", e);
                    let note = ResolutionNote::Internal {
                        message: format!("chunk task failed: {}", e),
                    };
                    results.extend(
                        ids.iter()
                            .map(|id| CategorizationResult::unresolved(id, Some(note.clone()))),
                    );
                }
            }
        }

        let summary = summarize(
            &results,
            started.elapsed(),
            cache_lookups,
            cache_hits,
            cancelled,
        );
        info!(
            "Batch complete: {} auto-applied, {} queued, {} unresolved ({} errors) in {}ms",
            summary.auto_applied,
            summary.queued_for_review,
            summary.unresolved,
            summary.errors,
            summary.duration_ms
        );

        Ok(BatchReport { results, summary })
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_chunk(
    index: usize,
    chunk: Vec<TransactionRecord>,
    ctx: Arc<BatchContext>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    timeout: Duration,
    db: Database,
    rollout: Arc<RolloutController>,
) -> ChunkOutcome {
    let _permit = semaphore.acquire_owned().await.ok();

    if cancel.is_cancelled() {
        debug!("Chunk {} skipped: batch cancelled", index);
        return ChunkOutcome {
            results: chunk
                .iter()
                .map(|r| CategorizationResult::unresolved(&r.id, Some(ResolutionNote::Cancelled)))
                .collect(),
            cancelled: true,
            ..ChunkOutcome::default()
        };
    }

    let mut categorized = Vec::with_capacity(chunk.len());
    for record in chunk {
        let id = record.id.clone();
        let task_ctx = ctx.clone();
        let handle = tokio::task::spawn_blocking(move || task_ctx.categorize(&record));

        let item = match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(item)) => item,
            Ok(Err(e)) => {
                error!("Categorization of {} failed: {}", id, e);
                Categorized::failed(
                    &id,
                    ResolutionNote::Internal {
                        message: e.to_string(),
                    },
                )
            }
            Err(_) => {
                warn!("Categorization of {} timed out after {:?}", id, timeout);
                Categorized::failed(&id, ResolutionNote::Timeout)
            }
        };
        categorized.push(item);
    }

    let mut outcome = ChunkOutcome::default();
    let mut records = Vec::new();
    let mut outputs = Vec::new();
    let mut observations = Vec::new();
    for item in categorized {
        outcome.cache_lookups += u64::from(item.cache_lookup);
        outcome.cache_hits += u64::from(item.cache_hit);
        records.extend(item.record);
        outputs.extend(item.outputs);
        observations.extend(item.observation);
        outcome.results.push(item.result);
    }

    let saved = tokio::task::spawn_blocking(move || db.save_chunk(&records, &outputs))
        .await
        .map_err(Error::from)
        .and_then(|r| r);
    match saved {
        Ok(()) => {
            rollout.observe(&observations);
            debug!("Chunk {} persisted ({} results)", index, outcome.results.len());
        }
        Err(e) => {
            error!("Chunk {} could not be saved: {}", index, e);
            mark_unsaved(&mut outcome.results);
        }
    }
    outcome
}

/// Every transaction UNRESOLVED when the batch cannot be set up at all
fn unavailable(records: &[TransactionRecord], err: &Error, started: Instant) -> BatchReport {
    error!(
        "Categorization unavailable, resolving {} transactions UNRESOLVED: {}",
        records.len(),
        err
    );
    let note = ResolutionNote::Internal {
        message: "categorization unavailable".to_string(),
    };
    let results: Vec<CategorizationResult> = records
        .iter()
        .map(|r| CategorizationResult::unresolved(&r.id, Some(note.clone())))
        .collect();
    let summary = summarize(&results, started.elapsed(), 0, 0, false);
    BatchReport { results, summary }
}

/// Nothing from an unsaved chunk was applied
fn mark_unsaved(results: &mut [CategorizationResult]) {
    let note = ResolutionNote::Internal {
        message: "result could not be saved".to_string(),
    };
    for result in results.iter_mut().filter(|r| !r.is_error()) {
        *result = CategorizationResult::unresolved(&result.transaction_id, Some(note.clone()));
    }
}

/// Per-run metrics
pub fn summarize(
    results: &[CategorizationResult],
    duration: Duration,
    cache_lookups: u64,
    cache_hits: u64,
    cancelled: bool,
) -> BatchSummary {
    let mut summary = BatchSummary {
        total: results.len(),
        duration_ms: duration.as_millis() as u64,
        cache_lookups,
        cache_hits,
        cache_hit_rate: if cache_lookups == 0 {
            0.0
        } else {
            cache_hits as f64 / cache_lookups as f64
        },
        cancelled,
        ..BatchSummary::default()
    };

    let mut confidence_sum = 0.0;
    let mut scored = 0usize;
    for result in results {
        match result.outcome {
            Outcome::AutoApplied => summary.auto_applied += 1,
            Outcome::QueuedForReview => summary.queued_for_review += 1,
            Outcome::Unresolved => summary.unresolved += 1,
        }
        if result.is_error() {
            summary.errors += 1;
        } else {
            confidence_sum += result.confidence;
            scored += 1;
        }
    }
    if scored > 0 {
        summary.avg_confidence = confidence_sum / scored as f64;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(outcome: Outcome, confidence: f64, note: Option<ResolutionNote>) -> CategorizationResult {
        CategorizationResult {
            outcome,
            confidence,
            ..CategorizationResult::unresolved("t", note)
        }
    }

    #[test]
    fn test_summary_counts_and_average() {
        let results = vec![
            result(Outcome::AutoApplied, 1.0, None),
            result(Outcome::QueuedForReview, 0.5, None),
            result(Outcome::Unresolved, 0.0, Some(ResolutionNote::Timeout)),
        ];
        let summary = summarize(&results, Duration::from_millis(12), 4, 1, false);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.auto_applied, 1);
        assert_eq!(summary.queued_for_review, 1);
        assert_eq!(summary.unresolved, 1);
        assert_eq!(summary.errors, 1);
        // Errors are left out of the average
        assert_eq!(summary.avg_confidence, 0.75);
        assert_eq!(summary.cache_hit_rate, 0.25);
        assert_eq!(summary.duration_ms, 12);
    }

    #[test]
    fn test_unsaved_results_become_unresolved() {
        let mut results = vec![
            CategorizationResult {
                category_id: Some(2),
                ..result(Outcome::AutoApplied, 1.0, None)
            },
            result(Outcome::Unresolved, 0.0, Some(ResolutionNote::Timeout)),
        ];
        mark_unsaved(&mut results);

        assert_eq!(results[0].outcome, Outcome::Unresolved);
        assert_eq!(results[0].category_id, None);
        assert!(matches!(results[0].note, Some(ResolutionNote::Internal { .. })));
        // Earlier errors keep their own note
        assert_eq!(results[1].note, Some(ResolutionNote::Timeout));
    }

    #[test]
    fn test_empty_summary() {
        let summary = summarize(&[], Duration::ZERO, 0, 0, false);
        assert_eq!(summary, BatchSummary::default());
    }

    #[test]
    fn test_cancellation_token_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
