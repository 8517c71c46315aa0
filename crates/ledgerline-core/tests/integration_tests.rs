//! Integration tests for ledgerline-core
//!
//! These tests drive the engine end to end: classify → feedback → retrain →
//! staged rollout → rollback.

use std::sync::Arc;
use std::time::Duration;

use ledgerline_core::{
    BatchOptions, CancellationToken, CategorizationRule, Category, Database, Engine, EngineConfig,
    Error, FeedbackEvent, ModelStatus, NewModelVersion, Outcome, PredictionSource, ResolutionNote,
    RetiredReason, RolloutDecision, RolloutEventKind, RuleField, RuleOperator, TaxonomyFile,
    Thresholds, TransactionRecord,
};

const DINING: i64 = 2;
const GROCERIES: i64 = 3;

fn test_config() -> EngineConfig {
    let mut config = EngineConfig::embedded();
    config.thresholds = Thresholds::new(0.7, 0.3).unwrap();
    config.batch.transaction_timeout = Duration::from_secs(5);
    config.training.min_samples_per_category = 5;
    config.rollout.min_window = 10;
    config.rollout.min_feedback = 0;
    config.rollout.max_latency_factor = 1000.0;
    config
}

fn category(id: i64, name: &str, parent_id: Option<i64>, is_business: Option<bool>) -> Category {
    Category {
        id,
        name: name.to_string(),
        parent_id,
        is_business,
        is_system: false,
    }
}

fn setup() -> Engine {
    let db = Database::in_memory().expect("Failed to create test database");
    let engine = Engine::new(db, test_config());
    engine
        .import_taxonomy(&TaxonomyFile {
            categories: vec![
                category(1, "Food", None, Some(false)),
                category(DINING, "Dining", Some(1), None),
                category(GROCERIES, "Groceries", Some(1), None),
                category(4, "Travel", None, Some(true)),
            ],
            rules: vec![CategorizationRule {
                id: "starbucks".to_string(),
                category_id: DINING,
                field: RuleField::Merchant,
                operator: RuleOperator::Contains,
                value: "starbucks".to_string(),
                priority: 10,
            }],
        })
        .expect("Failed to import taxonomy");
    engine
}

fn tx(id: &str, description: &str, amount: f64) -> TransactionRecord {
    TransactionRecord {
        id: id.to_string(),
        description: Some(description.to_string()),
        merchant_name: None,
        amount,
        date: None,
        account_id: None,
        is_business: None,
        metadata: None,
    }
}

fn training_batch() -> Vec<TransactionRecord> {
    let mut records = Vec::new();
    for i in 0..10 {
        records.push(tx(&format!("d{}", i), "BLUE BOTTLE COFFEE", -4.5));
        records.push(tx(&format!("g{}", i), "SAFEWAY GROCERY", -62.0));
    }
    records
}

fn no_cache() -> BatchOptions {
    BatchOptions {
        use_cache: false,
        ..BatchOptions::default()
    }
}

fn label(engine: &Engine, transaction_id: &str, category_id: i64) {
    engine
        .record_feedback(&FeedbackEvent {
            transaction_id: transaction_id.to_string(),
            chosen_category_id: Some(category_id),
            accepted_suggestion: false,
        })
        .expect("Failed to record feedback");
}

/// Label the training batch, train, and promote the first model
async fn train_first_model(engine: &Engine) -> i64 {
    engine
        .classify_batch(training_batch(), BatchOptions::default())
        .await
        .unwrap();
    for i in 0..10 {
        label(engine, &format!("d{}", i), DINING);
        label(engine, &format!("g{}", i), GROCERIES);
    }

    let outcome = engine.retrain(true).await.unwrap().expect("forced run");
    let model = outcome.report.model.expect("candidate registered");
    assert_eq!(model.status, ModelStatus::Shadow);

    let decision = engine.evaluate_rollout().await.unwrap();
    assert_eq!(
        decision,
        RolloutDecision::Promoted {
            model_version: model.id,
            previous: None
        }
    );
    model.id
}

// =============================================================================
// Classification
// =============================================================================

#[tokio::test]
async fn test_rule_match_auto_applies() {
    let engine = setup();
    let report = engine
        .classify_batch(vec![tx("t1", "STARBUCKS #1234", 5.50)], BatchOptions::default())
        .await
        .unwrap();

    let result = &report.results[0];
    assert_eq!(result.outcome, Outcome::AutoApplied);
    assert_eq!(result.category_id, Some(DINING));
    assert_eq!(result.confidence, 1.0);
    assert_eq!(result.source, Some(PredictionSource::Rule));
    assert_eq!(result.rule_id.as_deref(), Some("starbucks"));
    // Inherited from Food
    assert_eq!(result.is_business, Some(false));

    assert_eq!(engine.db().applied_category("t1").unwrap(), Some(DINING));
}

#[tokio::test]
async fn test_large_batch_isolates_bad_input() {
    let engine = setup();
    let records: Vec<TransactionRecord> = (0..1000)
        .map(|i| {
            let description = if i % 2 == 0 {
                "STARBUCKS STORE".to_string()
            } else {
                format!("RANDOM SHOP {}", i)
            };
            let amount = if i == 501 { f64::NAN } else { -3.25 };
            tx(&format!("t{}", i), &description, amount)
        })
        .collect();

    let report = engine
        .classify_batch(records, BatchOptions::default())
        .await
        .unwrap();

    assert_eq!(report.results.len(), 1000);
    for (i, result) in report.results.iter().enumerate() {
        assert_eq!(result.transaction_id, format!("t{}", i));
    }
    assert!(matches!(
        report.results[501].note,
        Some(ResolutionNote::InputError { .. })
    ));
    assert_eq!(report.summary.total, 1000);
    assert_eq!(report.summary.errors, 1);
    assert_eq!(report.summary.auto_applied, 500);
    assert_eq!(report.summary.unresolved, 500);
    // No model yet: the rest are unresolved without error
    assert_eq!(
        report.results[1].note,
        Some(ResolutionNote::ModelUnavailable)
    );
}

#[tokio::test]
async fn test_store_unavailable_resolves_batch_unresolved() {
    let engine = setup();
    engine
        .db()
        .conn()
        .unwrap()
        .execute_batch("DROP TABLE taxonomy_revision;")
        .unwrap();

    let report = engine
        .classify_batch(
            vec![tx("t1", "STARBUCKS", -5.0), tx("t2", "SAFEWAY", -20.0)],
            no_cache(),
        )
        .await
        .unwrap();

    assert_eq!(report.results.len(), 2);
    for result in &report.results {
        assert_eq!(result.outcome, Outcome::Unresolved);
        assert!(matches!(result.note, Some(ResolutionNote::Internal { .. })));
    }
    assert_eq!(report.summary.errors, 2);
}

#[tokio::test]
async fn test_unsaved_chunk_resolves_unresolved() {
    let engine = setup();
    engine
        .db()
        .conn()
        .unwrap()
        .execute_batch("DROP TABLE predictions;")
        .unwrap();

    let report = engine
        .classify_batch(
            vec![tx("t1", "STARBUCKS", -5.0), tx("t2", "", f64::NAN)],
            no_cache(),
        )
        .await
        .unwrap();

    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[0].outcome, Outcome::Unresolved);
    assert!(report.results[0].category_id.is_none());
    assert!(matches!(
        report.results[0].note,
        Some(ResolutionNote::Internal { .. })
    ));
    assert!(matches!(
        report.results[1].note,
        Some(ResolutionNote::InputError { .. })
    ));
    assert_eq!(report.summary.auto_applied, 0);
}

#[tokio::test]
async fn test_cancelled_batch_reports_cancelled() {
    let engine = setup();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = engine
        .classify_batch(
            vec![tx("t1", "STARBUCKS", -5.0), tx("t2", "SAFEWAY", -20.0)],
            BatchOptions {
                use_cache: true,
                cancel,
            },
        )
        .await
        .unwrap();

    assert!(report.summary.cancelled);
    assert!(report
        .results
        .iter()
        .all(|r| r.note == Some(ResolutionNote::Cancelled)));
    assert!(engine.db().current_prediction("t1").unwrap().is_none());
}

#[tokio::test]
async fn test_model_classification_is_deterministic_and_cache_transparent() {
    let engine = setup();
    let version = train_first_model(&engine).await;

    let batch = vec![
        tx("n1", "BLUE BOTTLE COFFEE", -5.0),
        tx("n2", "SAFEWAY GROCERY", -48.0),
        tx("n3", "UNKNOWN MERCHANT XYZ", -17.0),
    ];

    let first = engine
        .classify_batch(batch.clone(), BatchOptions::default())
        .await
        .unwrap();
    let cached = engine
        .classify_batch(batch.clone(), BatchOptions::default())
        .await
        .unwrap();
    let uncached = engine.classify_batch(batch, no_cache()).await.unwrap();

    assert_eq!(first.results[0].category_id, Some(DINING));
    assert_eq!(first.results[0].outcome, Outcome::AutoApplied);
    assert_eq!(first.results[1].category_id, Some(GROCERIES));
    assert_eq!(first.results[0].model_version, Some(version));
    assert_eq!(first.results[0].source, Some(PredictionSource::Model));

    assert_eq!(cached.results[0].source, Some(PredictionSource::Cache));
    assert_eq!(cached.summary.cache_hits, 3);

    for run in [&cached, &uncached] {
        for (a, b) in first.results.iter().zip(&run.results) {
            assert_eq!(a.outcome, b.outcome);
            assert_eq!(a.category_id, b.category_id);
            assert_eq!(a.confidence, b.confidence);
            assert_eq!(a.alternatives, b.alternatives);
            assert_eq!(a.model_version, b.model_version);
        }
    }

    // Re-running leaves applied categories untouched
    assert_eq!(engine.db().applied_category("n1").unwrap(), Some(DINING));
}

#[tokio::test]
async fn test_cache_hit_matches_fresh_result_across_sign() {
    let engine = setup();
    train_first_model(&engine).await;

    // Both amounts round to zero and share a fingerprint
    let cached = engine
        .classify_batch(
            vec![
                tx("a", "BLUE BOTTLE REFUND", 0.0),
                tx("b", "BLUE BOTTLE REFUND", 0.30),
            ],
            BatchOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(cached.results[1].source, Some(PredictionSource::Cache));

    let fresh = engine
        .classify_batch(vec![tx("b", "BLUE BOTTLE REFUND", 0.30)], no_cache())
        .await
        .unwrap();
    assert_eq!(fresh.results[0].source, Some(PredictionSource::Model));
    assert_eq!(cached.results[1].category_id, fresh.results[0].category_id);
    assert_eq!(cached.results[1].confidence, fresh.results[0].confidence);
    assert_eq!(cached.results[1].outcome, fresh.results[0].outcome);
}

#[tokio::test]
async fn test_empty_transaction_uses_sentinel() {
    let engine = setup();
    let version = train_first_model(&engine).await;

    let mut record = tx("e1", "", -3.0);
    record.description = None;
    let report = engine
        .classify_batch(vec![record], BatchOptions::default())
        .await
        .unwrap();

    let result = &report.results[0];
    assert!(!result.is_error());
    assert_eq!(result.model_version, Some(version));
    if result.outcome == Outcome::Unresolved {
        assert!(result.category_id.is_none());
        assert!(result.alternatives.is_empty());
    }
}

// =============================================================================
// Feedback
// =============================================================================

#[tokio::test]
async fn test_feedback_validation() {
    let engine = setup();
    engine
        .classify_batch(vec![tx("t1", "STARBUCKS", -5.0)], BatchOptions::default())
        .await
        .unwrap();

    let missing = engine.record_feedback(&FeedbackEvent {
        transaction_id: "nope".to_string(),
        chosen_category_id: Some(DINING),
        accepted_suggestion: false,
    });
    assert!(matches!(missing, Err(Error::NotFound(_))));

    let unknown = engine.record_feedback(&FeedbackEvent {
        transaction_id: "t1".to_string(),
        chosen_category_id: Some(99),
        accepted_suggestion: false,
    });
    assert!(matches!(unknown, Err(Error::Input(_))));

    let accepted = engine
        .record_feedback(&FeedbackEvent {
            transaction_id: "t1".to_string(),
            chosen_category_id: None,
            accepted_suggestion: true,
        })
        .unwrap();
    assert_eq!(accepted.label(), Some(DINING));
    assert_eq!(engine.feedback_stats().unwrap().accepted, 1);
}

#[tokio::test]
async fn test_retrain_not_due_without_feedback() {
    let engine = setup();
    assert!(engine.retrain(false).await.unwrap().is_none());

    // Forced run with too little data is skipped, not an error
    let outcome = engine.retrain(true).await.unwrap().unwrap();
    assert!(outcome.report.model.is_none());
    assert!(outcome.report.skipped.is_some());
}

// =============================================================================
// Rollout
// =============================================================================

#[tokio::test]
async fn test_staged_rollout_and_manual_rollback() {
    let engine = setup();
    let first = train_first_model(&engine).await;

    let second = engine
        .retrain(true)
        .await
        .unwrap()
        .unwrap()
        .report
        .model
        .expect("second candidate")
        .id;

    // Not enough side-by-side observations yet
    assert!(matches!(
        engine.evaluate_rollout().await.unwrap(),
        RolloutDecision::Hold { .. }
    ));

    let mut decisions = Vec::new();
    for _ in 0..5 {
        engine
            .classify_batch(training_batch(), no_cache())
            .await
            .unwrap();
        decisions.push(engine.evaluate_rollout().await.unwrap());
    }
    let stages: Vec<RolloutDecision> = [10, 25, 50, 75]
        .into_iter()
        .map(|rollout_percent| RolloutDecision::Advanced {
            model_version: second,
            rollout_percent,
        })
        .chain([RolloutDecision::Promoted {
            model_version: second,
            previous: Some(first),
        }])
        .collect();
    assert_eq!(decisions, stages);

    let status = engine.rollout_status().unwrap();
    assert_eq!(status.active.unwrap().id, second);
    assert!(status.candidate.is_none());

    let decision = engine.rollback(None).await.unwrap();
    assert!(matches!(
        decision,
        RolloutDecision::RolledBack {
            reason: RetiredReason::ManualRollback,
            ..
        }
    ));
    let models = engine.models().unwrap();
    let by_id = |id| models.iter().find(|m| m.id == id).unwrap();
    assert_eq!(by_id(first).status, ModelStatus::Active);
    assert_eq!(by_id(second).status, ModelStatus::Retired);
    assert_eq!(by_id(second).retired_reason, Some(RetiredReason::ManualRollback));

    // Later classification is served by the restored version
    let report = engine
        .classify_batch(vec![tx("x1", "BLUE BOTTLE COFFEE", -4.0)], no_cache())
        .await
        .unwrap();
    assert_eq!(report.results[0].model_version, Some(first));
}

#[tokio::test]
async fn test_held_out_regression_is_never_promoted() {
    let engine = setup();
    let active = train_first_model(&engine).await;

    let artifact = engine.db().model_artifact(active).unwrap();
    let weak = engine
        .db()
        .insert_candidate_model(&NewModelVersion {
            training_sample_count: 16,
            validation_accuracy: 0.5,
            baseline_accuracy: Some(0.95),
            feedback_watermark: engine.db().max_feedback_id().unwrap(),
            artifact,
        })
        .unwrap();

    let decision = engine.evaluate_rollout().await.unwrap();
    assert!(matches!(
        decision,
        RolloutDecision::RolledBack {
            model_version,
            reason: RetiredReason::HeldOutAccuracyRegression,
            ..
        } if model_version == weak.id
    ));

    let weak = engine.db().get_model_version(weak.id).unwrap();
    assert_eq!(weak.status, ModelStatus::Retired);
    assert_eq!(
        engine.db().active_model_version().unwrap().unwrap().id,
        active
    );

    let kinds: Vec<RolloutEventKind> = engine
        .rollout_events(1)
        .unwrap()
        .into_iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds, vec![RolloutEventKind::RolledBack]);
}

/// Retrain and return the new shadow candidate's version
async fn retrain_candidate(engine: &Engine) -> i64 {
    engine
        .retrain(true)
        .await
        .unwrap()
        .unwrap()
        .report
        .model
        .expect("candidate registered")
        .id
}

/// Feed one observation window and evaluate, `rounds` times
async fn run_stages(engine: &Engine, rounds: usize) {
    for _ in 0..rounds {
        engine
            .classify_batch(training_batch(), no_cache())
            .await
            .unwrap();
        let decision = engine.evaluate_rollout().await.unwrap();
        assert!(
            matches!(
                decision,
                RolloutDecision::Advanced { .. } | RolloutDecision::Promoted { .. }
            ),
            "{:?}",
            decision
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_promotion_and_rollback_keep_one_active() {
    let engine = Arc::new(setup());
    let first = train_first_model(&engine).await;
    let second = retrain_candidate(&engine).await;
    run_stages(&engine, 5).await;

    // Third candidate sits at the last stage with a full window
    let third = retrain_candidate(&engine).await;
    run_stages(&engine, 4).await;
    engine
        .classify_batch(training_batch(), no_cache())
        .await
        .unwrap();

    let evaluating = tokio::spawn({
        let engine = engine.clone();
        async move { engine.evaluate_rollout().await }
    });
    let rolling_back = tokio::spawn({
        let engine = engine.clone();
        async move { engine.rollback(None).await }
    });
    let evaluated = evaluating.await.unwrap().unwrap();
    rolling_back.await.unwrap().unwrap();

    let models = engine.models().unwrap();
    let active: Vec<i64> = models
        .iter()
        .filter(|m| m.status == ModelStatus::Active)
        .map(|m| m.id)
        .collect();
    assert_eq!(active.len(), 1, "active versions: {:?}", active);

    let status_of = |id| models.iter().find(|m| m.id == id).unwrap().status;
    match evaluated {
        // Promotion ran first; the rollback then undid it
        RolloutDecision::Promoted { model_version, .. } => {
            assert_eq!(model_version, third);
            assert_eq!(active[0], second);
            assert_eq!(status_of(third), ModelStatus::Retired);
        }
        // Rollback ran first; the candidate's window restarted
        RolloutDecision::Hold { model_version, .. } => {
            assert_eq!(model_version, third);
            assert_eq!(active[0], first);
            assert_eq!(status_of(third), ModelStatus::Partial);
        }
        other => panic!("unexpected decision {:?}", other),
    }
}

#[tokio::test]
async fn test_manual_rollback_without_history_fails() {
    let engine = setup();
    train_first_model(&engine).await;
    assert!(matches!(
        engine.rollback(None).await,
        Err(Error::NotFound(_))
    ));
}

// =============================================================================
// Configuration
// =============================================================================

#[tokio::test]
async fn test_raising_auto_threshold_only_demotes() {
    let engine = setup();
    train_first_model(&engine).await;
    let batch = vec![
        tx("n1", "BLUE BOTTLE COFFEE", -5.0),
        tx("n2", "SAFEWAY GROCERY", -48.0),
        tx("n3", "STARBUCKS", -4.0),
    ];

    let before = engine.classify_batch(batch.clone(), no_cache()).await.unwrap();
    engine.set_thresholds(Thresholds::new(0.999_999, 0.3).unwrap()).unwrap();
    let after = engine.classify_batch(batch, no_cache()).await.unwrap();

    for (a, b) in before.results.iter().zip(&after.results) {
        if b.outcome == Outcome::AutoApplied {
            assert_eq!(a.outcome, Outcome::AutoApplied);
        }
        if a.outcome == Outcome::QueuedForReview {
            assert_ne!(b.outcome, Outcome::AutoApplied);
        }
    }
    // Rules are not subject to thresholds
    assert_eq!(after.results[2].outcome, Outcome::AutoApplied);

    assert!(engine.set_thresholds(Thresholds {
        auto_apply_threshold: 0.2,
        review_threshold: 0.5
    })
    .is_err());
}
