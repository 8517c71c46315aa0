//! Decision policy: turns evidence into one of three outcomes

use crate::classifier::ClassifierOutput;
use crate::config::Thresholds;
use crate::models::{CategorizationResult, Outcome, PredictionSource, ResolutionNote};
use crate::rules::RuleMatch;

/// What the pipeline learned about a transaction before deciding
#[derive(Debug, Clone)]
pub enum Evidence {
    Rule(RuleMatch),
    Classifier {
        output: ClassifierOutput,
        model_version: i64,
        source: PredictionSource,
    },
    /// No rule matched and no model is serving
    Unavailable,
}

#[derive(Debug, Clone, Copy)]
pub struct DecisionPolicy {
    thresholds: Thresholds,
}

impl DecisionPolicy {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn decide(&self, transaction_id: &str, evidence: Evidence) -> CategorizationResult {
        match evidence {
            Evidence::Rule(m) => CategorizationResult {
                transaction_id: transaction_id.to_string(),
                outcome: Outcome::AutoApplied,
                category_id: Some(m.category_id),
                confidence: 1.0,
                alternatives: Vec::new(),
                model_version: None,
                source: Some(PredictionSource::Rule),
                rule_id: Some(m.rule_id),
                is_business: None,
                note: None,
            },
            Evidence::Classifier {
                output,
                model_version,
                source,
            } => {
                let outcome = self.outcome_for(output.confidence);
                if outcome == Outcome::Unresolved {
                    // Below review: nothing is surfaced
                    return CategorizationResult {
                        confidence: output.confidence,
                        model_version: Some(model_version),
                        source: Some(source),
                        ..CategorizationResult::unresolved(transaction_id, None)
                    };
                }
                CategorizationResult {
                    transaction_id: transaction_id.to_string(),
                    outcome,
                    category_id: Some(output.category_id),
                    confidence: output.confidence,
                    alternatives: output.alternatives,
                    model_version: Some(model_version),
                    source: Some(source),
                    rule_id: None,
                    is_business: None,
                    note: None,
                }
            }
            Evidence::Unavailable => CategorizationResult::unresolved(
                transaction_id,
                Some(ResolutionNote::ModelUnavailable),
            ),
        }
    }

    pub fn outcome_for(&self, confidence: f64) -> Outcome {
        if confidence >= self.thresholds.auto_apply_threshold {
            Outcome::AutoApplied
        } else if confidence >= self.thresholds.review_threshold {
            Outcome::QueuedForReview
        } else {
            Outcome::Unresolved
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScoredCategory;

    fn classifier(confidence: f64) -> Evidence {
        Evidence::Classifier {
            output: ClassifierOutput {
                category_id: 7,
                confidence,
                alternatives: vec![ScoredCategory {
                    category_id: 8,
                    score: 0.2,
                }],
            },
            model_version: 1,
            source: PredictionSource::Model,
        }
    }

    #[test]
    fn test_rule_match_auto_applies() {
        let policy = DecisionPolicy::new(Thresholds::default());
        let result = policy.decide(
            "t1",
            Evidence::Rule(RuleMatch {
                rule_id: "r1".to_string(),
                category_id: 3,
            }),
        );
        assert_eq!(result.outcome, Outcome::AutoApplied);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.source, Some(PredictionSource::Rule));
        assert_eq!(result.category_id, Some(3));
    }

    #[test]
    fn test_review_band_surfaces_alternatives() {
        let policy = DecisionPolicy::new(Thresholds::new(0.85, 0.4).unwrap());
        let result = policy.decide("t1", classifier(0.55));
        assert_eq!(result.outcome, Outcome::QueuedForReview);
        assert_eq!(result.category_id, Some(7));
        assert_eq!(result.alternatives.len(), 1);
    }

    #[test]
    fn test_low_confidence_unresolved_without_suggestion() {
        let policy = DecisionPolicy::new(Thresholds::default());
        let result = policy.decide("t1", classifier(0.2));
        assert_eq!(result.outcome, Outcome::Unresolved);
        assert_eq!(result.category_id, None);
        assert!(result.alternatives.is_empty());
        assert!(!result.is_error());
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        let policy = DecisionPolicy::new(Thresholds::new(0.85, 0.4).unwrap());
        assert_eq!(policy.outcome_for(0.85), Outcome::AutoApplied);
        assert_eq!(policy.outcome_for(0.40), Outcome::QueuedForReview);
        assert_eq!(policy.outcome_for(0.3999), Outcome::Unresolved);
    }

    #[test]
    fn test_raising_auto_threshold_only_demotes() {
        let low = DecisionPolicy::new(Thresholds::new(0.7, 0.4).unwrap());
        let high = DecisionPolicy::new(Thresholds::new(0.9, 0.4).unwrap());
        for i in 0..=100 {
            let c = i as f64 / 100.0;
            let before = low.outcome_for(c);
            let after = high.outcome_for(c);
            if after == Outcome::AutoApplied {
                assert_eq!(before, Outcome::AutoApplied);
            }
            if before != after {
                assert_eq!((before, after), (Outcome::AutoApplied, Outcome::QueuedForReview));
            }
        }
    }

    #[test]
    fn test_no_model_is_unresolved() {
        let policy = DecisionPolicy::new(Thresholds::default());
        let result = policy.decide("t1", Evidence::Unavailable);
        assert_eq!(result.outcome, Outcome::Unresolved);
        assert_eq!(result.note, Some(ResolutionNote::ModelUnavailable));
    }
}
