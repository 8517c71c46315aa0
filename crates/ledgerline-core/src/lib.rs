//! Ledgerline Core Library
//!
//! Transaction categorization engine:
//! - Feature extraction and merchant normalization
//! - Rule engine over externally managed categorization rules
//! - TF-IDF / logistic regression classifier with versioned artifacts
//! - Prediction cache keyed by feature fingerprint
//! - Confidence-gated decision policy
//! - Batch orchestration with bounded concurrency and cancellation
//! - Feedback-driven retraining and staged model rollout

pub mod cache;
pub mod categorizer;
pub mod classifier;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod features;
pub mod input;
pub mod models;
pub mod orchestrator;
pub mod policy;
pub mod registry;
pub mod rollout;
pub mod rules;
pub mod taxonomy;
pub mod training;

pub use cache::{CacheStats, PredictionCache};
pub use classifier::{Classifier, ClassifierOutput};
pub use config::{ConfigHandle, EngineConfig, Thresholds};
pub use db::Database;
pub use engine::{Engine, PredictionDetail, RetrainOutcome, RuleListing, RuleTestResult};
pub use error::{Error, Result};
pub use features::{FeatureExtractor, Features};
pub use models::*;
pub use orchestrator::{BatchOptions, BatchReport, CancellationToken};
pub use policy::DecisionPolicy;
pub use registry::ModelRegistry;
pub use rollout::{traffic_arm, Arm, RolloutController, RolloutDecision, RolloutStatus};
pub use rules::RuleEngine;
pub use taxonomy::{CompiledTaxonomy, Taxonomy, TaxonomyCache, TaxonomyFile};
pub use training::{RetrainTrigger, TrainingPipeline, TrainingReport};
