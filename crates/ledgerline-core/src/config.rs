//! Engine configuration
//!
//! Config is loaded with a three-layer resolution:
//! 1. An explicit path (e.g. `--config`)
//! 2. Override in the data dir (~/.local/share/ledgerline/config/engine.toml)
//! 3. Embedded defaults (compiled into binary)
//!
//! Selected values can be overridden from the environment at startup, and the
//! decision thresholds can be changed at runtime through [`ConfigHandle`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/engine.toml");

/// Environment variable overriding the auto-apply threshold
pub const AUTO_APPLY_ENV: &str = "LEDGERLINE_AUTO_APPLY_THRESHOLD";
/// Environment variable overriding the review threshold
pub const REVIEW_ENV: &str = "LEDGERLINE_REVIEW_THRESHOLD";
/// Environment variable overriding the retraining schedule (hours)
pub const RETRAIN_SCHEDULE_ENV: &str = "LEDGERLINE_RETRAIN_SCHEDULE";

/// Longest retrain schedule accepted (one year)
pub const MAX_SCHEDULE_HOURS: u64 = 24 * 366;

/// Longest prediction cache TTL accepted (thirty days)
pub const MAX_CACHE_TTL_HOURS: u64 = 24 * 30;

/// Decision thresholds
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, Deserialize)]
pub struct Thresholds {
    pub auto_apply_threshold: f64,
    pub review_threshold: f64,
}

impl Thresholds {
    pub fn new(auto_apply_threshold: f64, review_threshold: f64) -> Result<Self> {
        let thresholds = Self {
            auto_apply_threshold,
            review_threshold,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<()> {
        let in_range = |v: f64| (0.0..=1.0).contains(&v);
        if !in_range(self.auto_apply_threshold) || !in_range(self.review_threshold) {
            return Err(Error::Config(format!(
                "thresholds must be within [0, 1] (auto={}, review={})",
                self.auto_apply_threshold, self.review_threshold
            )));
        }
        if self.review_threshold > self.auto_apply_threshold {
            return Err(Error::Config(format!(
                "review threshold {} exceeds auto-apply threshold {}",
                self.review_threshold, self.auto_apply_threshold
            )));
        }
        Ok(())
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            auto_apply_threshold: 0.85,
            review_threshold: 0.40,
        }
    }
}

/// Prediction cache settings
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(6 * 3600),
            max_entries: 50_000,
        }
    }
}

/// Batch orchestration settings
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub chunk_size: usize,
    pub workers: usize,
    pub transaction_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 25,
            workers: 4,
            transaction_timeout: Duration::from_millis(250),
        }
    }
}

/// Classifier output and training hyperparameters
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub min_alternative_score: f64,
    pub max_alternatives: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub l2: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_alternative_score: 0.05,
            max_alternatives: 5,
            epochs: 150,
            learning_rate: 0.5,
            l2: 0.0001,
        }
    }
}

/// Retraining triggers and sample gates
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub min_samples_per_category: usize,
    pub retrain_after_feedback: i64,
    /// Scheduled retraining interval in hours (0 = disabled)
    pub schedule_hours: u64,
    pub holdout_every: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            min_samples_per_category: 100,
            retrain_after_feedback: 500,
            schedule_hours: 24,
            holdout_every: 5,
        }
    }
}

/// Promotion criteria for candidate models
#[derive(Debug, Clone)]
pub struct RolloutConfig {
    /// Partial traffic percentages, ascending
    pub stages: Vec<u8>,
    pub min_window: usize,
    pub max_disagreement: f64,
    pub max_latency_factor: f64,
    pub accuracy_tolerance: f64,
    pub min_feedback: usize,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            stages: vec![10, 25, 50, 75],
            min_window: 200,
            max_disagreement: 0.15,
            max_latency_factor: 1.5,
            accuracy_tolerance: 0.02,
            min_feedback: 30,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub thresholds: Thresholds,
    pub cache: CacheConfig,
    pub batch: BatchConfig,
    pub classifier: ClassifierConfig,
    pub training: TrainingConfig,
    pub rollout: RolloutConfig,
    /// Merchant alias phrase -> canonical merchant
    pub aliases: BTreeMap<String, String>,
}

impl EngineConfig {
    /// Load configuration (explicit path, then data-dir override, then defaults)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let content = match path {
            Some(path) => fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("Failed to read {}: {}", path.display(), e))
            })?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(default_path) => {
                    debug!("Loading config override from {}", default_path.display());
                    fs::read_to_string(&default_path)
                        .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?
                }
                None => DEFAULT_CONFIG.to_string(),
            },
        };

        let mut config = parse_config(&content)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Embedded defaults only
    pub fn embedded() -> Self {
        parse_config(DEFAULT_CONFIG).unwrap_or_default()
    }

    /// Apply environment variable overrides
    fn apply_env(&mut self) {
        if let Some(v) = env_f64(AUTO_APPLY_ENV) {
            info!("{} override: {}", AUTO_APPLY_ENV, v);
            self.thresholds.auto_apply_threshold = v;
        }
        if let Some(v) = env_f64(REVIEW_ENV) {
            info!("{} override: {}", REVIEW_ENV, v);
            self.thresholds.review_threshold = v;
        }
        if let Some(hours) = std::env::var(RETRAIN_SCHEDULE_ENV)
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.training.schedule_hours = hours;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;
        if self.batch.chunk_size == 0 || self.batch.workers == 0 {
            return Err(Error::Config(
                "batch chunk_size and workers must be positive".to_string(),
            ));
        }
        if self.rollout.stages.windows(2).any(|w| w[0] >= w[1])
            || self.rollout.stages.iter().any(|s| *s == 0 || *s >= 100)
        {
            return Err(Error::Config(format!(
                "rollout stages must be ascending percentages in 1..=99: {:?}",
                self.rollout.stages
            )));
        }
        if self.training.holdout_every < 2 {
            return Err(Error::Config("holdout_every must be at least 2".to_string()));
        }
        if self.training.schedule_hours > MAX_SCHEDULE_HOURS {
            return Err(Error::Config(format!(
                "training schedule_hours must be at most {} (got {})",
                MAX_SCHEDULE_HOURS, self.training.schedule_hours
            )));
        }
        if self.cache.ttl > Duration::from_secs(MAX_CACHE_TTL_HOURS * 3600) {
            return Err(Error::Config(format!(
                "cache ttl_hours must be at most {}",
                MAX_CACHE_TTL_HOURS
            )));
        }
        Ok(())
    }
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("ledgerline").join("config").join("engine.toml"))
}

/// Default database path (in the data dir)
pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("ledgerline").join("ledgerline.db"))
        .unwrap_or_else(|| PathBuf::from("ledgerline.db"))
}

/// Shared, runtime-updatable configuration
///
/// Readers take a cheap snapshot per batch; updates replace the whole `Arc`.
#[derive(Debug)]
pub struct ConfigHandle {
    inner: RwLock<Arc<EngineConfig>>,
}

impl ConfigHandle {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: RwLock::new(Arc::new(config)),
        }
    }

    pub fn snapshot(&self) -> Arc<EngineConfig> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the decision thresholds for subsequent batches
    pub fn set_thresholds(&self, thresholds: Thresholds) -> Result<()> {
        thresholds.validate()?;
        let mut next = (*self.snapshot()).clone();
        next.thresholds = thresholds;
        self.replace(next);
        info!(
            "Thresholds updated: auto_apply={:.2}, review={:.2}",
            thresholds.auto_apply_threshold, thresholds.review_threshold
        );
        Ok(())
    }

    pub fn replace(&self, config: EngineConfig) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(config);
    }
}

/// Raw config structure for TOML parsing
#[derive(Debug, Deserialize)]
struct RawConfig {
    policy: Option<RawPolicy>,
    cache: Option<RawCache>,
    batch: Option<RawBatch>,
    classifier: Option<RawClassifier>,
    training: Option<RawTraining>,
    rollout: Option<RawRollout>,
    aliases: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct RawPolicy {
    auto_apply_threshold: Option<f64>,
    review_threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawCache {
    enabled: Option<bool>,
    ttl_hours: Option<u64>,
    max_entries: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawBatch {
    chunk_size: Option<usize>,
    workers: Option<usize>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawClassifier {
    min_alternative_score: Option<f64>,
    max_alternatives: Option<usize>,
    epochs: Option<usize>,
    learning_rate: Option<f64>,
    l2: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawTraining {
    min_samples_per_category: Option<usize>,
    retrain_after_feedback: Option<i64>,
    schedule_hours: Option<u64>,
    holdout_every: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawRollout {
    stages: Option<Vec<u8>>,
    min_window: Option<usize>,
    max_disagreement: Option<f64>,
    max_latency_factor: Option<f64>,
    accuracy_tolerance: Option<f64>,
    min_feedback: Option<usize>,
}

/// Parse config from TOML content
pub fn parse_config(content: &str) -> Result<EngineConfig> {
    let raw: RawConfig = toml::from_str(content)
        .map_err(|e| Error::Config(format!("Invalid config TOML: {}", e)))?;

    let mut config = EngineConfig::default();

    if let Some(policy) = raw.policy {
        if let Some(v) = policy.auto_apply_threshold {
            config.thresholds.auto_apply_threshold = v;
        }
        if let Some(v) = policy.review_threshold {
            config.thresholds.review_threshold = v;
        }
    }

    if let Some(cache) = raw.cache {
        if let Some(enabled) = cache.enabled {
            config.cache.enabled = enabled;
        }
        if let Some(hours) = cache.ttl_hours {
            config.cache.ttl = Duration::from_secs(hours.saturating_mul(3600));
        }
        if let Some(max) = cache.max_entries {
            config.cache.max_entries = max;
        }
    }

    if let Some(batch) = raw.batch {
        if let Some(v) = batch.chunk_size {
            config.batch.chunk_size = v;
        }
        if let Some(v) = batch.workers {
            config.batch.workers = v;
        }
        if let Some(ms) = batch.timeout_ms {
            config.batch.transaction_timeout = Duration::from_millis(ms);
        }
    }

    if let Some(classifier) = raw.classifier {
        if let Some(v) = classifier.min_alternative_score {
            config.classifier.min_alternative_score = v;
        }
        if let Some(v) = classifier.max_alternatives {
            config.classifier.max_alternatives = v;
        }
        if let Some(v) = classifier.epochs {
            config.classifier.epochs = v;
        }
        if let Some(v) = classifier.learning_rate {
            config.classifier.learning_rate = v;
        }
        if let Some(v) = classifier.l2 {
            config.classifier.l2 = v;
        }
    }

    if let Some(training) = raw.training {
        if let Some(v) = training.min_samples_per_category {
            config.training.min_samples_per_category = v;
        }
        if let Some(v) = training.retrain_after_feedback {
            config.training.retrain_after_feedback = v;
        }
        if let Some(v) = training.schedule_hours {
            config.training.schedule_hours = v;
        }
        if let Some(v) = training.holdout_every {
            config.training.holdout_every = v;
        }
    }

    if let Some(rollout) = raw.rollout {
        if let Some(v) = rollout.stages {
            config.rollout.stages = v;
        }
        if let Some(v) = rollout.min_window {
            config.rollout.min_window = v;
        }
        if let Some(v) = rollout.max_disagreement {
            config.rollout.max_disagreement = v;
        }
        if let Some(v) = rollout.max_latency_factor {
            config.rollout.max_latency_factor = v;
        }
        if let Some(v) = rollout.accuracy_tolerance {
            config.rollout.accuracy_tolerance = v;
        }
        if let Some(v) = rollout.min_feedback {
            config.rollout.min_feedback = v;
        }
    }

    if let Some(aliases) = raw.aliases {
        config.aliases = aliases
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v.to_lowercase()))
            .collect();
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_config() {
        let config = parse_config(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.thresholds.auto_apply_threshold, 0.85);
        assert_eq!(config.thresholds.review_threshold, 0.40);
        assert_eq!(config.rollout.stages, vec![10, 25, 50, 75]);
        assert_eq!(config.training.min_samples_per_category, 100);
        assert_eq!(config.aliases.get("amzn mktp").map(String::as_str), Some("amazon"));
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = parse_config("[batch]\nworkers = 8\n").unwrap();
        assert_eq!(config.batch.workers, 8);
        assert_eq!(config.batch.chunk_size, 25);
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        assert!(Thresholds::new(0.5, 0.7).is_err());
        assert!(Thresholds::new(1.5, 0.2).is_err());
        assert!(Thresholds::new(0.9, 0.3).is_ok());
    }

    #[test]
    fn test_invalid_stages_rejected() {
        let mut config = EngineConfig::default();
        config.rollout.stages = vec![50, 25];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_out_of_range_durations_rejected() {
        let config = parse_config("[training]\nschedule_hours = 9223372036854775807\n").unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = parse_config("[cache]\nttl_hours = 9223372036854775807\n").unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = parse_config("[training]\nschedule_hours = 168\n").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(parse_config("[policy"), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "[policy]\nauto_apply_threshold = 0.9\n").unwrap();

        let config = EngineConfig::load(Some(path.as_path())).unwrap();
        assert_eq!(config.thresholds.auto_apply_threshold, 0.9);
    }

    #[test]
    fn test_handle_threshold_update() {
        let handle = ConfigHandle::new(EngineConfig::default());
        let before = handle.snapshot();

        handle.set_thresholds(Thresholds::new(0.95, 0.5).unwrap()).unwrap();
        assert_eq!(handle.snapshot().thresholds.auto_apply_threshold, 0.95);
        // Earlier snapshots are unaffected
        assert_eq!(before.thresholds.auto_apply_threshold, 0.85);

        let bad = Thresholds {
            auto_apply_threshold: 0.3,
            review_threshold: 0.6,
        };
        assert!(handle.set_thresholds(bad).is_err());
        assert_eq!(handle.snapshot().thresholds.auto_apply_threshold, 0.95);
    }
}
