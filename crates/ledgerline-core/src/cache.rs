//! Prediction cache keyed by transaction fingerprint
//!
//! Best-effort memoization of classifier output. An entry only counts as a
//! hit for the model version that produced it; anything else is a miss and
//! the stale entry is evicted. Turning the cache off must never change an
//! outcome.

use std::sync::atomic::{AtomicU64, Ordering};

use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::classifier::ClassifierOutput;
use crate::config::CacheConfig;
use crate::features::Features;

/// Stable hash of the fields the classifier tokens are built from
pub fn fingerprint(features: &Features) -> String {
    let mut hasher = Sha256::new();
    hasher.update(features.text.as_bytes());
    hasher.update([0x1f]);
    hasher.update(features.merchant.as_bytes());
    hasher.update([0x1f]);
    hasher.update(features.rounded_amount.normalize().to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub output: ClassifierOutput,
    pub model_version: i64,
}

/// Lifetime counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: u64,
    pub hits: u64,
    pub lookups: u64,
}

/// TinyLFU-bounded map with a per-entry TTL
pub struct PredictionCache {
    entries: Cache<String, CacheEntry>,
    enabled: bool,
    hits: AtomicU64,
    lookups: AtomicU64,
}

impl PredictionCache {
    pub fn new(config: &CacheConfig) -> Self {
        let entries = Cache::builder()
            .max_capacity(config.max_entries as u64)
            .time_to_live(config.ttl)
            .build();
        Self {
            entries,
            enabled: config.enabled && config.max_entries > 0,
            hits: AtomicU64::new(0),
            lookups: AtomicU64::new(0),
        }
    }

    pub fn disabled() -> Self {
        Self::new(&CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Cached output for `serving_version`, if fresh
    pub fn get(&self, fingerprint: &str, serving_version: i64) -> Option<ClassifierOutput> {
        if !self.enabled {
            return None;
        }
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let entry = self.entries.get(fingerprint)?;
        if entry.model_version == serving_version {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry.output);
        }

        // Written by another model version
        self.entries.invalidate(fingerprint);
        None
    }

    pub fn insert(&self, fingerprint: String, output: ClassifierOutput, model_version: i64) {
        if !self.enabled {
            return;
        }
        self.entries.insert(
            fingerprint,
            CacheEntry {
                output,
                model_version,
            },
        );
    }

    pub fn invalidate(&self, fingerprint: &str) -> bool {
        self.entries.remove(fingerprint).is_some()
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
    }

    pub fn stats(&self) -> CacheStats {
        self.entries.run_pending_tasks();
        CacheStats {
            entries: self.entries.entry_count(),
            hits: self.hits.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureExtractor;
    use crate::models::{ScoredCategory, Transaction};
    use rust_decimal::Decimal;
    use std::time::Duration;

    fn output(category_id: i64) -> ClassifierOutput {
        ClassifierOutput {
            category_id,
            confidence: 0.9,
            alternatives: vec![ScoredCategory {
                category_id: 99,
                score: 0.06,
            }],
        }
    }

    fn features(description: &str, amount: Decimal) -> Features {
        FeatureExtractor::default().extract(&Transaction {
            id: "t".to_string(),
            description: description.to_string(),
            merchant_name: None,
            amount,
            date: None,
            account_id: None,
            is_business: None,
            metadata: None,
        })
    }

    #[test]
    fn test_fingerprint_uses_rounded_amount() {
        let a = fingerprint(&features("COFFEE 12", Decimal::new(-549, 2)));
        let b = fingerprint(&features("coffee 99", Decimal::new(-451, 2)));
        let c = fingerprint(&features("coffee", Decimal::new(-651, 2)));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_shared_fingerprint_means_shared_tokens() {
        // All three round to zero; the classifier must see identical input
        let zero = features("REFUND", Decimal::ZERO);
        let credit = features("REFUND", Decimal::new(30, 2));
        let debit = features("REFUND", Decimal::new(-30, 2));
        assert_eq!(fingerprint(&zero), fingerprint(&credit));
        assert_eq!(fingerprint(&zero), fingerprint(&debit));
        assert_eq!(zero.tokens(), credit.tokens());
        assert_eq!(zero.tokens(), debit.tokens());

        let dollar = features("REFUND", Decimal::new(70, 2));
        assert_ne!(fingerprint(&zero), fingerprint(&dollar));
        assert_ne!(zero.tokens(), dollar.tokens());
    }

    #[test]
    fn test_hit_requires_matching_version() {
        let cache = PredictionCache::new(&CacheConfig::default());
        cache.insert("fp".to_string(), output(1), 3);

        assert_eq!(cache.get("fp", 3), Some(output(1)));
        // Different serving version: miss and evict
        assert_eq!(cache.get("fp", 4), None);
        assert_eq!(cache.get("fp", 3), None);

        let stats = cache.stats();
        assert_eq!(stats.lookups, 3);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn test_expired_entries_miss() {
        let cache = PredictionCache::new(&CacheConfig {
            ttl: Duration::from_millis(20),
            ..CacheConfig::default()
        });
        cache.insert("fp".to_string(), output(1), 1);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get("fp", 1), None);
    }

    #[test]
    fn test_disabled_cache_never_hits() {
        let cache = PredictionCache::disabled();
        cache.insert("fp".to_string(), output(1), 1);
        assert_eq!(cache.get("fp", 1), None);
        assert_eq!(cache.stats().lookups, 0);
    }

    #[test]
    fn test_capacity_bound() {
        let cache = PredictionCache::new(&CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        });
        for key in ["a", "b", "c", "d", "e"] {
            cache.insert(key.to_string(), output(1), 1);
        }
        assert!(cache.stats().entries <= 2);
    }

    #[test]
    fn test_overwrite_replaces_entry() {
        let cache = PredictionCache::new(&CacheConfig::default());
        cache.insert("a".to_string(), output(1), 1);
        cache.insert("a".to_string(), output(2), 1);
        assert_eq!(cache.get("a", 1).map(|o| o.category_id), Some(2));
    }

    #[test]
    fn test_invalidate() {
        let cache = PredictionCache::new(&CacheConfig::default());
        cache.insert("fp".to_string(), output(1), 1);
        assert!(cache.invalidate("fp"));
        assert!(!cache.invalidate("fp"));
    }
}
