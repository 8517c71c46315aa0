//! TF-IDF vectorization over classifier tokens

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Sparse vector as (feature index, weight), sorted by index
pub type SparseVector = Vec<(usize, f64)>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    vocabulary: BTreeMap<String, usize>,
    idf: Vec<f64>,
}

impl TfidfVectorizer {
    /// Build the vocabulary and smoothed IDF weights from tokenized documents
    pub fn fit(documents: &[Vec<String>]) -> Self {
        let terms: BTreeSet<&str> = documents
            .iter()
            .flat_map(|doc| doc.iter().map(String::as_str))
            .collect();
        let vocabulary: BTreeMap<String, usize> = terms
            .into_iter()
            .enumerate()
            .map(|(i, t)| (t.to_string(), i))
            .collect();

        let mut document_frequency = vec![0usize; vocabulary.len()];
        for doc in documents {
            let unique: BTreeSet<usize> = doc
                .iter()
                .filter_map(|t| vocabulary.get(t).copied())
                .collect();
            for idx in unique {
                document_frequency[idx] += 1;
            }
        }

        let n = documents.len() as f64;
        let idf = document_frequency
            .iter()
            .map(|df| ((1.0 + n) / (1.0 + *df as f64)).ln() + 1.0)
            .collect();

        Self { vocabulary, idf }
    }

    /// L2-normalized TF-IDF vector; unknown tokens are dropped
    pub fn transform(&self, tokens: &[String]) -> SparseVector {
        let mut counts: BTreeMap<usize, f64> = BTreeMap::new();
        for token in tokens {
            if let Some(&idx) = self.vocabulary.get(token) {
                *counts.entry(idx).or_insert(0.0) += 1.0;
            }
        }

        let mut vector: SparseVector = counts
            .into_iter()
            .map(|(idx, tf)| (idx, tf * self.idf[idx]))
            .collect();

        let norm = vector.iter().map(|(_, v)| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for (_, v) in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }

    pub fn len(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocabulary.is_empty()
    }
}
