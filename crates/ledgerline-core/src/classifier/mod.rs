//! Statistical text classifier
//!
//! TF-IDF features feed a multinomial logistic regression. A trained
//! [`Classifier`] is immutable; new versions are trained from scratch and
//! swapped in through the model registry.
//!
//! Categories too thin to train on can be carried over from the model being
//! replaced: their scores come from that model unchanged and the trained
//! classes share what probability is left.

mod model;
mod tfidf;

use serde::{Deserialize, Serialize};

use crate::config::ClassifierConfig;
use crate::error::{Error, Result};
use crate::models::{CategoryId, ScoredCategory};

pub use model::FitParams;
pub use tfidf::{SparseVector, TfidfVectorizer};

use model::SoftmaxRegression;

/// Top category plus ranked alternatives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierOutput {
    pub category_id: CategoryId,
    pub confidence: f64,
    pub alternatives: Vec<ScoredCategory>,
}

/// A trained classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classifier {
    /// Category id per class index, ascending
    classes: Vec<CategoryId>,
    vectorizer: TfidfVectorizer,
    model: SoftmaxRegression,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    carried: Vec<CarriedClasses>,
}

/// Categories scored by an earlier model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CarriedClasses {
    classes: Vec<CategoryId>,
    /// Never carries classes of its own
    source: Box<Classifier>,
}

impl Classifier {
    /// Train on (tokens, label) pairs in the given order
    pub fn train(samples: &[(Vec<String>, CategoryId)], config: &ClassifierConfig) -> Result<Self> {
        let mut classes: Vec<CategoryId> = samples.iter().map(|(_, c)| *c).collect();
        classes.sort_unstable();
        classes.dedup();
        if classes.len() < 2 {
            return Err(Error::TrainingDataInsufficient(format!(
                "need at least 2 categories, got {}",
                classes.len()
            )));
        }

        let documents: Vec<Vec<String>> = samples.iter().map(|(t, _)| t.clone()).collect();
        let vectorizer = TfidfVectorizer::fit(&documents);
        let vectors: Vec<SparseVector> =
            documents.iter().map(|d| vectorizer.transform(d)).collect();
        let labels: Vec<usize> = samples
            .iter()
            .filter_map(|(_, c)| classes.binary_search(c).ok())
            .collect();

        let model = SoftmaxRegression::fit(
            &vectors,
            &labels,
            classes.len(),
            vectorizer.len(),
            FitParams {
                epochs: config.epochs,
                learning_rate: config.learning_rate,
                l2: config.l2,
            },
        );

        Ok(Self {
            classes,
            vectorizer,
            model,
            carried: Vec::new(),
        })
    }

    /// Keep `prior`'s scores for the given categories this model was not trained on
    ///
    /// Categories `prior` itself carried are taken from the model that
    /// originally trained them, so carried sources never nest.
    pub fn carry_from(mut self, prior: &Classifier, categories: &[CategoryId]) -> Self {
        let wanted: Vec<CategoryId> = categories
            .iter()
            .filter(|c| self.classes.binary_search(c).is_err())
            .copied()
            .collect();

        let direct: Vec<CategoryId> = wanted
            .iter()
            .filter(|c| prior.classes.binary_search(c).is_ok())
            .copied()
            .collect();
        if !direct.is_empty() {
            self.carried.push(CarriedClasses {
                classes: direct,
                source: Box::new(prior.without_carried()),
            });
        }

        for group in &prior.carried {
            let classes: Vec<CategoryId> = group
                .classes
                .iter()
                .filter(|c| wanted.contains(c))
                .copied()
                .collect();
            if !classes.is_empty() {
                self.carried.push(CarriedClasses {
                    classes,
                    source: group.source.clone(),
                });
            }
        }
        self
    }

    fn without_carried(&self) -> Self {
        Self {
            classes: self.classes.clone(),
            vectorizer: self.vectorizer.clone(),
            model: self.model.clone(),
            carried: Vec::new(),
        }
    }

    /// Distribution over the trained classes only, in class order
    fn trained_scores(&self, tokens: &[String]) -> Vec<ScoredCategory> {
        let x = self.vectorizer.transform(tokens);
        self.model
            .probabilities(&x)
            .into_iter()
            .zip(&self.classes)
            .map(|(score, &category_id)| ScoredCategory { category_id, score })
            .collect()
    }

    /// Full ranked distribution, highest score first (ties by category id)
    pub fn predict(&self, tokens: &[String]) -> Vec<ScoredCategory> {
        let mut ranked = self.trained_scores(tokens);

        if !self.carried.is_empty() {
            let mut carried = Vec::new();
            for group in &self.carried {
                carried.extend(
                    group
                        .source
                        .trained_scores(tokens)
                        .into_iter()
                        .filter(|s| group.classes.contains(&s.category_id)),
                );
            }
            let mass: f64 = carried.iter().map(|s| s.score).sum();
            let (trained_share, carried_scale) = if mass < 1.0 {
                (1.0 - mass, 1.0)
            } else {
                (0.0, 1.0 / mass)
            };
            for s in &mut ranked {
                s.score *= trained_share;
            }
            ranked.extend(carried.into_iter().map(|s| ScoredCategory {
                category_id: s.category_id,
                score: s.score * carried_scale,
            }));
        }

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.category_id.cmp(&b.category_id))
        });
        ranked
    }

    /// Top category with the alternatives worth surfacing
    pub fn classify(&self, tokens: &[String], config: &ClassifierConfig) -> Option<ClassifierOutput> {
        summarize(self.predict(tokens), config)
    }

    /// Categories this model was fit on
    pub fn classes(&self) -> &[CategoryId] {
        &self.classes
    }

    /// Categories scored by an earlier model
    pub fn carried_classes(&self) -> Vec<CategoryId> {
        let mut classes: Vec<CategoryId> = self
            .carried
            .iter()
            .flat_map(|g| g.classes.iter().copied())
            .collect();
        classes.sort_unstable();
        classes
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let classifier: Self = serde_json::from_str(json)
            .map_err(|e| Error::ModelLoad(format!("invalid model artifact: {}", e)))?;
        let consistent = |c: &Classifier| {
            !c.classes.is_empty() && c.model.n_classes() == c.classes.len()
        };
        if !consistent(&classifier)
            || !classifier
                .carried
                .iter()
                .all(|g| consistent(g.source.as_ref()) && g.source.carried.is_empty())
        {
            return Err(Error::ModelLoad(
                "model artifact class count does not match its weights".to_string(),
            ));
        }
        Ok(classifier)
    }
}

/// Split a ranked distribution into confidence and capped alternatives
pub fn summarize(ranked: Vec<ScoredCategory>, config: &ClassifierConfig) -> Option<ClassifierOutput> {
    let mut iter = ranked.into_iter();
    let top = iter.next()?;
    let alternatives = iter
        .filter(|c| c.score >= config.min_alternative_score)
        .take(config.max_alternatives)
        .collect();
    Some(ClassifierOutput {
        category_id: top.category_id,
        confidence: top.score,
        alternatives,
    })
}
