//! Data models for Ledgerline

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Category identifiers come from the external taxonomy
pub type CategoryId = i64;

// ========== Transactions ==========

/// A transaction as consumed from the upstream feed
///
/// Deserialization is lenient per field: a missing or mistyped id becomes
/// empty, an amount that is not a number becomes NaN, and an unreadable date
/// or flag becomes None. Such rows still reach the pipeline and resolve
/// UNRESOLVED instead of failing the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    #[serde(default, deserialize_with = "lenient::id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub merchant_name: Option<String>,
    #[serde(default = "lenient::missing_amount", deserialize_with = "lenient::amount")]
    pub amount: f64,
    #[serde(default, deserialize_with = "lenient::date")]
    pub date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub account_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub is_business: Option<bool>,
    /// Raw metadata passed through from the feed
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl TransactionRecord {
    /// Convert one JSON row, never failing
    ///
    /// A row that is not an object keeps whatever id it carries and an
    /// invalid amount, so it resolves UNRESOLVED with an input error.
    pub fn from_json(row: serde_json::Value) -> Self {
        let id = row.get("id").map(lenient::id_from_value).unwrap_or_default();
        serde_json::from_value(row).unwrap_or(Self {
            id,
            description: None,
            merchant_name: None,
            amount: f64::NAN,
            date: None,
            account_id: None,
            is_business: None,
            metadata: None,
        })
    }
}

/// Deserialize a list of rows, each one leniently
pub fn deserialize_records<'de, D>(deserializer: D) -> Result<Vec<TransactionRecord>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let rows = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(rows.into_iter().map(TransactionRecord::from_json).collect())
}

mod lenient {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn missing_amount() -> f64 {
        f64::NAN
    }

    pub fn id_from_value(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => String::new(),
        }
    }

    pub fn id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(id_from_value(&Value::deserialize(d)?))
    }

    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    /// Numbers and numeric strings; anything else is NaN
    pub fn amount<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
            Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
            _ => f64::NAN,
        })
    }

    pub fn date<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDate>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok(),
            _ => None,
        })
    }

    pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Bool(b) => Some(b),
            _ => None,
        })
    }
}

/// A validated transaction with a fixed-point amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub description: String,
    pub merchant_name: Option<String>,
    pub amount: Decimal,
    pub date: Option<NaiveDate>,
    pub account_id: Option<String>,
    pub is_business: Option<bool>,
    pub metadata: Option<serde_json::Value>,
}

impl TryFrom<&TransactionRecord> for Transaction {
    type Error = Error;

    fn try_from(record: &TransactionRecord) -> Result<Self, Self::Error> {
        if record.id.trim().is_empty() {
            return Err(Error::Input("transaction id is empty".to_string()));
        }
        if !record.amount.is_finite() {
            return Err(Error::Input(format!(
                "amount for {} is not a finite number",
                record.id
            )));
        }
        let amount = Decimal::from_f64(record.amount)
            .ok_or_else(|| {
                Error::Input(format!("amount {} for {} is out of range", record.amount, record.id))
            })?
            .round_dp(4);

        Ok(Self {
            id: record.id.clone(),
            description: record.description.clone().unwrap_or_default(),
            merchant_name: record
                .merchant_name
                .as_ref()
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty()),
            amount,
            date: record.date,
            account_id: record.account_id.clone(),
            is_business: record.is_business,
            metadata: record.metadata.clone(),
        })
    }
}

// ========== Taxonomy ==========

/// A node in the category tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    /// Parent category (None = root)
    #[serde(default)]
    pub parent_id: Option<CategoryId>,
    /// Business flag; None inherits from the parent
    #[serde(default)]
    pub is_business: Option<bool>,
    /// System categories are seeded and not user-editable
    #[serde(default)]
    pub is_system: bool,
}

/// Transaction field a rule inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleField {
    Description,
    Merchant,
    Amount,
}

impl RuleField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Description => "description",
            Self::Merchant => "merchant",
            Self::Amount => "amount",
        }
    }
}

impl std::str::FromStr for RuleField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "description" => Ok(Self::Description),
            "merchant" => Ok(Self::Merchant),
            "amount" => Ok(Self::Amount),
            _ => Err(format!("Unknown rule field: {}", s)),
        }
    }
}

/// Comparison a rule applies to its field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    Contains,
    Equals,
    StartsWith,
    EndsWith,
    Regex,
    #[serde(rename = "gt")]
    GreaterThan,
    #[serde(rename = "gte")]
    GreaterOrEqual,
    #[serde(rename = "lt")]
    LessThan,
    #[serde(rename = "lte")]
    LessOrEqual,
}

impl RuleOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::Equals => "equals",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::Regex => "regex",
            Self::GreaterThan => "gt",
            Self::GreaterOrEqual => "gte",
            Self::LessThan => "lt",
            Self::LessOrEqual => "lte",
        }
    }
}

impl std::str::FromStr for RuleOperator {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "contains" => Ok(Self::Contains),
            "equals" | "exact" => Ok(Self::Equals),
            "starts_with" => Ok(Self::StartsWith),
            "ends_with" => Ok(Self::EndsWith),
            "regex" => Ok(Self::Regex),
            "gt" => Ok(Self::GreaterThan),
            "gte" => Ok(Self::GreaterOrEqual),
            "lt" => Ok(Self::LessThan),
            "lte" => Ok(Self::LessOrEqual),
            _ => Err(format!("Unknown rule operator: {}", s)),
        }
    }
}

/// An externally managed categorization rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizationRule {
    pub id: String,
    pub category_id: CategoryId,
    pub field: RuleField,
    pub operator: RuleOperator,
    pub value: String,
    /// Lower priority values are evaluated first
    pub priority: i32,
}

// ========== Predictions ==========

/// Where a prediction came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionSource {
    Rule,
    Model,
    Cache,
}

impl PredictionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::Model => "model",
            Self::Cache => "cache",
        }
    }
}

impl std::str::FromStr for PredictionSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "rule" => Ok(Self::Rule),
            "model" => Ok(Self::Model),
            "cache" => Ok(Self::Cache),
            _ => Err(format!("Unknown prediction source: {}", s)),
        }
    }
}

/// Final decision for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    AutoApplied,
    QueuedForReview,
    Unresolved,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoApplied => "AUTO_APPLIED",
            Self::QueuedForReview => "QUEUED_FOR_REVIEW",
            Self::Unresolved => "UNRESOLVED",
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "AUTO_APPLIED" => Ok(Self::AutoApplied),
            "QUEUED_FOR_REVIEW" => Ok(Self::QueuedForReview),
            "UNRESOLVED" => Ok(Self::Unresolved),
            _ => Err(format!("Unknown outcome: {}", s)),
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A category with its classifier score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredCategory {
    pub category_id: CategoryId,
    pub score: f64,
}

/// Why a transaction ended UNRESOLVED without a normal classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionNote {
    InputError { message: String },
    Timeout,
    ModelUnavailable,
    Cancelled,
    Internal { message: String },
}

impl ResolutionNote {
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::ModelUnavailable)
    }
}

/// Per-transaction result exposed to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizationResult {
    pub transaction_id: String,
    pub outcome: Outcome,
    /// Applied category (AUTO_APPLIED) or suggestion (QUEUED_FOR_REVIEW)
    pub category_id: Option<CategoryId>,
    pub confidence: f64,
    pub alternatives: Vec<ScoredCategory>,
    pub model_version: Option<i64>,
    pub source: Option<PredictionSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    /// Effective business flag of the category, when one was chosen
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_business: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<ResolutionNote>,
}

impl CategorizationResult {
    /// An UNRESOLVED result with no suggestion
    pub fn unresolved(transaction_id: &str, note: Option<ResolutionNote>) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            outcome: Outcome::Unresolved,
            category_id: None,
            confidence: 0.0,
            alternatives: Vec::new(),
            model_version: None,
            source: None,
            rule_id: None,
            is_business: None,
            note,
        }
    }

    pub fn is_error(&self) -> bool {
        self.note.as_ref().is_some_and(ResolutionNote::is_error)
    }
}

/// A stored prediction (current or historical)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: i64,
    pub transaction_id: String,
    pub category_id: Option<CategoryId>,
    pub confidence: f64,
    pub alternatives: Vec<ScoredCategory>,
    pub model_version: Option<i64>,
    pub source: Option<PredictionSource>,
    pub outcome: Outcome,
    pub rule_id: Option<String>,
    /// Normalized classifier text, kept for training
    pub text: String,
    /// Cache fingerprint of the features the prediction was made from
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

/// One model's raw output for a transaction
///
/// Logged for every model run while a candidate is under evaluation, whether
/// or not the output was served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOutput {
    pub transaction_id: String,
    pub model_version: i64,
    pub category_id: CategoryId,
    pub confidence: f64,
    pub latency_us: i64,
    /// True when this output decided the transaction's outcome
    pub served: bool,
}

// ========== Feedback ==========

/// Human feedback event as consumed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub transaction_id: String,
    /// Category the reviewer chose (None when simply accepting the suggestion)
    #[serde(default)]
    pub chosen_category_id: Option<CategoryId>,
    pub accepted_suggestion: bool,
}

/// An append-only feedback log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub id: i64,
    pub transaction_id: String,
    pub predicted_category_id: Option<CategoryId>,
    pub corrected_category_id: Option<CategoryId>,
    pub accepted: bool,
    /// Normalized classifier text at the time of the prediction
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Feedback {
    /// The confirmed label this entry contributes to training
    pub fn label(&self) -> Option<CategoryId> {
        if self.accepted {
            self.corrected_category_id.or(self.predicted_category_id)
        } else {
            self.corrected_category_id
        }
    }
}

/// A feedback entry ready to append
#[derive(Debug, Clone)]
pub struct NewFeedback {
    pub transaction_id: String,
    pub predicted_category_id: Option<CategoryId>,
    pub corrected_category_id: Option<CategoryId>,
    pub accepted: bool,
    pub text: String,
}

/// Aggregate feedback counts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackStats {
    pub total: i64,
    pub accepted: i64,
    pub corrected: i64,
    pub since_latest_model: i64,
}

// ========== Model versions ==========

/// Lifecycle status of a trained model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    /// Classifies in parallel, results logged but never applied
    Shadow,
    /// Serves a percentage of traffic
    Partial,
    /// Serves all traffic not routed to a candidate
    Active,
    /// No longer serves
    Retired,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shadow => "shadow",
            Self::Partial => "partial",
            Self::Active => "active",
            Self::Retired => "retired",
        }
    }

    pub fn is_candidate(&self) -> bool {
        matches!(self, Self::Shadow | Self::Partial)
    }
}

impl std::str::FromStr for ModelStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "shadow" => Ok(Self::Shadow),
            "partial" => Ok(Self::Partial),
            "active" => Ok(Self::Active),
            "retired" => Ok(Self::Retired),
            _ => Err(format!("Unknown model status: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reason code recorded when a version is retired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetiredReason {
    /// Replaced by a newly promoted version
    Superseded,
    /// Replaced by a newer unpromoted candidate
    Replaced,
    DisagreementTooHigh,
    LatencyRegression,
    AccuracyRegression,
    HeldOutAccuracyRegression,
    LoadFailure,
    ManualRollback,
}

impl RetiredReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Superseded => "superseded",
            Self::Replaced => "replaced",
            Self::DisagreementTooHigh => "disagreement_too_high",
            Self::LatencyRegression => "latency_regression",
            Self::AccuracyRegression => "accuracy_regression",
            Self::HeldOutAccuracyRegression => "held_out_accuracy_regression",
            Self::LoadFailure => "load_failure",
            Self::ManualRollback => "manual_rollback",
        }
    }
}

impl std::str::FromStr for RetiredReason {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "superseded" => Ok(Self::Superseded),
            "replaced" => Ok(Self::Replaced),
            "disagreement_too_high" => Ok(Self::DisagreementTooHigh),
            "latency_regression" => Ok(Self::LatencyRegression),
            "accuracy_regression" => Ok(Self::AccuracyRegression),
            "held_out_accuracy_regression" => Ok(Self::HeldOutAccuracyRegression),
            "load_failure" => Ok(Self::LoadFailure),
            "manual_rollback" => Ok(Self::ManualRollback),
            _ => Err(format!("Unknown retired reason: {}", s)),
        }
    }
}

impl std::fmt::Display for RetiredReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A trained classifier version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVersion {
    pub id: i64,
    pub trained_at: DateTime<Utc>,
    pub training_sample_count: i64,
    /// Accuracy on the held-out split
    pub validation_accuracy: f64,
    /// Accuracy of the then-active version on the same split
    pub baseline_accuracy: Option<f64>,
    pub status: ModelStatus,
    /// Share of traffic served while partial
    pub rollout_percent: u8,
    /// Highest feedback id included in training
    pub feedback_watermark: i64,
    pub retired_reason: Option<RetiredReason>,
    pub retired_at: Option<DateTime<Utc>>,
}

/// A freshly trained version ready to register
#[derive(Debug, Clone)]
pub struct NewModelVersion {
    pub training_sample_count: i64,
    pub validation_accuracy: f64,
    pub baseline_accuracy: Option<f64>,
    pub feedback_watermark: i64,
    /// Serialized classifier
    pub artifact: String,
}

// ========== Rollout ==========

/// Kind of rollout transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutEventKind {
    Created,
    Advanced,
    Promoted,
    /// Taken out of service by a newer version
    Retired,
    RolledBack,
    LoadFailed,
}

impl RolloutEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Advanced => "advanced",
            Self::Promoted => "promoted",
            Self::Retired => "retired",
            Self::RolledBack => "rolled_back",
            Self::LoadFailed => "load_failed",
        }
    }
}

impl std::str::FromStr for RolloutEventKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "advanced" => Ok(Self::Advanced),
            "promoted" => Ok(Self::Promoted),
            "retired" => Ok(Self::Retired),
            "rolled_back" => Ok(Self::RolledBack),
            "load_failed" => Ok(Self::LoadFailed),
            _ => Err(format!("Unknown rollout event: {}", s)),
        }
    }
}

/// A recorded rollout transition (promotion, rollback, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutEvent {
    pub id: i64,
    pub model_version: i64,
    pub kind: RolloutEventKind,
    pub from_status: Option<ModelStatus>,
    pub to_status: ModelStatus,
    pub rollout_percent: u8,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ========== Batch metrics ==========

/// Per-run batch metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub auto_applied: usize,
    pub queued_for_review: usize,
    pub unresolved: usize,
    /// Transactions that failed (input error, timeout, internal)
    pub errors: usize,
    /// Mean confidence over transactions that classified without error
    pub avg_confidence: f64,
    pub duration_ms: u64,
    pub cache_hits: u64,
    pub cache_lookups: u64,
    pub cache_hit_rate: f64,
    pub cancelled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, amount: f64) -> TransactionRecord {
        TransactionRecord {
            id: id.to_string(),
            description: Some("COFFEE".to_string()),
            merchant_name: Some("  ".to_string()),
            amount,
            date: None,
            account_id: None,
            is_business: None,
            metadata: None,
        }
    }

    #[test]
    fn test_transaction_from_record() {
        let tx = Transaction::try_from(&record("t1", -5.5)).unwrap();
        assert_eq!(tx.amount, Decimal::new(-55, 1));
        // Blank merchant names are dropped
        assert!(tx.merchant_name.is_none());
    }

    #[test]
    fn test_transaction_rejects_nan_amount() {
        let err = Transaction::try_from(&record("t1", f64::NAN)).unwrap_err();
        assert!(matches!(err, Error::Input(_)));

        let err = Transaction::try_from(&record("t1", f64::INFINITY)).unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }

    #[test]
    fn test_record_deserialization_is_lenient() {
        let rows: Vec<TransactionRecord> = serde_json::from_str::<Vec<serde_json::Value>>(
            r#"[
                {"id": "a", "amount": null},
                {"id": "b", "amount": "NaN"},
                {"id": "c"},
                {"id": 42, "amount": "-12.50", "date": "not a date", "is_business": "yes"},
                "garbage"
            ]"#,
        )
        .unwrap()
        .into_iter()
        .map(TransactionRecord::from_json)
        .collect();

        assert_eq!(rows.len(), 5);
        assert!(rows[0].amount.is_nan());
        assert!(rows[1].amount.is_nan());
        assert!(rows[2].amount.is_nan());
        assert_eq!(rows[3].id, "42");
        assert_eq!(rows[3].amount, -12.5);
        assert!(rows[3].date.is_none());
        assert!(rows[3].is_business.is_none());
        assert_eq!(rows[4].id, "");

        for row in &rows[..3] {
            assert!(matches!(Transaction::try_from(row), Err(Error::Input(_))));
        }
        assert!(Transaction::try_from(&rows[3]).is_ok());
        assert!(Transaction::try_from(&rows[4]).is_err());
    }

    #[test]
    fn test_transaction_rejects_empty_id() {
        assert!(Transaction::try_from(&record(" ", 1.0)).is_err());
    }

    #[test]
    fn test_feedback_label() {
        let mut fb = Feedback {
            id: 1,
            transaction_id: "t1".to_string(),
            predicted_category_id: Some(3),
            corrected_category_id: None,
            accepted: true,
            text: "coffee".to_string(),
            created_at: Utc::now(),
        };
        assert_eq!(fb.label(), Some(3));

        fb.accepted = false;
        assert_eq!(fb.label(), None);

        fb.corrected_category_id = Some(7);
        assert_eq!(fb.label(), Some(7));
    }

    #[test]
    fn test_enum_round_trip_strings() {
        for op in ["contains", "equals", "starts_with", "ends_with", "regex", "gt", "gte", "lt", "lte"] {
            let parsed: RuleOperator = op.parse().unwrap();
            assert_eq!(parsed.as_str(), op);
        }
        assert_eq!("retired".parse::<ModelStatus>().unwrap(), ModelStatus::Retired);
        assert!("bogus".parse::<RuleField>().is_err());
    }

    #[test]
    fn test_outcome_serializes_screaming_case() {
        let json = serde_json::to_string(&Outcome::QueuedForReview).unwrap();
        assert_eq!(json, "\"QUEUED_FOR_REVIEW\"");
    }
}
