//! Feature extraction for categorization
//!
//! Turns a validated [`Transaction`] into normalized text plus a handful of
//! numeric features. Extraction is pure and never fails: an empty description
//! falls back to the merchant name, and an empty merchant to [`SENTINEL_TOKEN`].
//!
//! Classifier tokens are built only from the fields that make up the cache
//! fingerprint (normalized description, merchant, rounded amount). The sign
//! token and amount bucket both come from the rounded amount, so two
//! transactions sharing a fingerprint always produce the same tokens.

use std::collections::BTreeMap;

use chrono::Datelike;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::models::Transaction;

/// Token used when a transaction has no usable text at all
pub const SENTINEL_TOKEN: &str = "__empty__";

/// Words that mark a charge as recurring
const RECURRING_KEYWORDS: &[&str] = &[
    "subscription",
    "subscr",
    "monthly",
    "recurring",
    "autopay",
    "membership",
    "renewal",
    "annual",
];

/// Upper bounds (exclusive, whole currency units) of the amount-magnitude buckets
const AMOUNT_BUCKETS: &[i64] = &[1, 10, 50, 100, 500, 1000];

/// Normalized view of a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Features {
    /// Normalized description (or merchant / sentinel fallback)
    pub text: String,
    /// Normalized, alias-resolved merchant; empty when unknown
    pub merchant: String,
    /// Lower-cased merchant as given (or guessed from the description),
    /// punctuation and numbers intact; used by merchant rules
    pub merchant_lower: String,
    /// Lower-cased raw description, used by description rules
    pub description_lower: String,
    pub amount: Decimal,
    /// Amount rounded to the nearest currency unit
    pub rounded_amount: Decimal,
    pub amount_bucket: u8,
    /// Direction of the raw amount
    pub is_credit: bool,
    /// 0 = Monday .. 6 = Sunday
    pub day_of_week: Option<u32>,
    pub recurring: bool,
}

impl Features {
    /// Tokens fed to the classifier
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.text.split_whitespace().map(str::to_string).collect();
        if !self.merchant.is_empty() {
            tokens.push(format!("m:{}", self.merchant.replace(' ', "_")));
        }
        tokens.push(format!("__amt_{}", self.amount_bucket));
        if self.rounded_amount > Decimal::ZERO {
            tokens.push("__credit".to_string());
        } else if self.rounded_amount < Decimal::ZERO {
            tokens.push("__debit".to_string());
        }
        if self.recurring {
            tokens.push("__recurring".to_string());
        }
        tokens
    }

    /// Space-joined classifier tokens (stored with predictions for training)
    pub fn classifier_text(&self) -> String {
        self.tokens().join(" ")
    }
}

/// Stateless extractor configured with merchant aliases
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    /// (alias tokens, canonical tokens), longest alias first
    aliases: Vec<(Vec<String>, Vec<String>)>,
}

impl FeatureExtractor {
    pub fn new(aliases: &BTreeMap<String, String>) -> Self {
        let mut aliases: Vec<(Vec<String>, Vec<String>)> = aliases
            .iter()
            .map(|(alias, canonical)| (tokenize(alias), tokenize(canonical)))
            .filter(|(alias, _)| !alias.is_empty())
            .collect();
        aliases.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self { aliases }
    }

    pub fn extract(&self, tx: &Transaction) -> Features {
        let description_lower = tx.description.trim().to_lowercase();

        let merchant_lower = match tx.merchant_name.as_deref() {
            Some(name) => name.trim().to_lowercase(),
            None => leading_merchant(&description_lower),
        };
        let merchant = self.normalize(&merchant_lower);

        let mut text = self.normalize(&description_lower);
        if text.is_empty() {
            text = if merchant.is_empty() {
                SENTINEL_TOKEN.to_string()
            } else {
                merchant.clone()
            };
        }

        let rounded_amount = round_to_unit(tx.amount);
        let words: Vec<&str> = text.split_whitespace().collect();
        let recurring = words.iter().any(|t| RECURRING_KEYWORDS.contains(t))
            || words.windows(2).any(|w| w == ["auto", "pay"]);

        Features {
            text,
            merchant,
            merchant_lower,
            description_lower,
            amount: tx.amount,
            rounded_amount,
            amount_bucket: amount_bucket(rounded_amount),
            is_credit: tx.amount > Decimal::ZERO,
            day_of_week: tx.date.map(|d| d.weekday().num_days_from_monday()),
            recurring,
        }
    }

    /// Lower-case, strip punctuation and bare numbers, resolve aliases
    pub fn normalize(&self, input: &str) -> String {
        let tokens: Vec<String> = tokenize(input)
            .into_iter()
            .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
            .collect();
        self.resolve_aliases(&tokens).join(" ")
    }

    fn resolve_aliases(&self, tokens: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(tokens.len());
        let mut i = 0;
        'outer: while i < tokens.len() {
            for (alias, canonical) in &self.aliases {
                let end = i + alias.len();
                if end <= tokens.len() && tokens[i..end] == alias[..] {
                    out.extend(canonical.iter().cloned());
                    i = end;
                    continue 'outer;
                }
            }
            out.push(tokens[i].clone());
            i += 1;
        }
        out
    }
}

/// Split on anything that is not alphanumeric, lower-cased
fn tokenize(input: &str) -> Vec<String> {
    input
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

/// Guess a merchant from the words before the first store number or reference
fn leading_merchant(description_lower: &str) -> String {
    description_lower
        .split_whitespace()
        .take_while(|w| !w.chars().any(|c| c.is_ascii_digit() || c == '#' || c == '*'))
        .take(3)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Round to the nearest whole currency unit, halves away from zero
pub fn round_to_unit(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

fn amount_bucket(rounded: Decimal) -> u8 {
    let magnitude = rounded.abs();
    AMOUNT_BUCKETS
        .iter()
        .position(|bound| magnitude < Decimal::from(*bound))
        .unwrap_or(AMOUNT_BUCKETS.len()) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn tx(description: &str, merchant: Option<&str>, amount: Decimal) -> Transaction {
        Transaction {
            id: "t1".to_string(),
            description: description.to_string(),
            merchant_name: merchant.map(str::to_string),
            amount,
            date: NaiveDate::from_ymd_opt(2024, 3, 15),
            account_id: None,
            is_business: None,
            metadata: None,
        }
    }

    fn extractor() -> FeatureExtractor {
        let mut aliases = BTreeMap::new();
        aliases.insert("amzn mktp".to_string(), "amazon".to_string());
        aliases.insert("amzn".to_string(), "amazon".to_string());
        FeatureExtractor::new(&aliases)
    }

    #[test]
    fn test_normalizes_description() {
        let f = extractor().extract(&tx("STARBUCKS #1234", None, Decimal::new(-550, 2)));
        assert_eq!(f.text, "starbucks");
        assert_eq!(f.merchant, "starbucks");
        assert_eq!(f.description_lower, "starbucks #1234");
        assert!(!f.is_credit);
        assert_eq!(f.rounded_amount, Decimal::from(-6));
        assert_eq!(f.amount_bucket, 1);
        // 2024-03-15 is a Friday
        assert_eq!(f.day_of_week, Some(4));
    }

    #[test]
    fn test_resolves_longest_alias_first() {
        let f = extractor().extract(&tx("AMZN Mktp US*2K4", None, Decimal::from(-20)));
        assert_eq!(f.text, "amazon us 2k4");
        assert_eq!(f.merchant, "amazon");
    }

    #[test]
    fn test_merchant_name_preferred_over_description() {
        let f = extractor().extract(&tx("POS PURCHASE 991", Some("Blue Bottle, Inc."), Decimal::ONE));
        assert_eq!(f.merchant, "blue bottle inc");
        assert_eq!(f.merchant_lower, "blue bottle, inc.");
        assert_eq!(f.text, "pos purchase");
    }

    #[test]
    fn test_tokens_follow_rounded_amount_sign() {
        let zero = extractor().extract(&tx("REFUND", None, Decimal::ZERO));
        let small_credit = extractor().extract(&tx("REFUND", None, Decimal::new(30, 2)));
        let small_debit = extractor().extract(&tx("REFUND", None, Decimal::new(-30, 2)));
        assert!(small_credit.is_credit);
        assert_eq!(zero.tokens(), small_credit.tokens());
        assert_eq!(zero.tokens(), small_debit.tokens());

        let credit = extractor().extract(&tx("REFUND", None, Decimal::new(70, 2)));
        assert!(credit.tokens().contains(&"__credit".to_string()));
    }

    #[test]
    fn test_empty_description_falls_back_to_merchant() {
        let f = extractor().extract(&tx("   ", Some("Netflix"), Decimal::from(-15)));
        assert_eq!(f.text, "netflix");
    }

    #[test]
    fn test_empty_input_uses_sentinel() {
        let f = extractor().extract(&tx("", None, Decimal::ZERO));
        assert_eq!(f.text, SENTINEL_TOKEN);
        assert_eq!(f.merchant, "");
        assert!(f.tokens().contains(&SENTINEL_TOKEN.to_string()));
    }

    #[test]
    fn test_punctuation_only_uses_sentinel() {
        let f = extractor().extract(&tx("#### ** 1234", None, Decimal::ZERO));
        assert_eq!(f.text, SENTINEL_TOKEN);
    }

    #[test]
    fn test_recurring_heuristic() {
        let f = extractor().extract(&tx("SPOTIFY MONTHLY SUBSCRIPTION", None, Decimal::from(-11)));
        assert!(f.recurring);
        assert!(f.tokens().contains(&"__recurring".to_string()));

        let f = extractor().extract(&tx("GYM AUTO PAY", None, Decimal::from(-30)));
        assert!(f.recurring);

        let f = extractor().extract(&tx("SHELL OIL", None, Decimal::from(-40)));
        assert!(!f.recurring);
    }

    #[test]
    fn test_rounding_half_away_from_zero() {
        assert_eq!(round_to_unit(Decimal::new(25, 1)), Decimal::from(3));
        assert_eq!(round_to_unit(Decimal::new(-25, 1)), Decimal::from(-3));
        assert_eq!(round_to_unit(Decimal::new(249, 2)), Decimal::from(2));
    }

    #[test]
    fn test_amount_buckets() {
        assert_eq!(amount_bucket(Decimal::ZERO), 0);
        assert_eq!(amount_bucket(Decimal::from(-75)), 3);
        assert_eq!(amount_bucket(Decimal::from(2500)), 6);
    }

    #[test]
    fn test_tokens_exclude_day_of_week() {
        let a = extractor().extract(&tx("GROCERY OUTLET", None, Decimal::from(-30)));
        let mut other = tx("GROCERY OUTLET", None, Decimal::from(-30));
        other.date = NaiveDate::from_ymd_opt(2024, 3, 17);
        let b = extractor().extract(&other);
        assert_ne!(a.day_of_week, b.day_of_week);
        assert_eq!(a.tokens(), b.tokens());
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let t = tx("Uber *Trip 8812", Some("UBER"), Decimal::new(-1875, 2));
        assert_eq!(extractor().extract(&t), extractor().extract(&t));
    }
}
