//! Rule engine for deterministic categorization
//!
//! Rules are compiled once into a closed [`RuleMatcher`] enum covering every
//! valid field × operator pair, then sorted into a total evaluation order:
//! priority (ascending), operator specificity, then rule id (lexicographic).
//! The first matching rule wins.
//!
//! A rule that fails to compile (bad regex, invalid field/operator pair,
//! unparseable amount) is disabled and logged; the rest of the set still runs.
//!
//! Merchant rules are checked against the merchant as given (lower-cased,
//! punctuation intact) and against its normalized, alias-resolved form.

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Error;
use crate::features::Features;
use crate::models::{CategorizationRule, CategoryId, RuleField, RuleOperator};

/// Numeric comparison applied to the signed amount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountComparison {
    Equal,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
}

impl AmountComparison {
    fn holds(&self, amount: Decimal, threshold: Decimal) -> bool {
        match self {
            Self::Equal => amount == threshold,
            Self::Greater => amount > threshold,
            Self::GreaterOrEqual => amount >= threshold,
            Self::Less => amount < threshold,
            Self::LessOrEqual => amount <= threshold,
        }
    }
}

/// Every valid field × operator combination
///
/// Text needles are stored lower-cased; `Contains` holds pipe-separated
/// alternatives (`"SHELL|CHEVRON"`).
#[derive(Debug, Clone)]
pub enum RuleMatcher {
    DescriptionContains(Vec<String>),
    DescriptionEquals(String),
    DescriptionStartsWith(String),
    DescriptionEndsWith(String),
    DescriptionRegex(Regex),
    MerchantContains(Vec<String>),
    MerchantEquals(String),
    MerchantStartsWith(String),
    MerchantEndsWith(String),
    MerchantRegex(Regex),
    Amount(AmountComparison, Decimal),
}

impl RuleMatcher {
    /// Compile a field/operator/value triple
    pub fn compile(
        field: RuleField,
        operator: RuleOperator,
        value: &str,
    ) -> std::result::Result<Self, String> {
        let needle = value.trim().to_lowercase();

        if field == RuleField::Amount {
            let threshold: Decimal = value
                .trim()
                .parse()
                .map_err(|e| format!("invalid amount '{}': {}", value, e))?;
            let cmp = match operator {
                RuleOperator::Equals => AmountComparison::Equal,
                RuleOperator::GreaterThan => AmountComparison::Greater,
                RuleOperator::GreaterOrEqual => AmountComparison::GreaterOrEqual,
                RuleOperator::LessThan => AmountComparison::Less,
                RuleOperator::LessOrEqual => AmountComparison::LessOrEqual,
                other => {
                    return Err(format!(
                        "operator '{}' is not valid for the amount field",
                        other.as_str()
                    ))
                }
            };
            return Ok(Self::Amount(cmp, threshold));
        }

        if needle.is_empty() {
            return Err("empty pattern".to_string());
        }

        let is_description = field == RuleField::Description;
        let matcher = match operator {
            RuleOperator::Contains => {
                let alternatives: Vec<String> = needle
                    .split('|')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect();
                if alternatives.is_empty() {
                    return Err("empty pattern".to_string());
                }
                if is_description {
                    Self::DescriptionContains(alternatives)
                } else {
                    Self::MerchantContains(alternatives)
                }
            }
            RuleOperator::Equals if is_description => Self::DescriptionEquals(needle),
            RuleOperator::Equals => Self::MerchantEquals(needle),
            RuleOperator::StartsWith if is_description => Self::DescriptionStartsWith(needle),
            RuleOperator::StartsWith => Self::MerchantStartsWith(needle),
            RuleOperator::EndsWith if is_description => Self::DescriptionEndsWith(needle),
            RuleOperator::EndsWith => Self::MerchantEndsWith(needle),
            RuleOperator::Regex => {
                let re = RegexBuilder::new(value)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| e.to_string())?;
                if is_description {
                    Self::DescriptionRegex(re)
                } else {
                    Self::MerchantRegex(re)
                }
            }
            other => {
                return Err(format!(
                    "operator '{}' is only valid for the amount field",
                    other.as_str()
                ))
            }
        };
        Ok(matcher)
    }

    /// Tie-break rank among equal priorities (lower = more specific)
    pub fn specificity(&self) -> u8 {
        match self {
            Self::DescriptionEquals(_) | Self::MerchantEquals(_) => 0,
            Self::Amount(AmountComparison::Equal, _) => 0,
            Self::DescriptionStartsWith(_)
            | Self::DescriptionEndsWith(_)
            | Self::MerchantStartsWith(_)
            | Self::MerchantEndsWith(_) => 1,
            Self::DescriptionContains(_) | Self::MerchantContains(_) => 2,
            Self::DescriptionRegex(_) | Self::MerchantRegex(_) => 3,
            Self::Amount(_, _) => 4,
        }
    }

    pub fn matches(&self, features: &Features) -> bool {
        let description = features.description_lower.as_str();
        match self {
            Self::DescriptionContains(alts) => alts.iter().any(|p| description.contains(p.as_str())),
            Self::DescriptionEquals(n) => description == n,
            Self::DescriptionStartsWith(n) => description.starts_with(n.as_str()),
            Self::DescriptionEndsWith(n) => description.ends_with(n.as_str()),
            Self::DescriptionRegex(re) => re.is_match(description),
            Self::MerchantContains(alts) => {
                any_merchant(features, |m| alts.iter().any(|p| m.contains(p.as_str())))
            }
            Self::MerchantEquals(n) => any_merchant(features, |m| m == n.as_str()),
            Self::MerchantStartsWith(n) => any_merchant(features, |m| m.starts_with(n.as_str())),
            Self::MerchantEndsWith(n) => any_merchant(features, |m| m.ends_with(n.as_str())),
            Self::MerchantRegex(re) => any_merchant(features, |m| re.is_match(m)),
            Self::Amount(cmp, threshold) => cmp.holds(features.amount, *threshold),
        }
    }
}

/// Raw or normalized merchant satisfies `test`
fn any_merchant(features: &Features, test: impl Fn(&str) -> bool) -> bool {
    [features.merchant_lower.as_str(), features.merchant.as_str()]
        .into_iter()
        .any(|m| !m.is_empty() && test(m))
}

/// A rule with its compiled matcher
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: CategorizationRule,
    pub matcher: RuleMatcher,
}

impl CompiledRule {
    fn evaluation_order(&self, other: &Self) -> Ordering {
        self.rule
            .priority
            .cmp(&other.rule.priority)
            .then_with(|| self.matcher.specificity().cmp(&other.matcher.specificity()))
            .then_with(|| self.rule.id.cmp(&other.rule.id))
    }
}

/// The first rule that matched a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleMatch {
    pub rule_id: String,
    pub category_id: CategoryId,
}

/// A rule that was disabled at compile time
#[derive(Debug, Clone, Serialize)]
pub struct DisabledRule {
    pub rule_id: String,
    pub reason: String,
}

/// Compiled, ordered rule set; immutable once built
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    rules: Vec<CompiledRule>,
    disabled: Vec<DisabledRule>,
}

impl RuleEngine {
    pub fn new(rules: Vec<CategorizationRule>) -> Self {
        let mut compiled = Vec::with_capacity(rules.len());
        let mut disabled = Vec::new();

        for rule in rules {
            match RuleMatcher::compile(rule.field, rule.operator, &rule.value) {
                Ok(matcher) => compiled.push(CompiledRule { rule, matcher }),
                Err(reason) => {
                    let err = Error::RuleCompilation {
                        rule_id: rule.id.clone(),
                        reason: reason.clone(),
                    };
                    warn!("{} (rule disabled)", err);
                    disabled.push(DisabledRule {
                        rule_id: rule.id,
                        reason,
                    });
                }
            }
        }

        compiled.sort_by(|a, b| a.evaluation_order(b));
        debug!(
            "Rule engine built: {} active, {} disabled",
            compiled.len(),
            disabled.len()
        );

        Self {
            rules: compiled,
            disabled,
        }
    }

    /// Return the first matching rule in evaluation order
    pub fn evaluate(&self, features: &Features) -> Option<RuleMatch> {
        self.rules
            .iter()
            .find(|r| r.matcher.matches(features))
            .map(|r| RuleMatch {
                rule_id: r.rule.id.clone(),
                category_id: r.rule.category_id,
            })
    }

    /// All matching rules in evaluation order (for testing rule sets)
    pub fn matching_rules(&self, features: &Features) -> Vec<&CategorizationRule> {
        self.rules
            .iter()
            .filter(|r| r.matcher.matches(features))
            .map(|r| &r.rule)
            .collect()
    }

    /// Active rules in evaluation order
    pub fn rules(&self) -> impl Iterator<Item = &CategorizationRule> {
        self.rules.iter().map(|r| &r.rule)
    }

    pub fn disabled(&self) -> &[DisabledRule] {
        &self.disabled
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
