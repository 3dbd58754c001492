//! Rule Generator
//!
//! Splits every frequent itemset of two or more items into all
//! `antecedent => consequent` pairs. All metrics come from the supports the
//! miner already computed, so no second pass over the baskets is needed.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::itemset::{FrequentItemset, FrequentItemsets, Itemset, TOLERANCE};
use crate::error::{Error, Result};

/// Splitting an itemset enumerates `2^k - 2` subsets; beyond this the
/// enumeration does not fit a bitmask.
const MAX_SPLIT_LEN: usize = 63;

/// Metric a [`RuleFilter`] compares against its threshold
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleMetric {
    #[default]
    Support,
    Confidence,
    Lift,
}

impl RuleMetric {
    pub fn value(&self, rule: &Rule) -> f64 {
        match self {
            Self::Support => rule.support,
            Self::Confidence => rule.confidence,
            Self::Lift => rule.lift,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Support => "support",
            Self::Confidence => "confidence",
            Self::Lift => "lift",
        }
    }
}

impl fmt::Display for RuleMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleMetric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "support" => Ok(Self::Support),
            "confidence" => Ok(Self::Confidence),
            "lift" => Ok(Self::Lift),
            other => Err(Error::config(format!(
                "unknown rule metric '{}' (expected support, confidence or lift)",
                other
            ))),
        }
    }
}

/// Keep rules whose `metric` is at least `threshold`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleFilter {
    pub metric: RuleMetric,
    pub threshold: f64,
}

impl RuleFilter {
    pub fn new(metric: RuleMetric, threshold: f64) -> Self {
        Self { metric, threshold }
    }

    pub fn support(threshold: f64) -> Self {
        Self::new(RuleMetric::Support, threshold)
    }

    pub fn confidence(threshold: f64) -> Self {
        Self::new(RuleMetric::Confidence, threshold)
    }

    pub fn lift(threshold: f64) -> Self {
        Self::new(RuleMetric::Lift, threshold)
    }

    /// Support and confidence thresholds live in `[0, 1]`, lift in `[0, inf)`
    pub fn validate(&self) -> Result<()> {
        let t = self.threshold;
        let (valid, expected) = match self.metric {
            RuleMetric::Support | RuleMetric::Confidence => {
                ((0.0..=1.0).contains(&t), "a value in [0, 1]")
            }
            RuleMetric::Lift => (t.is_finite() && t >= 0.0, "a finite value >= 0"),
        };

        if valid {
            Ok(())
        } else {
            Err(Error::InvalidThreshold {
                name: match self.metric {
                    RuleMetric::Support => "rule_min_support",
                    RuleMetric::Confidence => "rule_min_confidence",
                    RuleMetric::Lift => "rule_min_lift",
                },
                value: t,
                expected,
            })
        }
    }

    pub fn accepts(&self, rule: &Rule) -> bool {
        self.metric.value(rule) + TOLERANCE >= self.threshold
    }
}

impl Default for RuleFilter {
    fn default() -> Self {
        Self::support(0.01)
    }
}

/// `antecedent => consequent` with its strength metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub antecedent: Itemset,
    pub consequent: Itemset,
    pub antecedent_support: f64,
    pub consequent_support: f64,
    /// support(antecedent ∪ consequent)
    pub support: f64,
    pub confidence: f64,
    pub lift: f64,
    /// support - antecedent_support * consequent_support
    pub leverage: f64,
    /// `None` when confidence is 1 (conviction is unbounded)
    pub conviction: Option<f64>,
}

impl Rule {
    /// Derive a rule from precomputed supports.
    ///
    /// Zero antecedent or consequent support is a [`Error::DegenerateRule`]
    /// rather than an infinite or NaN metric.
    pub fn from_supports(
        antecedent: Itemset,
        consequent: Itemset,
        support: f64,
        antecedent_support: f64,
        consequent_support: f64,
    ) -> Result<Self> {
        if antecedent_support <= 0.0 || consequent_support <= 0.0 {
            return Err(Error::DegenerateRule {
                antecedent: antecedent.to_string(),
                consequent: consequent.to_string(),
                message: format!(
                    "zero support (antecedent {}, consequent {})",
                    antecedent_support, consequent_support
                )
                .into(),
            });
        }

        let confidence = support / antecedent_support;
        let lift = confidence / consequent_support;
        let leverage = support - antecedent_support * consequent_support;
        let conviction = if confidence >= 1.0 - TOLERANCE {
            None
        } else {
            Some((1.0 - consequent_support) / (1.0 - confidence))
        };

        Ok(Self {
            antecedent,
            consequent,
            antecedent_support,
            consequent_support,
            support,
            confidence,
            lift,
            leverage,
            conviction,
        })
    }

    /// The frequent itemset this rule was split from
    pub fn itemset(&self) -> Itemset {
        self.antecedent.union(&self.consequent)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} => {} (support {:.4}, confidence {:.4}, lift {:.4})",
            self.antecedent, self.consequent, self.support, self.confidence, self.lift
        )
    }
}

/// Immutable collection of generated rules, in generation order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    pub fn as_slice(&self) -> &[Rule] {
        &self.rules
    }

    pub fn into_vec(self) -> Vec<Rule> {
        self.rules
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

/// Generate every rule passing `filter`.
///
/// Itemsets are processed in parallel; the output order is the itemset order
/// followed by subset bitmask order, so it is reproducible. Identical
/// `(antecedent, consequent)` pairs are never merged.
pub fn generate_rules(itemsets: &FrequentItemsets, filter: &RuleFilter) -> Result<RuleSet> {
    filter.validate()?;

    let per_itemset: Vec<Vec<Rule>> = itemsets
        .as_slice()
        .par_iter()
        .filter(|entry| entry.itemset.len() >= 2)
        .map(|entry| rules_for_itemset(entry, itemsets, filter))
        .collect::<Result<Vec<_>>>()?;

    let rules: Vec<Rule> = per_itemset.into_iter().flatten().collect();
    metrics::counter!("arl_rules_generated_total").increment(rules.len() as u64);

    Ok(RuleSet::new(rules))
}

fn rules_for_itemset(
    entry: &FrequentItemset,
    itemsets: &FrequentItemsets,
    filter: &RuleFilter,
) -> Result<Vec<Rule>> {
    let items = entry.itemset.items();
    let k = items.len();
    if k > MAX_SPLIT_LEN {
        return Err(Error::Other(anyhow::anyhow!(
            "itemset of {} items is too large to split into rules",
            k
        )));
    }

    let full: u64 = (1u64 << k) - 1;
    let mut rules = Vec::new();

    for mask in 1..full {
        let (antecedent, consequent): (Vec<_>, Vec<_>) = items
            .iter()
            .enumerate()
            .partition(|(bit, _)| mask & (1u64 << *bit) != 0);
        let antecedent = Itemset::from_sorted(antecedent.into_iter().map(|(_, i)| i.clone()).collect());
        let consequent = Itemset::from_sorted(consequent.into_iter().map(|(_, i)| i.clone()).collect());

        let antecedent_support = lookup(itemsets, &antecedent, &antecedent, &consequent)?;
        let consequent_support = lookup(itemsets, &consequent, &antecedent, &consequent)?;

        let rule = Rule::from_supports(
            antecedent,
            consequent,
            entry.support,
            antecedent_support,
            consequent_support,
        )?;
        if filter.accepts(&rule) {
            rules.push(rule);
        }
    }

    Ok(rules)
}

fn lookup(
    itemsets: &FrequentItemsets,
    side: &Itemset,
    antecedent: &Itemset,
    consequent: &Itemset,
) -> Result<f64> {
    itemsets
        .support_of(side)
        .ok_or_else(|| Error::DegenerateRule {
            antecedent: antecedent.to_string(),
            consequent: consequent.to_string(),
            message: format!("no support recorded for {}", side).into(),
        })
}
