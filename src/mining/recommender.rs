//! Recommender
//!
//! Answers "what goes with this item?" against a mined rule set. Rules are
//! ranked by lift once, with a stable sort so ties keep generation order, and
//! every query walks that ranking keeping the first occurrence of each
//! consequent item.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::basket::Item;
use super::itemset::Itemset;
use super::rules::{Rule, RuleSet};

/// A recommended item together with the rule that surfaced it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredItem {
    pub item: Item,
    /// Lift of the surfacing rule
    pub score: f64,
    pub confidence: f64,
    pub support: f64,
    /// Antecedent of the surfacing rule
    pub because_of: Itemset,
}

/// Rules ranked by lift plus an index from antecedent item to rank positions
#[derive(Debug, Clone, Default)]
pub struct Recommender {
    ranked: Vec<Rule>,
    by_antecedent_item: HashMap<Item, Vec<usize>>,
}

impl Recommender {
    pub fn new(rules: RuleSet) -> Self {
        let mut ranked = rules.into_vec();
        rank_by_lift(&mut ranked);

        let mut by_antecedent_item: HashMap<Item, Vec<usize>> = HashMap::new();
        for (pos, rule) in ranked.iter().enumerate() {
            for item in &rule.antecedent {
                by_antecedent_item.entry(item.clone()).or_default().push(pos);
            }
        }

        Self {
            ranked,
            by_antecedent_item,
        }
    }

    /// Up to `count` distinct items, strongest first
    pub fn recommend(&self, query: &Item, count: usize) -> Vec<Item> {
        let items = collect_consequents(self.rules_for(query), count);
        debug!(query = %query, count, returned = items.len(), "Recommendation lookup");
        items
    }

    /// Like [`Recommender::recommend`], keeping the metrics of the rule that
    /// surfaced each item
    pub fn recommend_scored(&self, query: &Item, count: usize) -> Vec<ScoredItem> {
        if count == 0 {
            return Vec::new();
        }

        let mut seen: HashSet<&Item> = HashSet::new();
        let mut scored = Vec::new();
        'rules: for rule in self.rules_for(query) {
            for item in &rule.consequent {
                if seen.insert(item) {
                    scored.push(ScoredItem {
                        item: item.clone(),
                        score: rule.lift,
                        confidence: rule.confidence,
                        support: rule.support,
                        because_of: rule.antecedent.clone(),
                    });
                    if scored.len() == count {
                        break 'rules;
                    }
                }
            }
        }
        scored
    }

    /// Rules whose antecedent contains `query`, in rank order
    pub fn rules_for<'a>(&'a self, query: &Item) -> impl Iterator<Item = &'a Rule> + 'a {
        self.by_antecedent_item
            .get(query)
            .map(|positions| positions.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(move |&pos| &self.ranked[pos])
    }

    /// All rules, strongest lift first
    pub fn ranked_rules(&self) -> &[Rule] {
        &self.ranked
    }

    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }
}

/// One-off query without building an index: ranks `rules` and scans them.
pub fn recommend(rules: &RuleSet, query: &Item, count: usize) -> Vec<Item> {
    if count == 0 || rules.is_empty() {
        return Vec::new();
    }
    let mut ranked: Vec<&Rule> = rules.iter().collect();
    ranked.sort_by(|a, b| b.lift.total_cmp(&a.lift));
    collect_consequents(
        ranked.into_iter().filter(|rule| rule.antecedent.contains(query)),
        count,
    )
}

/// Stable: rules with equal lift keep their generation order
fn rank_by_lift(rules: &mut [Rule]) {
    rules.sort_by(|a, b| b.lift.total_cmp(&a.lift));
}

/// Items in first-insertion order, each kept once
#[derive(Default)]
struct OrderedItemSet<'a> {
    order: Vec<&'a Item>,
    seen: HashSet<&'a Item>,
}

impl<'a> OrderedItemSet<'a> {
    fn insert(&mut self, item: &'a Item) -> bool {
        let fresh = self.seen.insert(item);
        if fresh {
            self.order.push(item);
        }
        fresh
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn into_items(self) -> Vec<Item> {
        self.order.into_iter().cloned().collect()
    }
}

fn collect_consequents<'a>(rules: impl Iterator<Item = &'a Rule>, count: usize) -> Vec<Item> {
    if count == 0 {
        return Vec::new();
    }

    let mut acc = OrderedItemSet::default();

    'rules: for rule in rules {
        for item in &rule.consequent {
            acc.insert(item);
            if acc.len() == count {
                break 'rules;
            }
        }
    }
    acc.into_items()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(label: &str) -> Item {
        Item::new(label, "0")
    }

    fn set(labels: &[&str]) -> Itemset {
        labels.iter().map(|s| item(s)).collect()
    }

    fn rule(a: &[&str], c: &[&str], lift: f64) -> Rule {
        Rule {
            antecedent: set(a),
            consequent: set(c),
            antecedent_support: 0.5,
            consequent_support: 0.5,
            support: 0.25,
            confidence: 0.5,
            lift,
            leverage: 0.0,
            conviction: Some(1.0),
        }
    }

    fn sample() -> RuleSet {
        RuleSet::new(vec![
            rule(&["a"], &["b"], 1.2),
            rule(&["a", "x"], &["c", "d"], 3.0),
            rule(&["z"], &["q"], 9.0),
            rule(&["a"], &["c"], 2.0),
            rule(&["a"], &["e"], 1.2),
        ])
    }

    #[test]
    fn test_ranks_by_lift_and_dedups() {
        let rec = Recommender::new(sample());
        assert_eq!(
            rec.recommend(&item("a"), 10),
            vec![item("c"), item("d"), item("b"), item("e")]
        );
    }

    #[test]
    fn test_ties_keep_generation_order() {
        let rec = Recommender::new(sample());
        let tied: Vec<&Rule> = rec.ranked_rules().iter().filter(|r| r.lift == 1.2).collect();
        assert_eq!(tied[0].consequent, set(&["b"]));
        assert_eq!(tied[1].consequent, set(&["e"]));
    }

    #[test]
    fn test_truncation_and_zero_count() {
        let rec = Recommender::new(sample());
        assert_eq!(rec.recommend(&item("a"), 1), vec![item("c")]);
        assert!(rec.recommend(&item("a"), 0).is_empty());
        assert!(rec.recommend_scored(&item("a"), 0).is_empty());
    }

    #[test]
    fn test_unknown_item_and_empty_rules() {
        let rec = Recommender::new(sample());
        assert!(rec.recommend(&item("nope"), 5).is_empty());
        assert!(Recommender::new(RuleSet::default())
            .recommend(&item("a"), 5)
            .is_empty());
        assert!(recommend(&RuleSet::default(), &item("a"), 5).is_empty());
    }

    #[test]
    fn test_index_matches_linear_scan() {
        let rules = sample();
        let rec = Recommender::new(rules.clone());
        for query in ["a", "x", "z", "b"] {
            for count in 0..6 {
                assert_eq!(
                    rec.recommend(&item(query), count),
                    recommend(&rules, &item(query), count)
                );
            }
        }
    }

    #[test]
    fn test_scored_items_carry_surfacing_rule() {
        let rec = Recommender::new(sample());
        let scored = rec.recommend_scored(&item("x"), 5);
        assert_eq!(scored.len(), 2);
        assert_eq!(scored[0].item, item("c"));
        assert_eq!(scored[0].score, 3.0);
        assert_eq!(scored[0].because_of, set(&["a", "x"]));
    }
}
