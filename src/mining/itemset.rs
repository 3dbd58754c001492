//! Itemsets and the frequent-itemset index

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use super::basket::Item;

/// Slack used when comparing derived ratios against thresholds
pub(crate) const TOLERANCE: f64 = 1e-9;

/// An immutable, duplicate-free set of items kept in sorted order, so two
/// itemsets with the same members are equal and hash alike.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "Vec<Item>", from = "Vec<Item>")]
pub struct Itemset {
    items: Vec<Item>,
}

impl Itemset {
    pub fn new(items: impl IntoIterator<Item = Item>) -> Self {
        let mut items: Vec<Item> = items.into_iter().collect();
        items.sort();
        items.dedup();
        Self { items }
    }

    pub fn singleton(item: Item) -> Self {
        Self { items: vec![item] }
    }

    /// Caller guarantees `items` is strictly increasing
    pub(crate) fn from_sorted(items: Vec<Item>) -> Self {
        debug_assert!(items.windows(2).all(|w| w[0] < w[1]));
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Item> {
        self.items.iter()
    }

    pub fn contains(&self, item: &Item) -> bool {
        self.items.binary_search(item).is_ok()
    }

    /// True when every member occurs in `basket`
    pub fn is_contained_in(&self, basket: &BTreeSet<Item>) -> bool {
        self.items.len() <= basket.len() && self.items.iter().all(|item| basket.contains(item))
    }

    pub fn is_subset(&self, other: &Itemset) -> bool {
        self.items.iter().all(|item| other.contains(item))
    }

    pub fn is_disjoint(&self, other: &Itemset) -> bool {
        !self.items.iter().any(|item| other.contains(item))
    }

    pub fn union(&self, other: &Itemset) -> Itemset {
        Itemset::new(self.items.iter().chain(other.items.iter()).cloned())
    }

    /// All subsets with exactly one member removed
    pub fn subsets_without_one(&self) -> impl Iterator<Item = Itemset> + '_ {
        (0..self.items.len()).map(move |skip| {
            let items = self
                .items
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != skip)
                .map(|(_, item)| item.clone())
                .collect();
            Itemset::from_sorted(items)
        })
    }
}

impl fmt::Display for Itemset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", item)?;
        }
        f.write_str("}")
    }
}

impl FromIterator<Item> for Itemset {
    fn from_iter<I: IntoIterator<Item = Item>>(iter: I) -> Self {
        Itemset::new(iter)
    }
}

impl From<Vec<Item>> for Itemset {
    fn from(items: Vec<Item>) -> Self {
        Itemset::new(items)
    }
}

impl From<Itemset> for Vec<Item> {
    fn from(itemset: Itemset) -> Self {
        itemset.items
    }
}

impl<'a> IntoIterator for &'a Itemset {
    type Item = &'a Item;
    type IntoIter = std::slice::Iter<'a, Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// An itemset that met the support threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrequentItemset {
    pub itemset: Itemset,
    /// Number of baskets containing every member
    pub count: usize,
    /// `count / basket_count`
    pub support: f64,
}

/// Output of the miner: every frequent itemset, ordered by level and then
/// lexicographically, plus a read-only support index used by rule generation.
#[derive(Debug, Clone, Default)]
pub struct FrequentItemsets {
    entries: Vec<FrequentItemset>,
    index: HashMap<Itemset, usize>,
    basket_count: usize,
}

impl FrequentItemsets {
    pub fn empty(basket_count: usize) -> Self {
        Self {
            basket_count,
            ..Self::default()
        }
    }

    pub(crate) fn from_levels(levels: Vec<Vec<FrequentItemset>>, basket_count: usize) -> Self {
        let entries: Vec<FrequentItemset> = levels.into_iter().flatten().collect();
        let index = entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| (entry.itemset.clone(), pos))
            .collect();
        Self {
            entries,
            index,
            basket_count,
        }
    }

    pub fn get(&self, itemset: &Itemset) -> Option<&FrequentItemset> {
        self.index.get(itemset).map(|&pos| &self.entries[pos])
    }

    pub fn contains(&self, itemset: &Itemset) -> bool {
        self.index.contains_key(itemset)
    }

    pub fn support_of(&self, itemset: &Itemset) -> Option<f64> {
        self.get(itemset).map(|entry| entry.support)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FrequentItemset> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[FrequentItemset] {
        &self.entries
    }

    /// Frequent itemsets with exactly `k` members
    pub fn level(&self, k: usize) -> impl Iterator<Item = &FrequentItemset> {
        self.entries.iter().filter(move |entry| entry.itemset.len() == k)
    }

    /// Size of the largest frequent itemset, 0 when there are none
    pub fn max_level(&self) -> usize {
        self.entries.last().map(|entry| entry.itemset.len()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of baskets the supports were computed over
    pub fn basket_count(&self) -> usize {
        self.basket_count
    }
}

impl<'a> IntoIterator for &'a FrequentItemsets {
    type Item = &'a FrequentItemset;
    type IntoIter = std::slice::Iter<'a, FrequentItemset>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
