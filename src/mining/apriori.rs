//! Itemset Miner (Apriori)
//!
//! Level-wise search: frequent (k-1)-itemsets sharing a (k-2)-prefix are
//! joined into k-candidates, candidates with an infrequent (k-1)-subset are
//! pruned, and the survivors are counted in one parallel pass over the
//! baskets. Counting uses per-worker vectors summed in a rayon reduction.

use rayon::prelude::*;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use super::basket::{Item, TransactionTable};
use super::itemset::{FrequentItemset, FrequentItemsets, Itemset, TOLERANCE};
use crate::error::{Error, Result};

/// Per-level counters from one mining run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LevelSummary {
    pub level: usize,
    /// Candidates that were counted against the baskets
    pub candidates: usize,
    /// Joined candidates discarded because a subset was infrequent
    pub pruned: usize,
    pub frequent: usize,
}

/// Apriori miner settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Apriori {
    min_support: f64,
    max_len: Option<usize>,
}

impl Apriori {
    pub fn new(min_support: f64) -> Self {
        Self {
            min_support,
            max_len: None,
        }
    }

    /// Stop after itemsets of `max_len` members
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    pub fn min_support(&self) -> f64 {
        self.min_support
    }

    pub fn validate(&self) -> Result<()> {
        validate_min_support(self.min_support)?;
        if self.max_len == Some(0) {
            return Err(Error::InvalidThreshold {
                name: "max_len",
                value: 0.0,
                expected: "an itemset length of at least 1",
            });
        }
        Ok(())
    }

    pub fn mine(&self, table: &TransactionTable) -> Result<FrequentItemsets> {
        self.mine_with_summary(table).map(|(itemsets, _)| itemsets)
    }

    /// Mine and also return per-level candidate counts
    pub fn mine_with_summary(
        &self,
        table: &TransactionTable,
    ) -> Result<(FrequentItemsets, Vec<LevelSummary>)> {
        self.validate()?;

        let n = table.len();
        if n == 0 {
            debug!("Empty transaction table, nothing to mine");
            return Ok((FrequentItemsets::empty(0), Vec::new()));
        }

        let min_count = min_count(self.min_support, n);
        let mut summaries = Vec::new();
        let mut levels: Vec<Vec<FrequentItemset>> = Vec::new();

        let first = frequent_items(table, min_count);
        summaries.push(LevelSummary {
            level: 1,
            candidates: table.item_universe().len(),
            pruned: 0,
            frequent: first.len(),
        });
        debug!(level = 1, frequent = first.len(), min_count, "Apriori level done");
        levels.push(first);

        let mut k = 2;
        while self.max_len.map_or(true, |max| k <= max) {
            let previous = match levels.last() {
                Some(level) if !level.is_empty() => level,
                _ => break,
            };

            let (candidates, pruned) = generate_candidates(previous, k);
            if candidates.is_empty() {
                summaries.push(LevelSummary {
                    level: k,
                    candidates: 0,
                    pruned,
                    frequent: 0,
                });
                break;
            }

            let counted = candidates.len();
            let counts = count_support(table, &candidates, k);
            let level: Vec<FrequentItemset> = candidates
                .into_iter()
                .zip(counts)
                .filter(|(_, count)| *count >= min_count)
                .map(|(itemset, count)| FrequentItemset {
                    itemset,
                    count,
                    support: count as f64 / n as f64,
                })
                .collect();

            let summary = LevelSummary {
                level: k,
                candidates: counted,
                pruned,
                frequent: level.len(),
            };
            debug!(
                level = k,
                candidates = summary.candidates,
                pruned,
                frequent = summary.frequent,
                "Apriori level done"
            );
            summaries.push(summary);

            if level.is_empty() {
                break;
            }
            levels.push(level);
            k += 1;
        }

        let itemsets = FrequentItemsets::from_levels(levels, n);
        info!(
            baskets = n,
            itemsets = itemsets.len(),
            max_level = itemsets.max_level(),
            min_support = self.min_support,
            "Mined frequent itemsets"
        );

        Ok((itemsets, summaries))
    }
}

/// Mine every itemset with `support >= min_support`
pub fn mine(table: &TransactionTable, min_support: f64) -> Result<FrequentItemsets> {
    Apriori::new(min_support).mine(table)
}

pub(crate) fn validate_min_support(min_support: f64) -> Result<()> {
    // NaN fails the comparison too
    if min_support > 0.0 && min_support <= 1.0 {
        Ok(())
    } else {
        Err(Error::InvalidThreshold {
            name: "min_support",
            value: min_support,
            expected: "a value in (0, 1]",
        })
    }
}

/// Smallest basket count whose support reaches `min_support`. Never below 1,
/// so an item in zero baskets is never frequent.
fn min_count(min_support: f64, basket_count: usize) -> usize {
    let raw = min_support * basket_count as f64 - TOLERANCE;
    (raw.ceil() as usize).max(1)
}

fn frequent_items(table: &TransactionTable, min_count: usize) -> Vec<FrequentItemset> {
    let n = table.len();
    let counts: HashMap<&Item, usize> = table
        .par_baskets()
        .fold(HashMap::new, |mut acc: HashMap<&Item, usize>, basket| {
            for item in basket {
                *acc.entry(item).or_insert(0) += 1;
            }
            acc
        })
        .reduce(HashMap::new, |mut a, b| {
            for (item, count) in b {
                *a.entry(item).or_insert(0) += count;
            }
            a
        });

    let mut level: Vec<FrequentItemset> = counts
        .into_iter()
        .filter(|(_, count)| *count >= min_count)
        .map(|(item, count)| FrequentItemset {
            itemset: Itemset::singleton(item.clone()),
            count,
            support: count as f64 / n as f64,
        })
        .collect();
    level.sort_by(|a, b| a.itemset.cmp(&b.itemset));
    level
}

/// Join step plus subset pruning. `previous` is sorted, so itemsets sharing
/// a (k-2)-prefix are contiguous and candidates come out sorted.
fn generate_candidates(previous: &[FrequentItemset], k: usize) -> (Vec<Itemset>, usize) {
    let known: HashSet<&Itemset> = previous.iter().map(|entry| &entry.itemset).collect();
    let prefix_len = k - 2;
    let mut candidates = Vec::new();
    let mut pruned = 0;

    for (i, left) in previous.iter().enumerate() {
        let left = left.itemset.items();
        for right in &previous[i + 1..] {
            let right = right.itemset.items();
            if left[..prefix_len] != right[..prefix_len] {
                break;
            }

            let mut items = left.to_vec();
            items.push(right[prefix_len].clone());
            let candidate = Itemset::from_sorted(items);

            if candidate
                .subsets_without_one()
                .all(|subset| known.contains(&subset))
            {
                candidates.push(candidate);
            } else {
                pruned += 1;
            }
        }
    }

    metrics::counter!("arl_apriori_candidates_pruned_total").increment(pruned as u64);
    (candidates, pruned)
}

fn count_support(table: &TransactionTable, candidates: &[Itemset], k: usize) -> Vec<usize> {
    metrics::counter!("arl_apriori_candidates_counted_total").increment(candidates.len() as u64);

    table
        .par_baskets()
        .filter(|basket| basket.len() >= k)
        .fold(
            || vec![0usize; candidates.len()],
            |mut acc, basket| {
                for (slot, candidate) in acc.iter_mut().zip(candidates) {
                    if candidate.is_contained_in(basket) {
                        *slot += 1;
                    }
                }
                acc
            },
        )
        .reduce(
            || vec![0usize; candidates.len()],
            |mut a, b| {
                for (x, y) in a.iter_mut().zip(b) {
                    *x += y;
                }
                a
            },
        )
}
