//! Mining Module
//!
//! Association rule mining over interaction logs and item-to-item
//! recommendations from the mined rules.
//!
//! ## Architecture
//!
//! 1. **Basket** - Group raw events into baskets keyed by user and time bucket
//! 2. **Apriori** - Find every itemset whose support meets the threshold
//! 3. **Rules** - Split frequent itemsets into antecedent => consequent rules
//! 4. **Recommender** - Rank rules by lift and answer top-k lookups
//!
//! Data flows strictly 1 → 2 → 3 → 4. Each stage reads the previous stage's
//! output and nothing downstream mutates it.
//!
//! ## Metrics
//!
//! For a rule `A => C` over `N` baskets:
//! - support = |baskets ⊇ A ∪ C| / N
//! - confidence = support(A ∪ C) / support(A)
//! - lift = confidence / support(C)

pub mod apriori;
pub mod basket;
pub mod itemset;
pub mod metrics;
pub mod recommender;
pub mod rules;

pub use apriori::{mine, Apriori, LevelSummary};
pub use basket::{
    BasketBuilder, BasketGranularity, BasketId, BuildReport, Item, MalformedRecordPolicy,
    RawEvent, TransactionTable,
};
pub use itemset::{FrequentItemset, FrequentItemsets, Itemset};
pub use self::metrics::MiningStats;
pub use recommender::{recommend, Recommender, ScoredItem};
pub use rules::{generate_rules, Rule, RuleFilter, RuleMetric, RuleSet};
