//! ARL library crate
//!
//! Association rule mining over interaction logs, with item-to-item
//! recommendations served from the mined rules. Re-exports the core types for
//! integration tests and external use.

pub mod api;
pub mod config;
pub mod error;
pub mod loader;
pub mod mining;
pub mod pipeline;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use mining::{
    generate_rules, mine, recommend, Apriori, BasketBuilder, BasketGranularity, BasketId,
    BuildReport, FrequentItemset, FrequentItemsets, Item, Itemset, MalformedRecordPolicy,
    MiningStats, RawEvent, Recommender, Rule, RuleFilter, RuleMetric, RuleSet, ScoredItem,
    TransactionTable,
};
pub use pipeline::{MinedModel, MiningConfig, MiningPipeline};
