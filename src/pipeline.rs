//! Mining pipeline
//!
//! Runs the four stages in order (baskets, itemsets, rules, recommender)
//! and bundles their outputs into a read-only [`MinedModel`].

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::mining::metrics::{MiningStats, PerformanceTimer};
use crate::mining::{
    generate_rules, Apriori, BasketBuilder, BasketGranularity, BuildReport, FrequentItemsets,
    Item, MalformedRecordPolicy, RawEvent, Recommender, RuleFilter, TransactionTable,
};

/// Stage durations above this are logged as slow
const SLOW_STAGE_MS: u64 = 5_000;

/// Thresholds and grouping settings for one run
#[derive(Debug, Clone, Default)]
pub struct MiningConfig {
    pub min_support: f64,
    pub max_itemset_len: Option<usize>,
    pub rule_filter: RuleFilter,
    pub granularity: BasketGranularity,
    pub malformed_policy: MalformedRecordPolicy,
}

impl MiningConfig {
    pub fn new(min_support: f64, rule_filter: RuleFilter) -> Self {
        Self {
            min_support,
            rule_filter,
            ..Self::default()
        }
    }

    pub fn with_max_itemset_len(mut self, max_len: usize) -> Self {
        self.max_itemset_len = Some(max_len);
        self
    }

    pub fn with_granularity(mut self, granularity: BasketGranularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_malformed_policy(mut self, policy: MalformedRecordPolicy) -> Self {
        self.malformed_policy = policy;
        self
    }

    /// Check every threshold before any stage runs
    pub fn validate(&self) -> Result<()> {
        self.apriori().validate()?;
        self.rule_filter.validate()
    }

    fn apriori(&self) -> Apriori {
        let apriori = Apriori::new(self.min_support);
        match self.max_itemset_len {
            Some(max) => apriori.with_max_len(max),
            None => apriori,
        }
    }
}

/// Everything one run produced
#[derive(Debug, Clone, Serialize)]
pub struct MinedModel {
    pub report: BuildReport,
    #[serde(skip)]
    pub table: TransactionTable,
    #[serde(skip)]
    pub itemsets: FrequentItemsets,
    #[serde(skip)]
    pub recommender: Recommender,
    pub stats: MiningStats,
}

impl MinedModel {
    pub fn recommend(&self, item: &Item, count: usize) -> Vec<Item> {
        self.recommender.recommend(item, count)
    }

    pub fn rule_count(&self) -> usize {
        self.recommender.len()
    }
}

/// Orchestrates one mining run
pub struct MiningPipeline {
    config: MiningConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl MiningPipeline {
    /// Fails with `InvalidThreshold` before any work if the config is invalid
    pub fn new(config: MiningConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: None,
        })
    }

    /// Abort between stages once `flag` is set
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn config(&self) -> &MiningConfig {
        &self.config
    }

    pub fn run(&self, events: &[RawEvent]) -> Result<MinedModel> {
        let mut stats = MiningStats::default();
        info!(run_id = %stats.run_id, events = events.len(), "🚀 Starting mining run");

        self.checkpoint("baskets")?;
        let timer = PerformanceTimer::new("build_baskets");
        let (table, report) = BasketBuilder::new()
            .with_granularity(self.config.granularity.clone())
            .with_policy(self.config.malformed_policy)
            .build(events)?;
        stats.build_ms = timer.elapsed_ms();
        timer.log_if_slow(SLOW_STAGE_MS);
        drop(timer);

        self.finish(table, report, stats)
    }

    /// Start from an already grouped table
    pub fn run_table(&self, table: TransactionTable) -> Result<MinedModel> {
        let stats = MiningStats::default();
        info!(run_id = %stats.run_id, baskets = table.len(), "🚀 Starting mining run");
        let report = BuildReport::from_table(&table);
        self.finish(table, report, stats)
    }

    fn finish(
        &self,
        table: TransactionTable,
        report: BuildReport,
        mut stats: MiningStats,
    ) -> Result<MinedModel> {
        stats.events_seen = report.events_seen;
        stats.records_skipped = report.records_skipped;
        stats.baskets = table.len();
        stats.distinct_items = table.item_universe().len();

        self.checkpoint("itemsets")?;
        let timer = PerformanceTimer::new("mine_itemsets");
        let (itemsets, levels) = self.config.apriori().mine_with_summary(&table)?;
        stats.mine_ms = timer.elapsed_ms();
        timer.log_if_slow(SLOW_STAGE_MS);
        drop(timer);
        stats.levels = levels;
        stats.frequent_itemsets = itemsets.len();

        self.checkpoint("rules")?;
        let timer = PerformanceTimer::new("generate_rules");
        let rules = generate_rules(&itemsets, &self.config.rule_filter)?;
        stats.rules_ms = timer.elapsed_ms();
        timer.log_if_slow(SLOW_STAGE_MS);
        drop(timer);
        stats.rules = rules.len();

        self.checkpoint("recommender")?;
        let timer = PerformanceTimer::new("index_rules");
        let recommender = Recommender::new(rules);
        stats.index_ms = timer.elapsed_ms();
        drop(timer);

        stats.record();
        for issue in stats.detect_issues() {
            warn!(run_id = %stats.run_id, "⚠️ {}", issue);
        }

        info!(
            run_id = %stats.run_id,
            baskets = stats.baskets,
            items = stats.distinct_items,
            itemsets = stats.frequent_itemsets,
            rules = stats.rules,
            total_ms = stats.total_ms(),
            "✅ Mining run complete"
        );

        Ok(MinedModel {
            report,
            table,
            itemsets,
            recommender,
            stats,
        })
    }

    fn checkpoint(&self, stage: &'static str) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => {
                warn!(stage, "🛑 Mining cancelled");
                Err(Error::Cancelled { stage })
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::RuleMetric;

    fn event(user: &str, service: &str, ts: &str) -> RawEvent {
        RawEvent::new(user, service, "1", ts)
    }

    fn reference_events() -> Vec<RawEvent> {
        vec![
            event("u1", "a", "2017-08-01 10:00:00"),
            event("u1", "b", "2017-08-02 10:00:00"),
            event("u2", "a", "2017-08-03 10:00:00"),
            event("u2", "b", "2017-08-03 11:00:00"),
            event("u3", "a", "2017-08-04 10:00:00"),
            event("u3", "c", "2017-08-05 10:00:00"),
            event("u4", "a", "2017-08-06 10:00:00"),
            event("u4", "b", "2017-08-07 10:00:00"),
            event("u4", "c", "2017-08-08 10:00:00"),
        ]
    }

    #[test]
    fn test_invalid_config_fails_before_running() {
        let err = MiningPipeline::new(MiningConfig::new(0.0, RuleFilter::support(0.1)))
            .err()
            .unwrap();
        assert!(err.is_configuration());

        let err = MiningPipeline::new(MiningConfig::new(0.5, RuleFilter::confidence(1.5)))
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidThreshold { .. }));
    }

    #[test]
    fn test_run_reference_events() {
        let config = MiningConfig::new(0.5, RuleFilter::new(RuleMetric::Confidence, 0.6));
        let model = MiningPipeline::new(config).unwrap().run(&reference_events()).unwrap();

        assert_eq!(model.table.len(), 4);
        assert_eq!(model.stats.baskets, 4);
        assert_eq!(model.stats.distinct_items, 3);
        assert_eq!(model.stats.frequent_itemsets, 5);
        assert_eq!(model.rule_count(), model.stats.rules);
        assert_eq!(
            model.recommend(&Item::new("b", "1"), 4),
            vec![Item::new("a", "1")]
        );
    }

    #[test]
    fn test_empty_input_is_not_an_error() {
        let config = MiningConfig::new(0.1, RuleFilter::support(0.1));
        let model = MiningPipeline::new(config).unwrap().run(&[]).unwrap();
        assert!(model.table.is_empty());
        assert!(model.itemsets.is_empty());
        assert_eq!(model.rule_count(), 0);
    }

    #[test]
    fn test_cancelled_before_first_stage() {
        let flag = Arc::new(AtomicBool::new(true));
        let pipeline = MiningPipeline::new(MiningConfig::new(0.5, RuleFilter::support(0.1)))
            .unwrap()
            .with_cancellation(flag);
        match pipeline.run(&reference_events()) {
            Err(Error::Cancelled { stage }) => assert_eq!(stage, "baskets"),
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }

    #[test]
    fn test_fail_policy_propagates() {
        let mut events = reference_events();
        events.push(event("u5", "a", "not a date"));
        let config = MiningConfig::new(0.5, RuleFilter::support(0.1))
            .with_malformed_policy(MalformedRecordPolicy::Fail);
        let err = MiningPipeline::new(config).unwrap().run(&events).unwrap_err();
        assert!(err.is_record_level());
    }
}
