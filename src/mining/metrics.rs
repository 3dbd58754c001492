//! Mining Metrics and Performance Monitoring
//!
//! Stage timers and per-run statistics. Everything recorded here is also
//! pushed through the `metrics` facade, so an installed exporter picks it up.

use serde::Serialize;
use std::time::Instant;

use super::apriori::LevelSummary;

/// Statistics for one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct MiningStats {
    pub run_id: String,
    pub started_at: chrono::DateTime<chrono::Utc>,

    // Input
    pub events_seen: usize,
    pub records_skipped: usize,
    pub baskets: usize,
    pub distinct_items: usize,

    // Output
    pub levels: Vec<LevelSummary>,
    pub frequent_itemsets: usize,
    pub rules: usize,

    // Performance
    pub build_ms: u64,
    pub mine_ms: u64,
    pub rules_ms: u64,
    pub index_ms: u64,
}

impl Default for MiningStats {
    fn default() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: chrono::Utc::now(),
            events_seen: 0,
            records_skipped: 0,
            baskets: 0,
            distinct_items: 0,
            levels: Vec::new(),
            frequent_itemsets: 0,
            rules: 0,
            build_ms: 0,
            mine_ms: 0,
            rules_ms: 0,
            index_ms: 0,
        }
    }
}

impl MiningStats {
    pub fn total_ms(&self) -> u64 {
        self.build_ms + self.mine_ms + self.rules_ms + self.index_ms
    }

    pub fn candidates_counted(&self) -> usize {
        self.levels.iter().map(|l| l.candidates).sum()
    }

    pub fn candidates_pruned(&self) -> usize {
        self.levels.iter().map(|l| l.pruned).sum()
    }

    /// Publish the run's gauges through the `metrics` facade
    pub fn record(&self) {
        metrics::gauge!("arl_baskets").set(self.baskets as f64);
        metrics::gauge!("arl_distinct_items").set(self.distinct_items as f64);
        metrics::gauge!("arl_frequent_itemsets").set(self.frequent_itemsets as f64);
        metrics::gauge!("arl_rules").set(self.rules as f64);
        metrics::counter!("arl_records_skipped_total").increment(self.records_skipped as u64);
        for level in &self.levels {
            metrics::gauge!("arl_level_frequent_itemsets", "level" => level.level.to_string())
                .set(level.frequent as f64);
        }
    }

    /// Things about a run worth a warning in the logs
    pub fn detect_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.events_seen > 0 {
            let skip_ratio = self.records_skipped as f64 / self.events_seen as f64;
            if skip_ratio > 0.05 {
                issues.push(format!("High malformed record ratio: {:.2}%", skip_ratio * 100.0));
            }
        }

        if self.baskets > 0 && self.rules == 0 {
            issues.push("No rules generated: thresholds may be too strict".to_string());
        }

        if self.baskets > 0 && self.frequent_itemsets == 0 {
            issues.push("No frequent itemsets: min_support may be too high".to_string());
        }

        let counted = self.candidates_counted();
        if counted > 100_000 {
            issues.push(format!("Candidate explosion: {} candidates counted", counted));
        }

        issues
    }
}

/// Performance timer for tracking stage duration
pub struct PerformanceTimer {
    start: Instant,
    label: &'static str,
}

impl PerformanceTimer {
    pub fn new(label: &'static str) -> Self {
        Self {
            start: Instant::now(),
            label,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn log_if_slow(&self, threshold_ms: u64) {
        let elapsed = self.elapsed_ms();
        if elapsed > threshold_ms {
            tracing::warn!(
                "⚠️ Slow stage: {} took {}ms (threshold: {}ms)",
                self.label,
                elapsed,
                threshold_ms
            );
        }
    }
}

impl Drop for PerformanceTimer {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        metrics::histogram!("arl_stage_duration_seconds", "stage" => self.label)
            .record(elapsed.as_secs_f64());
        tracing::debug!("⏱️ {} completed in {}ms", self.label, elapsed.as_millis());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_issues() {
        let stats = MiningStats {
            events_seen: 100,
            records_skipped: 10,
            baskets: 40,
            frequent_itemsets: 0,
            rules: 0,
            ..MiningStats::default()
        };

        let issues = stats.detect_issues();
        assert!(issues.iter().any(|i| i.contains("malformed")));
        assert!(issues.iter().any(|i| i.contains("No rules")));
        assert!(issues.iter().any(|i| i.contains("No frequent itemsets")));
    }

    #[test]
    fn test_healthy_run_has_no_issues() {
        let stats = MiningStats {
            events_seen: 100,
            records_skipped: 1,
            baskets: 40,
            frequent_itemsets: 12,
            rules: 8,
            ..MiningStats::default()
        };
        assert!(stats.detect_issues().is_empty());
    }

    #[test]
    fn test_candidate_totals() {
        let stats = MiningStats {
            levels: vec![
                LevelSummary { level: 1, candidates: 10, pruned: 0, frequent: 4 },
                LevelSummary { level: 2, candidates: 6, pruned: 0, frequent: 2 },
                LevelSummary { level: 3, candidates: 0, pruned: 1, frequent: 0 },
            ],
            ..MiningStats::default()
        };
        assert_eq!(stats.candidates_counted(), 16);
        assert_eq!(stats.candidates_pruned(), 1);
        assert!(!MiningStats::default().run_id.is_empty());
    }
}
