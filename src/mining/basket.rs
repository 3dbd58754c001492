//! Basket Builder
//!
//! Groups raw interaction events into baskets keyed by `(user, time bucket)`
//! and maps each event to its canonical [`Item`]. Events are processed in
//! parallel shards whose basket maps are merged by set union, so the result
//! does not depend on how rayon splits the input.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use rayon::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as _};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// How many record errors a [`BuildReport`] keeps for inspection
pub const MAX_SAMPLE_ERRORS: usize = 10;

// ============================================================================
// Items
// ============================================================================

/// A service within a category.
///
/// The same service id under two categories is two different items, so
/// identity is the `(service_id, category_id)` pair. The textual label is
/// `"{service_id}_{category_id}"` with `_` and `\` escaped inside components,
/// which keeps the label injective.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Item {
    service_id: String,
    category_id: String,
}

impl Item {
    /// Both components must be non-empty, otherwise the label does not
    /// parse back.
    pub fn new(service_id: impl Into<String>, category_id: impl Into<String>) -> Self {
        let service_id = service_id.into();
        let category_id = category_id.into();
        debug_assert!(
            !service_id.is_empty() && !category_id.is_empty(),
            "item components must be non-empty"
        );
        Self {
            service_id,
            category_id,
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn category_id(&self) -> &str {
        &self.category_id
    }

    /// Canonical label, e.g. `"2_0"`
    pub fn label(&self) -> String {
        self.to_string()
    }
}

fn write_escaped(f: &mut fmt::Formatter<'_>, component: &str) -> fmt::Result {
    for ch in component.chars() {
        if ch == '_' || ch == '\\' {
            f.write_char('\\')?;
        }
        f.write_char(ch)?;
    }
    Ok(())
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_escaped(f, &self.service_id)?;
        f.write_char('_')?;
        write_escaped(f, &self.category_id)
    }
}

impl FromStr for Item {
    type Err = Error;

    /// Parses a label, splitting on the last unescaped `_`.
    fn from_str(s: &str) -> Result<Self> {
        let mut components = Vec::new();
        let mut current = String::new();
        let mut chars = s.chars();

        while let Some(ch) = chars.next() {
            match ch {
                '\\' => match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => {
                        return Err(Error::bad_request(format!(
                            "item label '{}' ends with a dangling escape",
                            s
                        )))
                    }
                },
                '_' => components.push(std::mem::take(&mut current)),
                other => current.push(other),
            }
        }

        let category_id = current;
        let service_id = components.join("_");

        if components.is_empty() || service_id.is_empty() || category_id.is_empty() {
            return Err(Error::bad_request(format!(
                "item label '{}' must look like '<service>_<category>'",
                s
            )));
        }

        Ok(Item::new(service_id, category_id))
    }
}

impl Serialize for Item {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Item {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        label.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Raw input
// ============================================================================

/// One interaction as produced by an external loader
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub user_id: String,
    pub service_id: String,
    pub category_id: String,
    /// ISO-8601 timestamp string
    pub timestamp: String,
}

impl RawEvent {
    pub fn new(
        user_id: impl Into<String>,
        service_id: impl Into<String>,
        category_id: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            service_id: service_id.into(),
            category_id: category_id.into(),
            timestamp: timestamp.into(),
        }
    }
}

/// Parse the timestamp formats seen in event exports.
///
/// Offsets are kept as wall-clock time, so an event at 23:30 local time on
/// the last day of a month stays in that month.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }

    for format in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

// ============================================================================
// Basket keys
// ============================================================================

/// Maps a timestamp to the bucket part of a basket id
#[derive(Clone, Default)]
pub enum BasketGranularity {
    /// `2017-08-06`
    Day,
    /// `2017-W31`
    IsoWeek,
    /// `2017-08`
    #[default]
    Month,
    /// `2017`
    Year,
    /// Caller-supplied bucketing
    Custom(Arc<dyn Fn(&NaiveDateTime) -> String + Send + Sync>),
}

impl BasketGranularity {
    pub fn custom(f: impl Fn(&NaiveDateTime) -> String + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    pub fn bucket(&self, ts: &NaiveDateTime) -> String {
        match self {
            Self::Day => ts.format("%Y-%m-%d").to_string(),
            Self::IsoWeek => {
                let week = ts.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            Self::Month => ts.format("%Y-%m").to_string(),
            Self::Year => ts.format("%Y").to_string(),
            Self::Custom(f) => f(ts),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::IsoWeek => "week",
            Self::Month => "month",
            Self::Year => "year",
            Self::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for BasketGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for BasketGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BasketGranularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "daily" => Ok(Self::Day),
            "week" | "weekly" | "iso_week" => Ok(Self::IsoWeek),
            "month" | "monthly" => Ok(Self::Month),
            "year" | "yearly" => Ok(Self::Year),
            other => Err(Error::config(format!(
                "unknown basket granularity '{}' (expected day, week, month or year)",
                other
            ))),
        }
    }
}

/// Identity of one basket: a user within one time bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BasketId {
    pub user_id: String,
    pub bucket: String,
}

impl BasketId {
    pub fn new(user_id: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            bucket: bucket.into(),
        }
    }
}

impl fmt::Display for BasketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.user_id, self.bucket)
    }
}

/// What to do with a record that cannot be turned into a basket entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedRecordPolicy {
    /// Drop the record and count it in the [`BuildReport`]
    #[default]
    Skip,
    /// Fail the whole batch
    Fail,
}

impl fmt::Display for MalformedRecordPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => f.write_str("skip"),
            Self::Fail => f.write_str("fail"),
        }
    }
}

impl FromStr for MalformedRecordPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "fail" | "abort" => Ok(Self::Fail),
            other => Err(Error::config(format!(
                "unknown malformed record policy '{}' (expected skip or fail)",
                other
            ))),
        }
    }
}

// ============================================================================
// Transaction table
// ============================================================================

/// Basket id → set of items. Built once and never mutated; every basket is
/// non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionTable {
    baskets: BTreeMap<BasketId, BTreeSet<Item>>,
}

impl TransactionTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a table from baskets the caller already holds. Repeated ids are
    /// merged and empty baskets are dropped.
    pub fn from_baskets<I, S>(baskets: I) -> Self
    where
        I: IntoIterator<Item = (BasketId, S)>,
        S: IntoIterator<Item = Item>,
    {
        let mut map: BTreeMap<BasketId, BTreeSet<Item>> = BTreeMap::new();
        for (id, items) in baskets {
            map.entry(id).or_default().extend(items);
        }
        map.retain(|_, items| !items.is_empty());
        Self { baskets: map }
    }

    pub fn len(&self) -> usize {
        self.baskets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.baskets.is_empty()
    }

    pub fn get(&self, id: &BasketId) -> Option<&BTreeSet<Item>> {
        self.baskets.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BasketId, &BTreeSet<Item>)> {
        self.baskets.iter()
    }

    pub(crate) fn par_baskets(&self) -> impl ParallelIterator<Item = &BTreeSet<Item>> + '_ {
        self.baskets.par_iter().map(|(_, items)| items)
    }

    /// Every distinct item that occurs in at least one basket
    pub fn item_universe(&self) -> BTreeSet<&Item> {
        self.baskets.values().flatten().collect()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// One record the builder could not use
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordIssue {
    pub index: usize,
    pub reason: String,
}

/// Outcome of a basket build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub events_seen: usize,
    pub events_accepted: usize,
    pub records_skipped: usize,
    pub baskets: usize,
    /// Lowest-index record errors, at most [`MAX_SAMPLE_ERRORS`]
    pub sample_errors: Vec<RecordIssue>,
}

impl BuildReport {
    /// Report for a table that did not come from raw events
    pub fn from_table(table: &TransactionTable) -> Self {
        Self {
            baskets: table.len(),
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct Shard {
    baskets: BTreeMap<BasketId, BTreeSet<Item>>,
    accepted: usize,
    skipped: usize,
    issues: Vec<RecordIssue>,
}

impl Shard {
    fn merge(mut self, other: Shard) -> Shard {
        for (id, items) in other.baskets {
            self.baskets.entry(id).or_default().extend(items);
        }
        self.accepted += other.accepted;
        self.skipped += other.skipped;
        self.issues.extend(other.issues);
        self.issues.sort_by_key(|issue| issue.index);
        self.issues.truncate(MAX_SAMPLE_ERRORS);
        self
    }
}

/// Groups raw events into a [`TransactionTable`]
#[derive(Debug, Clone, Default)]
pub struct BasketBuilder {
    granularity: BasketGranularity,
    policy: MalformedRecordPolicy,
}

impl BasketBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_granularity(mut self, granularity: BasketGranularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_policy(mut self, policy: MalformedRecordPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Build the transaction table.
    ///
    /// Under [`MalformedRecordPolicy::Fail`] the error for the lowest record
    /// index is returned, independent of thread scheduling.
    pub fn build(&self, events: &[RawEvent]) -> Result<(TransactionTable, BuildReport)> {
        let shard = events
            .par_iter()
            .enumerate()
            .fold(Shard::default, |mut shard, (index, event)| {
                match self.canonicalize(event) {
                    Ok((id, item)) => {
                        shard.baskets.entry(id).or_default().insert(item);
                        shard.accepted += 1;
                    }
                    Err(reason) => {
                        shard.skipped += 1;
                        if shard.issues.len() < MAX_SAMPLE_ERRORS {
                            shard.issues.push(RecordIssue {
                                index,
                                reason: reason.into_owned(),
                            });
                        }
                    }
                }
                shard
            })
            .reduce(Shard::default, Shard::merge);

        if self.policy == MalformedRecordPolicy::Fail {
            if let Some(first) = shard.issues.first() {
                return Err(Error::malformed(first.index, first.reason.clone()));
            }
        }

        if shard.skipped > 0 {
            warn!(
                skipped = shard.skipped,
                total = events.len(),
                "Skipped malformed records while building baskets"
            );
        }

        let table = TransactionTable {
            baskets: shard.baskets,
        };
        let report = BuildReport {
            events_seen: events.len(),
            events_accepted: shard.accepted,
            records_skipped: shard.skipped,
            baskets: table.len(),
            sample_errors: shard.issues,
        };

        info!(
            baskets = report.baskets,
            accepted = report.events_accepted,
            granularity = %self.granularity,
            "Built transaction table"
        );

        Ok((table, report))
    }

    fn canonicalize(&self, event: &RawEvent) -> std::result::Result<(BasketId, Item), Cow<'static, str>> {
        let user_id = required("user_id", &event.user_id)?;
        let service_id = required("service_id", &event.service_id)?;
        let category_id = required("category_id", &event.category_id)?;
        let raw_ts = required("timestamp", &event.timestamp)?;

        let ts = parse_timestamp(raw_ts)
            .ok_or_else(|| Cow::Owned(format!("unparseable timestamp '{}'", raw_ts)))?;

        Ok((
            BasketId::new(user_id, self.granularity.bucket(&ts)),
            Item::new(service_id, category_id),
        ))
    }
}

fn required<'a>(field: &'static str, value: &'a str) -> std::result::Result<&'a str, Cow<'static, str>> {
    let value = value.trim();
    if value.is_empty() {
        Err(Cow::Owned(format!("missing field {}", field)))
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(user: &str, service: &str, category: &str, ts: &str) -> RawEvent {
        RawEvent::new(user, service, category, ts)
    }

    #[test]
    fn test_item_label_roundtrip_with_separators() {
        let plain = Item::new("2", "0");
        assert_eq!(plain.label(), "2_0");
        assert_eq!("2_0".parse::<Item>().unwrap(), plain);

        // "a_b" + "c" and "a" + "b_c" must not collide
        let left = Item::new("a_b", "c");
        let right = Item::new("a", "b_c");
        assert_ne!(left.label(), right.label());
        assert_eq!(left.label().parse::<Item>().unwrap(), left);
        assert_eq!(right.label().parse::<Item>().unwrap(), right);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "non-empty")]
    fn test_item_rejects_empty_component() {
        let _ = Item::new("", "x");
    }

    #[test]
    fn test_item_parse_rejects_bad_labels() {
        assert!("20".parse::<Item>().is_err());
        assert!("_0".parse::<Item>().is_err());
        assert!("2_".parse::<Item>().is_err());
        assert!("2_0\\".parse::<Item>().is_err());
    }

    #[test]
    fn test_item_serializes_as_label() {
        let json = serde_json::to_string(&Item::new("38", "4")).unwrap();
        assert_eq!(json, "\"38_4\"");
        let back: Item = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Item::new("38", "4"));
    }

    #[test]
    fn test_monthly_baskets() {
        let events = vec![
            ev("7256", "9", "4", "2017-08-06 16:11:00"),
            ev("7256", "46", "4", "2017-08-20 10:00:00"),
            ev("7256", "9", "4", "2017-10-01 09:00:00"),
            ev("7256", "38", "4", "2017-10-30 23:59:59"),
        ];

        let (table, report) = BasketBuilder::new().build(&events).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(report.events_accepted, 4);

        let august = table.get(&BasketId::new("7256", "2017-08")).unwrap();
        assert!(august.contains(&Item::new("9", "4")));
        assert!(august.contains(&Item::new("46", "4")));

        let october = table.get(&BasketId::new("7256", "2017-10")).unwrap();
        assert_eq!(october.len(), 2);
        assert_eq!(BasketId::new("7256", "2017-10").to_string(), "7256_2017-10");
    }

    #[test]
    fn test_duplicate_items_collapse() {
        let events = vec![
            ev("1", "2", "0", "2018-01-01"),
            ev("1", "2", "0", "2018-01-15"),
            ev("1", "2", "0", "2018-01-31T12:00:00"),
        ];
        let (table, _) = BasketBuilder::new().build(&events).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.iter().next().unwrap().1.len(), 1);
    }

    #[test]
    fn test_granularity_buckets() {
        let ts = parse_timestamp("2017-08-06 16:11:00").unwrap();
        assert_eq!(BasketGranularity::Day.bucket(&ts), "2017-08-06");
        assert_eq!(BasketGranularity::IsoWeek.bucket(&ts), "2017-W31");
        assert_eq!(BasketGranularity::Month.bucket(&ts), "2017-08");
        assert_eq!(BasketGranularity::Year.bucket(&ts), "2017");

        let quarter = BasketGranularity::custom(|ts| format!("{}-Q{}", ts.year(), (ts.month() - 1) / 3 + 1));
        assert_eq!(quarter.bucket(&ts), "2017-Q3");
        assert_eq!("weekly".parse::<BasketGranularity>().unwrap().name(), "week");
        assert!("fortnight".parse::<BasketGranularity>().is_err());
    }

    #[test]
    fn test_timestamp_formats() {
        assert!(parse_timestamp("2017-08-06T16:11:00+03:00").is_some());
        assert!(parse_timestamp("2017-08-06T16:11:00.250").is_some());
        assert!(parse_timestamp("2017-08-06").is_some());
        assert!(parse_timestamp("06/08/2017").is_none());

        let minutes = parse_timestamp("2017-08-06T16:11").unwrap();
        assert_eq!(minutes, parse_timestamp("2017-08-06 16:11").unwrap());
        assert_eq!(BasketGranularity::Month.bucket(&minutes), "2017-08");

        // Wall-clock time is kept, so this stays in August
        let late = parse_timestamp("2017-08-31T23:30:00-05:00").unwrap();
        assert_eq!(BasketGranularity::Month.bucket(&late), "2017-08");
    }

    #[test]
    fn test_skip_policy_counts_bad_records() {
        let events = vec![
            ev("1", "2", "0", "2018-01-01"),
            ev("", "2", "0", "2018-01-01"),
            ev("1", "3", "0", "not a date"),
            ev("1", "4", "", "2018-01-01"),
        ];

        let (table, report) = BasketBuilder::new().build(&events).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(report.events_seen, 4);
        assert_eq!(report.events_accepted, 1);
        assert_eq!(report.records_skipped, 3);
        let indices: Vec<usize> = report.sample_errors.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert!(report.sample_errors[1].reason.contains("not a date"));
    }

    #[test]
    fn test_fail_policy_reports_lowest_index() {
        let mut events: Vec<RawEvent> = (0..500)
            .map(|i| ev(&i.to_string(), "1", "1", "2018-01-01"))
            .collect();
        events[417].timestamp = "garbage".to_string();
        events[123].user_id = String::new();

        let err = BasketBuilder::new()
            .with_policy(MalformedRecordPolicy::Fail)
            .build(&events)
            .unwrap_err();

        match err {
            Error::MalformedRecord { index, reason } => {
                assert_eq!(index, 123);
                assert!(reason.contains("user_id"));
            }
            other => panic!("expected MalformedRecord, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_input_is_empty_table() {
        let (table, report) = BasketBuilder::new().build(&[]).unwrap();
        assert!(table.is_empty());
        assert_eq!(report, BuildReport::default());
    }

    #[test]
    fn test_from_baskets_drops_empty_and_merges() {
        let table = TransactionTable::from_baskets(vec![
            (BasketId::new("u", "1"), vec![Item::new("a", "1")]),
            (BasketId::new("u", "1"), vec![Item::new("b", "1")]),
            (BasketId::new("u", "2"), vec![]),
        ]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.item_universe().len(), 2);
    }
}
