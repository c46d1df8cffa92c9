//! Per-tag cost aggregation.
//!
//! [`aggregate`] turns a batch of [`ResourceRecord`]s into one
//! [`TagAggregate`] per (tag key, tag value) pair. Every key also gets a
//! `"none"` bucket that accumulates the records *without* that key, so for any
//! key the bucket counts sum to the number of records.
//!
//! The computation runs in two passes. The first discovers every key and
//! accumulates the real (key, value) hits. The second needs the full key set:
//! a key first seen on the last record must still count all earlier records as
//! missing it.
//!
//! ```
//! use tagspend_cost::{ResourceRecord, aggregate};
//!
//! let records = vec![
//!     ResourceRecord::new("i-1", 5.0, 0.5).with_tag("env", "prod"),
//!     ResourceRecord::new("i-2", 3.0, 0.2),
//! ];
//! let aggregates = aggregate(&records);
//!
//! assert_eq!(aggregates.get("env", "prod").unwrap().count, 1);
//! assert_eq!(aggregates.none_bucket("env").unwrap().count, 1);
//! ```

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::models::{NONE_VALUE, ResourceRecord, TagAggregate};

/// Aggregates keyed by tag key, then tag value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagAggregates {
    by_key: HashMap<String, HashMap<String, TagAggregate>>,
}

impl TagAggregates {
    /// Look up the aggregate for (key, value).
    pub fn get(&self, key: &str, value: &str) -> Option<&TagAggregate> {
        self.by_key.get(key).and_then(|values| values.get(value))
    }

    /// The `"none"` bucket for `key`, present for every observed key.
    pub fn none_bucket(&self, key: &str) -> Option<&TagAggregate> {
        self.get(key, NONE_VALUE)
    }

    /// All aggregates for `key`, including its `"none"` bucket.
    pub fn values_for(&self, key: &str) -> impl Iterator<Item = &TagAggregate> {
        self.by_key.get(key).into_iter().flat_map(|values| values.values())
    }

    /// Every tag key observed on at least one record.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.by_key.keys().map(String::as_str)
    }

    /// Every aggregate row, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &TagAggregate> {
        self.by_key.values().flat_map(|values| values.values())
    }

    /// Every aggregate row ordered by key, then value.
    pub fn sorted(&self) -> Vec<&TagAggregate> {
        let mut rows: Vec<&TagAggregate> = self.iter().collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.value.cmp(&b.value)));
        rows
    }

    /// Number of aggregate rows (including `"none"` buckets).
    pub fn len(&self) -> usize {
        self.by_key.values().map(HashMap::len).sum()
    }

    pub fn key_count(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Bucket for (key, value), creating the key's zeroed `"none"` bucket
    /// the first time the key is seen.
    fn bucket_mut(&mut self, key: &str, value: &str) -> &mut TagAggregate {
        let values = self.by_key.entry(key.to_string()).or_insert_with(|| {
            let mut values = HashMap::new();
            values.insert(NONE_VALUE.to_string(), TagAggregate::none_bucket(key));
            values
        });
        values
            .entry(value.to_string())
            .or_insert_with(|| TagAggregate::empty(key, value))
    }
}

impl<'a> IntoIterator for &'a TagAggregates {
    type Item = &'a TagAggregate;
    type IntoIter = Box<dyn Iterator<Item = &'a TagAggregate> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// Compute per-tag statistics for `records`.
///
/// Pure: no I/O and no state kept between calls. A record carrying a tag whose
/// value is literally `"none"` is counted into the same bucket as records
/// missing the key.
pub fn aggregate(records: &[ResourceRecord]) -> TagAggregates {
    let mut aggregates = TagAggregates::default();

    for record in records {
        for tag in &record.tags {
            aggregates.bucket_mut(&tag.key, &tag.value).add_record(record);
        }
    }

    let known_keys: Vec<String> = aggregates.by_key.keys().cloned().collect();
    for record in records {
        let present: HashSet<&str> = record.tags.iter().map(|t| t.key.as_str()).collect();
        for key in known_keys.iter().filter(|k| !present.contains(k.as_str())) {
            aggregates.bucket_mut(key, NONE_VALUE).add_record(record);
        }
    }

    debug!(
        records = records.len(),
        keys = aggregates.key_count(),
        rows = aggregates.len(),
        "Aggregated tag costs"
    );

    aggregates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_records() -> Vec<ResourceRecord> {
        vec![
            ResourceRecord::new("i-1", 10.0, 1.0)
                .with_tag("env", "prod")
                .with_tag("team", "core"),
            ResourceRecord::new("i-2", 4.0, 0.5).with_tag("env", "dev"),
            ResourceRecord::new("i-3", 2.0, 0.25).with_tag("env", "prod"),
            ResourceRecord::new("i-4", 1.0, 0.1),
            ResourceRecord::new("i-5", 7.0, 0.75).with_tag("owner", "alice"),
        ]
    }

    #[test]
    fn test_empty_input() {
        let aggregates = aggregate(&[]);
        assert!(aggregates.is_empty());
        assert_eq!(aggregates.len(), 0);
    }

    #[test]
    fn test_single_record_single_tag() {
        let records = vec![ResourceRecord::new("i-1", 10.0, 1.0).with_tag("env", "prod")];
        let aggregates = aggregate(&records);

        let prod = aggregates.get("env", "prod").unwrap();
        assert_eq!(prod.count, 1);
        assert_close(prod.cost, 10.0);
        assert_close(prod.hourly, 1.0);
        assert_close(prod.monthly, 720.0);

        let none = aggregates.none_bucket("env").unwrap();
        assert_eq!(none.count, 0);
        assert_close(none.cost, 0.0);
        assert_close(none.monthly, 0.0);
        assert_eq!(aggregates.len(), 2);
    }

    #[test]
    fn test_record_missing_key_goes_to_none() {
        let records = vec![
            ResourceRecord::new("a", 5.0, 0.5).with_tag("env", "prod"),
            ResourceRecord::new("b", 3.0, 0.2),
        ];
        let aggregates = aggregate(&records);

        let prod = aggregates.get("env", "prod").unwrap();
        assert_eq!(prod.count, 1);
        assert_close(prod.cost, 5.0);

        let none = aggregates.none_bucket("env").unwrap();
        assert_eq!(none.count, 1);
        assert_close(none.cost, 3.0);
        assert_close(none.hourly, 0.2);
        assert_close(none.monthly, 144.0);
    }

    #[test]
    fn test_key_discovered_late_counts_earlier_records() {
        let records = vec![
            ResourceRecord::new("a", 1.0, 0.1),
            ResourceRecord::new("b", 2.0, 0.2),
            ResourceRecord::new("c", 4.0, 0.4).with_tag("cost_center", "42"),
        ];
        let aggregates = aggregate(&records);

        let none = aggregates.none_bucket("cost_center").unwrap();
        assert_eq!(none.count, 2);
        assert_close(none.cost, 3.0);
        assert_close(none.hourly, 0.3);
    }

    #[test]
    fn test_total_accounting_per_key() {
        let records = sample_records();
        let aggregates = aggregate(&records);

        for key in aggregates.keys() {
            let total: i64 = aggregates.values_for(key).map(|a| a.count).sum();
            assert_eq!(total, records.len() as i64, "key {key}");
        }
        assert_eq!(aggregates.key_count(), 3);
    }

    #[test]
    fn test_additivity() {
        let records = sample_records();
        let aggregates = aggregate(&records);

        for agg in &aggregates {
            let members: Vec<&ResourceRecord> = records
                .iter()
                .filter(|r| {
                    if agg.is_none_bucket() {
                        !r.has_tag_key(&agg.key)
                    } else {
                        r.tags.iter().any(|t| t.key == agg.key && t.value == agg.value)
                    }
                })
                .collect();

            assert_eq!(agg.count, members.len() as i64);
            assert_close(agg.cost, members.iter().map(|r| r.total_spend).sum());
            assert_close(agg.hourly, members.iter().map(|r| r.effective_hourly).sum());
            assert_close(agg.monthly, members.iter().map(|r| r.effective_hourly * 720.0).sum());
        }
    }

    #[test]
    fn test_values_compared_exactly() {
        let records = vec![
            ResourceRecord::new("a", 1.0, 0.0).with_tag("env", "Prod"),
            ResourceRecord::new("b", 1.0, 0.0).with_tag("env", "prod"),
            ResourceRecord::new("c", 1.0, 0.0).with_tag("env", "prod "),
        ];
        let aggregates = aggregate(&records);

        assert_eq!(aggregates.get("env", "Prod").unwrap().count, 1);
        assert_eq!(aggregates.get("env", "prod").unwrap().count, 1);
        assert_eq!(aggregates.get("env", "prod ").unwrap().count, 1);
        assert_eq!(aggregates.none_bucket("env").unwrap().count, 0);
    }

    #[test]
    fn test_empty_key_accepted() {
        let records = vec![
            ResourceRecord::new("a", 1.0, 0.0).with_tag("", "x"),
            ResourceRecord::new("b", 2.0, 0.0),
        ];
        let aggregates = aggregate(&records);

        assert_eq!(aggregates.get("", "x").unwrap().count, 1);
        assert_eq!(aggregates.none_bucket("").unwrap().count, 1);
    }

    #[test]
    fn test_literal_none_value_shares_bucket() {
        let records = vec![
            ResourceRecord::new("a", 1.0, 0.0).with_tag("env", "none"),
            ResourceRecord::new("b", 2.0, 0.0),
        ];
        let aggregates = aggregate(&records);

        let none = aggregates.none_bucket("env").unwrap();
        assert_eq!(none.count, 2);
        assert_close(none.cost, 3.0);
        assert_eq!(aggregates.len(), 1);
    }

    #[test]
    fn test_idempotent() {
        let records = sample_records();
        assert_eq!(aggregate(&records), aggregate(&records));
    }

    #[test]
    fn test_sorted_order() {
        let aggregates = aggregate(&sample_records());
        let rows: Vec<(&str, &str)> = aggregates
            .sorted()
            .into_iter()
            .map(|a| (a.key.as_str(), a.value.as_str()))
            .collect();

        assert_eq!(
            rows,
            vec![
                ("env", "dev"),
                ("env", "none"),
                ("env", "prod"),
                ("owner", "alice"),
                ("owner", "none"),
                ("team", "core"),
                ("team", "none"),
            ]
        );
    }
}
