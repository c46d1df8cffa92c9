//! Data models for tag cost tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hours in the 30-day month used for monthly projections.
pub const HOURS_PER_MONTH: f64 = 24.0 * 30.0;

/// Value of the synthetic bucket holding records that lack a tag key.
pub const NONE_VALUE: &str = "none";

/// A key/value label attached to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    #[serde(rename = "vendorKey")]
    pub key: String,

    #[serde(rename = "vendorValue")]
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One cost-bearing resource (e.g. a cloud instance) and its tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    /// Vendor identifier, unique across the inventory
    pub resource_identifier: String,

    /// Cumulative spend for the resource
    #[serde(default)]
    pub total_spend: f64,

    /// Effective hourly rate
    #[serde(default)]
    pub effective_hourly: f64,

    #[serde(default)]
    pub tags: Vec<Tag>,

    /// Service family (e.g. "ec2")
    #[serde(default)]
    pub service: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub vendor_account_id: String,

    /// Cloud provider (e.g. "Amazon")
    #[serde(default)]
    pub provider: String,

    #[serde(default)]
    pub region: String,

    #[serde(default)]
    pub os: String,

    /// Instance size (e.g. "m5.large")
    #[serde(default)]
    pub node_type: String,

    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,

    #[serde(default)]
    pub hours_running: i64,
}

impl ResourceRecord {
    /// Create a record with the fields aggregation depends on.
    pub fn new(resource_identifier: impl Into<String>, total_spend: f64, effective_hourly: f64) -> Self {
        Self {
            resource_identifier: resource_identifier.into(),
            total_spend,
            effective_hourly,
            tags: Vec::new(),
            service: String::new(),
            name: String::new(),
            vendor_account_id: String::new(),
            provider: String::new(),
            region: String::new(),
            os: String::new(),
            node_type: String::new(),
            last_seen: None,
            hours_running: 0,
        }
    }

    /// Attach a tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(key, value));
        self
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set provider and region.
    pub fn with_location(mut self, provider: impl Into<String>, region: impl Into<String>) -> Self {
        self.provider = provider.into();
        self.region = region.into();
        self
    }

    /// True if any tag on this record uses `key`.
    pub fn has_tag_key(&self, key: &str) -> bool {
        self.tags.iter().any(|t| t.key == key)
    }

    /// Hourly rate projected over a 30-day month.
    pub fn monthly_spend(&self) -> f64 {
        self.effective_hourly * HOURS_PER_MONTH
    }
}

/// Accumulated statistics for one (tag key, tag value) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagAggregate {
    pub key: String,
    pub value: String,

    /// Number of records in this bucket
    pub count: i64,

    /// Sum of total spend
    pub cost: f64,

    /// Sum of effective hourly rates
    pub hourly: f64,

    /// Sum of monthly projections (hourly x 720)
    pub monthly: f64,
}

impl TagAggregate {
    /// Empty bucket for (key, value).
    pub fn empty(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            count: 0,
            cost: 0.0,
            hourly: 0.0,
            monthly: 0.0,
        }
    }

    /// Empty `"none"` bucket for `key`.
    pub fn none_bucket(key: impl Into<String>) -> Self {
        Self::empty(key, NONE_VALUE)
    }

    /// Count `record` into this bucket.
    pub fn add_record(&mut self, record: &ResourceRecord) {
        self.count += 1;
        self.cost += record.total_spend;
        self.hourly += record.effective_hourly;
        self.monthly += record.monthly_spend();
    }

    /// True for the synthetic missing-key bucket.
    pub fn is_none_bucket(&self) -> bool {
        self.value == NONE_VALUE
    }
}
