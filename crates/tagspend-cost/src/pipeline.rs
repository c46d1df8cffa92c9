//! Store → aggregate → filter → sink.
//!
//! The aggregator itself never touches storage. This module defines the two
//! storage capabilities it is wired between ([`RecordStore`] and
//! [`AggregateSink`]) and the glue that applies the [`ExclusionList`] to the
//! aggregator output before anything is written.

use tracing::{debug, info, warn};

use crate::aggregator::{TagAggregates, aggregate};
use crate::error::{CostError, Result};
use crate::exclusion::ExclusionList;
use crate::models::{ResourceRecord, TagAggregate};

/// Source of tagged resource records.
pub trait RecordStore {
    /// Every stored record with its tags attached.
    fn read_all_records(&self) -> Result<Vec<ResourceRecord>>;

    /// Insert or replace the record with the same identifier, tags included.
    fn upsert_record(&self, record: &ResourceRecord) -> Result<()>;
}

/// Destination for aggregate rows, keyed by (key, value).
pub trait AggregateSink {
    /// Insert or overwrite the stored row for (`aggregate.key`, `aggregate.value`).
    fn upsert_aggregate(&self, aggregate: &TagAggregate) -> Result<()>;
}

/// A single aggregate row the sink rejected.
#[derive(Debug)]
pub struct PublishFailure {
    pub key: String,
    pub value: String,
    pub error: CostError,
}

/// Outcome of publishing one aggregation run.
#[derive(Debug, Default)]
pub struct PublishReport {
    /// Rows the sink accepted
    pub written: usize,

    /// Rows skipped because their key is excluded
    pub excluded: usize,

    pub failures: Vec<PublishFailure>,
}

impl PublishReport {
    /// True if every permitted row was written.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Rows handed to the sink.
    pub fn attempted(&self) -> usize {
        self.written + self.failures.len()
    }
}

/// Upsert every record, stopping at the first failure.
pub fn ingest_records<S>(store: &S, records: &[ResourceRecord]) -> Result<usize>
where
    S: RecordStore + ?Sized,
{
    for record in records {
        store.upsert_record(record)?;
    }
    debug!(count = records.len(), "Ingested records");
    Ok(records.len())
}

/// Write the permitted rows of `aggregates` to `sink`.
///
/// Rows are independent: a failed upsert is recorded in the report and the
/// remaining rows are still written.
pub fn publish_aggregates<S>(
    aggregates: &TagAggregates,
    exclusions: &ExclusionList,
    sink: &S,
) -> PublishReport
where
    S: AggregateSink + ?Sized,
{
    let mut report = PublishReport::default();

    for row in aggregates.sorted() {
        if !exclusions.permits(row) {
            report.excluded += 1;
            continue;
        }

        match sink.upsert_aggregate(row) {
            Ok(()) => report.written += 1,
            Err(error) => {
                warn!(key = %row.key, value = %row.value, error = %error, "Failed to persist tag aggregate");
                report.failures.push(PublishFailure {
                    key: row.key.clone(),
                    value: row.value.clone(),
                    error,
                });
            }
        }
    }

    report
}

/// Run one full aggregation: read every record, aggregate, publish.
///
/// A read failure is returned before any aggregation happens.
pub fn run_aggregation<St, Si>(
    store: &St,
    sink: &Si,
    exclusions: &ExclusionList,
) -> Result<PublishReport>
where
    St: RecordStore + ?Sized,
    Si: AggregateSink + ?Sized,
{
    let records = store.read_all_records()?;
    let aggregates = aggregate(&records);
    let report = publish_aggregates(&aggregates, exclusions, sink);

    info!(
        records = records.len(),
        keys = aggregates.key_count(),
        written = report.written,
        excluded = report.excluded,
        failed = report.failures.len(),
        "Aggregation run finished"
    );

    Ok(report)
}
