//! # tagspend-cost
//!
//! Per-tag cost aggregation for cloud resource inventories.
//!
//! This crate provides:
//! - [`aggregate`] - turn tagged records into per (key, value) statistics,
//!   with a `"none"` bucket per key for resources missing it
//! - [`ExportParser`] - read resource records from cost-export JSON
//! - [`TagCostDatabase`] - SQLite storage for records and aggregates
//! - [`run_aggregation`] - read, aggregate, filter by [`ExclusionList`], persist
//! - [`TagQuery`] - read-side queries over persisted aggregates
//! - [`AggregationScheduler`] - periodic re-aggregation on tokio
//!
//! ## Example
//!
//! ```no_run
//! use tagspend_cost::{ExclusionList, ExportParser, TagCostDatabase, TagQuery};
//! use tagspend_cost::pipeline::{ingest_records, run_aggregation};
//!
//! fn main() -> anyhow::Result<()> {
//!     let db = TagCostDatabase::open("tagspend.db")?;
//!
//!     let records = ExportParser::new().parse_path("exports/")?;
//!     ingest_records(&db, &records)?;
//!
//!     let exclusions: ExclusionList = ["tag_user_Name"].into_iter().collect();
//!     let report = run_aggregation(&db, &db, &exclusions)?;
//!     println!("wrote {} aggregate rows", report.written);
//!
//!     for row in TagQuery::new(&db).values_for_key("tag_user_env")? {
//!         println!("{}={} {:.2}", row.key, row.value, row.cost);
//!     }
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod db;
pub mod error;
pub mod exclusion;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod query;
pub mod scheduler;

// Re-export main types
pub use aggregator::{TagAggregates, aggregate};
pub use db::TagCostDatabase;
pub use error::{CostError, Result};
pub use exclusion::ExclusionList;
pub use models::{HOURS_PER_MONTH, NONE_VALUE, ResourceRecord, Tag, TagAggregate};
pub use parser::ExportParser;
pub use pipeline::{AggregateSink, PublishReport, RecordStore, run_aggregation};
pub use query::TagQuery;
pub use scheduler::AggregationScheduler;
