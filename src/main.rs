//! tagspend - per-tag cost aggregation for cloud resource inventories
//!
//! ## Usage
//!
//! ```bash
//! # Load a cost export (file or directory of .json files)
//! tagspend ingest exports/
//!
//! # Recompute and persist tag aggregates
//! tagspend aggregate
//!
//! # Both in one step
//! tagspend run exports/
//!
//! # Show persisted aggregates
//! tagspend tags --key tag_user_env --limit 10
//!
//! # Re-aggregate every 5 minutes until Ctrl-C
//! tagspend watch --interval-secs 300
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tagspend_config::{Config, ConfigError};
use tagspend_core::{CoreError, LogGuard, init_logging};
use tagspend_cost::{
    AggregationScheduler, ExclusionList, ExportParser, PublishReport, TagAggregate,
    TagCostDatabase, TagQuery, run_aggregation,
};
use tracing::{error, info, warn};

/// Per-tag cost aggregation
///
/// Ingests cost exports into SQLite and keeps per (tag key, tag value)
/// spend statistics up to date.
#[derive(Parser, Debug)]
#[command(name = "tagspend")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging (increases log level)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory for log files (defaults to ~/.tagspend/logs/)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Config file (defaults to ~/.tagspend/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse an export file or directory and store its records
    Ingest {
        /// Export file, or directory of .json exports
        path: PathBuf,
    },

    /// Aggregate all stored records and persist the tag aggregates
    Aggregate,

    /// Ingest, then aggregate
    Run {
        /// Export file, or directory of .json exports
        path: PathBuf,
    },

    /// Print persisted tag aggregates
    Tags {
        /// Only show values of this key, most expensive first
        #[arg(long)]
        key: Option<String>,

        /// Maximum values to show with --key
        #[arg(long, requires = "key")]
        limit: Option<usize>,
    },

    /// Re-aggregate on an interval until interrupted
    Watch {
        /// Seconds between runs (defaults to the configured interval)
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            if let ConfigError::Core(core) = &e {
                print_guidance(core);
            }
            return ExitCode::from(1);
        }
    };

    let _guard = match setup_logging(&cli, &config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            print_guidance(&e);
            return ExitCode::from(1);
        }
    };

    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // The console layer writes this to stderr
            error!("tagspend error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn print_guidance(err: &CoreError) {
    if let Some(hint) = err.guidance() {
        eprintln!("  hint: {}", hint);
    }
}

/// Set up logging; `--log-dir` wins over the configured directory.
fn setup_logging(cli: &Cli, config: &Config) -> tagspend_core::Result<LogGuard> {
    let log_dir = cli.log_dir.clone().or_else(|| config.logging.dir.clone());
    init_logging(log_dir, cli.verbose > 0)
}

fn open_database(config: &Config) -> anyhow::Result<TagCostDatabase> {
    let path = &config.database.path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory {}", parent.display()))?;
    }
    TagCostDatabase::open(path).with_context(|| format!("opening database {}", path.display()))
}

fn run(command: Command, config: &Config) -> anyhow::Result<()> {
    let exclusions: ExclusionList = config.aggregation.excluded_keys.iter().cloned().collect();

    match command {
        Command::Ingest { path } => {
            let db = open_database(config)?;
            ingest(&db, &path)?;
        }
        Command::Aggregate => {
            let db = open_database(config)?;
            aggregate_and_report(&db, &exclusions)?;
        }
        Command::Run { path } => {
            let db = open_database(config)?;
            ingest(&db, &path)?;
            aggregate_and_report(&db, &exclusions)?;
        }
        Command::Tags { key, limit } => {
            let db = open_database(config)?;
            print_tags(&db, key.as_deref(), limit)?;
        }
        Command::Watch { interval_secs } => {
            let db = Arc::new(open_database(config)?);
            let interval =
                Duration::from_secs(interval_secs.unwrap_or(config.aggregation.interval_secs));
            watch(db, exclusions, interval)?;
        }
    }

    Ok(())
}

fn ingest(db: &TagCostDatabase, path: &Path) -> anyhow::Result<usize> {
    let records = ExportParser::new()
        .parse_path(path)
        .with_context(|| format!("parsing export {}", path.display()))?;
    let count = db.upsert_records(&records).context("storing records")?;

    info!(path = %path.display(), count, "Ingested export");
    println!("Ingested {} records from {}", count, path.display());
    Ok(count)
}

fn aggregate_and_report(db: &TagCostDatabase, exclusions: &ExclusionList) -> anyhow::Result<()> {
    let report = run_aggregation(db, db, exclusions).context("aggregating tag costs")?;
    print_report(&report);

    if !report.is_complete() {
        anyhow::bail!("{} aggregate rows failed to persist", report.failures.len());
    }
    Ok(())
}

fn print_report(report: &PublishReport) {
    println!(
        "Wrote {} tag aggregates ({} excluded, {} failed)",
        report.written,
        report.excluded,
        report.failures.len()
    );
    for failure in &report.failures {
        println!("  failed {}={}: {}", failure.key, failure.value, failure.error.friendly_message());
    }
}

fn print_tags(db: &TagCostDatabase, key: Option<&str>, limit: Option<usize>) -> anyhow::Result<()> {
    let rows = match key {
        Some(key) => TagQuery::new(db).top_values_by_cost(key, limit)?,
        None => db.list_tag_aggregates()?,
    };

    if rows.is_empty() {
        println!("No tag aggregates stored. Run `tagspend aggregate` first.");
        return Ok(());
    }

    println!(
        "{:<32} {:<32} {:>7} {:>12} {:>10} {:>12}",
        "KEY", "VALUE", "COUNT", "COST", "HOURLY", "MONTHLY"
    );
    for row in &rows {
        print_row(row);
    }
    Ok(())
}

fn print_row(row: &TagAggregate) {
    println!(
        "{:<32} {:<32} {:>7} {:>12.2} {:>10.4} {:>12.2}",
        row.key, row.value, row.count, row.cost, row.hourly, row.monthly
    );
}

fn watch(db: Arc<TagCostDatabase>, exclusions: ExclusionList, interval: Duration) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;

    runtime.block_on(async move {
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let handle = AggregationScheduler::new(db, exclusions)
            .with_interval(interval)
            .start(shutdown_rx);

        println!("Aggregating every {}s, press Ctrl-C to stop", interval.as_secs());
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C, stopping scheduler");
        }

        info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
        handle.await.context("scheduler task failed")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_tags_with_limit() {
        let cli = Cli::parse_from(["tagspend", "-v", "tags", "--key", "env", "--limit", "3"]);
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Command::Tags { key, limit } => {
                assert_eq!(key.as_deref(), Some("env"));
                assert_eq!(limit, Some(3));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_limit_requires_key() {
        assert!(Cli::try_parse_from(["tagspend", "tags", "--limit", "3"]).is_err());
    }

    #[test]
    fn test_ingest_directory_stores_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let exports = dir.path().join("exports");
        std::fs::create_dir(&exports).unwrap();
        std::fs::write(
            exports.join("a.json"),
            r#"[{"resourceIdentifier": "i-1", "totalSpend": 1.0},
                {"resourceIdentifier": "i-2", "totalSpend": 2.0}]"#,
        )
        .unwrap();
        std::fs::write(
            exports.join("b.json"),
            r#"{"results": [{"resourceIdentifier": "i-3", "totalSpend": 3.0}]}"#,
        )
        .unwrap();

        let db = TagCostDatabase::open(dir.path().join("tagspend.db")).unwrap();
        assert_eq!(ingest(&db, &exports).unwrap(), 3);
        assert_eq!(db.count_records().unwrap(), 3);
    }

    #[test]
    fn test_run_ingest_and_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        let export = dir.path().join("export.json");
        std::fs::write(
            &export,
            r#"[{"resourceIdentifier": "i-1", "totalSpend": 4.0, "effectiveHourly": 0.5,
                 "tags": [{"vendorKey": "env", "vendorValue": "prod"}]},
                {"resourceIdentifier": "i-2", "totalSpend": 1.0}]"#,
        )
        .unwrap();

        let mut config = Config::default();
        config.database.path = dir.path().join("db").join("tagspend.db");

        run(Command::Run { path: export }, &config).unwrap();

        let db = TagCostDatabase::open(&config.database.path).unwrap();
        let none = db.get_tag_aggregate("env", "none").unwrap().unwrap();
        assert_eq!(none.count, 1);
    }
}
