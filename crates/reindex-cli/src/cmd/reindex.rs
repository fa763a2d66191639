//! `categories`, `courses`, `global` and `fullreindex` subcommands

use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{ArgAction, Args};

use reindex_alippo::{DEFAULT_ADAPTER, adapter_for};
use reindex_core::{
    EntityType, OrchestratorRuntime, ReindexRequest, RunMode, RunReport, fmt_num, select_mode,
};

use super::{App, bool_value, print_summary};
use crate::meta::{IndexMeta, record_run};

#[derive(Args, Debug, Clone)]
pub struct EntityArgs {
    /// Adapter family
    #[arg(long, default_value = DEFAULT_ADAPTER)]
    pub adapter: String,

    /// Delete documents this run did not write (true|false)
    #[arg(long = "removeNonExistent", value_parser = bool_value(), action = ArgAction::Set, default_value = "false")]
    pub remove_non_existent: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CoursesArgs {
    #[command(flatten)]
    pub entity: EntityArgs,

    /// Number of partitions (worker lanes); more than one enables queue mode
    #[arg(long, default_value_t = 1)]
    pub partitions: usize,

    /// Records per page
    #[arg(long = "partitionSize", default_value_t = 50, value_parser = clap::value_parser!(u32).range(1..))]
    pub partition_size: u32,

    /// Plan the run and fill the queue; false attaches as a worker only (true|false)
    #[arg(long = "initQueue", value_parser = bool_value(), action = ArgAction::Set, default_value = "true")]
    pub init_queue: bool,

    /// Comma separated course ids to refresh
    #[arg(long, value_delimiter = ',')]
    pub skus: Vec<String>,

    /// Only records updated after this time (RFC 3339, YYYY-MM-DD, epoch ms, or "last")
    #[arg(long = "updatedAfter", value_parser = parse_updated_after)]
    pub updated_after: Option<UpdatedAfter>,

    /// Fetch only this page
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub page: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct FullReindexArgs {
    /// Adapter family
    #[arg(long, default_value = DEFAULT_ADAPTER)]
    pub adapter: String,

    #[arg(long, default_value_t = 1)]
    pub partitions: usize,

    #[arg(long = "partitionSize", default_value_t = 50, value_parser = clap::value_parser!(u32).range(1..))]
    pub partition_size: u32,

    #[arg(long = "initQueue", value_parser = bool_value(), action = ArgAction::Set, default_value = "true")]
    pub init_queue: bool,

    #[arg(long, value_delimiter = ',')]
    pub skus: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatedAfter {
    /// Start of the last recorded run of the same entity type
    Last,
    At(DateTime<Utc>),
}

pub fn parse_updated_after(s: &str) -> Result<UpdatedAfter, String> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("last") {
        return Ok(UpdatedAfter::Last);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(UpdatedAfter::At(dt.with_timezone(&Utc)));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(UpdatedAfter::At(date.and_time(NaiveTime::MIN).and_utc()));
    }
    if let Some(dt) = s.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis) {
        return Ok(UpdatedAfter::At(dt));
    }
    Err(format!(
        "expected an RFC 3339 timestamp, YYYY-MM-DD, epoch milliseconds or 'last', got '{s}'"
    ))
}

fn resolve_updated_after(
    app: &App,
    entity: EntityType,
    updated_after: Option<UpdatedAfter>,
) -> Result<Option<DateTime<Utc>>> {
    match updated_after {
        None => Ok(None),
        Some(UpdatedAfter::At(at)) => Ok(Some(at)),
        Some(UpdatedAfter::Last) => {
            let path = &app.config.run.index_meta_path;
            let last = IndexMeta::load(path)?.last_started(entity);
            match last {
                Some(at) => log::info!("{entity}: delta sync from last run at {at}"),
                None => log::warn!(
                    "{entity}: no previous run recorded in {}, running a full reindex",
                    path.display()
                ),
            }
            Ok(last)
        }
    }
}

fn clean_skus(skus: Vec<String>) -> Vec<String> {
    skus.into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Run one entity reindex and record it; returns the runtime for draining.
async fn run_entity(
    app: &App,
    entity: EntityType,
    adapter_name: &str,
    req: &ReindexRequest,
) -> Result<(RunReport, OrchestratorRuntime)> {
    let adapter = adapter_for(adapter_name, entity)?;
    let partitioned = select_mode(adapter.as_ref(), req) == RunMode::Partitioned;
    if partitioned && !req.init_queue {
        app.require_shared_queue("worker-only mode (--initQueue false)")?;
    }

    let runtime = app.runtime(Some(entity.name()), partitioned).await?;
    let report = runtime.reindex(adapter, req).await?;

    if !report.interrupted {
        record_run(&app.config.run.index_meta_path, &report);
    }
    if app.progress.is_tty() {
        print_report(&report);
    }
    Ok((report, runtime))
}

fn print_report(report: &RunReport) {
    let tally = &report.tally;
    print_summary(
        &report.entity.to_string(),
        &[
            ("Transaction key", report.transaction_key.to_string()),
            (
                "Pages",
                format!("{} ({} failed)", tally.pages, tally.failed_pages),
            ),
            (
                "Documents",
                format!(
                    "{} written, {} skipped, {} write errors",
                    fmt_num(tally.written),
                    tally.skipped,
                    tally.write_errors
                ),
            ),
            ("Retries", tally.retries.to_string()),
            (
                "Removed",
                report
                    .deleted
                    .map_or_else(|| "-".to_string(), |d| fmt_num(d as usize)),
            ),
        ],
    );
}

async fn simple(app: &App, entity: EntityType, args: EntityArgs) -> Result<()> {
    let req = ReindexRequest {
        remove_non_existent: args.remove_non_existent,
        ..Default::default()
    };
    let (_, runtime) = run_entity(app, entity, &args.adapter, &req).await?;
    app.drain(&runtime).await;
    Ok(())
}

pub async fn categories(args: EntityArgs, app: &App) -> Result<()> {
    simple(app, EntityType::Category, args).await
}

pub async fn global(args: EntityArgs, app: &App) -> Result<()> {
    simple(app, EntityType::GlobalSearch, args).await
}

pub async fn courses(args: CoursesArgs, app: &App) -> Result<()> {
    let entity = EntityType::Course;
    let req = ReindexRequest {
        partitions: args.partitions.max(1),
        page_size: args.partition_size,
        init_queue: args.init_queue,
        remove_non_existent: args.entity.remove_non_existent,
        updated_after: resolve_updated_after(app, entity, args.updated_after)?,
        page: args.page,
        skus: clean_skus(args.skus),
    };
    let (_, runtime) = run_entity(app, entity, &args.entity.adapter, &req).await?;
    app.drain(&runtime).await;
    Ok(())
}

/// Categories, then courses, both with cleanup; one drain at the end.
pub async fn full_reindex(args: FullReindexArgs, app: &App) -> Result<()> {
    let categories = ReindexRequest {
        remove_non_existent: true,
        ..Default::default()
    };
    run_entity(app, EntityType::Category, &args.adapter, &categories).await?;

    if app.shutdown.is_requested() {
        log::warn!("Shutdown requested, skipping courses");
        return Ok(());
    }

    log::info!("Starting full courses reindex");
    let courses = ReindexRequest {
        partitions: args.partitions.max(1),
        page_size: args.partition_size,
        init_queue: args.init_queue,
        remove_non_existent: true,
        skus: clean_skus(args.skus),
        ..Default::default()
    };
    let (_, runtime) = run_entity(app, EntityType::Course, &args.adapter, &courses).await?;
    app.drain(&runtime).await;
    Ok(())
}
