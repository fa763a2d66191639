//! `productsworker` and `refresh` subcommands

use anyhow::Result;
use clap::Args;

use reindex_alippo::{AlippoAdapters, DEFAULT_ADAPTER, adapter_for};
use reindex_core::{EntityType, fmt_num};

use super::App;

#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    /// Adapter used for jobs that do not name one
    #[arg(long, default_value = DEFAULT_ADAPTER)]
    pub adapter: String,

    /// Jobs processed concurrently
    #[arg(long, default_value_t = 1)]
    pub partitions: usize,
}

#[derive(Args, Debug, Clone)]
pub struct RefreshArgs {
    /// Comma separated course ids to refresh
    #[arg(long, value_delimiter = ',', required = true)]
    pub skus: Vec<String>,

    /// Adapter the worker should use for this job
    #[arg(long, default_value = DEFAULT_ADAPTER)]
    pub adapter: String,
}

/// Serve course refresh jobs until SIGTERM/SIGINT.
pub async fn products_worker(args: WorkerArgs, app: &App) -> Result<()> {
    app.require_shared_queue("productsworker")?;
    // Fail on a bad default before waiting on the queue
    adapter_for(&args.adapter, EntityType::Course)?;

    let runtime = app.runtime(None, true).await?;
    let resolver = AlippoAdapters::new(args.adapter);
    let tally = runtime
        .run_refresh_worker(EntityType::Course, args.partitions, &resolver)
        .await;
    log::info!(
        "Refresh worker stopped after {} pages ({} failed), {} documents written",
        tally.pages,
        tally.failed_pages,
        fmt_num(tally.written)
    );
    Ok(())
}

/// Queue a course refresh for a running `productsworker`.
pub async fn refresh(args: RefreshArgs, app: &App) -> Result<()> {
    app.require_shared_queue("refresh")?;
    adapter_for(&args.adapter, EntityType::Course)?;

    let runtime = app.runtime(None, true).await?;
    let job = runtime
        .enqueue_refresh(EntityType::Course, args.skus, Some(args.adapter))
        .await?;
    eprintln!("Queued {}", job.id);
    Ok(())
}
