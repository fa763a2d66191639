//! reindex - keep the Alippo search index in sync with the catalogue
//!
//! Pulls categories, courses and global-search entries from the Alippo API
//! and upserts them into Elasticsearch, optionally fanning course pages out
//! over a Redis job queue to several worker processes.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;
mod meta;

use cmd::App;
use config::Config;

#[derive(Parser)]
#[command(name = "reindex")]
#[command(about = "Reindex Alippo catalogue data into the search index")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./reindex.toml or ~/.config/reindex/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Reindex categories
    Categories(cmd::reindex::EntityArgs),
    /// Reindex courses, optionally partitioned over the job queue
    Courses(cmd::reindex::CoursesArgs),
    /// Reindex global search entries
    Global(cmd::reindex::EntityArgs),
    /// Reindex categories then courses, removing stale documents
    #[command(name = "fullreindex")]
    FullReindex(cmd::reindex::FullReindexArgs),
    /// Serve queued course refresh jobs until interrupted
    #[command(name = "productsworker")]
    ProductsWorker(cmd::worker::WorkerArgs),
    /// Queue a course refresh for the products worker
    Refresh(cmd::worker::RefreshArgs),
    /// Remove documents not written by the given transaction
    Cleanup(cmd::cleanup::CleanupArgs),
    /// Show current configuration
    Config,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version print to stdout and succeed
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    // Progress context (TTY auto-detect)
    let progress = Arc::new(reindex_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug; progress bars show activity
    //   non-TTY: info unless --debug; logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    reindex_core::init_logging(quiet, cli.debug, multi);

    if let Err(e) = run(cli, progress) {
        log::error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli, progress: reindex_core::SharedProgress) -> Result<()> {
    let mut config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };
    config.apply_env()?;

    if let Command::Config = cli.command {
        print_config(&config);
        return Ok(());
    }

    let shutdown = reindex_core::Shutdown::new();
    shutdown.register_signals()?;

    let app = App {
        config,
        progress,
        shutdown,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(dispatch(cli.command, &app))
}

async fn dispatch(command: Command, app: &App) -> Result<()> {
    match command {
        Command::Categories(args) => cmd::reindex::categories(args, app).await,
        Command::Courses(args) => cmd::reindex::courses(args, app).await,
        Command::Global(args) => cmd::reindex::global(args, app).await,
        Command::FullReindex(args) => cmd::reindex::full_reindex(args, app).await,
        Command::ProductsWorker(args) => cmd::worker::products_worker(args, app).await,
        Command::Refresh(args) => cmd::worker::refresh(args, app).await,
        Command::Cleanup(args) => cmd::cleanup::run(args, app).await,
        Command::Config => Ok(()),
    }
}

fn print_config(config: &Config) {
    use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    table.add_row(vec!["Search index URL", &config.index.url]);
    table.add_row(vec!["Index name", &config.index.name]);
    table.add_row(vec!["Alippo API URL", &config.alippo.url]);
    table.add_row(vec!["Queue backend", &config.queue.backend.to_string()]);
    table.add_row(vec![
        "Redis",
        &format!(
            "{}:{} db {}",
            config.redis.host, config.redis.port, config.redis.db
        ),
    ]);
    table.add_row(vec![
        "Redis auth",
        if config.redis.auth.is_some() {
            "configured"
        } else {
            "not set"
        },
    ]);
    table.add_row(vec![
        "Exit delay",
        &format!("{}ms", config.run.time_to_exit_ms),
    ]);
    table.add_row(vec![
        "Poll interval",
        &format!("{}ms", config.run.poll_interval_ms),
    ]);
    table.add_row(vec![
        "Claim lease",
        &format!("{}ms", config.run.claim_lease_ms),
    ]);
    table.add_row(vec![
        "Index metadata",
        &config.run.index_meta_path.display().to_string(),
    ]);

    eprintln!("\n{table}");
}
