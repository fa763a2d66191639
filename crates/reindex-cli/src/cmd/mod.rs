//! Subcommands and the wiring they share

pub mod cleanup;
pub mod reindex;
pub mod worker;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use reindex_alippo::AlippoClient;
use reindex_core::{
    JobQueue, MemoryJobQueue, OrchestratorRuntime, RuntimeSettings, SharedProgress, Shutdown,
};
use reindex_elastic::ElasticIndex;
use reindex_redis::{RedisJobQueue, RedisSettings};

use crate::config::{Config, QueueBackend};

/// Process-wide handles every command needs.
pub struct App {
    pub config: Config,
    pub progress: SharedProgress,
    pub shutdown: Shutdown,
}

impl App {
    pub fn settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            poll_interval: self.config.run.poll_interval(),
            exit_delay: self.config.run.exit_delay(),
            claim_lease: self.config.run.claim_lease(),
        }
    }

    async fn queue(&self) -> Result<Arc<dyn JobQueue>> {
        Ok(match self.config.queue.backend {
            QueueBackend::Redis => {
                let redis = &self.config.redis;
                let settings = RedisSettings {
                    host: redis.host.clone(),
                    port: redis.port,
                    auth: redis.auth.clone(),
                    db: redis.db,
                };
                Arc::new(RedisJobQueue::connect(&settings).await?)
            }
            QueueBackend::Memory => Arc::new(MemoryJobQueue::new()),
        })
    }

    /// Build a runtime against the configured source, index and queue.
    ///
    /// `bar` names the page progress bar; `None` runs without one. Runs that
    /// never touch the queue (`uses_queue = false`) get a throwaway in-process
    /// one instead of a Redis connection.
    pub async fn runtime(&self, bar: Option<&str>, uses_queue: bool) -> Result<OrchestratorRuntime> {
        let source = AlippoClient::new(self.config.alippo.url.as_str())
            .context("Failed to set up the Alippo client")?;
        log::debug!("Alippo API at {}", source.base_url());
        let index = ElasticIndex::new(&self.config.index.url, &self.config.index.name)
            .context("Failed to set up the search index")?;
        let queue: Arc<dyn JobQueue> = if uses_queue {
            self.queue().await?
        } else {
            Arc::new(MemoryJobQueue::new())
        };

        let mut runtime = OrchestratorRuntime::new(Arc::new(source), Arc::new(index), queue)
            .with_settings(self.settings())
            .with_shutdown(self.shutdown.clone());
        if let Some(name) = bar {
            runtime = runtime.with_progress(self.progress.page_bar(name));
        }
        Ok(runtime)
    }

    /// A worker that only attaches to a queue needs one other processes can reach.
    pub fn require_shared_queue(&self, what: &str) -> Result<()> {
        if self.config.queue.backend == QueueBackend::Memory {
            anyhow::bail!("{what} needs the redis queue backend (queue.backend = \"memory\")");
        }
        Ok(())
    }

    /// Wait out the exit delay with a status line on a TTY.
    pub async fn drain(&self, runtime: &OrchestratorRuntime) {
        let line = self.progress.stage_line("exit");
        line.set_message(format!(
            "waiting {}s for the index to commit",
            runtime.settings().exit_delay.as_secs()
        ));
        runtime.drain().await;
        line.finish_and_clear();
    }
}

/// Parser for the `true`/`false` valued flags (`--removeNonExistent false`).
pub fn bool_value() -> BoolishValueParser {
    BoolishValueParser::new()
}

/// Print a key-value summary table on stderr
pub fn print_summary(title: &str, rows: &[(&str, String)]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new(title).fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);
    for (label, value) in rows {
        table.add_row(vec![Cell::new(label), Cell::new(value)]);
    }
    eprintln!("\n{table}");
}
