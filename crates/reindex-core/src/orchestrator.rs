//! Reindex orchestration: mode selection, partitioned job fan-out, worker lanes,
//! completion watching and transaction-scoped cleanup.
//!
//! Single-process mode walks pages sequentially in one context. Partitioned mode
//! enqueues one job per page (all carrying the same transaction key), runs
//! `partitions` worker lanes against the queue, and, in the process that
//! planned the run, polls the queue until no job is outstanding before
//! cleaning up.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use indicatif::ProgressBar;
use tokio_util::sync::CancellationToken;

use crate::adapter::{EntityAdapter, EntityType};
use crate::context::{PageDescriptor, RunContext};
use crate::error::ReindexError;
use crate::index::IndexWriter;
use crate::pipeline::{PageReport, fetch_total_count, process_page};
use crate::plan::PagePlan;
use crate::progress::fmt_num;
use crate::queue::{Job, JobOutcome, JobPayload, JobQueue, page_topic, refresh_topic};
use crate::shutdown::Shutdown;
use crate::source::SourceClient;
use crate::transaction::TransactionKey;

/// Default queue poll interval for the completion watcher and idle lanes
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default grace period between completion and process exit
pub const DEFAULT_EXIT_DELAY: Duration = Duration::from_secs(30);

/// Default time a worker may hold a job before it is handed to another worker
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(600);

/// Timer settings of a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub poll_interval: Duration,
    /// Lets the index commit outstanding writes before the process exits
    pub exit_delay: Duration,
    /// A claim older than this is presumed lost with its worker and requeued
    pub claim_lease: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            exit_delay: DEFAULT_EXIT_DELAY,
            claim_lease: DEFAULT_CLAIM_LEASE,
        }
    }
}

/// What the operator asked for.
#[derive(Debug, Clone)]
pub struct ReindexRequest {
    pub partitions: usize,
    pub page_size: u32,
    /// This process plans the run and fills the queue (otherwise: worker only)
    pub init_queue: bool,
    pub remove_non_existent: bool,
    pub updated_after: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub skus: Vec<String>,
}

impl Default for ReindexRequest {
    fn default() -> Self {
        Self {
            partitions: 1,
            page_size: 50,
            init_queue: true,
            remove_non_existent: false,
            updated_after: None,
            page: None,
            skus: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Single,
    Partitioned,
}

/// Choose between single-process and partitioned execution.
///
/// Partitioning needs more than one partition *and* a federated adapter; a
/// targeted run (explicit page or SKU set) is always single-process.
pub fn select_mode(adapter: &dyn EntityAdapter, req: &ReindexRequest) -> RunMode {
    let targeted = req.page.is_some() || !req.skus.is_empty();
    if req.partitions > 1 && adapter.is_federated() && !targeted {
        RunMode::Partitioned
    } else {
        RunMode::Single
    }
}

/// Page counters accumulated by a walk or a worker lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub pages: usize,
    pub failed_pages: usize,
    pub written: usize,
    pub skipped: usize,
    pub write_errors: usize,
    pub retries: u32,
}

impl Tally {
    pub fn add_page(&mut self, page: &PageReport) {
        self.pages += 1;
        self.written += page.written;
        self.skipped += page.skipped;
        self.write_errors += page.write_errors;
        self.retries += page.retries;
    }

    pub fn merge(&mut self, other: &Tally) {
        self.pages += other.pages;
        self.failed_pages += other.failed_pages;
        self.written += other.written;
        self.skipped += other.skipped;
        self.write_errors += other.write_errors;
        self.retries += other.retries;
    }
}

/// Outcome of one orchestrator invocation.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub entity: EntityType,
    pub mode: RunMode,
    pub transaction_key: TransactionKey,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub tally: Tally,
    /// Documents removed by cleanup; `None` when cleanup did not run
    pub deleted: Option<u64>,
    /// Stopped by a shutdown request before all pages were seen
    pub interrupted: bool,
}

impl RunReport {
    fn new(entity: EntityType, mode: RunMode, transaction_key: TransactionKey) -> Self {
        Self {
            entity,
            mode,
            transaction_key,
            started_at: Utc::now(),
            finished_at: None,
            tally: Tally::default(),
            deleted: None,
            interrupted: false,
        }
    }

    pub fn log(&self) {
        log::info!(
            "{} tsk={}: {} pages ({} failed), {} documents written, {} items skipped, {} retries{}",
            self.entity,
            self.transaction_key,
            self.tally.pages,
            self.tally.failed_pages,
            fmt_num(self.tally.written),
            self.tally.skipped,
            self.tally.retries,
            self.deleted
                .map(|d| format!(", {d} stale removed"))
                .unwrap_or_default()
        );
    }
}

/// Finds the adapter a job should run with.
pub trait AdapterResolver: Send + Sync {
    /// `name` is the adapter named in the job payload, if any.
    fn resolve(
        &self,
        name: Option<&str>,
        entity: EntityType,
    ) -> Result<Arc<dyn EntityAdapter>, ReindexError>;
}

/// A single adapter serves jobs of its own entity type only.
impl AdapterResolver for Arc<dyn EntityAdapter> {
    fn resolve(
        &self,
        _name: Option<&str>,
        entity: EntityType,
    ) -> Result<Arc<dyn EntityAdapter>, ReindexError> {
        if self.entity_type() == entity {
            Ok(Arc::clone(self))
        } else {
            Err(ReindexError::Configuration(format!(
                "{entity} job handed to a {} worker",
                self.entity_type()
            )))
        }
    }
}

/// Process-wide orchestration state, constructed once and passed by reference.
pub struct OrchestratorRuntime {
    source: Arc<dyn SourceClient>,
    index: Arc<dyn IndexWriter>,
    queue: Arc<dyn JobQueue>,
    settings: RuntimeSettings,
    shutdown: Shutdown,
    progress: ProgressBar,
}

impl OrchestratorRuntime {
    pub fn new(
        source: Arc<dyn SourceClient>,
        index: Arc<dyn IndexWriter>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            source,
            index,
            queue,
            settings: RuntimeSettings::default(),
            shutdown: Shutdown::new(),
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Page progress bar; length is set once the page count is known.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Reindex one entity type according to `req`.
    pub async fn reindex(
        &self,
        adapter: Arc<dyn EntityAdapter>,
        req: &ReindexRequest,
    ) -> Result<RunReport, ReindexError> {
        let report = match select_mode(adapter.as_ref(), req) {
            RunMode::Single => self.run_single(adapter.as_ref(), req).await?,
            RunMode::Partitioned => self.run_partitioned(adapter, req).await?,
        };
        report.log();
        Ok(report)
    }

    async fn run_single(
        &self,
        adapter: &dyn EntityAdapter,
        req: &ReindexRequest,
    ) -> Result<RunReport, ReindexError> {
        let entity = adapter.entity_type();
        let mut ctx = RunContext::new(TransactionKey::mint(), req.page_size);
        ctx.page = req.page;
        ctx.updated_after = req.updated_after;
        ctx.skus = req.skus.clone();

        log::info!(
            "{entity}: running in single process mode (tsk={}, page_size={})",
            ctx.transaction_key,
            ctx.page_size
        );
        if let Some(after) = ctx.updated_after {
            log::info!("{entity}: delta sync of records updated after {after}");
        }

        let mut report = RunReport::new(entity, RunMode::Single, ctx.transaction_key);
        report.interrupted = self.walk(adapter, &ctx, &mut report.tally).await?;

        let partial = ctx.is_partial() || report.interrupted;
        self.finish(entity, req.remove_non_existent, partial, &mut report)
            .await?;
        Ok(report)
    }

    /// Fetch the context's explicit page, or every page in order.
    ///
    /// Returns `true` if a shutdown request cut the walk short.
    async fn walk(
        &self,
        adapter: &dyn EntityAdapter,
        ctx: &RunContext,
        tally: &mut Tally,
    ) -> Result<bool, ReindexError> {
        let entity = adapter.entity_type();
        if let Some(page) = ctx.page {
            log::info!("{entity}: current page is {page} (page_size={})", ctx.page_size);
            self.progress.set_length(1);
            let report = self.run_page(adapter, ctx, page).await?;
            tally.add_page(&report);
            return Ok(false);
        }

        let mut page = 1;
        loop {
            let report = self.run_page(adapter, ctx, page).await?;
            tally.add_page(&report);
            if page == 1 {
                self.progress.set_length(u64::from(report.page_count.max(1)));
            }
            if !adapter.uses_paging() || page >= report.page_count {
                return Ok(false);
            }
            if self.shutdown.is_requested() {
                log::warn!(
                    "{entity}: shutdown requested, stopping after page {page}/{}",
                    report.page_count
                );
                return Ok(true);
            }
            page += 1;
        }
    }

    async fn run_page(
        &self,
        adapter: &dyn EntityAdapter,
        ctx: &RunContext,
        page: u32,
    ) -> Result<PageReport, ReindexError> {
        self.progress
            .set_message(format!("{} page {page}", adapter.entity_type()));
        let report = process_page(
            self.source.as_ref(),
            self.index.as_ref(),
            adapter,
            ctx,
            page,
        )
        .await?;
        report.log(&ctx.label(adapter.entity_type(), page));
        self.progress.inc(1);
        Ok(report)
    }

    async fn run_partitioned(
        &self,
        adapter: Arc<dyn EntityAdapter>,
        req: &ReindexRequest,
    ) -> Result<RunReport, ReindexError> {
        let entity = adapter.entity_type();
        let topic = page_topic(entity);
        let transaction_key = TransactionKey::mint();
        let mut report = RunReport::new(entity, RunMode::Partitioned, transaction_key);

        log::info!(
            "{entity}: running in multi process mode with {} partitions",
            req.partitions
        );

        if req.init_queue {
            let count_req =
                PageDescriptor::total_count_request(req.page_size, req.updated_after);
            let total_count =
                fetch_total_count(self.source.as_ref(), adapter.as_ref(), &count_req).await?;
            let plan = PagePlan::new(total_count, req.page_size);
            log::info!(
                "{entity}: {} records in {} pages of {} (tsk={transaction_key}, lanes {:?})",
                fmt_num(total_count as usize),
                plan.page_count,
                plan.page_size,
                plan.lanes(req.partitions)
            );
            self.progress.set_length(u64::from(plan.page_count));

            log::info!("{entity}: propagating job queue {topic}");
            for page in plan.pages() {
                log::debug!(
                    "{entity}: adding job for {page}/{}, page_size={}",
                    plan.page_count,
                    plan.page_size
                );
                let job = Job::page(
                    entity,
                    transaction_key,
                    page,
                    plan.page_size,
                    req.updated_after,
                );
                self.queue.enqueue(&topic, &job).await?;
            }
        } else {
            log::info!("{entity}: not propagating queue, worker mode only");
        }

        let stop = CancellationToken::new();
        let lanes = join_all(
            (0..req.partitions.max(1))
                .map(|lane| self.worker_lane(lane, &topic, &adapter, &stop)),
        );

        if !req.init_queue {
            // Attached worker: never self-terminates, only a shutdown request ends it
            for lane in lanes.await {
                report.tally.merge(&lane);
            }
            report.interrupted = true;
            report.finished_at = Some(Utc::now());
            return Ok(report);
        }

        let watcher = async {
            let drained = self.watch_completion(&topic).await;
            stop.cancel();
            drained
        };
        let (lane_tallies, drained) = tokio::join!(lanes, watcher);
        for lane in &lane_tallies {
            report.tally.merge(lane);
        }
        report.interrupted = !drained;

        let partial = req.updated_after.is_some() || report.interrupted;
        if req.remove_non_existent && report.tally.failed_pages > 0 {
            log::warn!(
                "{entity}: {} pages failed; skipping cleanup for tsk={transaction_key}",
                report.tally.failed_pages
            );
            report.finished_at = Some(Utc::now());
            return Ok(report);
        }
        self.finish(entity, req.remove_non_existent, partial, &mut report)
            .await?;
        Ok(report)
    }

    /// One worker lane: claim a job, run it, report it, repeat until stopped.
    async fn worker_lane(
        &self,
        lane: usize,
        topic: &str,
        resolver: &dyn AdapterResolver,
        stop: &CancellationToken,
    ) -> Tally {
        let mut tally = Tally::default();
        loop {
            if stop.is_cancelled() || self.shutdown.is_requested() {
                break;
            }
            let claim = match self.queue.claim(topic).await {
                Ok(Some(claim)) => claim,
                Ok(None) => {
                    // Nothing pending; take back jobs whose worker went away
                    match self
                        .queue
                        .requeue_expired(topic, self.settings.claim_lease)
                        .await
                    {
                        Ok(0) => self.idle(stop).await,
                        Ok(n) => log::warn!("lane {lane}: requeued {n} expired jobs on {topic}"),
                        Err(e) => {
                            log::warn!("lane {lane}: requeue on {topic} failed: {e}");
                            self.idle(stop).await;
                        }
                    }
                    continue;
                }
                Err(e) => {
                    log::warn!("lane {lane}: claim on {topic} failed: {e}");
                    self.idle(stop).await;
                    continue;
                }
            };

            log::info!("lane {lane}: processing job {}", claim.job.id);
            let outcome = match self.run_job(resolver, &claim.job).await {
                Ok(job_tally) => {
                    tally.merge(&job_tally);
                    JobOutcome::Completed
                }
                Err(e) => {
                    log::error!("lane {lane}: job {} failed: {e}", claim.job.id);
                    tally.failed_pages += 1;
                    JobOutcome::Failed(e.to_string())
                }
            };
            if let Err(e) = self.queue.complete(topic, &claim, outcome).await {
                log::error!("lane {lane}: could not report job {}: {e}", claim.job.id);
            }
        }
        log::debug!("lane {lane}: stopped");
        tally
    }

    async fn idle(&self, stop: &CancellationToken) {
        tokio::select! {
            _ = stop.cancelled() => {}
            _ = tokio::time::sleep(self.settings.poll_interval) => {}
        }
    }

    async fn run_job(
        &self,
        resolver: &dyn AdapterResolver,
        job: &Job,
    ) -> Result<Tally, ReindexError> {
        let mut tally = Tally::default();
        match &job.payload {
            JobPayload::Page {
                page,
                page_size,
                updated_after,
                transaction_key,
            } => {
                let adapter = resolver.resolve(None, job.entity_type)?;
                let mut ctx = RunContext::new(*transaction_key, *page_size);
                ctx.updated_after = *updated_after;
                let report = self.run_page(adapter.as_ref(), &ctx, *page).await?;
                tally.add_page(&report);
            }
            JobPayload::Refresh { skus, adapter } => {
                let adapter = resolver.resolve(adapter.as_deref(), job.entity_type)?;
                log::info!(
                    "starting {} pull job for {}",
                    job.entity_type,
                    skus.join(",")
                );
                let mut ctx = RunContext::new(TransactionKey::mint(), DEFAULT_REFRESH_PAGE_SIZE);
                ctx.skus = skus.clone();
                self.walk(adapter.as_ref(), &ctx, &mut tally).await?;
            }
        }
        Ok(tally)
    }

    /// Poll the queue until nothing is outstanding on `topic`.
    ///
    /// Returns `false` if a shutdown request ended the watch first.
    async fn watch_completion(&self, topic: &str) -> bool {
        loop {
            tokio::time::sleep(self.settings.poll_interval).await;
            if self.shutdown.is_requested() {
                log::warn!("shutdown requested while {topic} still has work");
                return false;
            }
            match self.queue.outstanding(topic).await {
                Ok(0) => {
                    log::info!("queue {topic} processed");
                    return true;
                }
                Ok(n) => log::debug!("queue {topic}: {n} jobs outstanding"),
                Err(e) => log::warn!("queue {topic}: could not count outstanding jobs: {e}"),
            }
        }
    }

    async fn finish(
        &self,
        entity: EntityType,
        remove_non_existent: bool,
        partial: bool,
        report: &mut RunReport,
    ) -> Result<(), ReindexError> {
        if remove_non_existent {
            if partial {
                log::warn!(
                    "{entity}: run did not cover every record; skipping cleanup for tsk={}",
                    report.transaction_key
                );
            } else {
                log::info!("{entity}: cleaning up");
                report.deleted = Some(self.cleanup(entity, Some(report.transaction_key)).await?);
            }
        }
        report.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Delete every `entity` document not stamped with `key`.
    ///
    /// Refuses (and deletes nothing) without a key.
    pub async fn cleanup(
        &self,
        entity: EntityType,
        key: Option<TransactionKey>,
    ) -> Result<u64, ReindexError> {
        let Some(key) = key else {
            log::error!("{entity}: no transaction key given, refusing to clean up");
            return Err(ReindexError::Configuration(format!(
                "cleanup of {entity} requires a transaction key"
            )));
        };
        log::info!("{entity}: cleaning up for transaction key {key}");
        let deleted = self.index.delete_stale(entity, key).await?;
        log::info!("{entity}: removed {} stale documents", fmt_num(deleted as usize));
        Ok(deleted)
    }

    /// Queue a SKU refresh for the refresh worker.
    pub async fn enqueue_refresh(
        &self,
        entity: EntityType,
        skus: Vec<String>,
        adapter: Option<String>,
    ) -> Result<Job, ReindexError> {
        let skus: Vec<String> = skus
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if skus.is_empty() {
            return Err(ReindexError::Configuration(format!(
                "refresh of {entity} needs at least one SKU"
            )));
        }
        let job = Job::refresh(entity, skus, adapter);
        self.queue.enqueue(&refresh_topic(entity), &job).await?;
        log::info!("{entity}: {} scheduled to be refreshed", job.id);
        Ok(job)
    }

    /// Serve SKU refresh jobs with `concurrency` lanes until shutdown.
    pub async fn run_refresh_worker(
        &self,
        entity: EntityType,
        concurrency: usize,
        resolver: &dyn AdapterResolver,
    ) -> Tally {
        let topic = refresh_topic(entity);
        log::info!("starting {entity} refresh worker on {topic}, waiting for jobs");
        let stop = CancellationToken::new();
        let lanes = join_all(
            (0..concurrency.max(1)).map(|lane| self.worker_lane(lane, &topic, resolver, &stop)),
        );
        let mut tally = Tally::default();
        for lane in lanes.await {
            tally.merge(&lane);
        }
        tally
    }

    /// Give the index time to commit, then return so the process can exit.
    pub async fn drain(&self) {
        log::info!(
            "Task done! Exiting in {}s...",
            self.settings.exit_delay.as_secs()
        );
        tokio::time::sleep(self.settings.exit_delay).await;
    }
}

/// Page size used when walking a SKU refresh
const DEFAULT_REFRESH_PAGE_SIZE: u32 = 50;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::PreparedPage;
    use crate::error::ItemError;
    use crate::source::RawPage;
    use serde_json::Value;

    struct Stub {
        federated: bool,
    }

    impl EntityAdapter for Stub {
        fn entity_type(&self) -> EntityType {
            EntityType::Course
        }
        fn resource(&self) -> &str {
            "stub"
        }
        fn filter_query(&self, _page: &PageDescriptor) -> String {
            String::new()
        }
        fn prepare_items(&self, _raw: RawPage, _page: &PageDescriptor) -> Option<PreparedPage> {
            None
        }
        fn pre_process_item(&self, item: Value) -> Result<Value, ItemError> {
            Ok(item)
        }
        fn is_federated(&self) -> bool {
            self.federated
        }
    }

    fn req(partitions: usize) -> ReindexRequest {
        ReindexRequest {
            partitions,
            ..Default::default()
        }
    }

    #[test]
    fn federated_with_partitions_is_partitioned() {
        let adapter = Stub { federated: true };
        assert_eq!(select_mode(&adapter, &req(4)), RunMode::Partitioned);
    }

    #[test]
    fn federation_is_a_hard_gate() {
        let adapter = Stub { federated: false };
        assert_eq!(select_mode(&adapter, &req(4)), RunMode::Single);
    }

    #[test]
    fn single_partition_is_single() {
        let adapter = Stub { federated: true };
        assert_eq!(select_mode(&adapter, &req(1)), RunMode::Single);
    }

    #[test]
    fn targeted_runs_are_single() {
        let adapter = Stub { federated: true };
        let mut by_page = req(4);
        by_page.page = Some(2);
        assert_eq!(select_mode(&adapter, &by_page), RunMode::Single);

        let mut by_sku = req(4);
        by_sku.skus = vec!["c-1".into()];
        assert_eq!(select_mode(&adapter, &by_sku), RunMode::Single);
    }

    #[test]
    fn resolver_rejects_other_entities() {
        let adapter: Arc<dyn EntityAdapter> = Arc::new(Stub { federated: true });
        assert!(adapter.resolve(None, EntityType::Course).is_ok());
        assert!(matches!(
            adapter.resolve(None, EntityType::Category),
            Err(ReindexError::Configuration(_))
        ));
    }

    #[test]
    fn tally_merge_adds_everything() {
        let mut a = Tally {
            pages: 1,
            failed_pages: 1,
            written: 10,
            skipped: 1,
            write_errors: 0,
            retries: 2,
        };
        let b = a;
        a.merge(&b);
        assert_eq!(a.pages, 2);
        assert_eq!(a.failed_pages, 2);
        assert_eq!(a.written, 20);
        assert_eq!(a.retries, 4);
    }

    #[test]
    fn default_settings() {
        let s = RuntimeSettings::default();
        assert_eq!(s.poll_interval, Duration::from_secs(2));
        assert_eq!(s.exit_delay, Duration::from_secs(30));
        assert_eq!(s.claim_lease, Duration::from_secs(600));
    }
}
