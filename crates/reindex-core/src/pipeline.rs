//! Per-page processing path shared by every mode:
//! retry → fetch → prepare → pre-process → normalize → stamp → upsert.

use std::time::{Duration, Instant};

use crate::adapter::{EntityAdapter, PreparedPage};
use crate::context::{PageDescriptor, RunContext};
use crate::error::ReindexError;
use crate::index::IndexWriter;
use crate::progress::fmt_num;
use crate::retry::fetch_with_retry;
use crate::source::{SourceClient, TransportError};

/// Statistics from processing one page end-to-end
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageReport {
    pub page: u32,
    pub total_count: u64,
    pub page_count: u32,
    pub written: usize,
    /// Items dropped by pre-processing or normalization
    pub skipped: usize,
    /// Documents the index refused
    pub write_errors: usize,
    pub retries: u32,
    pub elapsed: Duration,
}

impl PageReport {
    pub fn log(&self, label: &str) {
        log::info!(
            "{label}: {} written, {} skipped, {} write errors, {} retries in {:.1}s",
            fmt_num(self.written),
            self.skipped,
            self.write_errors,
            self.retries,
            self.elapsed.as_secs_f64()
        );
    }
}

/// Process one page of `ctx` and write its documents.
///
/// Item failures are logged and skipped; only an exhausted fetch fails the page.
/// A response without an item list is retried like a transport error.
pub async fn process_page(
    source: &dyn SourceClient,
    index: &dyn IndexWriter,
    adapter: &dyn EntityAdapter,
    ctx: &RunContext,
    page: u32,
) -> Result<PageReport, ReindexError> {
    let start = Instant::now();
    let entity = adapter.entity_type();
    let label = ctx.label(entity, page);
    let desc = ctx.descriptor(page);
    let query = adapter.filter_query(&desc);

    let mut report = PageReport {
        page,
        ..Default::default()
    };
    let prepared = fetch_with_retry(&label, &mut report.retries, || {
        fetch_prepared(source, adapter, &query, &desc)
    })
    .await?;

    report.total_count = prepared.total_count;
    report.page_count = prepared.page_count;
    log::debug!(
        "{label}: {} items, total {} over {} pages",
        prepared.items.len(),
        prepared.total_count,
        prepared.page_count
    );

    for item in prepared.items {
        let doc = match adapter
            .pre_process_item(item)
            .and_then(|item| adapter.normalize_document_format(item))
        {
            Ok(doc) => doc,
            Err(e) => {
                log::error!("{label}: skipping item: {e}");
                report.skipped += 1;
                continue;
            }
        };
        let id = doc.id.clone();
        match index.upsert(entity, doc.stamp(ctx.transaction_key)).await {
            Ok(()) => report.written += 1,
            Err(e) => {
                log::error!("{label}: write of {entity} {id} failed: {e}");
                report.write_errors += 1;
            }
        }
    }

    report.elapsed = start.elapsed();
    Ok(report)
}

/// Ask the source how many records a run would cover.
///
/// Planning depends on this; a failure here aborts the whole run.
pub async fn fetch_total_count(
    source: &dyn SourceClient,
    adapter: &dyn EntityAdapter,
    count_req: &PageDescriptor,
) -> Result<u64, ReindexError> {
    let label = format!("{} total count", adapter.entity_type());
    let query = adapter.filter_query(count_req);
    let mut retries = 0;
    let prepared = fetch_with_retry(&label, &mut retries, || {
        fetch_prepared(source, adapter, &query, count_req)
    })
    .await?;
    Ok(prepared.total_count)
}

/// One fetch attempt. A body without an item list counts as a failed attempt:
/// taking it for an empty page would end the walk early and let cleanup remove
/// records on the pages never visited.
async fn fetch_prepared(
    source: &dyn SourceClient,
    adapter: &dyn EntityAdapter,
    query: &str,
    desc: &PageDescriptor,
) -> Result<PreparedPage, TransportError> {
    let raw = source.get(adapter.resource(), query).await?;
    adapter.prepare_items(raw, desc).ok_or_else(|| {
        TransportError::Decode(format!(
            "{} response carried no item list",
            adapter.resource()
        ))
    })
}
