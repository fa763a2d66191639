//! Reindex Core - pulls paged records from a source API into a search index
//!
//! Entity adapters describe how one record type is queried and normalized;
//! the orchestrator runs them page by page, either in a single process or
//! fanned out over a shared job queue, and stamps every written document
//! with the run's transaction key so stale documents can be removed after
//! a complete run.

pub mod adapter;
pub mod context;
pub mod error;
pub mod index;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod plan;
pub mod progress;
pub mod queue;
pub mod retry;
pub mod shutdown;
pub mod source;
pub mod transaction;

// Re-exports for convenience
pub use adapter::{EntityAdapter, EntityType, PreparedPage, require_object, value_id};
pub use context::{PageDescriptor, RunContext};
pub use error::{IndexError, ItemError, QueueError, ReindexError};
pub use index::{Document, IndexWriter, MemoryIndex};
pub use logging::{IndicatifLogger, init_logging};
pub use orchestrator::{
    AdapterResolver, OrchestratorRuntime, ReindexRequest, RunMode, RunReport, RuntimeSettings,
    Tally, select_mode,
};
pub use pipeline::{PageReport, fetch_total_count, process_page};
pub use plan::{PagePlan, page_count};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use queue::{Claim, Job, JobOutcome, JobPayload, JobQueue, MemoryJobQueue};
pub use retry::{MAX_RETRIES, fetch_with_retry};
pub use shutdown::Shutdown;
pub use source::{RawPage, SourceClient, TransportError, http_client, resource_url};
pub use transaction::{TRANSACTION_FIELD, TransactionKey};
