//! Page descriptors and per-run context

use chrono::{DateTime, Utc};

use crate::transaction::TransactionKey;

/// One page request against the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDescriptor {
    pub page: u32,
    pub page_size: u32,
    pub updated_after: Option<DateTime<Utc>>,
    pub skus: Vec<String>,
    /// Count request: only `total_count` of the response is used
    pub for_total_count: bool,
}

impl PageDescriptor {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size,
            updated_after: None,
            skus: Vec::new(),
            for_total_count: false,
        }
    }

    /// Descriptor used to learn `total_count` before planning.
    pub fn total_count_request(page_size: u32, updated_after: Option<DateTime<Utc>>) -> Self {
        Self {
            page: 1,
            page_size,
            updated_after,
            skus: Vec::new(),
            for_total_count: true,
        }
    }
}

/// Everything one orchestrator invocation needs to process pages.
///
/// Each partition gets its own copy; nothing in here is shared mutably.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub transaction_key: TransactionKey,
    /// Explicit page; `None` walks every page
    pub page: Option<u32>,
    pub page_size: u32,
    pub updated_after: Option<DateTime<Utc>>,
    pub skus: Vec<String>,
}

impl RunContext {
    pub fn new(transaction_key: TransactionKey, page_size: u32) -> Self {
        Self {
            transaction_key,
            page: None,
            page_size,
            updated_after: None,
            skus: Vec::new(),
        }
    }

    pub fn descriptor(&self, page: u32) -> PageDescriptor {
        PageDescriptor {
            page,
            page_size: self.page_size,
            updated_after: self.updated_after,
            skus: self.skus.clone(),
            for_total_count: false,
        }
    }

    /// A partial run does not visit the full record set, so it must not drive cleanup.
    pub fn is_partial(&self) -> bool {
        self.page.is_some() || self.updated_after.is_some() || !self.skus.is_empty()
    }

    /// Prefix for log lines: `course page 3 tsk=...`
    pub fn label(&self, entity: impl std::fmt::Display, page: u32) -> String {
        format!("{entity} page {page} tsk={}", self.transaction_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> TransactionKey {
        TransactionKey::new(1_700_000_000_000).unwrap()
    }

    #[test]
    fn full_run_is_not_partial() {
        let ctx = RunContext::new(key(), 50);
        assert!(!ctx.is_partial());
    }

    #[test]
    fn page_sku_and_delta_runs_are_partial() {
        let base = RunContext::new(key(), 50);
        let mut paged = base.clone();
        paged.page = Some(2);
        assert!(paged.is_partial());

        let mut skus = base.clone();
        skus.skus = vec!["c-1".to_string()];
        assert!(skus.is_partial());

        let mut delta = base;
        delta.updated_after = Some(Utc::now());
        assert!(delta.is_partial());
    }

    #[test]
    fn descriptor_copies_filters() {
        let mut ctx = RunContext::new(key(), 25);
        ctx.skus = vec!["a".to_string(), "b".to_string()];
        let desc = ctx.descriptor(4);
        assert_eq!(desc.page, 4);
        assert_eq!(desc.page_size, 25);
        assert_eq!(desc.skus, vec!["a", "b"]);
        assert!(!desc.for_total_count);
    }

    #[test]
    fn count_request_is_first_page() {
        let count_req = PageDescriptor::total_count_request(50, None);
        assert_eq!(count_req.page, 1);
        assert!(count_req.for_total_count);
    }

    #[test]
    fn label_carries_key() {
        let ctx = RunContext::new(key(), 50);
        assert_eq!(ctx.label("course", 3), "course page 3 tsk=1700000000000");
    }
}
