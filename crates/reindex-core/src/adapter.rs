//! Per-entity strategy the orchestrator drives polymorphically

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::PageDescriptor;
use crate::error::ItemError;
use crate::index::Document;
use crate::plan;
use crate::source::RawPage;

/// Catalog entity types the pipeline indexes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Category,
    Course,
    GlobalSearch,
}

impl EntityType {
    /// Parse CLI/config string into enum
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "category" | "categories" => Some(Self::Category),
            "course" | "courses" | "product" => Some(Self::Course),
            "global_search" | "global" => Some(Self::GlobalSearch),
            _ => None,
        }
    }

    /// Canonical name, used for index names and log lines
    pub fn name(self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::Course => "course",
            Self::GlobalSearch => "global_search",
        }
    }

    pub fn all() -> &'static [EntityType] {
        &[Self::Category, Self::Course, Self::GlobalSearch]
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Items pulled out of one raw page, plus the totals the page reported.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedPage {
    pub items: Vec<Value>,
    pub total_count: u64,
    pub page_count: u32,
}

impl PreparedPage {
    /// Build from items and the reported total; paged adapters derive `page_count`.
    pub fn new(items: Vec<Value>, total_count: u64, page: &PageDescriptor, paged: bool) -> Self {
        let page_count = if paged {
            plan::page_count(total_count, page.page_size)
        } else {
            1
        };
        Self {
            items,
            total_count,
            page_count,
        }
    }
}

/// Strategy for one entity type of one source.
///
/// Implementations are stateless: totals learned from a page travel back in
/// [`PreparedPage`] instead of living on the adapter.
pub trait EntityAdapter: Send + Sync {
    fn entity_type(&self) -> EntityType;

    /// Source resource path the filter query is applied to.
    fn resource(&self) -> &str;

    /// Source query string for one page request.
    fn filter_query(&self, page: &PageDescriptor) -> String;

    /// Extract items and totals from a raw response; `None` if the response has no item list.
    fn prepare_items(&self, raw: RawPage, page: &PageDescriptor) -> Option<PreparedPage>;

    /// Validate and reshape one source item. Fails for empty items or a missing identifier.
    fn pre_process_item(&self, item: Value) -> Result<Value, ItemError>;

    /// Map a pre-processed item to the document written to the index.
    fn normalize_document_format(&self, item: Value) -> Result<Document, ItemError> {
        Document::from_item(item)
    }

    /// Whether pages can be fetched independently and concurrently.
    fn is_federated(&self) -> bool {
        false
    }

    /// Whether the source is paged at all; unpaged sources return everything in one response.
    fn uses_paging(&self) -> bool {
        false
    }
}

/// Identifier of a JSON item as a string, accepting string or integer ids.
pub fn value_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Shared pre-processing: reject empty or non-object items and items without `id_field`.
pub fn require_object(item: Value, id_field: &'static str) -> Result<Value, ItemError> {
    match &item {
        Value::Null => Err(ItemError::Missing),
        Value::Object(map) => {
            if map.get(id_field).and_then(value_id).is_none() {
                return Err(ItemError::MissingField(id_field));
            }
            Ok(item)
        }
        _ => Err(ItemError::NotAnObject),
    }
}
