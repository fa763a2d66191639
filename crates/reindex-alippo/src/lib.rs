//! Alippo source for reindex
//!
//! REST client plus the category, course and global search adapters.

pub mod category;
pub mod client;
pub mod course;
pub mod global_search;

use std::sync::Arc;

use reindex_core::{AdapterResolver, EntityAdapter, EntityType, ReindexError};

pub use category::CategoryAdapter;
pub use client::AlippoClient;
pub use course::CourseAdapter;
pub use global_search::GlobalSearchAdapter;

/// Adapter family used when none is named
pub const DEFAULT_ADAPTER: &str = "alippo";

/// Names accepted by `--adapter`
pub const ADAPTER_NAMES: &[&str] = &["alippo", "alippo-search"];

/// Build the adapter for `entity` from the family called `name`.
pub fn adapter_for(name: &str, entity: EntityType) -> Result<Arc<dyn EntityAdapter>, ReindexError> {
    if !ADAPTER_NAMES.contains(&name) {
        return Err(ReindexError::Configuration(format!(
            "unknown adapter '{name}' (expected one of: {})",
            ADAPTER_NAMES.join(", ")
        )));
    }
    Ok(match entity {
        EntityType::Category => Arc::new(CategoryAdapter),
        EntityType::Course => Arc::new(CourseAdapter),
        EntityType::GlobalSearch => Arc::new(GlobalSearchAdapter),
    })
}

/// Resolves refresh jobs by the adapter name they carry.
#[derive(Debug, Clone)]
pub struct AlippoAdapters {
    default: String,
}

impl AlippoAdapters {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
        }
    }
}

impl Default for AlippoAdapters {
    fn default() -> Self {
        Self::new(DEFAULT_ADAPTER)
    }
}

impl AdapterResolver for AlippoAdapters {
    fn resolve(
        &self,
        name: Option<&str>,
        entity: EntityType,
    ) -> Result<Arc<dyn EntityAdapter>, ReindexError> {
        adapter_for(name.unwrap_or(&self.default), entity)
    }
}
