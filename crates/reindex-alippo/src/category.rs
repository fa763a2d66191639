//! Category adapter: one unpaged listing

use reindex_core::{
    EntityAdapter, EntityType, ItemError, PageDescriptor, PreparedPage, RawPage, require_object,
};
use serde_json::Value;

pub const CATEGORIES: &str = "custom/categories";

#[derive(Debug, Clone, Default)]
pub struct CategoryAdapter;

impl EntityAdapter for CategoryAdapter {
    fn entity_type(&self) -> EntityType {
        EntityType::Category
    }

    fn resource(&self) -> &str {
        CATEGORIES
    }

    fn filter_query(&self, _page: &PageDescriptor) -> String {
        String::new()
    }

    fn prepare_items(&self, raw: RawPage, page: &PageDescriptor) -> Option<PreparedPage> {
        let items = raw.get("categories")?.as_array()?.clone();
        log::debug!("{} categories", items.len());
        let total = items.len() as u64;
        Some(PreparedPage::new(items, total, page, false))
    }

    fn pre_process_item(&self, item: Value) -> Result<Value, ItemError> {
        require_object(item, "id")
    }
}
