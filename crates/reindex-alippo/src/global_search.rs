//! Global search adapter

use reindex_core::{
    EntityAdapter, EntityType, ItemError, PageDescriptor, PreparedPage, RawPage, require_object,
};
use serde_json::Value;

pub const GLOBAL_SEARCH: &str = "custom/global-search";

#[derive(Debug, Clone, Default)]
pub struct GlobalSearchAdapter;

impl EntityAdapter for GlobalSearchAdapter {
    fn entity_type(&self) -> EntityType {
        EntityType::GlobalSearch
    }

    fn resource(&self) -> &str {
        GLOBAL_SEARCH
    }

    fn filter_query(&self, _page: &PageDescriptor) -> String {
        String::new()
    }

    /// Accepts `{"items": [...]}` or a bare array.
    fn prepare_items(&self, raw: RawPage, page: &PageDescriptor) -> Option<PreparedPage> {
        let items = match raw {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("items")? {
                Value::Array(items) => items,
                _ => return None,
            },
            _ => return None,
        };
        let total = items.len() as u64;
        Some(PreparedPage::new(items, total, page, false))
    }

    fn pre_process_item(&self, item: Value) -> Result<Value, ItemError> {
        require_object(item, "id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn both_response_shapes() {
        let page = PageDescriptor::new(1, 50);
        let wrapped = GlobalSearchAdapter
            .prepare_items(json!({"items": [{"id": "3"}]}), &page)
            .unwrap();
        assert_eq!(wrapped.items.len(), 1);

        let bare = GlobalSearchAdapter
            .prepare_items(json!([{"id": "3"}, {"id": "2"}]), &page)
            .unwrap();
        assert_eq!(bare.total_count, 2);

        assert!(GlobalSearchAdapter.prepare_items(json!({"items": 1}), &page).is_none());
    }
}
