//! Course adapter: paged, federated listing of the course root page

use chrono::SecondsFormat;
use reindex_core::{
    EntityAdapter, EntityType, ItemError, PageDescriptor, PreparedPage, RawPage, value_id,
};
use serde_json::Value;

/// Page that lists every course
pub const COURSE_ROOT_PAGE: &str = "ui/page/COURSE_ROOT_PAGE";

/// Section of the root page carrying the course summaries
const COURSES_SECTION: &str = "ALL_COURSES_SUMMARY_SECTION";

/// Courses sit under the first section of the page payload
const COURSES_POINTER: &str = "/sections/0/payload/courses";

#[derive(Debug, Clone, Default)]
pub struct CourseAdapter;

impl EntityAdapter for CourseAdapter {
    fn entity_type(&self) -> EntityType {
        EntityType::Course
    }

    fn resource(&self) -> &str {
        COURSE_ROOT_PAGE
    }

    fn filter_query(&self, page: &PageDescriptor) -> String {
        // A count request only needs totalElements
        let size = if page.for_total_count { 1 } else { page.page_size };
        let mut query = format!(
            "sectionNames.equals={COURSES_SECTION}&section1Size.equals={size}&section1Page.equals={}",
            page.page
        );
        if let Some(after) = page.updated_after {
            query.push_str("&updatedAt.greaterThan=");
            query.push_str(&after.to_rfc3339_opts(SecondsFormat::Secs, true));
        }
        if !page.skus.is_empty() {
            query.push_str("&courseId.in=");
            query.push_str(&page.skus.join(","));
        }
        query
    }

    fn prepare_items(&self, raw: RawPage, page: &PageDescriptor) -> Option<PreparedPage> {
        let courses = raw.pointer(COURSES_POINTER)?;
        let items = courses.get("content")?.as_array()?.clone();
        let total_count = courses
            .get("totalElements")
            .and_then(Value::as_u64)
            .unwrap_or(items.len() as u64);
        let prepared = PreparedPage::new(items, total_count, page, self.uses_paging());
        log::debug!("course page count {}", prepared.page_count);
        Some(prepared)
    }

    /// `courseId` becomes the document id.
    fn pre_process_item(&self, item: Value) -> Result<Value, ItemError> {
        let mut item = match item {
            Value::Null => return Err(ItemError::Missing),
            Value::Object(map) => map,
            _ => return Err(ItemError::NotAnObject),
        };
        let id = item
            .get("courseId")
            .and_then(value_id)
            .ok_or(ItemError::MissingField("courseId"))?;
        item.insert("id".to_string(), Value::String(id));
        item.insert("courseId".to_string(), Value::Null);
        Ok(Value::Object(item))
    }

    fn is_federated(&self) -> bool {
        true
    }

    fn uses_paging(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn root_page(content: Value, total: u64) -> Value {
        json!({
            "sections": [{
                "payload": {"courses": {"content": content, "totalElements": total}}
            }]
        })
    }

    #[test]
    fn query_selects_section_page() {
        let q = CourseAdapter.filter_query(&PageDescriptor::new(3, 50));
        assert_eq!(
            q,
            "sectionNames.equals=ALL_COURSES_SUMMARY_SECTION&section1Size.equals=50&section1Page.equals=3"
        );
    }

    #[test]
    fn count_request_asks_for_one_record() {
        let q = CourseAdapter.filter_query(&PageDescriptor::total_count_request(50, None));
        assert!(q.contains("section1Size.equals=1&"));
        assert!(q.ends_with("section1Page.equals=1"));
    }

    #[test]
    fn delta_and_sku_filters() {
        let mut page = PageDescriptor::new(1, 20);
        page.updated_after = Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        page.skus = vec!["c-1".into(), "c-2".into()];
        let q = CourseAdapter.filter_query(&page);
        assert!(q.contains("&updatedAt.greaterThan=2024-05-01T12:00:00Z"));
        assert!(q.ends_with("&courseId.in=c-1,c-2"));
    }

    #[test]
    fn prepares_courses_and_page_count() {
        let raw = root_page(json!([{"courseId": 1}, {"courseId": 2}]), 125);
        let prepared = CourseAdapter
            .prepare_items(raw, &PageDescriptor::new(1, 50))
            .unwrap();
        assert_eq!(prepared.items.len(), 2);
        assert_eq!(prepared.total_count, 125);
        assert_eq!(prepared.page_count, 3);
    }

    #[test]
    fn unexpected_shape_has_no_items() {
        let page = PageDescriptor::new(1, 50);
        assert!(CourseAdapter.prepare_items(json!({"sections": []}), &page).is_none());
        assert!(CourseAdapter.prepare_items(json!([]), &page).is_none());
    }

    #[test]
    fn course_id_moves_to_id() {
        let item = CourseAdapter
            .pre_process_item(json!({"courseId": 42, "title": "Baking"}))
            .unwrap();
        assert_eq!(item["id"], json!("42"));
        assert_eq!(item["courseId"], Value::Null);
        assert_eq!(item["title"], json!("Baking"));
    }

    #[test]
    fn missing_course_id_fails_item() {
        assert!(matches!(
            CourseAdapter.pre_process_item(json!({"title": "x"})),
            Err(ItemError::MissingField("courseId"))
        ));
        assert!(matches!(
            CourseAdapter.pre_process_item(Value::Null),
            Err(ItemError::Missing)
        ));
    }
}
