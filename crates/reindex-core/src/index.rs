//! Search index seam: document upserts and transaction-scoped deletes

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::adapter::{EntityType, value_id};
use crate::error::{IndexError, ItemError};
use crate::transaction::{TRANSACTION_FIELD, TransactionKey};

/// A normalized document ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl Document {
    /// Build from a JSON object carrying an `id`.
    pub fn from_item(item: Value) -> Result<Self, ItemError> {
        let Value::Object(fields) = item else {
            return Err(ItemError::NotAnObject);
        };
        let id = fields
            .get("id")
            .and_then(value_id)
            .ok_or(ItemError::MissingField("id"))?;
        Ok(Self { id, fields })
    }

    /// Stamp the run's transaction key onto the document.
    pub fn stamp(mut self, key: TransactionKey) -> Self {
        self.fields
            .insert(TRANSACTION_FIELD.to_string(), Value::from(key.as_u64()));
        self
    }

    pub fn transaction_key(&self) -> Option<TransactionKey> {
        self.fields
            .get(TRANSACTION_FIELD)
            .and_then(Value::as_u64)
            .and_then(TransactionKey::new)
    }
}

/// Writes documents into the search index.
///
/// Upserts must be idempotent: re-writing a page replaces documents, never duplicates them.
#[async_trait]
pub trait IndexWriter: Send + Sync {
    async fn upsert(&self, entity: EntityType, doc: Document) -> Result<(), IndexError>;

    /// Delete every document of `entity` not stamped with `key`; returns the number deleted.
    async fn delete_stale(&self, entity: EntityType, key: TransactionKey)
    -> Result<u64, IndexError>;
}

/// In-process index, used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    docs: Mutex<BTreeMap<(EntityType, String), Document>>,
    upserts: Mutex<usize>,
    cleanups: Mutex<Vec<(EntityType, TransactionKey)>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document directly, bypassing upsert accounting.
    pub fn insert(&self, entity: EntityType, doc: Document) {
        self.docs
            .lock()
            .expect("index lock poisoned")
            .insert((entity, doc.id.clone()), doc);
    }

    pub fn get(&self, entity: EntityType, id: &str) -> Option<Document> {
        self.docs
            .lock()
            .expect("index lock poisoned")
            .get(&(entity, id.to_string()))
            .cloned()
    }

    /// Documents of one entity type, ordered by id.
    pub fn documents(&self, entity: EntityType) -> Vec<Document> {
        self.docs
            .lock()
            .expect("index lock poisoned")
            .iter()
            .filter(|((e, _), _)| *e == entity)
            .map(|(_, d)| d.clone())
            .collect()
    }

    pub fn len(&self, entity: EntityType) -> usize {
        self.documents(entity).len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.lock().expect("index lock poisoned").is_empty()
    }

    /// Total upsert calls seen
    pub fn upserts(&self) -> usize {
        *self.upserts.lock().expect("index lock poisoned")
    }

    /// Every `delete_stale` call, in order
    pub fn cleanups(&self) -> Vec<(EntityType, TransactionKey)> {
        self.cleanups.lock().expect("index lock poisoned").clone()
    }
}

#[async_trait]
impl IndexWriter for MemoryIndex {
    async fn upsert(&self, entity: EntityType, doc: Document) -> Result<(), IndexError> {
        *self.upserts.lock().expect("index lock poisoned") += 1;
        self.insert(entity, doc);
        Ok(())
    }

    async fn delete_stale(
        &self,
        entity: EntityType,
        key: TransactionKey,
    ) -> Result<u64, IndexError> {
        self.cleanups
            .lock()
            .expect("index lock poisoned")
            .push((entity, key));
        let mut docs = self.docs.lock().expect("index lock poisoned");
        let before = docs.len();
        docs.retain(|(e, _), d| *e != entity || d.transaction_key() == Some(key));
        Ok((before - docs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(raw: u64) -> TransactionKey {
        TransactionKey::new(raw).unwrap()
    }

    fn doc(id: &str, tsk: u64) -> Document {
        Document::from_item(json!({"id": id, "name": id}))
            .unwrap()
            .stamp(key(tsk))
    }

    #[test]
    fn from_item_requires_id() {
        assert_eq!(
            Document::from_item(json!({"name": "x"})).unwrap_err(),
            ItemError::MissingField("id")
        );
        assert_eq!(
            Document::from_item(json!("x")).unwrap_err(),
            ItemError::NotAnObject
        );
        assert_eq!(Document::from_item(json!({"id": 9})).unwrap().id, "9");
    }

    #[test]
    fn stamp_sets_transaction_field() {
        let d = doc("a", 77);
        assert_eq!(d.fields["tsk"], json!(77));
        assert_eq!(d.transaction_key(), Some(key(77)));
    }

    #[tokio::test]
    async fn upsert_replaces_same_id() {
        let index = MemoryIndex::new();
        index.upsert(EntityType::Course, doc("a", 1)).await.unwrap();
        index.upsert(EntityType::Course, doc("a", 2)).await.unwrap();
        assert_eq!(index.len(EntityType::Course), 1);
        assert_eq!(index.upserts(), 2);
        assert_eq!(
            index.get(EntityType::Course, "a").unwrap().transaction_key(),
            Some(key(2))
        );
    }

    #[tokio::test]
    async fn delete_stale_keeps_current_key_and_other_entities() {
        let index = MemoryIndex::new();
        index.insert(EntityType::Course, doc("old", 1));
        index.insert(EntityType::Course, doc("new", 2));
        index.insert(EntityType::Category, doc("cat", 1));

        let deleted = index
            .delete_stale(EntityType::Course, key(2))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(index.get(EntityType::Course, "new").is_some());
        assert!(index.get(EntityType::Course, "old").is_none());
        assert!(index.get(EntityType::Category, "cat").is_some());
        assert_eq!(index.cleanups(), vec![(EntityType::Course, key(2))]);
    }

    #[tokio::test]
    async fn delete_stale_removes_unstamped() {
        let index = MemoryIndex::new();
        index.insert(
            EntityType::Course,
            Document::from_item(json!({"id": "legacy"})).unwrap(),
        );
        let deleted = index
            .delete_stale(EntityType::Course, key(5))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(index.is_empty());
    }
}
