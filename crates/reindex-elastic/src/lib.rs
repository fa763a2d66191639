//! Elasticsearch-compatible index writer
//!
//! One index per entity type, named `{index_name}_{entity}`. Documents are
//! upserted by id so re-running a page replaces what it wrote before, and
//! stale documents are removed with a delete-by-query on the transaction key.

use anyhow::Context;
use async_trait::async_trait;
use reindex_core::{
    Document, EntityType, IndexError, IndexWriter, TRANSACTION_FIELD, TransactionKey, http_client,
};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Clone)]
pub struct ElasticIndex {
    base: Url,
    index_name: String,
}

impl ElasticIndex {
    /// `url` is the cluster endpoint (`DATABASE_URL`), `index_name` the prefix (`INDEX_NAME`).
    pub fn new(url: &str, index_name: &str) -> anyhow::Result<Self> {
        let base = Url::parse(url.trim()).with_context(|| format!("Invalid index url: {url}"))?;
        anyhow::ensure!(!base.cannot_be_a_base(), "Index url must be http(s): {url}");
        anyhow::ensure!(!index_name.trim().is_empty(), "Index name is empty");
        Ok(Self {
            base,
            index_name: index_name.trim().to_string(),
        })
    }

    /// Physical index holding `entity` documents.
    pub fn index_for(&self, entity: EntityType) -> String {
        format!("{}_{}", self.index_name, entity)
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub fn update_url(&self, entity: EntityType, id: &str) -> Url {
        let index = self.index_for(entity);
        self.endpoint(&[index.as_str(), "_update", id])
    }

    pub fn delete_by_query_url(&self, entity: EntityType) -> Url {
        let index = self.index_for(entity);
        let mut url = self.endpoint(&[index.as_str(), "_delete_by_query"]);
        url.query_pairs_mut()
            .append_pair("conflicts", "proceed")
            .append_pair("refresh", "true");
        url
    }
}

/// Partial-document upsert body.
pub fn upsert_body(doc: &Document) -> Value {
    json!({"doc": doc.fields, "doc_as_upsert": true})
}

/// Matches every document not stamped with `key`, unstamped ones included.
pub fn stale_query(key: TransactionKey) -> Value {
    json!({
        "query": {
            "bool": {
                "must_not": {"term": {TRANSACTION_FIELD: key.as_u64()}}
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct DeleteByQueryResponse {
    #[serde(default)]
    deleted: u64,
    #[serde(default)]
    failures: Vec<Value>,
}

async fn rejected(resp: reqwest::Response) -> IndexError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    IndexError::Http {
        status: Some(status),
        message: body.chars().take(512).collect(),
    }
}

#[async_trait]
impl IndexWriter for ElasticIndex {
    async fn upsert(&self, entity: EntityType, doc: Document) -> Result<(), IndexError> {
        let resp = http_client()
            .post(self.update_url(entity, &doc.id))
            .json(&upsert_body(&doc))
            .send()
            .await
            .map_err(|e| IndexError::from_reqwest(&e))?;
        if !resp.status().is_success() {
            return Err(rejected(resp).await);
        }
        Ok(())
    }

    async fn delete_stale(
        &self,
        entity: EntityType,
        key: TransactionKey,
    ) -> Result<u64, IndexError> {
        let resp = http_client()
            .post(self.delete_by_query_url(entity))
            .json(&stale_query(key))
            .send()
            .await
            .map_err(|e| IndexError::from_reqwest(&e))?;
        if resp.status() == StatusCode::NOT_FOUND {
            log::warn!("{}: index does not exist, nothing to clean", self.index_for(entity));
            return Ok(0);
        }
        if !resp.status().is_success() {
            return Err(rejected(resp).await);
        }
        let body: DeleteByQueryResponse = resp
            .json()
            .await
            .map_err(|e| IndexError::from_reqwest(&e))?;
        if !body.failures.is_empty() {
            return Err(IndexError::Rejected(format!(
                "{} delete failures, first: {}",
                body.failures.len(),
                body.failures[0]
            )));
        }
        Ok(body.deleted)
    }
}
