//! Alippo REST client

use anyhow::Context;
use async_trait::async_trait;
use reindex_core::{RawPage, SourceClient, TransportError, http_client, resource_url};

/// Read-only client for the Alippo content API.
#[derive(Debug, Clone)]
pub struct AlippoClient {
    base_url: String,
}

impl AlippoClient {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let base_url = base_url.into();
        let trimmed = base_url.trim();
        anyhow::ensure!(!trimmed.is_empty(), "Alippo API url is empty");
        reqwest::Url::parse(trimmed)
            .with_context(|| format!("Invalid Alippo API url: {trimmed}"))?;
        Ok(Self {
            base_url: trimmed.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, resource: &str, query: &str) -> String {
        resource_url(&self.base_url, resource, query)
    }
}

#[async_trait]
impl SourceClient for AlippoClient {
    async fn get(&self, resource: &str, query: &str) -> Result<RawPage, TransportError> {
        log::debug!("GET {resource}?{query}");
        let resp = http_client()
            .get(self.url(resource, query))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| TransportError::from_reqwest(&e))?;
        resp.json::<RawPage>()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_resource_and_query() {
        let client = AlippoClient::new("https://api.test/api/").unwrap();
        assert_eq!(client.base_url(), "https://api.test/api");
        assert_eq!(
            client.url("custom/categories", ""),
            "https://api.test/api/custom/categories"
        );
        assert_eq!(
            client.url("ui/page/COURSE_ROOT_PAGE", "a=1"),
            "https://api.test/api/ui/page/COURSE_ROOT_PAGE?a=1"
        );
    }

    #[test]
    fn rejects_bad_urls() {
        assert!(AlippoClient::new("").is_err());
        assert!(AlippoClient::new("not a url").is_err());
    }

    /// Needs network access: `ALIPPO_URL=... cargo test -p reindex-alippo -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn live_categories() {
        let url = std::env::var("ALIPPO_URL").expect("ALIPPO_URL not set");
        let client = AlippoClient::new(url).unwrap();
        let page = client.get("custom/categories", "").await.unwrap();
        assert!(page.get("categories").is_some());
    }
}
