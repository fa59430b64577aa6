//! Search collaborators used by expanded tools
//!
//! The orchestrator only sees the `VectorSearcher` and `WebSearcher`
//! traits; the HTTP-backed vector searcher lives here and the Brave web
//! searcher in `brave.rs`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Invalid endpoint: {0}")]
    Endpoint(String),
}

/// One chunk returned by a vector store search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSearchResult {
    pub file_id: String,
    pub score: f64,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
pub trait VectorSearcher: Send + Sync {
    async fn search(
        &self,
        vector_store_id: &str,
        query: &str,
        top_k: u32,
    ) -> Result<Vec<VectorSearchResult>, SearchError>;
}

#[async_trait]
pub trait WebSearcher: Send + Sync {
    async fn search(&self, query: &str, max_results: u32)
        -> Result<Vec<WebSearchResult>, SearchError>;
}

/// Vector search against a service exposing `POST {base}/vector_stores/{id}/search`
#[derive(Clone)]
pub struct HttpVectorSearcher {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<Arc<String>>,
}

#[derive(Deserialize)]
struct SearchPage {
    #[serde(default)]
    data: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(default)]
    file_id: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    content: Value,
}

impl SearchHit {
    /// Content may be a plain string or a list of `{type: text, text}` blocks
    fn content_text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            Value::Array(blocks) => blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => String::new(),
        }
    }
}

impl HttpVectorSearcher {
    pub fn new(endpoint: &str, api_key: Option<String>) -> Result<Self, SearchError> {
        // A trailing slash keeps `join` from dropping the last path segment
        let normalized = format!("{}/", endpoint.trim_end_matches('/'));
        let base_url = Url::parse(&normalized).map_err(|e| SearchError::Endpoint(e.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url,
            api_key: api_key.map(Arc::new),
        })
    }
}

#[async_trait]
impl VectorSearcher for HttpVectorSearcher {
    async fn search(
        &self,
        vector_store_id: &str,
        query: &str,
        top_k: u32,
    ) -> Result<Vec<VectorSearchResult>, SearchError> {
        let url = self
            .base_url
            .join(&format!("vector_stores/{}/search", vector_store_id))
            .map_err(|e| SearchError::Endpoint(e.to_string()))?;
        trace!("Vector search {} query={}", url, query);

        let mut request = self
            .client
            .post(url)
            .json(&json!({"query": query, "max_num_results": top_k}));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SearchError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let page = response.json::<SearchPage>().await?;
        debug!(
            "Vector store {} returned {} results",
            vector_store_id,
            page.data.len()
        );
        Ok(page
            .data
            .into_iter()
            .map(|hit| VectorSearchResult {
                content: hit.content_text(),
                file_id: hit.file_id,
                score: hit.score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_hit_content_forms() {
        let hit: SearchHit = serde_json::from_value(json!({
            "file_id": "file_1",
            "score": 0.5,
            "content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]
        }))
        .unwrap();
        assert_eq!(hit.content_text(), "a\nb");

        let hit: SearchHit =
            serde_json::from_value(json!({"file_id": "f", "content": "plain"})).unwrap();
        assert_eq!(hit.content_text(), "plain");
    }

    #[test]
    fn test_endpoint_join_keeps_path() {
        let searcher = HttpVectorSearcher::new("http://localhost:9000/v1", None).unwrap();
        let url = searcher
            .base_url
            .join("vector_stores/vs_1/search")
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/v1/vector_stores/vs_1/search");
    }
}
