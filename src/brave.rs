//! Minimal Brave Search API client
//!
//! Backs the `web_search` tool. Only the web search endpoint is used.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::search::{SearchError, WebSearchResult, WebSearcher};

const BRAVE_API_BASE: &str = "https://api.search.brave.com/res/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_COUNT: u32 = 20;

/// Brave API client with reusable HTTP client and stored API key
#[derive(Clone)]
pub struct BraveClient {
    client: reqwest::Client,
    api_key: Arc<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub web: Option<WebResults>,
}

#[derive(Debug, Deserialize)]
pub struct WebResults {
    #[serde(default)]
    pub results: Vec<WebResult>,
}

#[derive(Debug, Deserialize)]
pub struct WebResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: String,
}

impl From<SearchResponse> for Vec<WebSearchResult> {
    fn from(response: SearchResponse) -> Self {
        response
            .web
            .map(|web| web.results)
            .unwrap_or_default()
            .into_iter()
            .map(|r| WebSearchResult {
                title: r.title,
                url: r.url,
                snippet: r.description,
            })
            .collect()
    }
}

impl BraveClient {
    /// Create a new Brave client with the given API key
    pub fn new(api_key: String) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_max_idle_per_host(100)
            .user_agent("openresponses-gateway/0.1.0")
            .build()?;

        Ok(Self {
            client,
            api_key: Arc::new(api_key),
        })
    }
}

#[async_trait]
impl WebSearcher for BraveClient {
    async fn search(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<WebSearchResult>, SearchError> {
        let url = format!("{}/web/search", BRAVE_API_BASE);
        let count = max_results.clamp(1, MAX_COUNT);

        let response = self
            .client
            .get(&url)
            .header("X-Subscription-Token", self.api_key.as_str())
            .header("Accept", "application/json")
            .query(&[("q", query.to_string()), ("count", count.to_string())])
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SearchError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let search_response = response.json::<SearchResponse>().await?;
        let results: Vec<WebSearchResult> = search_response.into();
        debug!("Brave returned {} results", results.len());
        Ok(results)
    }
}
