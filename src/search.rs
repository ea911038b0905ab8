//! Pluggable web search provider consumed by the `web_search` tool (§4.2).
//!
//! The agent loop only ever talks to the [`SearchProvider`] trait; the HTTP
//! implementation is one adapter among potentially several (an internal
//! search appliance, a vendor API) that a deployment can swap in via
//! configuration.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::SearchError;

/// A single search result.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub content: String,
}

/// Abstraction over whatever backs `web_search`.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, SearchError>;
}

/// Talks to a generic HTTP search API that returns a JSON array of
/// `{title, url, content}` objects (the shape most self-hosted search
/// appliances and SearXNG-style metasearch endpoints expose).
pub struct HttpSearchProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpSearchProvider {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawSearchResult {
    title: Option<String>,
    url: Option<String>,
    content: Option<String>,
    snippet: Option<String>,
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, SearchError> {
        let mut request = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("count", &max_results.to_string())]);

        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::BadRequest(format!("{status}: {body}")));
        }

        let raw: Vec<RawSearchResult> = response.json().await?;

        Ok(raw
            .into_iter()
            .take(max_results)
            .map(|r| SearchResult {
                title: r.title.unwrap_or_default(),
                url: r.url.unwrap_or_default(),
                content: r.content.or(r.snippet).unwrap_or_default(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubProvider;

    #[async_trait]
    impl SearchProvider for StubProvider {
        async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, SearchError> {
            Ok((0..max_results)
                .map(|i| SearchResult {
                    title: format!("{query} result {i}"),
                    url: format!("https://example.com/{i}"),
                    content: "stub content".to_string(),
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn stub_provider_respects_max_results() {
        let provider = StubProvider;
        let results = provider.search("rust", 3).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].title, "rust result 0");
    }
}
