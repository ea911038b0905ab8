//! Qdrant-compatible REST vector store adapter (§4.7).
//!
//! Every operation is a plain JSON-over-HTTP call against a Qdrant REST
//! endpoint. Clients are memoized by `(normalized_url, collection_name,
//! vector_size)` the same way [`crate::llm::LlmClientCache`] memoizes LLM
//! clients, so repeated calls against the same collection reuse one
//! connection pool.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::VectorStoreError;

const UPSERT_BATCH_SIZE: usize = 1000;
const DELETE_BATCH_SIZE: usize = 1000;

/// One point stored in a collection: an id, a dense vector, and an
/// arbitrary JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Value,
}

/// A point returned from `scroll` or `search`, optionally without its vector.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievedPoint {
    pub id: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub vector: Option<Vec<f32>>,
    #[serde(default)]
    pub score: Option<f32>,
}

/// A Qdrant-style filter, passed through verbatim.
pub type Filter = Value;

/// Caches one `reqwest::Client` + base url per `(url, collection, vector_size)`
/// triple so repeated `VectorStore::for_collection` calls are cheap.
#[derive(Default)]
pub struct VectorStoreCache {
    clients: Mutex<HashMap<(String, String, u32), reqwest::Client>>,
}

impl VectorStoreCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_create(&self, url: &str, collection: &str, vector_size: u32) -> reqwest::Client {
        let key = (normalize_url(url), collection.to_string(), vector_size);
        let mut clients = self.clients.lock().expect("vector store cache lock poisoned");
        clients
            .entry(key)
            .or_insert_with(|| {
                reqwest::Client::builder()
                    .timeout(Duration::from_secs(30))
                    .build()
                    .expect("failed to build HTTP client")
            })
            .clone()
    }
}

fn normalize_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// A handle to one collection on one Qdrant-compatible endpoint.
pub struct VectorStore {
    http: reqwest::Client,
    base_url: String,
    collection: String,
    vector_size: u32,
}

impl VectorStore {
    pub fn for_collection(
        cache: &VectorStoreCache,
        base_url: &str,
        collection: &str,
        vector_size: u32,
    ) -> Self {
        Self {
            http: cache.get_or_create(base_url, collection, vector_size),
            base_url: normalize_url(base_url),
            collection: collection.to_string(),
            vector_size,
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    /// Create the collection if it does not exist. With `recreate`, drop and
    /// re-create it unconditionally.
    pub async fn ensure_collection(&self, recreate: bool) -> Result<(), VectorStoreError> {
        if recreate {
            let _ = self.delete_collection().await;
        } else if self.collection_exists().await? {
            return Ok(());
        }

        let body = serde_json::json!({
            "vectors": {"size": self.vector_size, "distance": "Cosine"}
        });

        let response = self
            .http
            .put(self.collection_url())
            .json(&body)
            .send()
            .await
            .map_err(classify)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(VectorStoreError::Other(format!("create collection: {status}: {text}")));
        }
        Ok(())
    }

    async fn collection_exists(&self) -> Result<bool, VectorStoreError> {
        let response = self.http.get(self.collection_url()).send().await.map_err(classify)?;
        Ok(response.status().is_success())
    }

    pub async fn delete_collection(&self) -> Result<(), VectorStoreError> {
        self.http.delete(self.collection_url()).send().await.map_err(classify)?;
        Ok(())
    }

    pub async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError> {
        let response = self
            .http
            .get(format!("{}/collections", self.base_url))
            .send()
            .await
            .map_err(classify)?;

        #[derive(Deserialize)]
        struct Resp {
            result: ResultBody,
        }
        #[derive(Deserialize)]
        struct ResultBody {
            collections: Vec<CollectionName>,
        }
        #[derive(Deserialize)]
        struct CollectionName {
            name: String,
        }

        let body: Resp = response.json().await.map_err(VectorStoreError::Http)?;
        Ok(body.result.collections.into_iter().map(|c| c.name).collect())
    }

    /// Upsert points in batches of at most 1000.
    pub async fn upsert(&self, points: &[Point]) -> Result<(), VectorStoreError> {
        for batch in points.chunks(UPSERT_BATCH_SIZE) {
            let body = serde_json::json!({ "points": batch });
            let response = self
                .http
                .put(format!("{}/points", self.collection_url()))
                .json(&body)
                .send()
                .await
                .map_err(classify)?;

            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                return Err(VectorStoreError::Other(format!("upsert: {status}: {text}")));
            }
        }
        Ok(())
    }

    /// Delete points by id in batches of at most 1000.
    pub async fn delete_by_ids(&self, ids: &[String]) -> Result<(), VectorStoreError> {
        for batch in ids.chunks(DELETE_BATCH_SIZE) {
            let body = serde_json::json!({ "points": batch });
            let response = self
                .http
                .post(format!("{}/points/delete", self.collection_url()))
                .json(&body)
                .send()
                .await
                .map_err(classify)?;

            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                return Err(VectorStoreError::Other(format!("delete: {status}: {text}")));
            }
        }
        Ok(())
    }

    /// Delete all points matching `filter`, paging through in batches of 1000.
    pub async fn delete_by_filter(&self, filter: Filter) -> Result<(), VectorStoreError> {
        let body = serde_json::json!({ "filter": filter });
        let response = self
            .http
            .post(format!("{}/points/delete", self.collection_url()))
            .json(&body)
            .send()
            .await
            .map_err(classify)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(VectorStoreError::Other(format!("delete_by_filter: {status}: {text}")));
        }
        Ok(())
    }

    /// Scroll through points, optionally filtered, returning the page and
    /// an offset token for the next page (`None` when exhausted).
    pub async fn scroll(
        &self,
        filter: Option<Filter>,
        limit: u32,
        with_payload: bool,
        with_vectors: bool,
        offset: Option<Value>,
    ) -> Result<(Vec<RetrievedPoint>, Option<Value>), VectorStoreError> {
        let mut body = serde_json::json!({
            "limit": limit,
            "with_payload": with_payload,
            "with_vector": with_vectors,
        });
        if let Some(f) = filter {
            body["filter"] = f;
        }
        if let Some(o) = offset {
            body["offset"] = o;
        }

        let response = self
            .http
            .post(format!("{}/points/scroll", self.collection_url()))
            .json(&body)
            .send()
            .await
            .map_err(classify)?;

        #[derive(Deserialize)]
        struct Resp {
            result: ScrollResult,
        }
        #[derive(Deserialize)]
        struct ScrollResult {
            points: Vec<RetrievedPoint>,
            #[serde(default)]
            next_page_offset: Option<Value>,
        }

        let parsed: Resp = response.json().await.map_err(VectorStoreError::Http)?;
        Ok((parsed.result.points, parsed.result.next_page_offset))
    }

    /// Dense vector search, returning points sorted by descending similarity.
    pub async fn search(
        &self,
        vector: &[f32],
        filter: Option<Filter>,
        limit: u32,
        with_payload: bool,
    ) -> Result<Vec<RetrievedPoint>, VectorStoreError> {
        let mut body = serde_json::json!({
            "vector": vector,
            "limit": limit,
            "with_payload": with_payload,
        });
        if let Some(f) = filter {
            body["filter"] = f;
        }

        let response = self
            .http
            .post(format!("{}/points/search", self.collection_url()))
            .json(&body)
            .send()
            .await
            .map_err(classify)?;

        #[derive(Deserialize)]
        struct Resp {
            result: Vec<RetrievedPoint>,
        }
        let parsed: Resp = response.json().await.map_err(VectorStoreError::Http)?;
        Ok(parsed.result)
    }

    /// Full-text search via Qdrant's payload match-text filter, used by the
    /// retriever's lexical leg when the backend supports it natively.
    pub async fn query_text(
        &self,
        field: &str,
        text: &str,
        filter: Option<Filter>,
        limit: u32,
    ) -> Result<Vec<RetrievedPoint>, VectorStoreError> {
        let mut must = vec![serde_json::json!({
            "key": field,
            "match": {"text": text}
        })];
        if let Some(f) = filter {
            must.push(f);
        }

        let (points, _) = self
            .scroll(Some(serde_json::json!({"must": must})), limit, true, false, None)
            .await?;
        Ok(points)
    }

    /// Plain GET against the endpoint root, used as a liveness probe (§6).
    pub async fn check_connection(&self, timeout: Duration) -> (bool, Option<String>) {
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(c) => c,
            Err(e) => return (false, Some(e.to_string())),
        };

        match client.get(&self.base_url).send().await {
            Ok(response) if response.status().is_success() => (true, None),
            Ok(response) => (false, Some(format!("status {}", response.status()))),
            Err(e) => (false, Some(e.to_string())),
        }
    }
}

fn classify(err: reqwest::Error) -> VectorStoreError {
    if err.is_timeout() {
        VectorStoreError::Timeout
    } else if err.is_connect() {
        VectorStoreError::Connection(err.to_string())
    } else {
        VectorStoreError::Http(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_url_strips_trailing_slash() {
        assert_eq!(normalize_url("http://localhost:6333/"), "http://localhost:6333");
        assert_eq!(normalize_url("http://localhost:6333"), "http://localhost:6333");
    }

    #[test]
    fn cache_reuses_client_for_same_key() {
        let cache = VectorStoreCache::new();
        let _s1 = VectorStore::for_collection(&cache, "http://localhost:6333/", "docs", 1024);
        let _s2 = VectorStore::for_collection(&cache, "http://localhost:6333", "docs", 1024);
        assert_eq!(cache.clients.lock().unwrap().len(), 1);
    }

    #[test]
    fn cache_separates_different_collections() {
        let cache = VectorStoreCache::new();
        let _s1 = VectorStore::for_collection(&cache, "http://localhost:6333", "docs", 1024);
        let _s2 = VectorStore::for_collection(&cache, "http://localhost:6333", "other", 1024);
        assert_eq!(cache.clients.lock().unwrap().len(), 2);
    }

    #[test]
    fn upsert_batches_respect_cap() {
        let points: Vec<Point> = (0..2500)
            .map(|i| Point {
                id: i.to_string(),
                vector: vec![0.0; 4],
                payload: serde_json::json!({}),
            })
            .collect();
        let batches: Vec<_> = points.chunks(UPSERT_BATCH_SIZE).collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 1000);
        assert_eq!(batches[2].len(), 500);
    }
}
