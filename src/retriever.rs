//! Hybrid dense + lexical retrieval over the vector store, with optional
//! reranking (§4.5).
//!
//! Dense search runs cosine similarity over the query embedding; lexical
//! search either delegates to the vector store's native full-text filter or,
//! when that comes back empty on a backend that doesn't support it, scans a
//! wider scroll window for substring matches. Results are merged by id
//! (first-seen wins, dense results go first) and optionally reranked.

use std::sync::Arc;

use serde_json::Value;

use crate::config::{HybridSearchConfig, RerankerConfig};
use crate::embeddings::EmbeddingClient;
use crate::error::RetrievalError;
use crate::reranker;
use crate::types::LlmClientParams;
use crate::vectorstore::{Filter, RetrievedPoint, VectorStore};

const LEXICAL_SCROLL_MULTIPLIER: u32 = 10;
/// Score assigned to a hit that only the lexical leg found, since a
/// substring match has no natural cosine-similarity analogue.
const LEXICAL_ONLY_SCORE: f32 = 0.5;

/// One retrieved chunk (§4.5 "Return shape").
#[derive(Debug, Clone)]
pub struct Hit {
    pub id: String,
    pub text: String,
    pub score: f32,
    pub metadata: Value,
}

/// Combines a vector store collection, an embedding client, and an optional
/// reranker into the `rag` tool's search backend.
pub struct HybridRetriever {
    vector_store: VectorStore,
    embedder: Arc<EmbeddingClient>,
    http: reqwest::Client,
    reranker_params: Option<LlmClientParams>,
    hybrid_config: HybridSearchConfig,
    reranker_config: RerankerConfig,
}

impl HybridRetriever {
    pub fn new(
        vector_store: VectorStore,
        embedder: Arc<EmbeddingClient>,
        reranker_params: Option<LlmClientParams>,
        hybrid_config: HybridSearchConfig,
        reranker_config: RerankerConfig,
    ) -> Self {
        Self {
            vector_store,
            embedder,
            http: reqwest::Client::new(),
            reranker_params,
            hybrid_config,
            reranker_config,
        }
    }

    /// Retrieve the `top_k` most relevant chunks for `query`, optionally
    /// restricted to a single `document_id`.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<Hit>, RetrievalError> {
        let filter = document_id.map(document_filter);

        let merged = if self.hybrid_config.enabled {
            let dense = self.dense_search(query, filter.clone()).await?;
            let lexical = self.lexical_search(query, filter).await?;
            merge_by_id(dense, lexical)
        } else {
            self.dense_search(query, filter).await?
        };

        if merged.is_empty() {
            return Ok(Vec::new());
        }

        if self.reranker_config.enabled {
            if let Some(reranked) = self.try_rerank(query, &merged).await {
                let mut scored = reranked;
                scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
                scored.truncate(top_k);
                return Ok(scored);
            }
        }

        let mut merged = merged;
        merged.truncate(top_k);
        Ok(merged)
    }

    async fn dense_search(&self, query: &str, filter: Option<Filter>) -> Result<Vec<Hit>, RetrievalError> {
        let embedding = self.embedder.embed(&[query.to_string()]).await?;
        let vector = embedding.into_iter().next().unwrap_or_default();

        let points = self
            .vector_store
            .search(&vector, filter, self.hybrid_config.vector_top_k, true)
            .await?;

        Ok(points.into_iter().map(point_to_hit_with_score).collect())
    }

    async fn lexical_search(&self, query: &str, filter: Option<Filter>) -> Result<Vec<Hit>, RetrievalError> {
        let points = self
            .vector_store
            .query_text("text", query, filter.clone(), self.hybrid_config.text_top_k)
            .await?;

        if !points.is_empty() {
            return Ok(points.into_iter().map(point_to_hit_lexical).collect());
        }

        // Backend has no native full-text support: scan a wider scroll
        // window for a case-insensitive substring match.
        let scroll_limit = self.hybrid_config.vector_top_k * LEXICAL_SCROLL_MULTIPLIER;
        let (points, _) = self.vector_store.scroll(filter, scroll_limit, true, false, None).await?;

        let needle = query.to_lowercase();
        let matches: Vec<RetrievedPoint> = points
            .into_iter()
            .filter(|p| {
                p.payload
                    .get("text")
                    .and_then(|v| v.as_str())
                    .is_some_and(|t| t.to_lowercase().contains(&needle))
            })
            .take(self.hybrid_config.text_top_k as usize)
            .collect();

        Ok(matches.into_iter().map(point_to_hit_lexical).collect())
    }

    async fn try_rerank(&self, query: &str, candidates: &[Hit]) -> Option<Vec<Hit>> {
        let params = self.reranker_params.as_ref()?;
        let texts: Vec<String> = candidates.iter().map(|h| h.text.clone()).collect();
        let scores = reranker::rerank(&self.http, params, query, &texts).await?;

        if scores.len() != candidates.len() {
            return None;
        }

        Some(
            candidates
                .iter()
                .zip(scores)
                .map(|(hit, rerank_score)| Hit {
                    id: hit.id.clone(),
                    text: hit.text.clone(),
                    score: reranker::blend_scores(hit.score, rerank_score),
                    metadata: hit.metadata.clone(),
                })
                .collect(),
        )
    }
}

fn document_filter(document_id: &str) -> Filter {
    serde_json::json!({
        "must": [{"key": "document_id", "match": {"value": document_id}}]
    })
}

fn point_to_hit_with_score(point: RetrievedPoint) -> Hit {
    let text = point.payload.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    Hit {
        id: point.id,
        text,
        score: point.score.unwrap_or(0.0),
        metadata: point.payload,
    }
}

fn point_to_hit_lexical(point: RetrievedPoint) -> Hit {
    let text = point.payload.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    Hit {
        id: point.id,
        text,
        score: LEXICAL_ONLY_SCORE,
        metadata: point.payload,
    }
}

/// Union by id, first-seen wins; dense results are inserted before lexical
/// so a hit both legs found keeps its dense (vector-similarity) score.
fn merge_by_id(dense: Vec<Hit>, lexical: Vec<Hit>) -> Vec<Hit> {
    let mut seen = std::collections::HashSet::new();
    let mut merged = Vec::with_capacity(dense.len() + lexical.len());

    for hit in dense.into_iter().chain(lexical) {
        if seen.insert(hit.id.clone()) {
            merged.push(hit);
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f32) -> Hit {
        Hit {
            id: id.to_string(),
            text: format!("text for {id}"),
            score,
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn merge_dedupes_preferring_dense_score() {
        let dense = vec![hit("a", 0.9), hit("b", 0.7)];
        let lexical = vec![hit("b", 0.5), hit("c", 0.5)];
        let merged = merge_by_id(dense, lexical);
        let ids: Vec<&str> = merged.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(merged[1].score, 0.7);
    }

    #[test]
    fn merge_preserves_insertion_order_with_no_duplicates() {
        let dense = vec![hit("x", 0.1)];
        let lexical = vec![hit("y", 0.2)];
        let merged = merge_by_id(dense, lexical);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, "x");
        assert_eq!(merged[1].id, "y");
    }

    #[test]
    fn document_filter_targets_document_id_field() {
        let filter = document_filter("doc-123");
        assert_eq!(filter["must"][0]["key"], "document_id");
        assert_eq!(filter["must"][0]["match"]["value"], "doc-123");
    }
}
