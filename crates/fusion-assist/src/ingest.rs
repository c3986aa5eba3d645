//! Document ingestion pipeline: load → split → embed → persist.
//!
//! [`IngestPipeline::ingest`] drives one document through
//! `Pending → Processing → {Success | Failed}`. The `Processing` step is
//! persisted before any work starts, and the terminal status is always
//! persisted together with `processed_at`, whatever went wrong in between.
//! Chunks are written one at a time in split order, so a failure part-way
//! leaves the chunks already embedded and marks the document `Failed`.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use fusion_core::chunk::{join_sections, split_text, SplitConfig};
use fusion_core::embedding::EmbeddingProvider;
use fusion_core::models::{Chunk, Document, DocumentStatus};
use fusion_core::store::Store;
use fusion_core::Error;

use crate::extract::{load_file, Loader};
use crate::http::bounded;

#[derive(Clone)]
pub struct IngestPipeline {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    split: SplitConfig,
    timeout: Duration,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        split: SplitConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            embedder,
            split,
            timeout,
        }
    }

    /// Process one document and return its terminal status.
    ///
    /// Extraction, embedding and chunk-write failures end in `Failed` and are
    /// not returned as errors. `Err` means the document does not exist or
    /// its status could not be persisted.
    pub async fn ingest(&self, document_id: &str) -> Result<DocumentStatus> {
        let mut doc = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| Error::DocumentNotFound(document_id.to_string()))?;

        if doc.status != DocumentStatus::Pending {
            tracing::warn!(
                document_id,
                status = %doc.status,
                "document already ingested; skipping"
            );
            return Ok(doc.status);
        }

        doc.transition(DocumentStatus::Processing)?;
        self.store
            .save_document_status(&doc.id, doc.status, None)
            .await?;
        tracing::info!(
            document_id,
            filename = %doc.original_filename,
            "processing document"
        );

        let terminal = match self.process(&doc).await {
            Ok(chunks) => {
                tracing::info!(document_id, chunks, "document processed");
                DocumentStatus::Success
            }
            Err(e) => {
                tracing::error!(document_id, error = %e, "document processing failed");
                DocumentStatus::Failed
            }
        };

        doc.transition(terminal)?;
        self.store
            .save_document_status(&doc.id, doc.status, Some(Utc::now()))
            .await?;
        Ok(doc.status)
    }

    async fn process(&self, doc: &Document) -> fusion_core::Result<usize> {
        let loader = Loader::for_extension(&doc.file_extension())?;
        let sections = load_file(loader, &doc.file_path).await?;
        tracing::debug!(document_id = %doc.id, sections = sections.len(), "loaded document");

        let text = join_sections(&sections);
        let splits = split_text(&text, &self.split);
        if splits.is_empty() {
            tracing::warn!(document_id = %doc.id, "document has no text");
        }

        let total = splits.len();
        for split in splits {
            let embedding = bounded("embed", self.timeout, self.embedder.embed(&split.text)).await?;
            if embedding.len() != self.embedder.dims() {
                return Err(Error::Provider(format!(
                    "embedding has {} dimensions, expected {}",
                    embedding.len(),
                    self.embedder.dims()
                )));
            }
            self.store
                .insert_chunk(&Chunk {
                    id: Uuid::new_v4().to_string(),
                    document_id: doc.id.clone(),
                    chunk_index: split.index as i64,
                    content: split.text,
                    embedding,
                    created_at: Utc::now(),
                })
                .await?;
            tracing::debug!(
                document_id = %doc.id,
                chunk = split.index + 1,
                total,
                "saved chunk"
            );
        }
        Ok(total)
    }
}
