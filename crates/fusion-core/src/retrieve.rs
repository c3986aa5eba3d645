//! Nearest-neighbour retrieval over the chunk store.
//!
//! The query is embedded with the same [`EmbeddingProvider`] that was used at
//! ingestion, then the store returns the `k` chunks with the smallest L2
//! distance. There is no re-ranking and no per-user ownership filter: every
//! chunk in the store is a candidate.

use anyhow::Result;

use crate::embedding::EmbeddingProvider;
use crate::models::ScoredChunk;
use crate::store::DocumentStore;

/// Number of chunks returned when the caller has no preference.
pub const DEFAULT_TOP_K: usize = 4;

/// Embeds a query and returns the `k` nearest chunks, nearest first.
///
/// Fewer than `k` stored chunks returns all of them; an empty store returns
/// an empty vec.
pub async fn retrieve<S>(
    store: &S,
    embedder: &dyn EmbeddingProvider,
    query: &str,
    k: usize,
) -> Result<Vec<ScoredChunk>>
where
    S: DocumentStore + ?Sized,
{
    if k == 0 {
        return Ok(Vec::new());
    }
    let query_vec = embedder.embed(query).await?;
    store.nearest_chunks(&query_vec, k).await
}

/// Chunk texts in rank order, as fed to the grounding prompt.
pub fn chunk_texts(results: &[ScoredChunk]) -> Vec<String> {
    results.iter().map(|r| r.chunk.content.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, NewDocument};
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::path::PathBuf;

    /// Maps the first character of the text to a point on a line.
    struct LineEmbedder;

    #[async_trait]
    impl EmbeddingProvider for LineEmbedder {
        fn model_name(&self) -> &str {
            "line"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let x = text.chars().next().map(|c| c as u32 as f32).unwrap_or(0.0);
            Ok(vec![x, 0.0])
        }
    }

    async fn seed(store: &InMemoryStore, points: &[f32]) {
        let doc = store
            .create_document(&NewDocument {
                user_id: 1,
                original_filename: "faq.txt".to_string(),
                file_path: PathBuf::from("faq.txt"),
            })
            .await
            .unwrap();
        for (i, &x) in points.iter().enumerate() {
            store
                .insert_chunk(&Chunk {
                    id: format!("c{}", i),
                    document_id: doc.id.clone(),
                    chunk_index: i as i64,
                    content: format!("point {}", x),
                    embedding: vec![x, 0.0],
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_returns_k_nearest_ascending() {
        let store = InMemoryStore::new();
        // 'd' embeds to 100.0
        seed(&store, &[90.0, 101.0, 150.0, 97.0, 100.0, 60.0]).await;
        let hits = retrieve(&store, &LineEmbedder, "d", 4).await.unwrap();
        let texts = chunk_texts(&hits);
        assert_eq!(texts, vec!["point 100", "point 101", "point 97", "point 90"]);
        for pair in hits.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[tokio::test]
    async fn test_fewer_than_k_returns_all() {
        let store = InMemoryStore::new();
        seed(&store, &[1.0, 2.0]).await;
        let hits = retrieve(&store, &LineEmbedder, "a", DEFAULT_TOP_K).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_store_is_empty() {
        let store = InMemoryStore::new();
        let hits = retrieve(&store, &LineEmbedder, "anything", 4).await.unwrap();
        assert!(hits.is_empty());
    }
}
