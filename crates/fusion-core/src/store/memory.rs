//! In-memory [`Store`](super::Store) implementation for tests and embedding
//! the core without a database.
//!
//! All state sits behind one `std::sync::RwLock`. Vector search is a
//! brute-force L2 scan over every stored chunk.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::embedding::l2_distance;
use crate::models::{
    ChatMessage, Chunk, Document, DocumentStatus, NewDocument, NewOrder, Order, OrderSummary,
    ScoredChunk, User,
};

use super::{ChatStore, DocumentStore, OrderStore};

#[derive(Default)]
struct Inner {
    documents: HashMap<String, Document>,
    chunks: Vec<Chunk>,
    messages: Vec<ChatMessage>,
    users: HashMap<i64, User>,
    orders: Vec<Order>,
    summaries: HashMap<i64, OrderSummary>,
    next_message_id: i64,
    next_order_id: i64,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn create_document(&self, doc: &NewDocument) -> Result<Document> {
        let document = Document {
            id: Uuid::new_v4().to_string(),
            user_id: doc.user_id,
            original_filename: doc.original_filename.clone(),
            file_path: doc.file_path.clone(),
            status: DocumentStatus::Pending,
            uploaded_at: Utc::now(),
            processed_at: None,
        };
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner
            .documents
            .insert(document.id.clone(), document.clone());
        Ok(document)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.documents.get(id).cloned())
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mut docs: Vec<Document> = inner.documents.values().cloned().collect();
        docs.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at).then(a.id.cmp(&b.id)));
        Ok(docs)
    }

    async fn save_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let doc = inner
            .documents
            .get_mut(id)
            .ok_or_else(|| anyhow!("document not found: {}", id))?;
        doc.status = status;
        doc.processed_at = processed_at;
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let existed = inner.documents.remove(id).is_some();
        inner.chunks.retain(|c| c.document_id != id);
        Ok(existed)
    }

    async fn insert_chunk(&self, chunk: &Chunk) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        if !inner.documents.contains_key(&chunk.document_id) {
            return Err(anyhow!("document not found: {}", chunk.document_id));
        }
        inner.chunks.push(chunk.clone());
        Ok(())
    }

    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mut chunks: Vec<Chunk> = inner
            .chunks
            .iter()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn nearest_chunks(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mut scored: Vec<ScoredChunk> = inner
            .chunks
            .iter()
            .map(|c| ScoredChunk {
                distance: l2_distance(query_vec, &c.embedding),
                chunk: c.clone(),
            })
            .collect();
        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(k);
        Ok(scored)
    }
}

#[async_trait]
impl ChatStore for InMemoryStore {
    async fn append_message(
        &self,
        user_id: i64,
        message: &str,
        is_from_ai: bool,
    ) -> Result<ChatMessage> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner.next_message_id += 1;
        let msg = ChatMessage {
            id: inner.next_message_id,
            user_id,
            message: message.to_string(),
            is_from_ai,
            created_at: Utc::now(),
        };
        inner.messages.push(msg.clone());
        Ok(msg)
    }

    async fn recent_messages(&self, user_id: i64, limit: usize) -> Result<Vec<ChatMessage>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mine: Vec<&ChatMessage> = inner
            .messages
            .iter()
            .filter(|m| m.user_id == user_id)
            .collect();
        let skip = mine.len().saturating_sub(limit);
        Ok(mine.into_iter().skip(skip).cloned().collect())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.users.get(&user_id).cloned())
    }

    async fn upsert_user(&self, user: &User) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn create_order(&self, order: &NewOrder) -> Result<Order> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner.next_order_id += 1;
        let created = Order {
            id: inner.next_order_id,
            user_id: order.user_id,
            created_at: Utc::now(),
            total_price: order.total_price,
            paid: order.paid,
            status: order.status.clone(),
            items: order.items.clone(),
        };
        inner.orders.push(created.clone());
        Ok(created)
    }

    async fn orders_for_user(&self, user_id: i64) -> Result<Vec<Order>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mut orders: Vec<Order> = inner
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(orders)
    }

    async fn users_with_orders(&self) -> Result<Vec<i64>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mut ids: Vec<i64> = inner.orders.iter().map(|o| o.user_id).collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    async fn upsert_order_summary(&self, user_id: i64, summary: &str) -> Result<OrderSummary> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let row = OrderSummary {
            user_id,
            summary: summary.to_string(),
            last_updated: Utc::now(),
        };
        inner.summaries.insert(user_id, row.clone());
        Ok(row)
    }

    async fn get_order_summary(&self, user_id: i64) -> Result<Option<OrderSummary>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.summaries.get(&user_id).cloned())
    }

    async fn list_order_summaries(&self) -> Result<Vec<OrderSummary>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mut rows: Vec<OrderSummary> = inner.summaries.values().cloned().collect();
        rows.sort_by_key(|s| s.user_id);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn chunk(doc: &str, index: i64, v: Vec<f32>) -> Chunk {
        Chunk {
            id: Uuid::new_v4().to_string(),
            document_id: doc.to_string(),
            chunk_index: index,
            content: format!("chunk {}", index),
            embedding: v,
            created_at: Utc::now(),
        }
    }

    async fn new_doc(store: &InMemoryStore) -> Document {
        store
            .create_document(&NewDocument {
                user_id: 1,
                original_filename: "a.txt".to_string(),
                file_path: PathBuf::from("a.txt"),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_delete_cascades_chunks() {
        let store = InMemoryStore::new();
        let doc = new_doc(&store).await;
        store.insert_chunk(&chunk(&doc.id, 0, vec![0.0])).await.unwrap();
        store.insert_chunk(&chunk(&doc.id, 1, vec![1.0])).await.unwrap();
        assert!(store.delete_document(&doc.id).await.unwrap());
        assert!(store.chunks_for_document(&doc.id).await.unwrap().is_empty());
        assert!(store.nearest_chunks(&[0.0], 4).await.unwrap().is_empty());
        assert!(!store.delete_document(&doc.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_recent_messages_chronological_tail() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store
                .append_message(7, &format!("m{}", i), i % 2 == 1)
                .await
                .unwrap();
        }
        store.append_message(8, "other user", false).await.unwrap();
        let recent = store.recent_messages(7, 3).await.unwrap();
        let texts: Vec<&str> = recent.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_summary_upsert_replaces() {
        let store = InMemoryStore::new();
        store.upsert_order_summary(3, "first").await.unwrap();
        store.upsert_order_summary(3, "second").await.unwrap();
        let all = store.list_order_summaries().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].summary, "second");
    }
}
