//! Storage abstraction for Fusion Assist.
//!
//! Storage is split along ownership lines so that each component only
//! depends on what it touches:
//!
//! | Trait | Owns | Used by |
//! |-------|------|---------|
//! | [`DocumentStore`] | documents, chunks (the vector store) | ingestion, retrieval, upload API |
//! | [`ChatStore`] | chat messages | chat sessions |
//! | [`OrderStore`] | users, orders, order summaries | summarizer, chat sessions |
//!
//! [`Store`] is the union of all three and is blanket-implemented, so a
//! backend only implements the three parts. Every write is a single-row
//! insert or an upsert keyed by its owning entity; concurrent writers are
//! resolved by the backend (last write wins).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    ChatMessage, Chunk, Document, DocumentStatus, NewDocument, NewOrder, Order, OrderSummary,
    ScoredChunk, User,
};

/// Documents and their embedded chunks.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a document in `Pending` status.
    async fn create_document(&self, doc: &NewDocument) -> Result<Document>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// All documents, most recently uploaded first.
    async fn list_documents(&self) -> Result<Vec<Document>>;

    /// Persist a document's status and processed timestamp.
    async fn save_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Delete a document and every chunk it owns. Returns `false` if absent.
    async fn delete_document(&self, id: &str) -> Result<bool>;

    /// Append one chunk. Chunks are never updated.
    async fn insert_chunk(&self, chunk: &Chunk) -> Result<()>;

    /// Chunks of one document in split order.
    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>>;

    /// The `k` chunks closest to `query_vec` by L2 distance, nearest first.
    /// Searches across all documents.
    async fn nearest_chunks(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;
}

/// The append-only chat log.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn append_message(
        &self,
        user_id: i64,
        message: &str,
        is_from_ai: bool,
    ) -> Result<ChatMessage>;

    /// The user's most recent `limit` messages, returned oldest first.
    async fn recent_messages(&self, user_id: i64, limit: usize) -> Result<Vec<ChatMessage>>;
}

/// Users, orders and the per-user order digest.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get_user(&self, user_id: i64) -> Result<Option<User>>;

    /// Insert or replace a user row. Account management is external; this
    /// exists for seeding and tests.
    async fn upsert_user(&self, user: &User) -> Result<()>;

    async fn create_order(&self, order: &NewOrder) -> Result<Order>;

    /// All of a user's orders with their items, most recent first.
    async fn orders_for_user(&self, user_id: i64) -> Result<Vec<Order>>;

    /// Ids of users with at least one order, ascending.
    async fn users_with_orders(&self) -> Result<Vec<i64>>;

    /// Create or wholesale-replace the user's summary.
    async fn upsert_order_summary(&self, user_id: i64, summary: &str) -> Result<OrderSummary>;

    async fn get_order_summary(&self, user_id: i64) -> Result<Option<OrderSummary>>;

    async fn list_order_summaries(&self) -> Result<Vec<OrderSummary>>;
}

/// Everything the service needs from a backend.
pub trait Store: DocumentStore + ChatStore + OrderStore {}

impl<T: DocumentStore + ChatStore + OrderStore> Store for T {}
