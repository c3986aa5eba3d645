//! SQLite-backed [`Store`](fusion_core::store::Store) implementation.
//!
//! Timestamps are stored as Unix milliseconds, vectors as little-endian f32
//! BLOBs. Nearest-neighbour search loads every chunk vector and ranks by L2
//! distance in Rust.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

use fusion_core::embedding::{blob_to_vec, l2_distance, vec_to_blob};
use fusion_core::models::{
    ChatMessage, Chunk, Document, DocumentStatus, NewDocument, NewOrder, Order, OrderItem,
    OrderSummary, ScoredChunk, User,
};
use fusion_core::store::{ChatStore, DocumentStore, OrderStore};

/// SQLite implementation of the document, chat and order stores.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let status: String = row.get("status");
    let path: String = row.get("file_path");
    Ok(Document {
        id: row.get("id"),
        user_id: row.get("user_id"),
        original_filename: row.get("original_filename"),
        file_path: PathBuf::from(path),
        status: DocumentStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown document status in database: {}", status))?,
        uploaded_at: from_millis(row.get("uploaded_at")),
        processed_at: row
            .get::<Option<i64>, _>("processed_at")
            .map(from_millis),
    })
}

fn chunk_from_row(row: &SqliteRow) -> Chunk {
    let blob: Vec<u8> = row.get("embedding");
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        chunk_index: row.get("chunk_index"),
        content: row.get("content"),
        embedding: blob_to_vec(&blob),
        created_at: from_millis(row.get("created_at")),
    }
}

fn message_from_row(row: &SqliteRow) -> ChatMessage {
    ChatMessage {
        id: row.get("id"),
        user_id: row.get("user_id"),
        message: row.get("message"),
        is_from_ai: row.get("is_from_ai"),
        created_at: from_millis(row.get("created_at")),
    }
}

fn summary_from_row(row: &SqliteRow) -> OrderSummary {
    OrderSummary {
        user_id: row.get("user_id"),
        summary: row.get("summary"),
        last_updated: from_millis(row.get("last_updated")),
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
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

        sqlx::query(
            r#"
            INSERT INTO documents (id, user_id, original_filename, file_path, status, uploaded_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&document.id)
        .bind(document.user_id)
        .bind(&document.original_filename)
        .bind(document.file_path.to_string_lossy().to_string())
        .bind(document.status.as_str())
        .bind(to_millis(document.uploaded_at))
        .execute(&self.pool)
        .await?;

        Ok(document)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query("SELECT * FROM documents ORDER BY uploaded_at DESC, id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn save_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE documents SET status = ?, processed_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(processed_at.map(to_millis))
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("document not found: {}", id));
        }
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_chunk(&self, chunk: &Chunk) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_id, chunk_index, content, embedding, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.content)
        .bind(vec_to_blob(&chunk.embedding))
        .bind(to_millis(chunk.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE document_id = ? ORDER BY chunk_index")
            .bind(document_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn nearest_chunks(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query("SELECT id, embedding FROM chunks")
            .fetch_all(&self.pool)
            .await?;

        let mut ranked: Vec<(String, f32)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let distance = l2_distance(query_vec, &blob_to_vec(&blob));
                (row.get::<String, _>("id"), distance)
            })
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        ranked.truncate(k);

        let mut scored = Vec::with_capacity(ranked.len());
        for (id, distance) in ranked {
            let row = sqlx::query("SELECT * FROM chunks WHERE id = ?")
                .bind(&id)
                .fetch_optional(&self.pool)
                .await?;
            // Skip chunks cascaded away between the two queries.
            if let Some(row) = row {
                scored.push(ScoredChunk {
                    chunk: chunk_from_row(&row),
                    distance,
                });
            }
        }
        Ok(scored)
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn append_message(
        &self,
        user_id: i64,
        message: &str,
        is_from_ai: bool,
    ) -> Result<ChatMessage> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO chat_messages (user_id, message, is_from_ai, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(message)
        .bind(is_from_ai)
        .bind(to_millis(created_at))
        .execute(&self.pool)
        .await?;

        Ok(ChatMessage {
            id: result.last_insert_rowid(),
            user_id,
            message: message.to_string(),
            is_from_ai,
            created_at: from_millis(to_millis(created_at)),
        })
    }

    async fn recent_messages(&self, user_id: i64, limit: usize) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM chat_messages
            WHERE user_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<ChatMessage> = rows.iter().map(message_from_row).collect();
        messages.reverse();
        Ok(messages)
    }
}

#[async_trait]
impl OrderStore for SqliteStore {
    async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, email, first_name, is_staff FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| User {
            id: row.get("id"),
            email: row.get("email"),
            first_name: row.get("first_name"),
            is_staff: row.get("is_staff"),
        }))
    }

    async fn upsert_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, first_name, is_staff)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                first_name = excluded.first_name,
                is_staff = excluded.is_staff
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(user.is_staff)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_order(&self, order: &NewOrder) -> Result<Order> {
        let created_at = from_millis(to_millis(Utc::now()));
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO orders (user_id, created_at, total_price, paid, status) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(order.user_id)
        .bind(to_millis(created_at))
        .bind(order.total_price)
        .bind(order.paid)
        .bind(&order.status)
        .execute(&mut *tx)
        .await?;
        let order_id = result.last_insert_rowid();

        for item in &order.items {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, product_name, category, quantity, price)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(order_id)
            .bind(&item.product_name)
            .bind(&item.category)
            .bind(item.quantity as i64)
            .bind(item.price)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(Order {
            id: order_id,
            user_id: order.user_id,
            created_at,
            total_price: order.total_price,
            paid: order.paid,
            status: order.status.clone(),
            items: order.items.clone(),
        })
    }

    async fn orders_for_user(&self, user_id: i64) -> Result<Vec<Order>> {
        let order_rows = sqlx::query(
            "SELECT * FROM orders WHERE user_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let item_rows = sqlx::query(
            r#"
            SELECT oi.order_id, oi.product_name, oi.category, oi.quantity, oi.price
            FROM order_items oi
            JOIN orders o ON o.id = oi.order_id
            WHERE o.user_id = ?
            ORDER BY oi.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut items: HashMap<i64, Vec<OrderItem>> = HashMap::new();
        for row in &item_rows {
            let quantity: i64 = row.get("quantity");
            items
                .entry(row.get("order_id"))
                .or_default()
                .push(OrderItem {
                    product_name: row.get("product_name"),
                    category: row.get("category"),
                    quantity: u32::try_from(quantity).unwrap_or(0),
                    price: row.get("price"),
                });
        }

        Ok(order_rows
            .iter()
            .map(|row| {
                let id: i64 = row.get("id");
                Order {
                    id,
                    user_id: row.get("user_id"),
                    created_at: from_millis(row.get("created_at")),
                    total_price: row.get("total_price"),
                    paid: row.get("paid"),
                    status: row.get("status"),
                    items: items.remove(&id).unwrap_or_default(),
                }
            })
            .collect())
    }

    async fn users_with_orders(&self) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT DISTINCT user_id FROM orders ORDER BY user_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn upsert_order_summary(&self, user_id: i64, summary: &str) -> Result<OrderSummary> {
        let now = from_millis(to_millis(Utc::now()));
        sqlx::query(
            r#"
            INSERT INTO order_summaries (user_id, summary, last_updated)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                summary = excluded.summary,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(user_id)
        .bind(summary)
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?;

        Ok(OrderSummary {
            user_id,
            summary: summary.to_string(),
            last_updated: now,
        })
    }

    async fn get_order_summary(&self, user_id: i64) -> Result<Option<OrderSummary>> {
        let row = sqlx::query("SELECT * FROM order_summaries WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(summary_from_row))
    }

    async fn list_order_summaries(&self) -> Result<Vec<OrderSummary>> {
        let rows = sqlx::query("SELECT * FROM order_summaries ORDER BY user_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(summary_from_row).collect())
    }
}
