//! Core data models used throughout Fusion Assist.
//!
//! Documents and their chunks flow through the ingestion pipeline; chat
//! messages and order summaries feed the chat assistant. Users and orders
//! are owned by external collaborators and only read here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::Error;

/// Processing lifecycle of an uploaded document.
///
/// Transitions only move forward: `Pending → Processing → {Success | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "PENDING",
            DocumentStatus::Processing => "PROCESSING",
            DocumentStatus::Success => "SUCCESS",
            DocumentStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(DocumentStatus::Pending),
            "PROCESSING" => Some(DocumentStatus::Processing),
            "SUCCESS" => Some(DocumentStatus::Success),
            "FAILED" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Success | DocumentStatus::Failed)
    }

    /// Whether `self → next` is a legal step. Skipping `Processing` is not.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        matches!(
            (self, next),
            (DocumentStatus::Pending, DocumentStatus::Processing)
                | (DocumentStatus::Processing, DocumentStatus::Success)
                | (DocumentStatus::Processing, DocumentStatus::Failed)
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An uploaded file awaiting or having gone through ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub user_id: i64,
    pub original_filename: String,
    /// Where the upload boundary stored the raw bytes.
    pub file_path: PathBuf,
    pub status: DocumentStatus,
    pub uploaded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Document {
    /// Lower-cased extension of the stored file, including the leading dot.
    pub fn file_extension(&self) -> String {
        self.file_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_default()
    }

    /// Moves to `next`, rejecting regressions and skips.
    pub fn transition(&mut self, next: DocumentStatus) -> Result<(), Error> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

/// Input to the upload boundary.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub user_id: i64,
    pub original_filename: String,
    pub file_path: PathBuf,
}

/// A contiguous slice of a document's text paired with its embedding.
///
/// Chunks are immutable; they are only created, or removed when their
/// document is deleted.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// Position in split order, starting at 0.
    pub chunk_index: i64,
    pub content: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// A chunk returned by nearest-neighbour search with its L2 distance.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub distance: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub id: i64,
    pub user_id: i64,
    pub message: String,
    pub is_from_ai: bool,
    pub created_at: DateTime<Utc>,
}

/// One AI-generated digest of a user's order history. At most one per user.
#[derive(Debug, Clone, Serialize)]
pub struct OrderSummary {
    pub user_id: i64,
    pub summary: String,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub first_name: Option<String>,
    #[serde(default)]
    pub is_staff: bool,
}

impl User {
    /// First name when set, otherwise the local part of the email address.
    pub fn display_name(&self) -> String {
        match self.first_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self
                .email
                .split('@')
                .next()
                .unwrap_or(&self.email)
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_name: String,
    pub category: String,
    pub quantity: u32,
    /// Unit price at time of purchase.
    pub price: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub total_price: f64,
    pub paid: bool,
    pub status: String,
    pub items: Vec<OrderItem>,
}

/// Input to the order boundary.
#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    #[serde(default)]
    pub user_id: i64,
    pub total_price: f64,
    #[serde(default)]
    pub paid: bool,
    #[serde(default = "default_order_status")]
    pub status: String,
    pub items: Vec<OrderItem>,
}

pub fn default_order_status() -> String {
    "Shipped".to_string()
}
