//! # Fusion Assist
//!
//! The AI core of the Fusion store: staff-uploaded documents are split,
//! embedded and indexed for question answering, and every customer gets a
//! chat assistant that routes each message either to the document index or
//! to their order history.
//!
//! ## Architecture
//!
//! ```text
//!  upload ──▶ JobRunner ──▶ IngestPipeline ──▶ SQLite (documents, chunks)
//!                                                 ▲
//!  order  ──▶ JobRunner ──▶ Summarizer ──▶ SQLite (order_summaries)
//!                                                 ▲
//!  WebSocket ──▶ ChatService ── classify ─┬─ retrieve ─┘
//!                                         └─ order summary
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`app`] | Service wiring; upload and order event boundaries |
//! | [`auth`] | HS256 bearer tokens |
//! | [`chat`] | Per-connection sessions and turn handling |
//! | [`completion`] | OpenAI, Ollama and Gemini chat models |
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`embedding`] | OpenAI, Ollama and Gemini embedders |
//! | [`extract`] | Text extraction for .txt, .pdf and .docx |
//! | [`http`] | Shared HTTP client, retries, timeouts |
//! | [`ingest`] | Load, split, embed, persist |
//! | [`jobs`] | Bounded background job runner |
//! | [`migrate`] | Schema migrations |
//! | [`server`] | HTTP API and chat WebSocket |
//! | [`sqlite_store`] | SQLite implementation of the store traits |
//! | [`summarize`] | Order history summaries |

pub mod app;
pub mod auth;
pub mod chat;
pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod http;
pub mod ingest;
pub mod jobs;
pub mod migrate;
pub mod server;
pub mod sqlite_store;
pub mod summarize;
