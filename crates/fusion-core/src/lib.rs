//! # Fusion Core
//!
//! Runtime-agnostic logic shared by the Fusion Assist service: data models,
//! the overlapping text splitter, embedding and completion provider traits,
//! the store abstraction, nearest-neighbour retrieval, intent parsing, and
//! prompt assembly.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Concrete
//! providers and the SQLite store live in the `fusion-assist` app crate.

pub mod chunk;
pub mod completion;
pub mod embedding;
pub mod error;
pub mod intent;
pub mod models;
pub mod prompt;
pub mod retrieve;
pub mod store;

pub use error::{Error, Result};
