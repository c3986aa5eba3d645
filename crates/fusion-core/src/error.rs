//! Domain error taxonomy.
//!
//! Plumbing code (stores, HTTP providers, config) returns [`anyhow::Result`];
//! anything that has to be classified for the user or for a document's
//! terminal status is expressed as an [`Error`] variant.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// No loader exists for this file extension. Fatal for the document.
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// A supported file could not be parsed.
    #[error("text extraction failed: {0}")]
    Extraction(String),

    /// Embedding or completion backend returned an error or a malformed payload.
    #[error("provider failure: {0}")]
    Provider(String),

    #[error("{operation} timed out after {after:?}")]
    TimedOut {
        operation: &'static str,
        after: Duration,
    },

    /// Inbound chat message with no registered session for its connection.
    #[error("chat session lost")]
    SessionLost,

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("user not found: {0}")]
    UserNotFound(i64),

    /// Status change that would violate Pending → Processing → terminal.
    #[error("invalid document status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Wraps a provider-side error, keeping its full context chain.
    pub fn provider(err: impl std::fmt::Display) -> Self {
        Error::Provider(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
