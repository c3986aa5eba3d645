//! Service wiring and the two event boundaries.
//!
//! [`App`] owns the store, providers, job runner and the services built on
//! them. Document uploads and order creation go through
//! [`App::upload_document`] and [`App::record_order`], which persist first
//! and then submit the follow-up work (ingestion, resummarization) to the
//! job runner. Neither waits for that work.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use fusion_core::completion::CompletionProvider;
use fusion_core::embedding::EmbeddingProvider;
use fusion_core::models::{Document, NewDocument, NewOrder, Order};
use fusion_core::store::Store;

use crate::auth::TokenVerifier;
use crate::chat::{ChatService, ChatSettings, SessionRegistry};
use crate::completion::create_completion_provider;
use crate::config::Config;
use crate::db;
use crate::embedding::create_embedding_provider;
use crate::ingest::IngestPipeline;
use crate::jobs::JobRunner;
use crate::migrate;
use crate::sqlite_store::SqliteStore;
use crate::summarize::Summarizer;

pub struct App {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub jobs: JobRunner,
    pub pipeline: IngestPipeline,
    pub summarizer: Summarizer,
    pub chat: ChatService,
    pub auth: TokenVerifier,
}

impl App {
    /// Open the database, apply migrations, and build providers from config.
    pub async fn from_config(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::migrate_pool(&pool).await?;
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));

        let embedder = create_embedding_provider(&config.embedding, &config.providers)?;
        let completer = create_completion_provider(&config.completion, &config.providers)?;
        let auth = TokenVerifier::new(config.auth.secret()?);

        Ok(Self::from_parts(config, store, embedder, completer, auth))
    }

    /// Assemble from already-built parts. Used by tests with fake providers.
    pub fn from_parts(
        config: Config,
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<dyn CompletionProvider>,
        auth: TokenVerifier,
    ) -> Self {
        let timeout = config.providers.timeout();
        let pipeline = IngestPipeline::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            config.chunking.split_config(),
            timeout,
        );
        let summarizer = Summarizer::new(Arc::clone(&store), Arc::clone(&completer), timeout);
        let chat = ChatService::new(
            Arc::clone(&store),
            embedder,
            completer,
            Arc::new(SessionRegistry::new()),
            ChatSettings::from_config(&config),
        );
        Self {
            jobs: JobRunner::new(config.jobs.max_concurrency),
            config,
            store,
            pipeline,
            summarizer,
            chat,
            auth,
        }
    }

    /// Store `bytes` under the upload directory, create a `Pending`
    /// document, and queue its ingestion.
    pub async fn upload_document(
        &self,
        user_id: i64,
        original_filename: &str,
        bytes: &[u8],
    ) -> Result<Document> {
        let safe_name = sanitize_filename(original_filename);
        if safe_name.is_empty() {
            bail!("file name is empty");
        }
        let dir = &self.config.storage.upload_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create upload dir {}", dir.display()))?;
        let file_path = dir.join(format!("{}_{}", Uuid::new_v4().simple(), safe_name));
        tokio::fs::write(&file_path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", file_path.display()))?;

        self.register_document(user_id, original_filename, file_path)
            .await
    }

    /// Create a `Pending` document for a file already on disk and queue its ingestion.
    pub async fn register_document(
        &self,
        user_id: i64,
        original_filename: &str,
        file_path: PathBuf,
    ) -> Result<Document> {
        let doc = self
            .store
            .create_document(&NewDocument {
                user_id,
                original_filename: original_filename.to_string(),
                file_path,
            })
            .await?;
        tracing::info!(document_id = %doc.id, filename = original_filename, "document uploaded; queued for processing");

        let pipeline = self.pipeline.clone();
        let id = doc.id.clone();
        self.jobs.submit("ingest", async move {
            pipeline.ingest(&id).await?;
            Ok(())
        });
        Ok(doc)
    }

    /// Persist an order and queue the owner's summary rebuild.
    pub async fn record_order(&self, order: &NewOrder) -> Result<Order> {
        let created = self.store.create_order(order).await?;
        tracing::info!(order_id = created.id, user_id = created.user_id, "order created; queued summary update");

        let summarizer = self.summarizer.clone();
        let user_id = created.user_id;
        self.jobs.submit("resummarize", async move {
            summarizer.resummarize(user_id).await?;
            Ok(())
        });
        Ok(created)
    }
}

/// Keep the final path component with only `[A-Za-z0-9._-]`.
pub fn sanitize_filename(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    base.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Return Policy.pdf"), "Return_Policy.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename(".hidden.txt"), "hidden.txt");
        assert_eq!(sanitize_filename(""), "");
    }
}
