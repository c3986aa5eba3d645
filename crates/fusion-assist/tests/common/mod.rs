#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use fusion_assist::app::App;
use fusion_assist::auth::TokenVerifier;
use fusion_assist::config::parse_config;
use fusion_assist::sqlite_store::SqliteStore;
use fusion_assist::{db, migrate};
use fusion_core::completion::{CompletionProvider, PromptMessage, Role};
use fusion_core::embedding::EmbeddingProvider;
use fusion_core::models::{DocumentStatus, NewOrder, OrderItem, User};
use fusion_core::store::Store;

pub const SECRET: &str = "integration-secret";

/// Keywords mapped to one axis each, so nearness is predictable.
const AXES: &[&str] = &["refund", "shipping", "warranty"];

/// Deterministic embedder: one dimension per keyword plus a constant bias.
pub struct KeywordEmbedder {
    pub fail: AtomicBool,
    /// 1-based call number that fails; 0 never fails.
    pub fail_on_call: AtomicUsize,
    calls: AtomicUsize,
    watched: Mutex<Option<(Arc<dyn Store>, String)>>,
    seen: Mutex<Vec<DocumentStatus>>,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
            fail_on_call: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            watched: Mutex::new(None),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Record the stored status of `document_id` at every embed call.
    pub fn watch(&self, store: Arc<dyn Store>, document_id: &str) {
        *self.watched.lock().unwrap() = Some((store, document_id.to_string()));
    }

    pub fn seen_statuses(&self) -> Vec<DocumentStatus> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }

    fn dims(&self) -> usize {
        AXES.len() + 1
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let watched = self.watched.lock().unwrap().clone();
        if let Some((store, id)) = watched {
            let doc = store.get_document(&id).await?;
            if let Some(doc) = doc {
                self.seen.lock().unwrap().push(doc.status);
            }
        }
        if self.fail.load(Ordering::SeqCst) || self.fail_on_call.load(Ordering::SeqCst) == call {
            bail!("embedding backend unavailable");
        }
        let lower = text.to_lowercase();
        let mut v: Vec<f32> = AXES
            .iter()
            .map(|k| lower.matches(k).count().min(1) as f32)
            .collect();
        v.push(0.1);
        Ok(v)
    }
}

/// Completion fake. Answers classification prompts with `label`, summary
/// prompts with `summary`, and everything else with a numbered reply.
/// Every call is recorded.
pub struct ScriptedCompleter {
    pub label: Mutex<String>,
    pub summary: Mutex<String>,
    pub fail: AtomicBool,
    pub calls: Mutex<Vec<Vec<PromptMessage>>>,
}

impl ScriptedCompleter {
    pub fn new() -> Self {
        Self {
            label: Mutex::new("ORDER_GENERAL".to_string()),
            summary: Mutex::new("Buys mostly electronics.".to_string()),
            fail: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_label(&self, label: &str) {
        *self.label.lock().unwrap() = label.to_string();
    }

    /// The last non-classification call.
    pub fn last_reply_prompt(&self) -> Vec<PromptMessage> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|m| !is_classification(m))
            .cloned()
            .unwrap_or_default()
    }

    pub fn classification_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|m| is_classification(m))
            .count()
    }
}

fn is_classification(messages: &[PromptMessage]) -> bool {
    messages
        .first()
        .map(|m| m.role == Role::System && m.content.contains("Reply with exactly one label"))
        .unwrap_or(false)
}

#[async_trait]
impl CompletionProvider for ScriptedCompleter {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, messages: &[PromptMessage]) -> Result<String> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(messages.to_vec());
            calls.len()
        };
        if self.fail.load(Ordering::SeqCst) {
            bail!("completion backend unavailable");
        }
        if is_classification(messages) {
            return Ok(self.label.lock().unwrap().clone());
        }
        if messages.len() == 1 && messages[0].content.starts_with("Based on the following order history") {
            return Ok(self.summary.lock().unwrap().clone());
        }
        Ok(format!("reply {}", n))
    }
}

pub struct Harness {
    pub tmp: TempDir,
    pub pool: SqlitePool,
    pub app: Arc<App>,
    pub embedder: Arc<KeywordEmbedder>,
    pub completer: Arc<ScriptedCompleter>,
}

impl Harness {
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.app.store
    }

    pub fn token(&self, user_id: i64) -> String {
        TokenVerifier::new(SECRET)
            .sign(user_id, std::time::Duration::from_secs(300))
            .unwrap()
    }

    pub fn write_file(&self, name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = self.tmp.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }
}

pub async fn harness() -> Harness {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().display().to_string();
    let config = parse_config(&format!(
        r#"
[db]
path = "{root}/data/fusion.sqlite"

[storage]
upload_dir = "{root}/uploads"

[embedding]
provider = "ollama"
model = "keyword"
dims = 4

[completion]
provider = "ollama"
model = "scripted"

[providers]
timeout_secs = 5

[server]
bind = "127.0.0.1:0"
"#
    ))
    .unwrap();

    let pool = db::connect(&config).await.unwrap();
    migrate::migrate_pool(&pool).await.unwrap();
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool.clone()));

    let embedder = Arc::new(KeywordEmbedder::new());
    let completer = Arc::new(ScriptedCompleter::new());
    let app = App::from_parts(
        config,
        store,
        embedder.clone(),
        completer.clone(),
        TokenVerifier::new(SECRET),
    );

    Harness {
        tmp,
        pool,
        app: Arc::new(app),
        embedder,
        completer,
    }
}

pub async fn seed_user(store: &Arc<dyn Store>, id: i64, first_name: Option<&str>, is_staff: bool) {
    store
        .upsert_user(&User {
            id,
            email: format!("user{}@example.com", id),
            first_name: first_name.map(str::to_string),
            is_staff,
        })
        .await
        .unwrap();
}

pub fn order(user_id: i64, product: &str, quantity: u32, price: f64) -> NewOrder {
    NewOrder {
        user_id,
        total_price: price * quantity as f64,
        paid: true,
        status: "Shipped".to_string(),
        items: vec![OrderItem {
            product_name: product.to_string(),
            category: "Electronics".to_string(),
            quantity,
            price,
        }],
    }
}
