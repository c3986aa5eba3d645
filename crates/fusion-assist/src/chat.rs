//! Chat sessions: per-connection state and turn handling.
//!
//! A connection moves through `Connecting → Ready → (Receiving ⇄ Ready) →
//! Closed`. [`ChatService::open`] is the `Ready` transition: it replays the
//! user's most recent messages into a fresh history and registers the
//! session under a new [`ConnectionId`]. [`ChatService::handle`] runs one
//! turn and always yields exactly one outbound [`ChatFrame`]. [`ChatService::close`]
//! drops the session.
//!
//! Each session sits behind its own async mutex held for the whole turn, so
//! a connection handles one message at a time while connections proceed
//! independently.
//!
//! # Turn
//!
//! 1. Persist the inbound message.
//! 2. Classify intent. Provider failure or a malformed label means
//!    order/general.
//! 3. Build the prompt: retrieved chunks plus trailing history for a
//!    document question, otherwise display name, current order summary,
//!    optional detailed order list, and the full session history.
//! 4. Generate.
//! 5. Persist the reply. Only then are the user and AI turns appended to
//!    the session history, and the reply is emitted.
//!
//! Any failure in steps 1 and 3–5 becomes a `System` error frame and leaves
//! the history as it was.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use fusion_core::completion::{CompletionProvider, PromptMessage};
use fusion_core::embedding::EmbeddingProvider;
use fusion_core::intent::{self, Intent};
use fusion_core::models::ChatMessage;
use fusion_core::prompt;
use fusion_core::retrieve::{chunk_texts, retrieve};
use fusion_core::store::Store;
use fusion_core::Error;

use crate::config::Config;
use crate::http::bounded;

pub const ERROR_NOTICE: &str = "Sorry, I encountered an error.";
pub const SESSION_LOST_NOTICE: &str = "Chat session lost. Please refresh.";
pub const INIT_FAILED_NOTICE: &str = "Could not initialize chat session.";
pub const INVALID_MESSAGE_NOTICE: &str = "Messages must be JSON of the form {\"message\": \"...\"}.";

pub type ConnectionId = Uuid;

/// Inbound frame.
#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FrameId {
    Message(i64),
    Notice(String),
}

/// Outbound frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatFrame {
    pub id: FrameId,
    pub user: String,
    pub message: String,
    pub timestamp: String,
}

impl ChatFrame {
    pub fn reply(bot_name: &str, saved: &ChatMessage) -> Self {
        Self {
            id: FrameId::Message(saved.id),
            user: bot_name.to_string(),
            message: saved.message.clone(),
            timestamp: saved.created_at.to_rfc3339(),
        }
    }

    /// A `System` notice with an `error-<timestamp>` id.
    pub fn notice(message: &str) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: FrameId::Notice(format!("error-{}", now)),
            user: "System".to_string(),
            message: message.to_string(),
            timestamp: now,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.id, FrameId::Notice(_))
    }
}

/// Transient per-connection state.
#[derive(Debug)]
pub struct Session {
    pub user_id: i64,
    pub display_name: String,
    history: Vec<PromptMessage>,
    cap: usize,
}

impl Session {
    fn new(user_id: i64, display_name: String, cap: usize) -> Self {
        Self {
            user_id,
            display_name,
            history: Vec::new(),
            cap,
        }
    }

    pub fn history(&self) -> &[PromptMessage] {
        &self.history
    }

    fn push(&mut self, message: PromptMessage) {
        self.history.push(message);
        if self.history.len() > self.cap {
            let excess = self.history.len() - self.cap;
            self.history.drain(..excess);
        }
    }
}

/// Live sessions keyed by connection.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ConnectionId, Arc<Mutex<Session>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn insert(&self, session: Session) -> ConnectionId {
        let connection = Uuid::new_v4();
        self.sessions
            .write()
            .await
            .insert(connection, Arc::new(Mutex::new(session)));
        connection
    }

    pub async fn get(&self, connection: ConnectionId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(&connection).cloned()
    }

    async fn remove(&self, connection: ConnectionId) -> bool {
        self.sessions.write().await.remove(&connection).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Returned by [`ChatService::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHandle {
    pub connection: ConnectionId,
    pub user_id: i64,
}

/// Tunables for [`ChatService`].
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub bot_name: String,
    pub history_limit: usize,
    pub rag_history_turns: usize,
    pub session_history_cap: usize,
    pub top_k: usize,
    pub timeout: Duration,
}

impl ChatSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bot_name: config.chat.bot_name.clone(),
            history_limit: config.chat.history_limit,
            rag_history_turns: config.chat.rag_history_turns,
            session_history_cap: config.chat.session_history_cap,
            top_k: config.retrieval.top_k,
            timeout: config.providers.timeout(),
        }
    }
}

#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    completer: Arc<dyn CompletionProvider>,
    registry: Arc<SessionRegistry>,
    settings: ChatSettings,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<dyn CompletionProvider>,
        registry: Arc<SessionRegistry>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            completer,
            registry,
            settings,
        }
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Load context and replay history for an authenticated user, then register the session.
    pub async fn open(&self, user_id: i64) -> fusion_core::Result<SessionHandle> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(Error::UserNotFound(user_id))?;

        let mut session = Session::new(
            user_id,
            user.display_name(),
            self.settings.session_history_cap,
        );
        let past = self
            .store
            .recent_messages(user_id, self.settings.history_limit)
            .await?;
        for msg in &past {
            session.push(if msg.is_from_ai {
                PromptMessage::assistant(&msg.message)
            } else {
                PromptMessage::user(&msg.message)
            });
        }

        let connection = self.registry.insert(session).await;
        tracing::info!(
            user_id,
            %connection,
            replayed = past.len(),
            "chat session ready"
        );
        Ok(SessionHandle {
            connection,
            user_id,
        })
    }

    pub async fn close(&self, connection: ConnectionId) {
        if self.registry.remove(connection).await {
            tracing::info!(%connection, "chat session closed");
        }
    }

    /// Handle one raw inbound text frame.
    pub async fn handle(&self, connection: ConnectionId, raw: &str) -> ChatFrame {
        let inbound: InboundMessage = match serde_json::from_str(raw) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(%connection, error = %e, "unreadable chat frame");
                return ChatFrame::notice(INVALID_MESSAGE_NOTICE);
            }
        };
        self.handle_message(connection, &inbound.message).await
    }

    /// Handle one parsed message.
    pub async fn handle_message(&self, connection: ConnectionId, text: &str) -> ChatFrame {
        let Some(session) = self.registry.get(connection).await else {
            tracing::warn!(%connection, "{}", Error::SessionLost);
            return ChatFrame::notice(SESSION_LOST_NOTICE);
        };
        let mut session = session.lock().await;

        match self.turn(&mut session, text).await {
            Ok(saved) => ChatFrame::reply(&self.settings.bot_name, &saved),
            Err(e) => {
                tracing::error!(
                    %connection,
                    user_id = session.user_id,
                    error = %e,
                    "chat turn failed"
                );
                ChatFrame::notice(ERROR_NOTICE)
            }
        }
    }

    async fn turn(&self, session: &mut Session, text: &str) -> fusion_core::Result<ChatMessage> {
        let user_id = session.user_id;
        self.store.append_message(user_id, text, false).await?;

        let intent = self.classify(user_id, text).await;
        let messages = match intent {
            Intent::DocumentQuestion => self.document_prompt(session, text).await?,
            Intent::OrderGeneral => self.order_prompt(session, text).await?,
        };

        let reply = bounded(
            "complete",
            self.settings.timeout,
            self.completer.complete(&messages),
        )
        .await?;

        let saved = self.store.append_message(user_id, &reply, true).await?;
        session.push(PromptMessage::user(text));
        session.push(PromptMessage::assistant(&reply));
        tracing::debug!(user_id, intent = intent.as_str(), "chat turn complete");
        Ok(saved)
    }

    async fn classify(&self, user_id: i64, text: &str) -> Intent {
        match bounded(
            "classify",
            self.settings.timeout,
            intent::classify(self.completer.as_ref(), text),
        )
        .await
        {
            Ok(intent) => intent,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "intent classification failed; using order context");
                Intent::OrderGeneral
            }
        }
    }

    async fn document_prompt(
        &self,
        session: &Session,
        question: &str,
    ) -> fusion_core::Result<Vec<PromptMessage>> {
        let hits = bounded(
            "retrieve",
            self.settings.timeout,
            retrieve(
                self.store.as_ref(),
                self.embedder.as_ref(),
                question,
                self.settings.top_k,
            ),
        )
        .await?;
        tracing::debug!(user_id = session.user_id, hits = hits.len(), "retrieved context");

        let system = prompt::rag_system_prompt(&self.settings.bot_name, &chunk_texts(&hits));
        let history = prompt::trailing(session.history(), self.settings.rag_history_turns);
        Ok(prompt::with_history(system, history, question))
    }

    async fn order_prompt(
        &self,
        session: &Session,
        message: &str,
    ) -> fusion_core::Result<Vec<PromptMessage>> {
        let summary = self.store.get_order_summary(session.user_id).await?;
        let detailed = if prompt::wants_order_details(message) {
            let orders = self.store.orders_for_user(session.user_id).await?;
            Some(prompt::render_detailed_orders(&orders))
        } else {
            None
        };

        let system = prompt::order_system_prompt(
            &self.settings.bot_name,
            &session.display_name,
            summary.as_ref().map(|s| s.summary.as_str()),
            detailed.as_deref(),
        );
        Ok(prompt::with_history(system, session.history(), message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[test]
    fn test_notice_frame_shape() {
        let frame = ChatFrame::notice(ERROR_NOTICE);
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["user"], "System");
        assert!(json["id"].as_str().unwrap().starts_with("error-"));
        assert_eq!(json["message"], ERROR_NOTICE);
        assert!(frame.is_error());
    }

    #[test]
    fn test_reply_frame_has_numeric_id() {
        let saved = ChatMessage {
            id: 17,
            user_id: 1,
            message: "Hi!".to_string(),
            is_from_ai: true,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(ChatFrame::reply("FusionBot", &saved)).unwrap();
        assert_eq!(json["id"], 17);
        assert_eq!(json["user"], "FusionBot");
        assert!(DateTime::parse_from_rfc3339(json["timestamp"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_session_history_cap_drops_oldest() {
        let mut session = Session::new(1, "maya".to_string(), 3);
        for i in 0..5 {
            session.push(PromptMessage::user(format!("m{}", i)));
        }
        let texts: Vec<&str> = session.history().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
    }
}
