//! HTTP and WebSocket server.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `GET`  | `/ws/chat/?token=<jwt>` | token | Chat session over WebSocket |
//! | `POST` | `/api/qa/documents/` | staff | Upload a document (multipart `file` field) |
//! | `GET`  | `/api/qa/documents/` | staff | List documents, newest first |
//! | `GET`  | `/api/qa/documents/{id}` | staff | One document with its chunk count |
//! | `DELETE` | `/api/qa/documents/{id}` | staff | Delete a document and its chunks |
//! | `POST` | `/api/orders/` | bearer | Create an order for the caller |
//! | `GET`  | `/api/chat/history/` | bearer | The caller's recent chat messages |
//! | `GET`  | `/health` | none | Status, version, job counters |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "forbidden", "message": "staff only" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `forbidden` (403),
//! `not_found` (404), `internal` (500).
//!
//! The WebSocket route verifies its token before upgrading and answers 403
//! on failure. Once upgraded, every text frame gets exactly one JSON frame
//! back; see [`crate::chat`].

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use fusion_core::models::{ChatMessage, Document, NewOrder, Order, User};

use crate::app::App;
use crate::auth::bearer_token;
use crate::chat::{ChatFrame, INIT_FAILED_NOTICE};
use crate::config::Config;
use crate::jobs::JobStats;

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Build the router. Split out from [`run_server`] so tests can drive it.
pub fn router(app: Arc<App>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws/chat/", get(handle_ws))
        .route(
            "/api/qa/documents/",
            get(handle_list_documents).post(handle_upload),
        )
        .route(
            "/api/qa/documents/{id}",
            get(handle_get_document).delete(handle_delete_document),
        )
        .route("/api/orders/", axum::routing::post(handle_create_order))
        .route("/api/chat/history/", get(handle_history))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

/// Start the server on `[server].bind` and run until Ctrl-C.
///
/// On shutdown, waits up to 30 seconds for queued ingestion and summary
/// jobs to finish.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = Arc::new(App::from_config(config).await?);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Fusion Assist listening on http://{}", bind_addr);

    axum::serve(listener, router(Arc::clone(&app)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!(stats = ?app.jobs.stats(), "draining background jobs");
    if tokio::time::timeout(SHUTDOWN_GRACE, app.jobs.wait_idle())
        .await
        .is_err()
    {
        tracing::warn!(stats = ?app.jobs.stats(), "background jobs still running at exit");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{:#}", err), "request failed");
        internal("internal error")
    }
}

fn error(status: StatusCode, code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code,
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn unauthorized(message: impl Into<String>) -> AppError {
    error(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

fn forbidden(message: impl Into<String>) -> AppError {
    error(StatusCode::FORBIDDEN, "forbidden", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    error(StatusCode::NOT_FOUND, "not_found", message)
}

fn internal(message: impl Into<String>) -> AppError {
    error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

// ============ Authentication ============

/// User id from the `Authorization: Bearer` header.
fn caller(app: &App, headers: &HeaderMap) -> Result<i64, AppError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .ok_or_else(|| unauthorized("missing bearer token"))?;
    app.auth
        .verify(token)
        .map(|claims| claims.user_id)
        .map_err(|e| unauthorized(e.to_string()))
}

async fn staff(app: &App, headers: &HeaderMap) -> Result<User, AppError> {
    let user_id = caller(app, headers)?;
    match app.store.get_user(user_id).await? {
        Some(user) if user.is_staff => Ok(user),
        _ => Err(forbidden("staff only")),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    sessions: usize,
    jobs: JobStats,
}

async fn handle_health(State(app): State<Arc<App>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: app.chat.registry().len().await,
        jobs: app.jobs.stats(),
    })
}

// ============ GET /ws/chat/ ============

#[derive(Deserialize)]
struct WsParams {
    token: Option<String>,
}

async fn handle_ws(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(app): State<Arc<App>>,
) -> Result<Response, AppError> {
    let token = params
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| forbidden("missing token"))?;
    let claims = app.auth.verify(&token).map_err(|e| {
        tracing::warn!(error = %e, "chat connection rejected");
        forbidden(e.to_string())
    })?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, claims.user_id, app)))
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &ChatFrame,
) -> anyhow::Result<()> {
    let json = serde_json::to_string(frame)?;
    sender.send(Message::Text(json.into())).await?;
    Ok(())
}

async fn handle_socket(socket: WebSocket, user_id: i64, app: Arc<App>) {
    let (mut sender, mut receiver) = socket.split();

    let session = match app.chat.open(user_id).await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(user_id, error = %e, "chat session init failed");
            let _ = send_frame(&mut sender, &ChatFrame::notice(INIT_FAILED_NOTICE)).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(connection = %session.connection, error = %e, "socket error");
                break;
            }
        };
        match msg {
            Message::Text(text) => {
                let frame = app.chat.handle(session.connection, text.as_str()).await;
                if let Err(e) = send_frame(&mut sender, &frame).await {
                    tracing::warn!(connection = %session.connection, error = %e, "failed to send chat frame");
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    app.chat.close(session.connection).await;
}

// ============ /api/qa/documents/ ============

async fn handle_upload(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let user = staff(&app, &headers).await?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| bad_request("file field has no file name"))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(e.to_string()))?;
        if bytes.is_empty() {
            return Err(bad_request("file is empty"));
        }
        let doc = app.upload_document(user.id, &filename, &bytes).await?;
        return Ok((StatusCode::CREATED, Json(doc)));
    }
    Err(bad_request("multipart body has no `file` field"))
}

#[derive(Serialize)]
struct DocumentList {
    documents: Vec<Document>,
}

async fn handle_list_documents(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
) -> Result<Json<DocumentList>, AppError> {
    staff(&app, &headers).await?;
    let documents = app.store.list_documents().await?;
    Ok(Json(DocumentList { documents }))
}

#[derive(Serialize)]
struct DocumentDetail {
    #[serde(flatten)]
    document: Document,
    chunks: usize,
}

async fn handle_get_document(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<DocumentDetail>, AppError> {
    staff(&app, &headers).await?;
    let document = app
        .store
        .get_document(&id)
        .await?
        .ok_or_else(|| not_found(format!("document not found: {}", id)))?;
    let chunks = app.store.chunks_for_document(&id).await?.len();
    Ok(Json(DocumentDetail { document, chunks }))
}

async fn handle_delete_document(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    staff(&app, &headers).await?;
    let document = app
        .store
        .get_document(&id)
        .await?
        .ok_or_else(|| not_found(format!("document not found: {}", id)))?;
    app.store.delete_document(&id).await?;
    if let Err(e) = tokio::fs::remove_file(&document.file_path).await {
        tracing::warn!(document_id = %id, error = %e, "stored file not removed");
    }
    tracing::info!(document_id = %id, "document deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ============ POST /api/orders/ ============

async fn handle_create_order(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Json(mut order): Json<NewOrder>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    order.user_id = caller(&app, &headers)?;
    if order.items.is_empty() {
        return Err(bad_request("order has no items"));
    }
    if order.items.iter().any(|i| i.quantity == 0) {
        return Err(bad_request("item quantity must be at least 1"));
    }
    if app.store.get_user(order.user_id).await?.is_none() {
        return Err(not_found(format!("user not found: {}", order.user_id)));
    }
    let created = app.record_order(&order).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

// ============ GET /api/chat/history/ ============

#[derive(Serialize)]
struct HistoryResponse {
    messages: Vec<ChatMessage>,
}

async fn handle_history(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
) -> Result<Json<HistoryResponse>, AppError> {
    let user_id = caller(&app, &headers)?;
    let messages = app
        .store
        .recent_messages(user_id, app.config.chat.history_limit)
        .await?;
    Ok(Json(HistoryResponse { messages }))
}
