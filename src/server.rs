//! Ingestion/query HTTP server.
//!
//! Exposes a single collection to chat clients over JSON.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ingest` | Embed and store chat messages |
//! | `POST` | `/query` | Nearest stored messages for a query string |
//! | `GET`  | `/health` | Health check (version, collection, record count) |
//!
//! # Error Contract
//!
//! Every error is a flat JSON object:
//!
//! ```json
//! { "error": "Invalid request format" }
//! ```
//!
//! Malformed requests are `400`; anything the collection, store, or
//! embedding provider reports is `500` with the error's message.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser-based chat
//! clients can call the service directly.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::collection::Collection;
use crate::config::Config;
use crate::ingest::ingest_documents;
use crate::models::{ChatDocument, QueryHit};
use crate::query::query_hits;

const INVALID_FORMAT: &str = "Invalid request format";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub collection: Arc<Collection>,
    /// `n_results` used when a query omits it.
    pub default_n_results: usize,
    /// Request body cap; `None` lifts axum's 2 MB default entirely.
    pub max_body_bytes: Option<usize>,
}

/// Build the router. Split out from [`run_server`] so tests can drive it.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = match state.max_body_bytes {
        Some(limit) => DefaultBodyLimit::max(limit),
        None => DefaultBodyLimit::disable(),
    };

    Router::new()
        .route("/ingest", post(handle_ingest))
        .route("/query", post(handle_query))
        .route("/health", get(handle_health))
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config, collection: Arc<Collection>) -> anyhow::Result<()> {
    let state = AppState {
        collection,
        default_n_results: config.server.default_n_results,
        max_body_bytes: config.server.max_body_bytes,
    };

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;

    tracing::info!(bind = %config.server.bind, "chat-rag server listening");
    println!("chat-rag listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %err, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: err.to_string(),
    }
}

/// Unwraps the JSON body or answers 400 for anything that is not a JSON object.
///
/// An oversized body keeps axum's `413 Payload Too Large` status.
fn json_object(
    body: Result<Json<Value>, JsonRejection>,
) -> Result<serde_json::Map<String, Value>, AppError> {
    match body {
        Ok(Json(Value::Object(map))) => Ok(map),
        Ok(_) => Err(bad_request(INVALID_FORMAT)),
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            tracing::warn!(%rejection, "request body over limit");
            Err(AppError {
                status: StatusCode::PAYLOAD_TOO_LARGE,
                message: rejection.body_text(),
            })
        }
        Err(rejection) => {
            tracing::debug!(%rejection, "rejected request body");
            Err(bad_request(INVALID_FORMAT))
        }
    }
}

// ============ POST /ingest ============

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub success: bool,
    pub message: String,
    pub count: usize,
}

/// Handler for `POST /ingest`.
///
/// Every document is validated before anything is embedded; a single bad
/// entry rejects the whole batch.
pub async fn handle_ingest(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<IngestResponse>, AppError> {
    let mut body = json_object(body)?;
    let documents = match body.remove("documents") {
        Some(Value::Array(items)) => items,
        _ => return Err(bad_request(INVALID_FORMAT)),
    };

    let documents = documents
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value::<ChatDocument>(item)
                .map_err(|e| bad_request(format!("Invalid document at index {}: {}", index, e)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let count = ingest_documents(&state.collection, documents)
        .await
        .map_err(internal)?;

    tracing::info!(count, collection = state.collection.name(), "ingested documents");

    Ok(Json(IngestResponse {
        success: true,
        message: format!("Successfully ingested {} messages", count),
        count,
    }))
}

// ============ POST /query ============

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    pub results: Vec<QueryHit>,
}

/// Handler for `POST /query`.
///
/// `n_results` defaults to `[server].default_n_results` and must be a
/// positive integer when present.
pub async fn handle_query(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    let body = json_object(body)?;

    let query = match body.get("query") {
        Some(Value::String(q)) => q.clone(),
        _ => return Err(bad_request(INVALID_FORMAT)),
    };

    let n_results = match body.get("n_results") {
        None | Some(Value::Null) => state.default_n_results,
        Some(value) => value
            .as_u64()
            .filter(|n| *n >= 1)
            .map(|n| n as usize)
            .ok_or_else(|| bad_request("n_results must be a positive integer"))?,
    };

    let results = query_hits(&state.collection, &query, n_results)
        .await
        .map_err(internal)?;

    tracing::debug!(n_results, hits = results.len(), "query served");

    Ok(Json(QueryResponse {
        success: true,
        results,
    }))
}

// ============ GET /health ============

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    pub version: String,
    pub collection: String,
    pub count: usize,
}

async fn handle_health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    let count = state.collection.count().await.map_err(internal)?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        collection: state.collection.name().to_string(),
        count,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingProvider;
    use crate::store::memory::InMemoryStore;
    use crate::store::DistanceMetric;
    use serde_json::json;

    async fn state() -> AppState {
        let collection = Collection::open(
            Arc::new(InMemoryStore::new()),
            Arc::new(HashingProvider::new(512)),
            "chat_history",
            DistanceMetric::Cosine,
        )
        .await
        .unwrap();
        AppState {
            collection: Arc::new(collection),
            default_n_results: 3,
            max_body_bytes: None,
        }
    }

    fn doc(id: &str, text: &str) -> Value {
        json!({
            "id": id,
            "text": text,
            "metadata": {
                "role": "assistant",
                "chatId": "chat-1",
                "title": "Embedded AI Overview",
                "timestamp": "2025-03-01T10:00:00",
                "messageIndex": 0
            }
        })
    }

    async fn ingest(state: &AppState, body: Value) -> Result<Json<IngestResponse>, AppError> {
        handle_ingest(State(state.clone()), Ok(Json(body))).await
    }

    async fn query(state: &AppState, body: Value) -> Result<Json<QueryResponse>, AppError> {
        handle_query(State(state.clone()), Ok(Json(body))).await
    }

    #[tokio::test]
    async fn test_ingest_reports_count() {
        let state = state().await;
        let Json(resp) = ingest(
            &state,
            json!({"documents": [doc("a", "first message"), doc("b", "second message")]}),
        )
        .await
        .unwrap();
        assert!(resp.success);
        assert_eq!(resp.count, 2);
        assert_eq!(resp.message, "Successfully ingested 2 messages");
    }

    #[tokio::test]
    async fn test_ingest_missing_documents_is_bad_request() {
        let state = state().await;
        let err = ingest(&state, json!({"docs": []})).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), INVALID_FORMAT);
    }

    #[tokio::test]
    async fn test_ingest_non_object_body_is_bad_request() {
        let state = state().await;
        let err = ingest(&state, json!([1, 2, 3])).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ingest_document_without_text_is_bad_request() {
        let state = state().await;
        let err = ingest(
            &state,
            json!({"documents": [{"id": "a", "metadata": {}}]}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.message().contains("index 0"));
    }

    #[tokio::test]
    async fn test_ingest_store_rejection_is_internal_error() {
        let state = state().await;
        let mut bad = doc("a", "text");
        bad["metadata"]["nested"] = json!({"x": 1});
        let err = ingest(&state, json!({"documents": [bad]})).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.message().contains("nested"));
    }

    #[tokio::test]
    async fn test_ingest_duplicate_ids_succeeds() {
        let state = state().await;
        let body = json!({"documents": [doc("same", "hello there")]});
        let Json(first) = ingest(&state, body.clone()).await.unwrap();
        assert_eq!(first.count, 1);
        let Json(resp) = ingest(&state, body).await.unwrap();
        assert!(resp.success);
        assert_eq!(state.collection.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_query_empty_collection() {
        let state = state().await;
        let Json(resp) = query(&state, json!({"query": "anything"})).await.unwrap();
        assert!(resp.success);
        assert!(resp.results.is_empty());
    }

    #[tokio::test]
    async fn test_query_returns_relevant_hit_first() {
        let state = state().await;
        let Json(ingested) = ingest(
            &state,
            json!({"documents": [
                doc("embedded", "Embedded AI systems combine machine learning models with hardware devices"),
                doc("edge", "Edge computing processes data near the source reducing latency and bandwidth"),
                doc("rag", "Retrieval augmented generation combines information retrieval with text generation"),
            ]}),
        )
        .await
        .unwrap();
        assert_eq!(ingested.count, 3);

        let Json(resp) = query(&state, json!({"query": "embedded AI hardware", "n_results": 2}))
            .await
            .unwrap();
        assert_eq!(resp.results.len(), 2);
        assert_eq!(resp.results[0].id, "embedded");
        assert!(resp.results[0].distance <= resp.results[1].distance);
        assert_eq!(resp.results[0].metadata["title"], "Embedded AI Overview");
    }

    #[tokio::test]
    async fn test_query_default_n_results() {
        let state = state().await;
        let docs: Vec<Value> = (0..5).map(|i| doc(&format!("d{}", i), "same words")).collect();
        let Json(ingested) = ingest(&state, json!({ "documents": docs })).await.unwrap();
        assert_eq!(ingested.count, 5);

        let Json(resp) = query(&state, json!({"query": "same words"})).await.unwrap();
        assert_eq!(resp.results.len(), 3);
    }

    #[tokio::test]
    async fn test_query_missing_query_is_bad_request() {
        let state = state().await;
        let err = query(&state, json!({"n_results": 2})).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_query_invalid_n_results_is_bad_request() {
        let state = state().await;
        for n in [json!(0), json!(-1), json!("three"), json!(1.5)] {
            let err = query(&state, json!({"query": "x", "n_results": n}))
                .await
                .unwrap_err();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        }
    }

    /// Serve `state` on an ephemeral port and return its base URL.
    async fn serve(state: AppState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn large_batch(docs: usize) -> Value {
        let filler = "embedded systems discussion with plenty of detail ".repeat(200);
        let documents: Vec<Value> = (0..docs)
            .map(|i| doc(&format!("chat-1_{}", i), &format!("{} {}", i, filler)))
            .collect();
        json!({ "documents": documents })
    }

    #[tokio::test]
    async fn test_ingest_body_over_two_megabytes_is_accepted() {
        let state = state().await;
        let url = serve(state.clone()).await;

        let body = serde_json::to_vec(&large_batch(300)).unwrap();
        assert!(body.len() > 2 * 1024 * 1024);

        let resp = reqwest::Client::new()
            .post(format!("{}/ingest", url))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        let json: Value = resp.json().await.unwrap();
        assert_eq!(json["count"], 300);
        assert_eq!(state.collection.count().await.unwrap(), 300);
    }

    #[tokio::test]
    async fn test_configured_body_limit_answers_413() {
        let mut state = state().await;
        state.max_body_bytes = Some(1024);
        let url = serve(state.clone()).await;

        let resp = reqwest::Client::new()
            .post(format!("{}/ingest", url))
            .json(&large_batch(2))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 413);
        let json: Value = resp.json().await.unwrap();
        assert_ne!(json["error"], INVALID_FORMAT);
        assert!(json["error"].is_string());
        assert_eq!(state.collection.count().await.unwrap(), 0);
    }
}
