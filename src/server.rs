//! HTTP API server.
//!
//! Exposes the retrieval-and-generation pipeline as a JSON API for the
//! browser UI and other clients.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Service banner |
//! | `GET`  | `/health` | Health check with index and model info |
//! | `POST` | `/ask` | One-shot question |
//! | `POST` | `/chat` | Question with client-held history |
//! | `GET`  | `/risk?filter=HIGH` | Risk distribution from chunk metadata |
//! | `GET`  | `/patient/{id}` | Chart summary for one patient |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "invalid_request", "message": "question must be between 3 and 500 characters, got 1" } }
//! ```
//!
//! | Status | Code |
//! |--------|------|
//! | 422 | `invalid_request` |
//! | 404 | `not_found` |
//! | 500 | `retrieval_failed` |
//! | 504 | `llm_timeout` |
//! | 429 | `llm_rate_limited` |
//! | 502 | `llm_auth_failed`, `llm_unavailable` |
//!
//! Every response, errors included, carries an `x-process-time` header with
//! the handling time in milliseconds. CORS is fully open.

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::generate::GenerationError;
use crate::models::{Answer, ConversationTurn, RiskLevel, SourceRef};
use crate::pipeline::{ClinicalRag, PatientSummary, PipelineError};
use crate::retrieve::RiskDistribution;

pub const PROCESS_TIME_HEADER: &str = "x-process-time";

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub rag: Arc<ClinicalRag>,
}

/// Load the index and LLM client, then serve on `[server].bind` until shutdown.
///
/// Fails before binding when the index is missing or incompatible, or when
/// the LLM API key is not set.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let rag = ClinicalRag::from_config(config).await?;
    let app = build_router(AppState { rag: Arc::new(rag) });

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "API server listening");
    println!("API server listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Router with every route, the latency header and CORS applied.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(PROCESS_TIME_HEADER)]);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/ask", post(handle_ask))
        .route("/chat", post(handle_chat))
        .route("/risk", get(handle_risk))
        .route("/patient/{id}", get(handle_patient))
        .fallback(handle_not_found)
        .layer(cors)
        .layer(middleware::from_fn(process_time))
        .with_state(state)
}

/// Stamp `x-process-time` (milliseconds, two decimals) on every response.
async fn process_time(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let mut response = next.run(req).await;

    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    if let Ok(value) = HeaderValue::from_str(&format!("{:.2}", elapsed_ms)) {
        response.headers_mut().insert(PROCESS_TIME_HEADER, value);
    }
    tracing::debug!(%method, %path, status = response.status().as_u16(), elapsed_ms, "request");
    response
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "invalid_request", message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Validation(msg) => AppError::invalid_request(msg),
            PipelineError::PatientNotFound(id) => AppError::new(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("patient {} not found", id),
            ),
            PipelineError::Retrieval(e) => {
                tracing::error!(error = %format!("{:#}", e), "retrieval failed");
                AppError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "retrieval_failed",
                    format!("retrieval failed: {:#}", e),
                )
            }
            PipelineError::Generation(e) => e.into(),
        }
    }
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        let message = err.to_string();
        match err {
            GenerationError::Timeout(_) => {
                AppError::new(StatusCode::GATEWAY_TIMEOUT, "llm_timeout", message)
            }
            GenerationError::RateLimited(_) => {
                AppError::new(StatusCode::TOO_MANY_REQUESTS, "llm_rate_limited", message)
            }
            GenerationError::Unauthorized { .. } | GenerationError::MissingApiKey(_) => {
                AppError::new(StatusCode::BAD_GATEWAY, "llm_auth_failed", message)
            }
            _ => AppError::new(StatusCode::BAD_GATEWAY, "llm_unavailable", message),
        }
    }
}

// ============ GET / and /health ============

async fn handle_not_found() -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", "no such endpoint")
}

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "clinical-rag",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/health", "/ask", "/chat", "/risk", "/patient/{id}"],
    }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    model: String,
    embedding_model: String,
    chunks: usize,
    notes: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let index = state.rag.retriever().index();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        model: state.rag.model_name().to_string(),
        embedding_model: index.meta.model.clone(),
        chunks: index.chunks.len(),
        notes: index.notes.len(),
    })
}

// ============ POST /ask and /chat ============

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    #[serde(alias = "question")]
    pub query: String,
    /// Include the formatted context block in the response.
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(alias = "question")]
    pub query: String,
    #[serde(default, alias = "chat_history")]
    pub history: Vec<ConversationTurn>,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub question: String,
    pub answer: String,
    pub template: String,
    pub model: String,
    pub sources: Vec<SourceRef>,
    pub chunks_retrieved: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub latency_ms: f64,
}

impl AskResponse {
    fn from_answer(answer: Answer, verbose: bool) -> Self {
        Self {
            chunks_retrieved: answer.sources.len(),
            context: verbose.then_some(answer.context),
            question: answer.question,
            answer: answer.answer,
            template: answer.template,
            model: answer.model,
            sources: answer.sources,
            latency_ms: answer.latency_ms,
        }
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::invalid_request(rejection.body_text()))
}

async fn handle_ask(
    State(state): State<AppState>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, AppError> {
    let req = json_body(payload)?;
    let answer = state.rag.ask(&req.query).await?;
    Ok(Json(AskResponse::from_answer(answer, req.verbose)))
}

async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, AppError> {
    let req = json_body(payload)?;
    let answer = state.rag.chat(&req.query, &req.history).await?;
    Ok(Json(AskResponse::from_answer(answer, false)))
}

// ============ GET /risk ============

#[derive(Debug, Deserialize)]
pub struct RiskQuery {
    pub filter: Option<String>,
}

#[derive(Serialize)]
struct RiskResponse {
    summary: RiskDistribution,
    latency_ms: f64,
}

async fn handle_risk(
    State(state): State<AppState>,
    query: Result<Query<RiskQuery>, QueryRejection>,
) -> Result<Json<RiskResponse>, AppError> {
    let started = Instant::now();
    let Query(query) = query.map_err(|r| AppError::invalid_request(r.body_text()))?;

    let filter = match query.filter.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<RiskLevel>()
                .map_err(|e| AppError::invalid_request(e.to_string()))?,
        ),
    };

    let summary = state.rag.risk_summary(filter);
    Ok(Json(RiskResponse {
        summary,
        latency_ms: (started.elapsed().as_secs_f64() * 100_000.0).round() / 100.0,
    }))
}

// ============ GET /patient/{id} ============

async fn handle_patient(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PatientSummary>, AppError> {
    let summary = state.rag.patient_summary(&id).await?;
    Ok(Json(summary))
}
