use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    Json,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::{error, info};

use crate::llm::GeneratorFactory;
use crate::service::{Converter, ProgressEvent};
use crate::sql;
use crate::web::state::AppState;

const SSE_KEEP_ALIVE: Duration = Duration::from_secs(10);
const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub question: String,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub sql: String,
    pub backend: String,
    pub model: String,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub sql: String,
}

#[derive(Debug, Deserialize)]
pub struct AutoExecuteRequest {
    pub question: String,
    pub max_retries: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub default_model: String,
    pub active: bool,
    pub available: bool,
    pub requires_api_key: bool,
}

fn keep_alive() -> KeepAlive {
    KeepAlive::new().interval(SSE_KEEP_ALIVE).text("keep-alive")
}

/// Generate SQL from a natural-language question, buffered or streamed.
pub async fn generate_sql(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GenerateRequest>,
) -> Result<Response, (StatusCode, String)> {
    info!("Generate request: {}", payload.question);

    let generator = state.llm_manager.create().map_err(|e| {
        error!("Failed to create generation backend: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    let converter = Converter::new(generator);
    let max_tokens = state.config.llm.max_tokens;

    if !payload.stream {
        let cleaned_sql = converter
            .convert(&state.schema_text, &payload.question, max_tokens)
            .await
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

        return Ok(Json(GenerateResponse {
            sql: cleaned_sql,
            backend: state.llm_manager.backend().to_string(),
            model: state.llm_manager.model().to_string(),
        })
        .into_response());
    }

    // Streamed: raw fragments as they arrive, then the done marker, then the
    // cleaned SQL as the final frame.
    let schema = state.schema_text.clone();
    let question = payload.question.clone();
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(32);

    tokio::spawn(async move {
        let mut fragments = match converter
            .convert_stream(&schema, &question, max_tokens)
            .await
        {
            Ok(fragments) => fragments,
            Err(e) => {
                let _ = tx.send(Ok(Event::default().data(format!("[ERROR] {}", e)))).await;
                return;
            }
        };

        let mut full_response = String::new();
        while let Some(fragment) = fragments.recv().await {
            match fragment {
                Ok(text) => {
                    full_response.push_str(&text);
                    if tx.send(Ok(Event::default().data(text))).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Ok(Event::default().data(format!("[ERROR] {}", e)))).await;
                    return;
                }
            }
        }

        let cleaned_sql = sql::clean(&full_response);
        let _ = tx.send(Ok(Event::default().data(DONE_MARKER))).await;
        let _ = tx.send(Ok(Event::default().data(cleaned_sql))).await;
    });

    Ok(Sse::new(ReceiverStream::new(rx))
        .keep_alive(keep_alive())
        .into_response())
}

/// Execute a SQL statement directly and return serialized rows.
pub async fn execute_sql(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ExecuteRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let sql_text = payload.sql.trim();
    if sql_text.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "SQL must not be empty".to_string()));
    }

    info!("Executing SQL: {}", sql_text);

    let result = state.executor.execute(sql_text).await.map_err(|e| {
        error!("Execution failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    Ok(Json(json!({
        "success": true,
        "columns": result.columns,
        "rows": result.rows,
        "row_count": result.row_count,
    })))
}

/// Generate and execute with retry, streaming progress events. One event per
/// frame, JSON payloads, `[DONE]` as the termination sentinel.
pub async fn auto_execute(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AutoExecuteRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(
        "Auto-execute request: {} (max_retries: {:?})",
        payload.question, payload.max_retries
    );

    let executor = state.auto_executor(payload.max_retries);
    let events = executor.run(state.schema_text.clone(), payload.question);

    let stream = ReceiverStream::new(events).map(|event| -> Result<Event, Infallible> {
        let frame = match event {
            ProgressEvent::Done => Event::default().data(DONE_MARKER),
            other => match serde_json::to_string(&other) {
                Ok(payload) => Event::default().data(payload),
                Err(e) => Event::default().data(format!(
                    "{{\"type\":\"fatal_error\",\"message\":\"event serialization failed: {}\"}}",
                    e
                )),
            },
        };
        Ok(frame)
    });

    Sse::new(stream).keep_alive(keep_alive())
}

pub async fn get_schema(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "schema": state.schema_text }))
}

pub async fn get_providers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let active_backend = state.config.llm.backend.as_str();

    let providers = vec![
        ProviderInfo {
            id: "ollama".to_string(),
            name: "Ollama (local)".to_string(),
            description: "Local model served by Ollama, free and offline".to_string(),
            default_model: state.config.llm.model.clone(),
            active: active_backend == "ollama",
            available: true,
            requires_api_key: false,
        },
        ProviderInfo {
            id: "remote".to_string(),
            name: "Remote (OpenAI-compatible)".to_string(),
            description: "Hosted chat-completions API".to_string(),
            default_model: state.config.llm.model.clone(),
            active: active_backend == "remote",
            available: state.config.llm.api_key.is_some(),
            requires_api_key: true,
        },
    ];

    Json(providers)
}

pub async fn get_examples(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "examples": state.config.example_queries }))
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime_seconds = (chrono::Utc::now() - state.startup_time).num_seconds();
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime_seconds,
    }))
}
