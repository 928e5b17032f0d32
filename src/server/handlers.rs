// src/server/handlers.rs
// HTTP handlers. The streaming endpoints respond with NDJSON; each run
// is driven inside a spawned task feeding a channel, so a client
// disconnect surfaces as a send failure and aborts the run.

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::anyhow;
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::json;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::repair::RepairError;
use crate::state::AppState;
use crate::stream::NdjsonEncoder;
use crate::validator::{normalize, DiagramValidator};

use super::types::{ChatRequest, HealthResponse, RepairRequest};

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        backend: state.backend.name().to_string(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// POST /api/repair — run to completion, respond with the outcome only.
pub async fn repair(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RepairRequest>,
) -> Response {
    if request.error.is_some() || request.step.is_some() {
        debug!(client_error = ?request.error, client_step = ?request.step, "client-reported state");
    }
    let orchestrator = state.orchestrator();
    match orchestrator.run(&request.code, |_| Ok(())).await {
        Ok(outcome) => {
            info!(success = outcome.success, steps = outcome.steps_count, "repair finished");
            Json(outcome).into_response()
        }
        Err(RepairError::NotDiagramInput) => {
            error_response(StatusCode::BAD_REQUEST, "input does not look like a Mermaid diagram")
        }
        Err(e) => {
            warn!("repair run failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

/// POST /api/repair/stream — NDJSON event stream plus a single finish line.
pub async fn repair_stream(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RepairRequest>,
) -> Response {
    start_ndjson_run(state, request.code)
}

/// POST /api/chat/stream — chat-shaped entry point. The diagram comes
/// from the newest user turn; the response stream is identical to
/// /api/repair/stream.
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Response {
    let Some(code) = request.diagram_source() else {
        return error_response(StatusCode::BAD_REQUEST, "no user message in request");
    };
    start_ndjson_run(state, code)
}

fn start_ndjson_run(state: Arc<AppState>, code: String) -> Response {
    // Reject obvious non-diagram input before committing to a 200
    // streaming response; the orchestrator re-checks internally.
    let entry = DiagramValidator::new(state.options.max_hints).validate(&normalize(&code));
    if !entry.is_valid && !entry.is_likely_mermaid_like {
        return error_response(StatusCode::BAD_REQUEST, "input does not look like a Mermaid diagram");
    }

    let run_id = uuid::Uuid::new_v4();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        let mut encoder = NdjsonEncoder::new();
        let orchestrator = state.orchestrator();
        let sender = tx.clone();
        let result = orchestrator
            .run(&code, |event| {
                sender
                    .send(encoder.encode(&event))
                    .map_err(|_| anyhow!("client disconnected"))
            })
            .await;

        match result {
            Ok(outcome) => {
                info!(%run_id, success = outcome.success, steps = outcome.steps_count, "streaming run finished");
                if let Some(line) = encoder.finish(&outcome) {
                    let _ = tx.send(line);
                }
            }
            Err(e) => {
                warn!(%run_id, "streaming run ended in error: {}", e);
                if let Some(line) = encoder.finish_error(&e.to_string()) {
                    let _ = tx.send(line);
                }
            }
        }
    });

    let body = Body::from_stream(
        UnboundedReceiverStream::new(rx).map(|line| Ok::<_, Infallible>(Bytes::from(line))),
    );
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
