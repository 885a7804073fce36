//! HTTP surface: the inference API listener and the observability
//! listener, as separate routers bound to separate ports.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{Stream, StreamExt};

use crate::handler::Handler;
use crate::metrics::Metrics;
use crate::types::{InferenceRequest, InferenceResponse};
use crate::RelayError;

pub const MAX_RECV_BYTES: usize = 4 * 1024 * 1024;
pub const MAX_SEND_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<Handler>,
}

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/infer", post(handle_infer))
        .route("/v1/infer/stream", post(handle_infer_stream))
        .layer(DefaultBodyLimit::max(MAX_RECV_BYTES))
        .with_state(state)
}

pub fn metrics_router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(handle_metrics))
        .route("/healthz", get(handle_healthz))
        .with_state(metrics)
}

async fn handle_infer(
    State(state): State<AppState>,
    Json(request): Json<InferenceRequest>,
) -> Result<Json<InferenceResponse>, ApiError> {
    let response = state.handler.infer(request).await?;
    if response.text.len() > MAX_SEND_BYTES {
        return Err(ApiError(RelayError::InvalidResponse(format!(
            "response exceeds send limit of {MAX_SEND_BYTES} bytes"
        ))));
    }
    Ok(Json(response))
}

async fn handle_infer_stream(
    State(state): State<AppState>,
    Json(request): Json<InferenceRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let mut chunks = state.handler.infer_stream(request).await?;

    let events = async_stream::stream! {
        let mut sent_bytes = 0usize;
        while let Some(item) = chunks.next().await {
            match item {
                Ok(chunk) => {
                    sent_bytes = sent_bytes.saturating_add(chunk.text.len());
                    if sent_bytes > MAX_SEND_BYTES {
                        yield Ok::<Event, Infallible>(Event::default().event("error").data(
                            format!("response exceeds send limit of {MAX_SEND_BYTES} bytes"),
                        ));
                        return;
                    }
                    yield Ok(Event::default().json_data(&chunk).unwrap_or_else(|err| {
                        Event::default().event("error").data(err.to_string())
                    }));
                }
                Err(err) => {
                    yield Ok(Event::default().event("error").data(err.to_string()));
                    return;
                }
            }
        }
    };

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn handle_metrics(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.render(),
    )
}

async fn handle_healthz() -> &'static str {
    "ok"
}

/// Adapter mapping proxy errors onto HTTP statuses with a JSON body.
pub struct ApiError(pub RelayError);

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = error_status(&self.0);
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

fn error_status(err: &RelayError) -> StatusCode {
    match err {
        RelayError::InvalidRequest(_)
        | RelayError::ProviderNotConfigured { .. }
        | RelayError::KeyPoolNotConfigured { .. }
        | RelayError::NoKeys => StatusCode::BAD_REQUEST,
        RelayError::KeysExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
        RelayError::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
        RelayError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        RelayError::Api { status, .. } => *status,
        _ => StatusCode::BAD_GATEWAY,
    }
}
