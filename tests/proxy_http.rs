//! Router-level tests: JSON unary endpoint, SSE streaming endpoint,
//! and the observability listener.

mod support;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::util::ServiceExt;

use relay_llm::providers::OPENAI;
use relay_llm::resilience::KeyPool;
use relay_llm::server::{api_router, metrics_router, AppState};
use relay_llm::types::{InferenceResponse, StreamChunk};
use relay_llm::{Handler, Metrics};

use support::{response, ScriptedProvider};

fn app() -> (axum::Router, Arc<Metrics>) {
    let metrics = Arc::new(Metrics::new().unwrap());
    let provider = Arc::new(
        ScriptedProvider::new("openai", |_| Ok(response("echo", 5, 2))).with_stream_chunks(vec![
            StreamChunk {
                text: "ec".to_string(),
                ..StreamChunk::default()
            },
            StreamChunk {
                text: "ho".to_string(),
                ..StreamChunk::default()
            },
            StreamChunk {
                done: true,
                prompt_tokens: 5,
                output_tokens: 2,
                ..StreamChunk::default()
            },
        ]),
    );
    let mut handler = Handler::new(metrics.clone());
    handler.register_provider(OPENAI, provider);
    handler.register_key_pool(OPENAI, Arc::new(KeyPool::new(vec!["k1".to_string()])));

    let state = AppState {
        handler: Arc::new(handler),
    };
    (api_router(state), metrics)
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn infer_returns_the_upstream_response() {
    let (app, _) = app();

    let request = post_json("/v1/infer", json!({"model": "gpt-4", "prompt": "hi"}));
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: InferenceResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed.text, "echo");
    assert_eq!(parsed.prompt_tokens, 5);
    assert_eq!(parsed.output_tokens, 2);
    assert!(!parsed.cache_hit);
}

#[tokio::test]
async fn invalid_requests_get_a_400_with_an_error_body() {
    let (app, _) = app();

    let request = post_json("/v1/infer", json!({"model": "gpt-4", "prompt": ""}));
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(parsed["error"]
        .as_str()
        .unwrap()
        .contains("prompt must not be empty"));
}

#[tokio::test]
async fn stream_endpoint_emits_sse_chunks_in_order() {
    let (app, _) = app();

    let request = post_json("/v1/infer/stream", json!({"model": "gpt-4", "prompt": "hi"}));
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .starts_with("text/event-stream"));

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let raw = String::from_utf8(body.to_vec()).unwrap();

    let chunks: Vec<StreamChunk> = raw
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect();

    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].text, "ec");
    assert_eq!(chunks[1].text, "ho");
    assert!(chunks[2].done);
    assert_eq!(chunks[2].output_tokens, 2);
}

#[tokio::test]
async fn stream_endpoint_caps_outgoing_bytes() {
    let metrics = Arc::new(Metrics::new().unwrap());
    let nine_mib = "x".repeat(9 * 1024 * 1024);
    let provider = Arc::new(
        ScriptedProvider::new("openai", |_| Ok(response("unused", 0, 0))).with_stream_chunks(
            vec![
                StreamChunk {
                    text: nine_mib.clone(),
                    ..StreamChunk::default()
                },
                StreamChunk {
                    text: nine_mib,
                    ..StreamChunk::default()
                },
                StreamChunk {
                    done: true,
                    ..StreamChunk::default()
                },
            ],
        ),
    );
    let mut handler = Handler::new(metrics);
    handler.register_provider(OPENAI, provider);
    handler.register_key_pool(OPENAI, Arc::new(KeyPool::new(vec!["k1".to_string()])));
    let app = api_router(AppState {
        handler: Arc::new(handler),
    });

    let request = post_json("/v1/infer/stream", json!({"model": "gpt-4", "prompt": "hi"}));
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let raw = String::from_utf8(body.to_vec()).unwrap();

    // Only the first chunk fits under the 16 MiB send limit; the second
    // trips the cap and the stream ends with an error event instead of
    // a terminal chunk.
    let json_chunks = raw
        .lines()
        .filter(|line| line.starts_with("data: {"))
        .count();
    assert_eq!(json_chunks, 1);
    assert!(raw.contains("event: error"));
    assert!(raw.contains("exceeds send limit"));
    assert!(!raw.contains("\"done\":true"));
}

#[tokio::test]
async fn metrics_listener_serves_health_and_prometheus_text() {
    let (app, metrics) = app();

    // Drive one request through so the families have samples.
    let request = post_json("/v1/infer", json!({"model": "gpt-4", "prompt": "hi"}));
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let observability = metrics_router(metrics);

    let health = Request::builder()
        .method("GET")
        .uri("/healthz")
        .body(Body::empty())
        .unwrap();
    let health_response = observability.clone().oneshot(health).await.unwrap();
    assert_eq!(health_response.status(), StatusCode::OK);
    let health_body = to_bytes(health_response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(String::from_utf8(health_body.to_vec()).unwrap(), "ok");

    let scrape = Request::builder()
        .method("GET")
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let scrape_response = observability.oneshot(scrape).await.unwrap();
    assert_eq!(scrape_response.status(), StatusCode::OK);
    assert_eq!(
        scrape_response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default(),
        "text/plain; version=0.0.4"
    );
    let scrape_body = to_bytes(scrape_response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(scrape_body.to_vec()).unwrap();
    assert!(text.contains("requests_total{status=\"success\"} 1"));
    assert!(text.contains("token_usage_total"));
    assert!(text.contains("active_requests 0"));
}

#[tokio::test]
async fn oversized_bodies_are_rejected() {
    let (app, _) = app();

    let huge = "x".repeat(5 * 1024 * 1024);
    let request = post_json("/v1/infer", json!({"model": "gpt-4", "prompt": huge}));
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
