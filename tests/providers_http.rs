//! Provider clients exercised against a local mock upstream.

mod support;

use futures_util::StreamExt;
use httpmock::Method::POST;
use httpmock::MockServer;

use relay_llm::providers::{Anthropic, Gemini, OpenAI, Provider};
use relay_llm::types::{ProviderRequest, StreamChunk};
use relay_llm::RelayError;

use support::should_skip_httpmock;

fn request(model: &str) -> ProviderRequest {
    ProviderRequest {
        model: model.to_string(),
        prompt: "what is 2+2?".to_string(),
        temperature: 0.0,
        max_tokens: 0,
        api_key: "sk-test".to_string(),
    }
}

async fn collect(stream: relay_llm::types::ChunkStream) -> Vec<StreamChunk> {
    stream.map(|chunk| chunk.unwrap()).collect().await
}

#[tokio::test]
async fn openai_unary_parses_text_and_usage() {
    if should_skip_httpmock() {
        return;
    }
    let upstream = MockServer::start();
    let mock = upstream.mock(|when, then| {
        when.method(POST)
            .path("/chat/completions")
            .header("authorization", "Bearer sk-test");
        then.status(200)
            .header("content-type", "application/json")
            .body(
                r#"{"choices":[{"message":{"content":"4"}}],
                    "usage":{"prompt_tokens":7,"completion_tokens":1}}"#,
            );
    });

    let provider = OpenAI::new().with_base_url(upstream.base_url());
    let response = provider.infer(&request("gpt-4")).await.unwrap();

    mock.assert();
    assert_eq!(response.text, "4");
    assert_eq!(response.prompt_tokens, 7);
    assert_eq!(response.output_tokens, 1);
}

#[tokio::test]
async fn openai_surfaces_upstream_statuses_as_typed_errors() {
    if should_skip_httpmock() {
        return;
    }
    let upstream = MockServer::start();
    upstream.mock(|when, then| {
        when.method(POST).path("/chat/completions");
        then.status(429).body("slow down");
    });

    let provider = OpenAI::new().with_base_url(upstream.base_url());
    let err = provider.infer(&request("gpt-4")).await.unwrap_err();

    assert!(matches!(err, RelayError::Api { status, .. } if status.as_u16() == 429));
    assert!(err.is_transient());
}

#[tokio::test]
async fn openai_stream_decodes_sse_deltas_and_usage() {
    if should_skip_httpmock() {
        return;
    }
    let upstream = MockServer::start();
    upstream.mock(|when, then| {
        when.method(POST).path("/chat/completions");
        then.status(200)
            .header("content-type", "text/event-stream")
            .body(concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"he\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{}}],\"usage\":{\"prompt_tokens\":4,\"completion_tokens\":2}}\n\n",
                "data: [DONE]\n\n",
            ));
    });

    let provider = OpenAI::new().with_base_url(upstream.base_url());
    let chunks = collect(provider.infer_stream(&request("gpt-4")).await.unwrap()).await;

    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].text, "he");
    assert_eq!(chunks[1].text, "llo");
    assert!(chunks[2].done);
    assert_eq!(chunks[2].prompt_tokens, 4);
    assert_eq!(chunks[2].output_tokens, 2);
}

#[tokio::test]
async fn gemini_unary_builds_the_keyed_url() {
    if should_skip_httpmock() {
        return;
    }
    let upstream = MockServer::start();
    let mock = upstream.mock(|when, then| {
        when.method(POST)
            .path("/models/gemini-1.5-pro:generateContent")
            .query_param("key", "sk-test");
        then.status(200)
            .header("content-type", "application/json")
            .body(
                r#"{"candidates":[{"content":{"parts":[{"text":"4"}]}}],
                    "usageMetadata":{"promptTokenCount":7,"candidatesTokenCount":1}}"#,
            );
    });

    let provider = Gemini::new().with_base_url(upstream.base_url());
    let response = provider.infer(&request("gemini-1.5-pro")).await.unwrap();

    mock.assert();
    assert_eq!(response.text, "4");
    assert_eq!(response.prompt_tokens, 7);
    assert_eq!(response.output_tokens, 1);
}

#[tokio::test]
async fn anthropic_unary_sends_version_and_key_headers() {
    if should_skip_httpmock() {
        return;
    }
    let upstream = MockServer::start();
    let mock = upstream.mock(|when, then| {
        when.method(POST)
            .path("/messages")
            .header("x-api-key", "sk-test")
            .header("anthropic-version", "2023-06-01");
        then.status(200)
            .header("content-type", "application/json")
            .body(
                r#"{"content":[{"type":"text","text":"4"}],
                    "usage":{"input_tokens":7,"output_tokens":1}}"#,
            );
    });

    let provider = Anthropic::new().with_base_url(upstream.base_url());
    let response = provider
        .infer(&request("claude-sonnet-4-20250514"))
        .await
        .unwrap();

    mock.assert();
    assert_eq!(response.text, "4");
    assert_eq!(response.prompt_tokens, 7);
    assert_eq!(response.output_tokens, 1);
}

#[tokio::test]
async fn anthropic_stream_tracks_usage_across_events() {
    if should_skip_httpmock() {
        return;
    }
    let upstream = MockServer::start();
    upstream.mock(|when, then| {
        when.method(POST).path("/messages");
        then.status(200)
            .header("content-type", "text/event-stream")
            .body(concat!(
                "event: message_start\n",
                "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":4,\"output_tokens\":0}}}\n\n",
                "event: content_block_delta\n",
                "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"4\"}}\n\n",
                "event: message_delta\n",
                "data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":2}}\n\n",
                "event: message_stop\n",
                "data: {\"type\":\"message_stop\"}\n\n",
            ));
    });

    let provider = Anthropic::new().with_base_url(upstream.base_url());
    let chunks = collect(
        provider
            .infer_stream(&request("claude-sonnet-4-20250514"))
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].text, "4");
    assert!(chunks[1].done);
    assert_eq!(chunks[1].prompt_tokens, 4);
    assert_eq!(chunks[1].output_tokens, 2);
}
