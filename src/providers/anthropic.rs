use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::types::{ChunkStream, ProviderRequest, ProviderResponse, StreamChunk};
use crate::utils::sse;
use crate::{RelayError, Result};

use super::Provider;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

// The messages API requires max_tokens; applied when the caller leaves
// it at the provider default.
const FALLBACK_MAX_TOKENS: u32 = 1024;

/// Anthropic messages-API backend.
#[derive(Clone)]
pub struct Anthropic {
    http: reqwest::Client,
    base_url: String,
}

impl Anthropic {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn messages_url(&self) -> String {
        format!("{}/messages", self.base_url)
    }

    fn build_body(request: &ProviderRequest, stream: bool) -> MessagesRequest<'_> {
        let max_tokens = if request.max_tokens == 0 {
            FALLBACK_MAX_TOKENS
        } else {
            request.max_tokens
        };
        MessagesRequest {
            model: &request.model,
            max_tokens,
            messages: vec![RequestMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: (request.temperature != 0.0).then_some(request.temperature),
            stream: stream.then_some(true),
        }
    }

    fn request_builder(&self, request: &ProviderRequest) -> reqwest::RequestBuilder {
        self.http
            .post(self.messages_url())
            .header("x-api-key", &request.api_key)
            .header("anthropic-version", API_VERSION)
    }
}

impl Default for Anthropic {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<RequestMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: MessageUsage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Default, Deserialize)]
struct MessageUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// Streaming events, discriminated by the `type` field. Unrecognized
/// event types are ignored.
#[derive(Deserialize)]
#[serde(tag = "type")]
enum StreamEvent {
    #[serde(rename = "message_start")]
    MessageStart { message: StartMessage },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: BlockDelta },
    #[serde(rename = "message_delta")]
    MessageDelta {
        #[serde(default)]
        usage: MessageUsage,
    },
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct StartMessage {
    #[serde(default)]
    usage: MessageUsage,
}

#[derive(Default, Deserialize)]
struct BlockDelta {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl Provider for Anthropic {
    fn name(&self) -> &str {
        super::ANTHROPIC
    }

    async fn infer(&self, request: &ProviderRequest) -> Result<ProviderResponse> {
        let body = Self::build_body(request, false);

        let response = self.request_builder(request).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Api { status, body });
        }

        let parsed: MessagesResponse = response.json().await?;
        let text = parsed
            .content
            .into_iter()
            .map(|block| block.text)
            .collect::<String>();

        Ok(ProviderResponse {
            text,
            prompt_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        })
    }

    async fn infer_stream(&self, request: &ProviderRequest) -> Result<ChunkStream> {
        let body = Self::build_body(request, true);

        let response = self
            .request_builder(request)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Api { status, body });
        }

        let mut data = sse::data_stream(response);
        Ok(Box::pin(async_stream::stream! {
            let mut prompt_tokens = 0;
            let mut output_tokens = 0;

            while let Some(payload) = data.next().await {
                let payload = match payload {
                    Ok(payload) => payload,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };

                let event: StreamEvent = match serde_json::from_str(&payload) {
                    Ok(event) => event,
                    Err(err) => {
                        yield Err(RelayError::InvalidResponse(format!(
                            "failed to decode stream event: {err}"
                        )));
                        return;
                    }
                };

                match event {
                    StreamEvent::MessageStart { message } => {
                        prompt_tokens = message.usage.input_tokens;
                    }
                    StreamEvent::ContentBlockDelta { delta } => {
                        if !delta.text.is_empty() {
                            yield Ok(StreamChunk {
                                text: delta.text,
                                ..StreamChunk::default()
                            });
                        }
                    }
                    StreamEvent::MessageDelta { usage } => {
                        if usage.output_tokens > 0 {
                            output_tokens = usage.output_tokens;
                        }
                    }
                    StreamEvent::MessageStop => break,
                    StreamEvent::Other => {}
                }
            }

            yield Ok(StreamChunk {
                done: true,
                prompt_tokens,
                output_tokens,
                ..StreamChunk::default()
            });
        }))
    }
}
