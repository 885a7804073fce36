use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::types::{ChunkStream, ProviderRequest, ProviderResponse, StreamChunk};
use crate::utils::sse;
use crate::{RelayError, Result};

use super::Provider;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI chat-completions backend.
#[derive(Clone)]
pub struct OpenAI {
    http: reqwest::Client,
    base_url: String,
}

impl OpenAI {
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

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_body(request: &ProviderRequest, stream: bool) -> ChatRequest<'_> {
        ChatRequest {
            model: &request.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: (request.temperature != 0.0).then_some(request.temperature),
            max_tokens: (request.max_tokens != 0).then_some(request.max_tokens),
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }
}

impl Default for OpenAI {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct ChatStreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl Provider for OpenAI {
    fn name(&self) -> &str {
        super::OPENAI
    }

    async fn infer(&self, request: &ProviderRequest) -> Result<ProviderResponse> {
        let body = Self::build_body(request, false);

        let response = self
            .http
            .post(self.chat_completions_url())
            .bearer_auth(&request.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Api { status, body });
        }

        let parsed: ChatResponse = response.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default();

        Ok(ProviderResponse {
            text,
            prompt_tokens: parsed.usage.prompt_tokens,
            output_tokens: parsed.usage.completion_tokens,
        })
    }

    async fn infer_stream(&self, request: &ProviderRequest) -> Result<ChunkStream> {
        let body = Self::build_body(request, true);

        let response = self
            .http
            .post(self.chat_completions_url())
            .bearer_auth(&request.api_key)
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

                let chunk: ChatStreamChunk = match serde_json::from_str(&payload) {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        yield Err(RelayError::InvalidResponse(format!(
                            "failed to decode stream chunk: {err}"
                        )));
                        return;
                    }
                };

                if let Some(usage) = chunk.usage {
                    prompt_tokens = usage.prompt_tokens;
                    output_tokens = usage.completion_tokens;
                }

                let text = chunk
                    .choices
                    .into_iter()
                    .next()
                    .map(|choice| choice.delta.content)
                    .unwrap_or_default();
                if !text.is_empty() {
                    yield Ok(StreamChunk {
                        text,
                        ..StreamChunk::default()
                    });
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
