use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::types::{ChunkStream, ProviderRequest, ProviderResponse, StreamChunk};
use crate::utils::sse;
use crate::{RelayError, Result};

use super::Provider;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini backend (generative language API).
#[derive(Clone)]
pub struct Gemini {
    http: reqwest::Client,
    base_url: String,
}

impl Gemini {
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

    fn build_body(request: &ProviderRequest) -> GenerateRequest<'_> {
        GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: &request.prompt,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: (request.temperature != 0.0).then_some(request.temperature),
                max_output_tokens: (request.max_tokens != 0).then_some(request.max_tokens),
            },
        }
    }
}

impl Default for Gemini {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata", default)]
    usage: UsageMetadata,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Default, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_tokens: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    output_tokens: u32,
}

fn first_text(response: GenerateResponse) -> (String, UsageMetadata) {
    let text = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content.parts.into_iter().next())
        .map(|part| part.text)
        .unwrap_or_default();
    (text, response.usage)
}

#[async_trait]
impl Provider for Gemini {
    fn name(&self) -> &str {
        super::GEMINI
    }

    async fn infer(&self, request: &ProviderRequest) -> Result<ProviderResponse> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, request.model, request.api_key
        );
        let body = Self::build_body(request);

        let response = self.http.post(url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Api { status, body });
        }

        let parsed: GenerateResponse = response.json().await?;
        let (text, usage) = first_text(parsed);

        Ok(ProviderResponse {
            text,
            prompt_tokens: usage.prompt_tokens,
            output_tokens: usage.output_tokens,
        })
    }

    async fn infer_stream(&self, request: &ProviderRequest) -> Result<ChunkStream> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, request.model, request.api_key
        );
        let body = Self::build_body(request);

        let response = self.http.post(url).json(&body).send().await?;

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

                let frame: GenerateResponse = match serde_json::from_str(&payload) {
                    Ok(frame) => frame,
                    Err(err) => {
                        yield Err(RelayError::InvalidResponse(format!(
                            "failed to decode stream chunk: {err}"
                        )));
                        return;
                    }
                };

                let (text, usage) = first_text(frame);
                if usage.prompt_tokens > 0 {
                    prompt_tokens = usage.prompt_tokens;
                }
                if usage.output_tokens > 0 {
                    output_tokens = usage.output_tokens;
                }

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
