use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::{RelayError, Result};

/// An inference request as received on the wire. `temperature` of 0 and
/// `max_tokens` of 0 mean "use the provider default".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: u32,
}

impl InferenceRequest {
    pub fn validate(&self) -> Result<()> {
        if self.model.is_empty() {
            return Err(RelayError::InvalidRequest("model must not be empty".into()));
        }
        if self.prompt.is_empty() {
            return Err(RelayError::InvalidRequest(
                "prompt must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// The response shape is identical for cache hits and upstream misses;
/// a cache hit carries no upstream latency contribution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub text: String,
    pub prompt_tokens: u32,
    pub output_tokens: u32,
    pub cache_hit: bool,
    pub latency_ms: f64,
}

/// A single frame of a streaming response. Token counts are 0 until the
/// chunk that carries the final totals.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    pub text: String,
    pub done: bool,
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

/// Request handed to a provider backend. The api key is drawn from the
/// key pool per call, so one provider value serves many credentials.
#[derive(Clone, Debug)]
pub struct ProviderRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub api_key: String,
}

/// A completed upstream generation. This is also the value serialized
/// into the response store.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub text: String,
    pub prompt_tokens: u32,
    pub output_tokens: u32,
}

pub type ChunkStream = BoxStream<'static, Result<StreamChunk>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_apply_on_deserialize() {
        let request: InferenceRequest =
            serde_json::from_str(r#"{"model":"gpt-4","prompt":"hi"}"#).unwrap();
        assert_eq!(request.temperature, 0.0);
        assert_eq!(request.max_tokens, 0);
    }

    #[test]
    fn validate_rejects_empty_fields() {
        let request = InferenceRequest {
            model: String::new(),
            prompt: "hi".to_string(),
            temperature: 0.0,
            max_tokens: 0,
        };
        assert!(matches!(
            request.validate(),
            Err(RelayError::InvalidRequest(_))
        ));

        let request = InferenceRequest {
            model: "gpt-4".to_string(),
            prompt: String::new(),
            temperature: 0.0,
            max_tokens: 0,
        };
        assert!(matches!(
            request.validate(),
            Err(RelayError::InvalidRequest(_))
        ));
    }
}
