//! LLM backends behind one polymorphic interface. New providers plug in
//! by implementing [`Provider`]; the handler never names a concrete
//! backend.

mod anthropic;
mod gemini;
mod openai;

pub use anthropic::Anthropic;
pub use gemini::Gemini;
pub use openai::OpenAI;

use async_trait::async_trait;

use crate::types::{ChunkStream, ProviderRequest, ProviderResponse};
use crate::Result;

pub const OPENAI: &str = "openai";
pub const GEMINI: &str = "gemini";
pub const ANTHROPIC: &str = "anthropic";

/// A concrete LLM backend. Implementations must be safe to share across
/// concurrent requests; the api key travels inside the request so one
/// provider value serves the whole rotating credential pool.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn infer(&self, request: &ProviderRequest) -> Result<ProviderResponse>;

    /// Returns a finite stream that terminates with a `done` chunk or
    /// an error item.
    async fn infer_stream(&self, request: &ProviderRequest) -> Result<ChunkStream>;
}

/// Map a model name to its provider by prefix. Routing is static on
/// purpose; unmatched models fall back to the OpenAI family.
pub fn resolve_provider(model: &str) -> &'static str {
    if model.starts_with("gpt") {
        OPENAI
    } else if model.starts_with("gemini") {
        GEMINI
    } else if model.starts_with("claude-") {
        ANTHROPIC
    } else {
        OPENAI
    }
}
