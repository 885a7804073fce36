//! A resilient inference proxy between clients and LLM back ends:
//! round-robin key rotation, per-provider circuit breaking, jittered
//! retries, and a semantic response cache keyed by prompt-embedding
//! similarity.

mod error;

pub mod cache;
pub mod config;
pub mod handler;
pub mod metrics;
pub mod providers;
pub mod resilience;
pub mod server;
pub mod types;
pub mod utils;

pub use config::ProxyConfig;
pub use error::{RelayError, Result};
pub use handler::Handler;
pub use metrics::Metrics;
pub use types::{
    ChunkStream, InferenceRequest, InferenceResponse, ProviderRequest, ProviderResponse,
    StreamChunk,
};
