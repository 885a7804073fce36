//! Semantic caching: prompt embedding, nearest-neighbor search over a
//! vector index, and response lookup in a TTL'd key-value store.

mod embedder;
mod qdrant;
mod redis_store;

pub use embedder::OpenAIEmbedder;
pub use qdrant::QdrantIndex;
pub use redis_store::RedisResponseStore;

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::types::ProviderResponse;
use crate::Result;

const FINGERPRINT_PREFIX: &str = "llm_cache:";

/// Turns text into a fixed-dimension embedding vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// A point returned by nearest-neighbor search.
#[derive(Clone, Debug)]
pub struct SearchHit {
    pub fingerprint: String,
    pub score: f32,
}

/// Approximate nearest-neighbor index over prompt embeddings. Upserted
/// points carry the prompt fingerprint so a hit can be resolved against
/// the response store.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, vector: &[f32], threshold: f32) -> Result<Option<SearchHit>>;
    async fn upsert(&self, fingerprint: &str, vector: &[f32]) -> Result<()>;
}

/// Durable fingerprint -> response map with a TTL.
#[async_trait]
pub trait ResponseStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<ProviderResponse>>;
    async fn put(&self, key: &str, response: &ProviderResponse) -> Result<()>;
}

/// Orchestrates the embed -> search -> fetch caching flow.
///
/// Every dependency fault degrades to a cache miss; the cache never
/// fails a request. Entries in the response store expire while their
/// vector points do not, so a vector hit whose response is gone is
/// treated as a miss.
pub struct SemanticCache {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    store: Arc<dyn ResponseStore>,
    threshold: f32,
}

impl SemanticCache {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        store: Arc<dyn ResponseStore>,
        threshold: f32,
    ) -> Self {
        Self {
            embedder,
            index,
            store,
            threshold,
        }
    }

    /// Look up a semantically similar prompt. Returns `None` on a miss
    /// or on any dependency fault.
    pub async fn lookup(&self, prompt: &str) -> Option<ProviderResponse> {
        let vector = match self.embedder.embed(prompt).await {
            Ok(vector) => vector,
            Err(err) => {
                tracing::warn!(error = %err, "cache embedding failed, treating as miss");
                return None;
            }
        };

        let hit = match self.index.search(&vector, self.threshold).await {
            Ok(hit) => hit?,
            Err(err) => {
                tracing::warn!(error = %err, "cache vector search failed, treating as miss");
                return None;
            }
        };

        match self.store.get(&hit.fingerprint).await {
            Ok(Some(response)) => Some(response),
            // Vector point survived the response TTL.
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "cache response fetch failed, treating as miss");
                None
            }
        }
    }

    /// Cache a prompt/response pair. Intended to run on a detached task
    /// outside any request deadline; faults are logged and swallowed.
    pub async fn store(&self, prompt: &str, response: &ProviderResponse) {
        let vector = match self.embedder.embed(prompt).await {
            Ok(vector) => vector,
            Err(err) => {
                tracing::warn!(error = %err, "cache store embedding failed");
                return;
            }
        };

        let key = fingerprint(prompt);

        if let Err(err) = self.store.put(&key, response).await {
            tracing::warn!(error = %err, "cache response write failed");
            return;
        }

        if let Err(err) = self.index.upsert(&key, &vector).await {
            tracing::warn!(error = %err, "cache vector upsert failed");
        }
    }
}

/// Deterministic cache key for a prompt: a 128-bit truncation of
/// SHA-256 over the raw bytes, stable across restarts so repeated
/// stores of the same prompt deduplicate in the response store.
pub fn fingerprint(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    let mut out = String::with_capacity(FINGERPRINT_PREFIX.len() + 32);
    out.push_str(FINGERPRINT_PREFIX);
    for byte in &digest[..16] {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
