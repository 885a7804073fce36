//! Shared test doubles: a scriptable provider, deterministic cache
//! fakes, and a manually advanced clock.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use sha2::{Digest, Sha256};

use relay_llm::cache::{Embedder, ResponseStore, SearchHit, SemanticCache, VectorIndex};
use relay_llm::providers::Provider;
use relay_llm::resilience::Clock;
use relay_llm::types::{ChunkStream, ProviderRequest, ProviderResponse, StreamChunk};
use relay_llm::{RelayError, Result};

/// Sandboxed runners sometimes forbid binding localhost, which mock
/// upstream servers need; such tests bail out instead of failing.
pub fn should_skip_httpmock() -> bool {
    match std::net::TcpListener::bind(("127.0.0.1", 0)) {
        Ok(listener) => {
            drop(listener);
            false
        }
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
            eprintln!("skipping httpmock test: cannot bind localhost");
            true
        }
        Err(err) => panic!("failed to probe localhost for httpmock tests: {err}"),
    }
}

pub fn api_error(status: u16) -> RelayError {
    RelayError::Api {
        status: reqwest::StatusCode::from_u16(status).unwrap(),
        body: format!("upstream returned {status}"),
    }
}

pub fn response(text: &str, prompt_tokens: u32, output_tokens: u32) -> ProviderResponse {
    ProviderResponse {
        text: text.to_string(),
        prompt_tokens,
        output_tokens,
    }
}

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Instant::now()),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }
}

// ---------------------------------------------------------------------------
// ScriptedProvider
// ---------------------------------------------------------------------------

type Responder = dyn Fn(&ProviderRequest) -> Result<ProviderResponse> + Send + Sync;

/// Provider double whose unary behavior is a closure over the request
/// and whose stream replays a fixed chunk sequence.
pub struct ScriptedProvider {
    name: &'static str,
    responder: Box<Responder>,
    stream_chunks: Mutex<Vec<StreamChunk>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    keys: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new<F>(name: &'static str, responder: F) -> Self
    where
        F: Fn(&ProviderRequest) -> Result<ProviderResponse> + Send + Sync + 'static,
    {
        Self {
            name,
            responder: Box::new(responder),
            stream_chunks: Mutex::new(Vec::new()),
            delay: None,
            calls: AtomicUsize::new(0),
            keys: Mutex::new(Vec::new()),
        }
    }

    pub fn with_stream_chunks(mut self, chunks: Vec<StreamChunk>) -> Self {
        self.stream_chunks = Mutex::new(chunks);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn keys_seen(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn infer(&self, request: &ProviderRequest) -> Result<ProviderResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().unwrap().push(request.api_key.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.responder)(request)
    }

    async fn infer_stream(&self, request: &ProviderRequest) -> Result<ChunkStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().unwrap().push(request.api_key.clone());
        let chunks = self.stream_chunks.lock().unwrap().clone();
        Ok(stream::iter(chunks.into_iter().map(Ok)).boxed())
    }
}

// ---------------------------------------------------------------------------
// Cache fakes
// ---------------------------------------------------------------------------

/// Deterministic embedder: identical text maps to identical unit
/// vectors, so exact repeats score 1.0 in cosine similarity.
pub struct FakeEmbedder;

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let digest = Sha256::digest(text.as_bytes());
        let mut vector: Vec<f32> = digest[..8].iter().map(|b| *b as f32).collect();
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        for x in &mut vector {
            *x /= norm;
        }
        Ok(vector)
    }
}

#[derive(Default)]
pub struct InMemoryIndex {
    points: Mutex<Vec<(String, Vec<f32>)>>,
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn search(&self, vector: &[f32], threshold: f32) -> Result<Option<SearchHit>> {
        let points = self.points.lock().unwrap();
        let best = points
            .iter()
            .map(|(fingerprint, candidate)| (fingerprint.clone(), cosine(vector, candidate)))
            .max_by(|a, b| a.1.total_cmp(&b.1));
        Ok(best
            .filter(|(_, score)| *score >= threshold)
            .map(|(fingerprint, score)| SearchHit { fingerprint, score }))
    }

    async fn upsert(&self, fingerprint: &str, vector: &[f32]) -> Result<()> {
        self.points
            .lock()
            .unwrap()
            .push((fingerprint.to_string(), vector.to_vec()));
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    values: Mutex<HashMap<String, ProviderResponse>>,
}

impl InMemoryStore {
    pub fn len(&self) -> usize {
        self.values.lock().unwrap().len()
    }
}

#[async_trait]
impl ResponseStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<ProviderResponse>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, response: &ProviderResponse) -> Result<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), response.clone());
        Ok(())
    }
}

pub fn memory_cache(threshold: f32) -> (Arc<SemanticCache>, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::default());
    let cache = Arc::new(SemanticCache::new(
        Arc::new(FakeEmbedder),
        Arc::new(InMemoryIndex::default()),
        store.clone(),
        threshold,
    ));
    (cache, store)
}

/// Wait until the detached store task has written `count` entries.
pub async fn wait_for_store(store: &InMemoryStore, count: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if store.len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("detached cache store did not complete in time");
}
