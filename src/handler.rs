//! Request orchestration: timeout scoping, semantic cache consultation,
//! provider resolution, key rotation, and the circuit-breaker/retry
//! composition around the upstream call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;

use crate::cache::SemanticCache;
use crate::metrics::{
    Metrics, CACHE_STATUS_ERROR, CACHE_STATUS_HIT, CACHE_STATUS_MISS, DIRECTION_INPUT,
    DIRECTION_OUTPUT, STATUS_CACHE_HIT, STATUS_ERROR, STATUS_SUCCESS,
};
use crate::providers::{resolve_provider, Provider};
use crate::resilience::{retry, CircuitBreaker, KeyPool, RetryConfig};
use crate::types::{
    ChunkStream, InferenceRequest, InferenceResponse, ProviderRequest, ProviderResponse,
    StreamChunk,
};
use crate::{RelayError, Result};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Cooldown applied to a key after its request failed with a
/// server-transient error.
const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(60);

pub struct Handler {
    providers: HashMap<String, Arc<dyn Provider>>,
    key_pools: HashMap<String, Arc<KeyPool>>,
    breakers: HashMap<String, Arc<CircuitBreaker>>,
    cache: Option<Arc<SemanticCache>>,
    retry: RetryConfig,
    request_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl Handler {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            providers: HashMap::new(),
            key_pools: HashMap::new(),
            breakers: HashMap::new(),
            cache: None,
            retry: RetryConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            metrics,
        }
    }

    pub fn register_provider(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn register_key_pool(&mut self, name: impl Into<String>, pool: Arc<KeyPool>) {
        self.key_pools.insert(name.into(), pool);
    }

    pub fn register_breaker(&mut self, name: impl Into<String>, breaker: Arc<CircuitBreaker>) {
        self.breakers.insert(name.into(), breaker);
    }

    pub fn with_cache(mut self, cache: Arc<SemanticCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Unary inference: at most one upstream call, or none on a cache
    /// hit.
    pub async fn infer(&self, request: InferenceRequest) -> Result<InferenceResponse> {
        let started = Instant::now();
        let _active = self.metrics.track_active();

        request.validate()?;
        let deadline = started + self.request_timeout;
        let provider_name = resolve_provider(&request.model);

        if let Some(cached) = self.cache_lookup(&request, deadline).await {
            let latency = started.elapsed();
            self.metrics.requests.with_label_values(&[STATUS_CACHE_HIT]).inc();
            self.metrics
                .request_latency
                .with_label_values(&[provider_name, &request.model, CACHE_STATUS_HIT])
                .observe(latency.as_secs_f64());

            return Ok(InferenceResponse {
                text: cached.text,
                prompt_tokens: cached.prompt_tokens,
                output_tokens: cached.output_tokens,
                cache_hit: true,
                latency_ms: latency.as_secs_f64() * 1000.0,
            });
        }

        let (provider, pool) = self.resolve(provider_name)?;
        let api_key = pool.next()?;

        let provider_request = ProviderRequest {
            model: request.model.clone(),
            prompt: request.prompt.clone(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            api_key: api_key.clone(),
        };

        let result = match self.breakers.get(provider_name) {
            Some(breaker) => {
                let result = breaker
                    .call(retry(&self.retry, Some(deadline), || {
                        provider.infer(&provider_request)
                    }))
                    .await;
                self.metrics
                    .circuit_breaker_state
                    .with_label_values(&[provider_name])
                    .set(breaker.state() as i64);
                result
            }
            None => {
                retry(&self.retry, Some(deadline), || {
                    provider.infer(&provider_request)
                })
                .await
            }
        };

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                if err.is_transient() {
                    pool.mark_rate_limited(&api_key, RATE_LIMIT_COOLDOWN);
                }
                self.metrics.requests.with_label_values(&[STATUS_ERROR]).inc();
                self.metrics
                    .request_latency
                    .with_label_values(&[provider_name, &request.model, CACHE_STATUS_ERROR])
                    .observe(started.elapsed().as_secs_f64());
                return Err(err);
            }
        };

        let latency = started.elapsed();
        self.record_success(provider_name, &request.model, &response, latency);
        self.spawn_store(&request.prompt, &response);

        Ok(InferenceResponse {
            text: response.text,
            prompt_tokens: response.prompt_tokens,
            output_tokens: response.output_tokens,
            cache_hit: false,
            latency_ms: latency.as_secs_f64() * 1000.0,
        })
    }

    /// Streaming inference. Chunks are forwarded as they arrive and
    /// accumulated so the assembled text can be cached once the stream
    /// closes cleanly. Cache hits come back as a single terminal chunk.
    pub async fn infer_stream(&self, request: InferenceRequest) -> Result<ChunkStream> {
        let started = Instant::now();
        let active = self.metrics.track_active();

        request.validate()?;
        let deadline = started + self.request_timeout;
        let provider_name = resolve_provider(&request.model);

        if let Some(cached) = self.cache_lookup(&request, deadline).await {
            self.metrics.requests.with_label_values(&[STATUS_CACHE_HIT]).inc();
            self.metrics
                .request_latency
                .with_label_values(&[provider_name, &request.model, CACHE_STATUS_HIT])
                .observe(started.elapsed().as_secs_f64());

            let chunk = StreamChunk {
                text: cached.text,
                done: true,
                prompt_tokens: cached.prompt_tokens,
                output_tokens: cached.output_tokens,
            };
            return Ok(Box::pin(async_stream::stream! {
                let _active = active;
                yield Ok(chunk);
            }));
        }

        let (provider, pool) = self.resolve(provider_name)?;
        let api_key = pool.next()?;

        let provider_request = ProviderRequest {
            model: request.model.clone(),
            prompt: request.prompt.clone(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            api_key,
        };

        let upstream = match tokio::time::timeout_at(
            deadline.into(),
            provider.infer_stream(&provider_request),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                self.metrics.requests.with_label_values(&[STATUS_ERROR]).inc();
                return Err(err);
            }
            Err(_) => {
                self.metrics.requests.with_label_values(&[STATUS_ERROR]).inc();
                return Err(RelayError::DeadlineExceeded);
            }
        };

        let metrics = Arc::clone(&self.metrics);
        let cache = self.cache.clone();
        let provider_name = provider_name.to_string();
        let model = request.model.clone();
        let prompt = request.prompt.clone();

        Ok(Box::pin(async_stream::stream! {
            let _active = active;
            let mut upstream = upstream;
            let mut text = String::new();
            let mut prompt_tokens = 0;
            let mut output_tokens = 0;

            loop {
                let next = match tokio::time::timeout_at(deadline.into(), upstream.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        metrics.requests.with_label_values(&[STATUS_ERROR]).inc();
                        yield Err(RelayError::DeadlineExceeded);
                        return;
                    }
                };

                match next {
                    Some(Ok(chunk)) => {
                        text.push_str(&chunk.text);
                        if chunk.prompt_tokens > 0 {
                            prompt_tokens = chunk.prompt_tokens;
                        }
                        if chunk.output_tokens > 0 {
                            output_tokens = chunk.output_tokens;
                        }
                        let done = chunk.done;
                        yield Ok(chunk);
                        if done {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        metrics.requests.with_label_values(&[STATUS_ERROR]).inc();
                        yield Err(err);
                        return;
                    }
                    None => break,
                }
            }

            let latency = started.elapsed();
            metrics
                .request_latency
                .with_label_values(&[provider_name.as_str(), model.as_str(), CACHE_STATUS_MISS])
                .observe(latency.as_secs_f64());
            metrics
                .token_usage
                .with_label_values(&[provider_name.as_str(), model.as_str(), DIRECTION_INPUT])
                .inc_by(u64::from(prompt_tokens));
            metrics
                .token_usage
                .with_label_values(&[provider_name.as_str(), model.as_str(), DIRECTION_OUTPUT])
                .inc_by(u64::from(output_tokens));
            metrics.requests.with_label_values(&[STATUS_SUCCESS]).inc();

            if let Some(cache) = cache {
                if !text.is_empty() {
                    let response = ProviderResponse {
                        text,
                        prompt_tokens,
                        output_tokens,
                    };
                    tokio::spawn(async move {
                        cache.store(&prompt, &response).await;
                    });
                }
            }
        }))
    }

    /// Consult the cache under the request deadline, recording the
    /// lookup outcome. Lookup timeouts count as misses; the deadline
    /// will surface on the upstream path.
    async fn cache_lookup(
        &self,
        request: &InferenceRequest,
        deadline: Instant,
    ) -> Option<ProviderResponse> {
        let cache = self.cache.as_ref()?;
        let result = tokio::time::timeout_at(deadline.into(), cache.lookup(&request.prompt))
            .await
            .ok()
            .flatten();
        self.metrics.record_cache_lookup(result.is_some());
        result
    }

    fn resolve(&self, provider_name: &str) -> Result<(&Arc<dyn Provider>, &Arc<KeyPool>)> {
        let provider =
            self.providers
                .get(provider_name)
                .ok_or_else(|| RelayError::ProviderNotConfigured {
                    name: provider_name.to_string(),
                })?;
        let pool =
            self.key_pools
                .get(provider_name)
                .ok_or_else(|| RelayError::KeyPoolNotConfigured {
                    name: provider_name.to_string(),
                })?;
        Ok((provider, pool))
    }

    fn record_success(
        &self,
        provider_name: &str,
        model: &str,
        response: &ProviderResponse,
        latency: Duration,
    ) {
        self.metrics
            .request_latency
            .with_label_values(&[provider_name, model, CACHE_STATUS_MISS])
            .observe(latency.as_secs_f64());
        self.metrics
            .token_usage
            .with_label_values(&[provider_name, model, DIRECTION_INPUT])
            .inc_by(u64::from(response.prompt_tokens));
        self.metrics
            .token_usage
            .with_label_values(&[provider_name, model, DIRECTION_OUTPUT])
            .inc_by(u64::from(response.output_tokens));
        self.metrics.requests.with_label_values(&[STATUS_SUCCESS]).inc();
    }

    fn spawn_store(&self, prompt: &str, response: &ProviderResponse) {
        let Some(cache) = self.cache.clone() else {
            return;
        };
        let prompt = prompt.to_string();
        let response = response.clone();
        // Detached task: the write-back runs outside the request
        // deadline and survives the client hanging up.
        tokio::spawn(async move {
            cache.store(&prompt, &response).await;
        });
    }
}
