//! LLM inference proxy entry point.
//!
//! Configuration comes from the environment; see `ProxyConfig`:
//! PROXY_PORT, METRICS_PORT, REDIS_ADDR, REDIS_PASSWORD, REDIS_DB,
//! CACHE_TTL, QDRANT_URL, QDRANT_COLLECTION, SIMILARITY_THRESHOLD,
//! EMBEDDING_API_KEY, OPENAI_API_KEYS, GEMINI_API_KEYS,
//! ANTHROPIC_API_KEYS, REQUEST_TIMEOUT, MAX_RETRIES,
//! CB_FAILURE_THRESHOLD, CB_COOLDOWN.

use std::sync::Arc;
use std::time::Duration;

use relay_llm::cache::{OpenAIEmbedder, QdrantIndex, RedisResponseStore, SemanticCache};
use relay_llm::providers::{self, Anthropic, Gemini, OpenAI, Provider};
use relay_llm::resilience::{CircuitBreaker, CircuitBreakerConfig, KeyPool, RetryConfig};
use relay_llm::server::{api_router, metrics_router, AppState};
use relay_llm::{Handler, Metrics, ProxyConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = ProxyConfig::from_env();
    tracing::info!("starting llm inference proxy");

    let metrics = Arc::new(Metrics::new()?);
    let mut handler = Handler::new(metrics.clone())
        .with_request_timeout(config.request_timeout)
        .with_retry(RetryConfig {
            max_retries: config.max_retries,
            ..RetryConfig::default()
        });

    if let Some(cache) = build_cache(&config).await? {
        handler = handler.with_cache(cache);
    }

    let breaker_config = CircuitBreakerConfig {
        failure_threshold: config.breaker_failure_threshold,
        cooldown: config.breaker_cooldown,
    };

    let backends: [(&str, Arc<dyn Provider>, &Vec<String>); 3] = [
        (providers::OPENAI, Arc::new(OpenAI::new()), &config.openai_keys),
        (providers::GEMINI, Arc::new(Gemini::new()), &config.gemini_keys),
        (
            providers::ANTHROPIC,
            Arc::new(Anthropic::new()),
            &config.anthropic_keys,
        ),
    ];
    for (name, provider, keys) in backends {
        handler.register_provider(name, provider);
        handler.register_breaker(name, Arc::new(CircuitBreaker::new(breaker_config)));
        if keys.is_empty() {
            tracing::warn!(provider = name, "no api keys configured, provider disabled");
        } else {
            tracing::info!(provider = name, keys = keys.len(), "key pool initialized");
            handler.register_key_pool(name, Arc::new(KeyPool::new(keys.clone())));
        }
    }

    let state = AppState {
        handler: Arc::new(handler),
    };

    let api_listener =
        tokio::net::TcpListener::bind(("0.0.0.0", config.proxy_port)).await?;
    let metrics_listener =
        tokio::net::TcpListener::bind(("0.0.0.0", config.metrics_port)).await?;
    tracing::info!(port = config.proxy_port, "api listener bound");
    tracing::info!(port = config.metrics_port, "metrics listener bound");

    let api_server = axum::serve(api_listener, api_router(state))
        .with_graceful_shutdown(shutdown_signal());
    let metrics_server = axum::serve(metrics_listener, metrics_router(metrics))
        .with_graceful_shutdown(shutdown_signal());

    let (api_result, metrics_result) =
        tokio::join!(async { api_server.await }, async { metrics_server.await });
    api_result?;
    metrics_result?;

    tracing::info!("llm inference proxy shut down");
    Ok(())
}

/// The semantic cache requires an embedding api key; without one every
/// lookup would miss, so the cache is disabled outright. A failing
/// Redis also disables it rather than degrading every request.
async fn build_cache(
    config: &ProxyConfig,
) -> Result<Option<Arc<SemanticCache>>, relay_llm::RelayError> {
    let Some(embedding_api_key) = config.embedding_api_key.as_deref() else {
        tracing::warn!("EMBEDDING_API_KEY not set, semantic cache disabled");
        return Ok(None);
    };

    let store = RedisResponseStore::new(
        RedisResponseStore::url(&config.redis_addr, &config.redis_password, config.redis_db),
        config.cache_ttl,
    )?;

    match tokio::time::timeout(Duration::from_secs(5), store.ping()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "redis connection failed, semantic cache disabled");
            return Ok(None);
        }
        Err(_) => {
            tracing::warn!("redis ping timed out, semantic cache disabled");
            return Ok(None);
        }
    }

    tracing::info!(
        threshold = config.similarity_threshold,
        ttl_secs = config.cache_ttl.as_secs(),
        "semantic cache enabled"
    );
    Ok(Some(Arc::new(SemanticCache::new(
        Arc::new(OpenAIEmbedder::new(embedding_api_key)),
        Arc::new(QdrantIndex::new(
            config.qdrant_url.as_str(),
            config.qdrant_collection.as_str(),
        )),
        Arc::new(store),
        config.similarity_threshold,
    ))))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining in-flight requests");
}
