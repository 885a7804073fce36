//! Environment-driven configuration with the canonical defaults.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub proxy_port: u16,
    pub metrics_port: u16,
    pub redis_addr: String,
    pub redis_password: String,
    pub redis_db: i64,
    pub cache_ttl: Duration,
    pub qdrant_url: String,
    pub qdrant_collection: String,
    pub similarity_threshold: f32,
    pub embedding_api_key: Option<String>,
    pub openai_keys: Vec<String>,
    pub gemini_keys: Vec<String>,
    pub anthropic_keys: Vec<String>,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            proxy_port: 50051,
            metrics_port: 9090,
            redis_addr: "localhost:6379".to_string(),
            redis_password: String::new(),
            redis_db: 0,
            cache_ttl: Duration::from_secs(3600),
            qdrant_url: "http://localhost:6333".to_string(),
            qdrant_collection: "llm_cache".to_string(),
            similarity_threshold: 0.95,
            embedding_api_key: None,
            openai_keys: Vec::new(),
            gemini_keys: Vec::new(),
            anthropic_keys: Vec::new(),
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            breaker_failure_threshold: 5,
            breaker_cooldown: Duration::from_secs(30),
        }
    }
}

impl ProxyConfig {
    /// Read configuration from the environment, falling back to the
    /// defaults above for unset or unparseable values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            proxy_port: env_parsed("PROXY_PORT", defaults.proxy_port),
            metrics_port: env_parsed("METRICS_PORT", defaults.metrics_port),
            redis_addr: env_or("REDIS_ADDR", defaults.redis_addr),
            redis_password: env_or("REDIS_PASSWORD", defaults.redis_password),
            redis_db: env_parsed("REDIS_DB", defaults.redis_db),
            cache_ttl: env_duration("CACHE_TTL", defaults.cache_ttl),
            qdrant_url: env_or("QDRANT_URL", defaults.qdrant_url),
            qdrant_collection: env_or("QDRANT_COLLECTION", defaults.qdrant_collection),
            similarity_threshold: env_parsed("SIMILARITY_THRESHOLD", defaults.similarity_threshold),
            embedding_api_key: std::env::var("EMBEDDING_API_KEY")
                .ok()
                .filter(|key| !key.is_empty()),
            openai_keys: split_keys(&env_or("OPENAI_API_KEYS", String::new())),
            gemini_keys: split_keys(&env_or("GEMINI_API_KEYS", String::new())),
            anthropic_keys: split_keys(&env_or("ANTHROPIC_API_KEYS", String::new())),
            request_timeout: env_duration("REQUEST_TIMEOUT", defaults.request_timeout),
            max_retries: env_parsed("MAX_RETRIES", defaults.max_retries),
            breaker_failure_threshold: env_parsed(
                "CB_FAILURE_THRESHOLD",
                defaults.breaker_failure_threshold,
            ),
            breaker_cooldown: env_duration("CB_COOLDOWN", defaults.breaker_cooldown),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default,
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_duration(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|value| parse_duration(&value))
        .unwrap_or(default)
}

/// Parse durations in the `500ms` / `30s` / `5m` / `1h` style; a bare
/// number is taken as seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let (number, unit) = match value.find(|c: char| c.is_ascii_alphabetic()) {
        Some(idx) => value.split_at(idx),
        None => (value, "s"),
    };
    let number: f64 = number.parse().ok()?;
    if number < 0.0 {
        return None;
    }
    let seconds = match unit {
        "ms" => number / 1000.0,
        "s" => number,
        "m" => number * 60.0,
        "h" => number * 3600.0,
        _ => return None,
    };
    Some(Duration::from_secs_f64(seconds))
}

/// Split a comma-separated credential list, dropping blanks.
pub fn split_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}
