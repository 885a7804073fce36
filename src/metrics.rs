//! Prometheus instrumentation for the proxy.

use std::sync::atomic::{AtomicU64, Ordering};

use prometheus::{
    Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

pub const CACHE_STATUS_HIT: &str = "hit";
pub const CACHE_STATUS_MISS: &str = "miss";
pub const CACHE_STATUS_ERROR: &str = "error";

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_ERROR: &str = "error";
pub const STATUS_CACHE_HIT: &str = "cache_hit";

pub const DIRECTION_INPUT: &str = "input";
pub const DIRECTION_OUTPUT: &str = "output";

const LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// The proxy's metric families, registered on a private registry so
/// independent instances (and tests) never collide.
pub struct Metrics {
    registry: Registry,

    pub request_latency: HistogramVec,
    pub token_usage: IntCounterVec,
    pub cache_hits: IntCounter,
    pub cache_lookups: IntCounter,
    pub cache_hit_ratio: Gauge,
    pub circuit_breaker_state: IntGaugeVec,
    pub active_requests: IntGauge,
    pub requests: IntCounterVec,

    // Shadow counters backing the derived ratio gauge.
    hits: AtomicU64,
    lookups: AtomicU64,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let request_latency = HistogramVec::new(
            HistogramOpts::new(
                "request_latency_seconds",
                "End-to-end request latency in seconds.",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["provider", "model", "cache_status"],
        )?;
        let token_usage = IntCounterVec::new(
            Opts::new("token_usage_total", "Total number of tokens consumed."),
            &["provider", "model", "direction"],
        )?;
        let cache_hits = IntCounter::new("cache_hits_total", "Total number of semantic cache hits.")?;
        let cache_lookups = IntCounter::new(
            "cache_lookups_total",
            "Total number of semantic cache lookups.",
        )?;
        let cache_hit_ratio = Gauge::new(
            "cache_hit_ratio",
            "Current cache hit ratio (hits / lookups), updated per lookup.",
        )?;
        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new(
                "circuit_breaker_state",
                "Current circuit breaker state: 0=closed, 1=open, 2=half-open.",
            ),
            &["provider"],
        )?;
        let active_requests = IntGauge::new(
            "active_requests",
            "Number of currently in-flight requests.",
        )?;
        let requests = IntCounterVec::new(
            Opts::new("requests_total", "Total number of requests by status."),
            &["status"],
        )?;

        registry.register(Box::new(request_latency.clone()))?;
        registry.register(Box::new(token_usage.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_lookups.clone()))?;
        registry.register(Box::new(cache_hit_ratio.clone()))?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;
        registry.register(Box::new(active_requests.clone()))?;
        registry.register(Box::new(requests.clone()))?;

        Ok(Self {
            registry,
            request_latency,
            token_usage,
            cache_hits,
            cache_lookups,
            cache_hit_ratio,
            circuit_breaker_state,
            active_requests,
            requests,
            hits: AtomicU64::new(0),
            lookups: AtomicU64::new(0),
        })
    }

    /// Record one cache lookup and refresh the derived hit-ratio gauge.
    pub fn record_cache_lookup(&self, hit: bool) {
        self.cache_lookups.inc();
        let lookups = self.lookups.fetch_add(1, Ordering::Relaxed) + 1;

        let hits = if hit {
            self.cache_hits.inc();
            self.hits.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            self.hits.load(Ordering::Relaxed)
        };

        self.cache_hit_ratio.set(hits as f64 / lookups as f64);
    }

    /// Increment the in-flight gauge, returning a guard that decrements
    /// it on every exit path, panics included.
    pub fn track_active(&self) -> ActiveRequestGuard {
        self.active_requests.inc();
        ActiveRequestGuard {
            gauge: self.active_requests.clone(),
        }
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        encoder
            .encode_to_string(&self.registry.gather())
            .unwrap_or_default()
    }
}

pub struct ActiveRequestGuard {
    gauge: IntGauge,
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}
