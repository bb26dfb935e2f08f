use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

lazy_static! {
    // HTTP metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("facilitator_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"]
    ).expect("metric can be created");

    // Settlement metrics
    pub static ref SETTLEMENTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("facilitator_settlements_total", "Settlements returned by the engine"),
        &["status"]
    ).expect("metric can be created");

    pub static ref SETTLEMENT_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("facilitator_settlement_errors_total", "Settle calls that raised an error"),
        &["kind"]
    ).expect("metric can be created");

    pub static ref LEDGER_WRITE_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "facilitator_ledger_write_failures_total",
        "Ledger rows that could not be written after settlement"
    ).expect("metric can be created");

    // Auth / rate limiting
    pub static ref RATE_LIMIT_REJECTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("facilitator_rate_limit_rejections_total", "Requests rejected by the rate limiter"),
        &["class"]
    ).expect("metric can be created");

    pub static ref API_KEY_CACHE_SIZE: IntGauge = IntGauge::new(
        "facilitator_api_key_cache_size",
        "API keys currently cached"
    ).expect("metric can be created");

    pub static ref API_KEY_REFRESH_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "facilitator_api_key_refresh_failures_total",
        "Failed API key cache refresh cycles"
    ).expect("metric can be created");
}

/// Register all metrics with the given registry
pub fn register_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(HTTP_REQUESTS_TOTAL.clone()))?;

    registry.register(Box::new(SETTLEMENTS_TOTAL.clone()))?;
    registry.register(Box::new(SETTLEMENT_ERRORS_TOTAL.clone()))?;
    registry.register(Box::new(LEDGER_WRITE_FAILURES_TOTAL.clone()))?;

    registry.register(Box::new(RATE_LIMIT_REJECTIONS_TOTAL.clone()))?;
    registry.register(Box::new(API_KEY_CACHE_SIZE.clone()))?;
    registry.register(Box::new(API_KEY_REFRESH_FAILURES_TOTAL.clone()))?;

    Ok(())
}

/// Called after every API key refresh cycle
pub fn observe_key_refresh(succeeded: bool, cache_size: usize) {
    if !succeeded {
        API_KEY_REFRESH_FAILURES_TOTAL.inc();
    }
    API_KEY_CACHE_SIZE.set(cache_size as i64);
}

/// Text exposition of the default registry
pub fn metrics_handler() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
