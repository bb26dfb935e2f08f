pub mod rate_limit;
pub mod request_metrics;

pub use rate_limit::CallerRateLimit;
pub use request_metrics::RequestMetrics;
