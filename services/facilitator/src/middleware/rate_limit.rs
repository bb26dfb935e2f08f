use crate::errors::FacilitatorError;
use crate::metrics;
use security::rate_limiter::{Caller, RateLimitResult, RateLimiter};
use std::sync::Arc;
use tracing::warn;

/// Per-caller rate limit for a single route.
///
/// Checked from the handler once the request body has been extracted, so a
/// request rejected as malformed never counts against the caller's bucket.
/// The bucket key and ceiling come from the classification
/// [`ApiKeyAuth`](crate::security_middleware::ApiKeyAuth) attached to the
/// request.
#[derive(Debug, Clone)]
pub struct CallerRateLimit {
    limiter: Arc<RateLimiter>,
}

impl CallerRateLimit {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }

    /// Count one request from `caller`, or fail with `RateLimitExceeded`
    pub fn check(&self, caller: &Caller, path: &str) -> Result<(), FacilitatorError> {
        match self.limiter.check(caller) {
            RateLimitResult::Allowed => Ok(()),
            RateLimitResult::Denied { limit, .. } => {
                metrics::RATE_LIMIT_REJECTIONS_TOTAL
                    .with_label_values(&[caller.class()])
                    .inc();
                warn!("Rate limit exceeded for path: {}", path);
                Err(FacilitatorError::RateLimitExceeded(limit.to_string()))
            }
        }
    }
}
