//! Rate Limiting
//!
//! Sliding window rate limiter keyed by caller bucket:
//! - Authenticated callers are bucketed by API key (`auth:<key>`)
//! - Anonymous callers are bucketed by source address (`anon:<addr>`)
//!
//! The ceiling is looked up per request from the caller classification, so one
//! route can admit authenticated and anonymous traffic at different rates.

use dashmap::DashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Address token used when the caller's source address cannot be determined
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// Rate limit string errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitParseError {
    /// Not of the form `<count>/<period>`
    #[error("invalid rate limit '{0}': expected '<count>/<period>' such as '100/minute'")]
    Format(String),

    /// Count is zero or not a number
    #[error("invalid rate limit '{0}': count must be a positive integer")]
    Count(String),

    /// Period unit not recognised
    #[error("invalid rate limit '{0}': unknown period '{1}'")]
    Unit(String, String),
}

/// Granularity of a rate limit window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    /// One second
    Second,
    /// One minute
    Minute,
    /// One hour
    Hour,
    /// One day
    Day,
}

impl TimeUnit {
    fn seconds(self) -> u64 {
        match self {
            TimeUnit::Second => 1,
            TimeUnit::Minute => 60,
            TimeUnit::Hour => 3_600,
            TimeUnit::Day => 86_400,
        }
    }

    fn name(self) -> &'static str {
        match self {
            TimeUnit::Second => "second",
            TimeUnit::Minute => "minute",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "s" | "sec" | "second" | "seconds" => Some(TimeUnit::Second),
            "m" | "min" | "minute" | "minutes" => Some(TimeUnit::Minute),
            "h" | "hour" | "hours" => Some(TimeUnit::Hour),
            "d" | "day" | "days" => Some(TimeUnit::Day),
            _ => None,
        }
    }
}

/// A request ceiling: `max_requests` per `multiples` x `unit`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Maximum requests admitted per window
    pub max_requests: u32,

    /// Number of units in the window
    pub multiples: u32,

    /// Window unit
    pub unit: TimeUnit,
}

impl RateLimit {
    /// Create a limit of `max_requests` per one `unit`
    pub fn new(max_requests: u32, unit: TimeUnit) -> Self {
        Self {
            max_requests,
            multiples: 1,
            unit,
        }
    }

    /// Window duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.unit.seconds() * u64::from(self.multiples))
    }
}

impl FromStr for RateLimit {
    type Err = RateLimitParseError;

    /// Accepts `10/minute`, `10 per minute`, `10/2 minutes` and `10 per 2 minutes`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let text = raw.trim();
        let (count, period) = text
            .split_once('/')
            .or_else(|| text.split_once(" per "))
            .ok_or_else(|| RateLimitParseError::Format(raw.to_string()))?;

        let max_requests = count
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| RateLimitParseError::Count(raw.to_string()))?;

        let parts: Vec<&str> = period.split_whitespace().collect();
        let (multiples, unit) = match parts.as_slice() {
            [unit] => (1, *unit),
            [multiples, unit] => {
                let multiples = multiples
                    .parse::<u32>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| RateLimitParseError::Format(raw.to_string()))?;
                (multiples, *unit)
            }
            _ => return Err(RateLimitParseError::Format(raw.to_string())),
        };

        let unit = TimeUnit::parse(unit)
            .ok_or_else(|| RateLimitParseError::Unit(raw.to_string(), unit.to_string()))?;

        Ok(Self {
            max_requests,
            multiples,
            unit,
        })
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} per {} {}",
            self.max_requests,
            self.multiples,
            self.unit.name()
        )
    }
}

/// Classification of an inbound request, computed once at entry
#[derive(Clone, PartialEq, Eq)]
pub enum Caller {
    /// A valid API key was presented
    Authenticated {
        /// The verified key
        api_key: String,
    },

    /// No key, or a key not in the cache
    Anonymous {
        /// Source address, when it could be determined
        remote_addr: Option<String>,
    },
}

impl Caller {
    /// Whether the caller presented a valid key
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Caller::Authenticated { .. })
    }

    /// The verified API key, if any
    pub fn api_key(&self) -> Option<&str> {
        match self {
            Caller::Authenticated { api_key } => Some(api_key),
            Caller::Anonymous { .. } => None,
        }
    }

    /// Bucket identity for rate limiting
    pub fn bucket_key(&self) -> String {
        match self {
            Caller::Authenticated { api_key } => format!("auth:{}", api_key),
            Caller::Anonymous { remote_addr } => format!(
                "anon:{}",
                remote_addr
                    .as_deref()
                    .filter(|addr| !addr.is_empty())
                    .unwrap_or(UNKNOWN_ADDRESS)
            ),
        }
    }

    /// `authenticated` or `anonymous`
    pub fn class(&self) -> &'static str {
        if self.is_authenticated() {
            "authenticated"
        } else {
            "anonymous"
        }
    }
}

// Keys never go to logs.
impl fmt::Debug for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Caller::Authenticated { .. } => f
                .debug_struct("Authenticated")
                .field("api_key", &"<redacted>")
                .finish(),
            Caller::Anonymous { remote_addr } => f
                .debug_struct("Anonymous")
                .field("remote_addr", remote_addr)
                .finish(),
        }
    }
}

/// Rate limiter configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Ceiling for callers with a valid API key
    pub authenticated: RateLimit,

    /// Ceiling for everyone else
    pub anonymous: RateLimit,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            authenticated: RateLimit::new(1000, TimeUnit::Minute),
            anonymous: RateLimit::new(1, TimeUnit::Minute),
        }
    }
}

impl RateLimiterConfig {
    /// Ceiling that applies to `caller`
    pub fn limit_for(&self, caller: &Caller) -> RateLimit {
        if caller.is_authenticated() {
            self.authenticated
        } else {
            self.anonymous
        }
    }
}

/// Rate limiter result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request allowed
    Allowed,

    /// Request denied (ceiling reached within the window)
    Denied {
        /// The ceiling that was exceeded
        limit: RateLimit,

        /// Time until the oldest request leaves the window
        retry_after: Duration,
    },
}

/// Sliding window rate limiter
#[derive(Debug)]
struct SlidingWindow {
    /// Request timestamps
    timestamps: Vec<Instant>,

    /// Maximum requests
    max_requests: usize,

    /// Window duration
    window_duration: Duration,

    /// Last check, for cleanup
    last_access: Instant,
}

impl SlidingWindow {
    fn new(limit: RateLimit) -> Self {
        let max_requests = limit.max_requests as usize;
        Self {
            timestamps: Vec::with_capacity(max_requests.min(64)),
            max_requests,
            window_duration: limit.window(),
            last_access: Instant::now(),
        }
    }

    fn try_add(&mut self) -> bool {
        let now = Instant::now();
        self.last_access = now;

        // Remove old timestamps
        if let Some(cutoff) = now.checked_sub(self.window_duration) {
            self.timestamps.retain(|&ts| ts > cutoff);
        }

        if self.timestamps.len() < self.max_requests {
            self.timestamps.push(now);
            true
        } else {
            false
        }
    }

    fn time_until_ready(&self) -> Duration {
        match self.timestamps.first() {
            Some(oldest) if self.timestamps.len() >= self.max_requests => {
                (*oldest + self.window_duration).saturating_duration_since(Instant::now())
            }
            _ => Duration::ZERO,
        }
    }
}

/// Caller-aware rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: DashMap<String, SlidingWindow>,
}

impl RateLimiter {
    /// Create new rate limiter
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Count one request from `caller` against its bucket
    pub fn check(&self, caller: &Caller) -> RateLimitResult {
        let limit = self.config.limit_for(caller);
        let key = caller.bucket_key();

        let mut window = self.buckets.entry(key).or_insert_with(|| {
            debug!(class = caller.class(), "Creating new rate limit bucket");
            SlidingWindow::new(limit)
        });

        if window.try_add() {
            RateLimitResult::Allowed
        } else {
            let retry_after = window.time_until_ready();
            warn!(
                class = caller.class(),
                limit = %limit,
                retry_after_secs = retry_after.as_secs(),
                "Rate limit exceeded"
            );
            RateLimitResult::Denied { limit, retry_after }
        }
    }

    /// Number of tracked buckets
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drop buckets not touched within `max_age`
    pub fn cleanup(&self, max_age: Duration) {
        let now = Instant::now();
        self.buckets
            .retain(|_, window| now.saturating_duration_since(window.last_access) <= max_age);

        info!("Rate limiter cleanup: {} buckets", self.buckets.len());
    }

    /// Start cleanup task
    pub fn start_cleanup_task(
        self: Arc<Self>,
        interval: Duration,
        max_age: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            loop {
                interval.tick().await;
                self.cleanup(max_age);
            }
        })
    }
}
