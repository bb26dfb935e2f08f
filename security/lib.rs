//! Security Module for the x402 Facilitator
//!
//! Provides the security primitives the facilitator service is built on:
//! - API key authentication cache with periodic background refresh
//! - Caller-aware rate limiting (authenticated vs anonymous buckets)
//! - Remote vault secret references and backends
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Security Layer                      │
//! ├─────────────────────────────────────────────────────┤
//! │  API Key Cache │  Rate Limiter  │  Secrets Manager   │
//! └─────────────────────────────────────────────────────┘
//!                          ↓
//! ┌─────────────────────────────────────────────────────┐
//! │              Facilitator Service                     │
//! │  Auth middleware │ Rate-limit middleware │ Resolver  │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Features
//!
//! ## API Keys (`api_keys`)
//! - Process-wide set of valid keys, replaced wholesale on refresh
//! - Fixed-time membership check (cost depends on cache size only)
//! - Refresh failures keep the previous set
//! - Cancellable background refresher
//!
//! ## Rate Limiting (`rate_limiter`)
//! - Sliding window per bucket key
//! - `auth:<key>` buckets for authenticated callers, `anon:<addr>` otherwise
//! - Ceiling chosen per request from the caller classification
//!
//! ## Secrets Management (`secrets_manager`)
//! - `vault/item/field` secret references
//! - Placeholder token detection for unedited config templates
//! - 1Password Connect backend
//!
//! # Usage Examples
//!
//! ## Rate Limiting
//!
//! ```rust
//! use security::rate_limiter::{Caller, RateLimiter, RateLimiterConfig, RateLimitResult};
//!
//! let limiter = RateLimiter::new(RateLimiterConfig::default());
//! let caller = Caller::Anonymous { remote_addr: Some("10.0.0.1".to_string()) };
//!
//! assert_eq!(caller.bucket_key(), "anon:10.0.0.1");
//! assert_eq!(limiter.check(&caller), RateLimitResult::Allowed);
//! ```
//!
//! ## API Keys
//!
//! ```rust
//! use security::api_keys::ApiKeyCache;
//!
//! let cache = ApiKeyCache::new();
//! cache.replace(vec!["key-1".to_string()]);
//! assert!(cache.is_valid("key-1"));
//! assert!(!cache.is_valid("key-2"));
//! ```
//!
//! ## Secret References
//!
//! ```rust
//! use security::secrets_manager::SecretReference;
//!
//! let reference = SecretReference::parse("Prod/facilitator-key/private_key").unwrap();
//! assert_eq!(reference.uri(), "op://Prod/facilitator-key/private_key");
//! assert!(SecretReference::parse("Prod/facilitator-key").is_none());
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod api_keys;
pub mod rate_limiter;
pub mod secrets_manager;

// Re-exports for convenience
pub use api_keys::{ApiKeyCache, ApiKeyRefresher, ApiKeySource};
pub use rate_limiter::{Caller, RateLimit, RateLimitResult, RateLimiter, RateLimiterConfig};
pub use secrets_manager::{SecretReference, SecretsBackend, SecretsError, SecretsManager};
