//! API Key Authentication Cache
//!
//! Holds the process-wide set of valid API keys. The set is replaced
//! wholesale by a background refresher that reads the persistent key store;
//! readers always see either the old set or the new one, never a mix.
//!
//! Membership checks compare the candidate against every cached key with a
//! fixed-time comparison and never stop early, so the cost depends on the
//! cache size only and not on where (or whether) a match occurs.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use subtle::{Choice, ConstantTimeEq};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Persistent store of API keys
#[async_trait]
pub trait ApiKeySource: Send + Sync {
    /// Every currently valid key
    async fn fetch_api_keys(&self) -> anyhow::Result<Vec<String>>;
}

/// In-memory set of valid API keys
#[derive(Default)]
pub struct ApiKeyCache {
    keys: RwLock<Arc<HashSet<String>>>,
}

impl ApiKeyCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole key set in one assignment
    pub fn replace<I>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let next: HashSet<String> = keys.into_iter().filter(|k| !k.is_empty()).collect();
        let count = next.len();
        *self.keys.write() = Arc::new(next);
        count
    }

    /// Fixed-time membership check
    pub fn is_valid(&self, candidate: &str) -> bool {
        if candidate.is_empty() {
            return false;
        }

        let keys = self.snapshot();
        let candidate = candidate.as_bytes();

        let mut found = Choice::from(0u8);
        for cached in keys.iter() {
            found |= cached.as_bytes().ct_eq(candidate);
        }

        found.into()
    }

    /// Number of cached keys
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Whether the cache holds no keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reload from `source`. On failure the previous set is kept.
    pub async fn refresh_from(&self, source: &dyn ApiKeySource) -> anyhow::Result<usize> {
        let keys = source.fetch_api_keys().await?;
        Ok(self.replace(keys))
    }

    fn snapshot(&self) -> Arc<HashSet<String>> {
        self.keys.read().clone()
    }
}

impl fmt::Debug for ApiKeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyCache")
            .field("len", &self.len())
            .finish()
    }
}

/// Run one refresh cycle, logging the outcome. Never fails.
pub async fn refresh_api_keys(cache: &ApiKeyCache, source: &dyn ApiKeySource) -> bool {
    match cache.refresh_from(source).await {
        Ok(count) => {
            info!("API key cache refreshed: {} keys loaded", count);
            true
        }
        Err(e) => {
            error!("Failed to refresh API key cache: {:#}", e);
            false
        }
    }
}

/// Periodic background refresher with a stop signal
pub struct ApiKeyRefresher {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ApiKeyRefresher {
    /// Spawn the refresher. The first refresh runs immediately.
    pub fn spawn(
        cache: Arc<ApiKeyCache>,
        source: Arc<dyn ApiKeySource>,
        interval: Duration,
    ) -> Self {
        Self::spawn_with_hook(cache, source, interval, |_| {})
    }

    /// Spawn the refresher, calling `on_cycle` with each cycle's outcome
    pub fn spawn_with_hook<F>(
        cache: Arc<ApiKeyCache>,
        source: Arc<dyn ApiKeySource>,
        interval: Duration,
        on_cycle: F,
    ) -> Self
    where
        F: Fn(bool) + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!("API key refresher started (interval: {:?})", interval);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let ok = refresh_api_keys(&cache, source.as_ref()).await;
                        on_cycle(ok);
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("API key refresher stopped");
        });

        Self { stop_tx, handle }
    }

    /// Drive `work` to completion, then stop the refresher whatever `work` returned
    pub async fn run_until<F, T>(self, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let output = work.await;
        self.stop().await;
        output
    }

    /// Signal the task to stop and wait for it to finish
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            if !e.is_cancelled() {
                error!("API key refresher task failed: {}", e);
            }
        }
    }
}

impl fmt::Debug for ApiKeyRefresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyRefresher")
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}
