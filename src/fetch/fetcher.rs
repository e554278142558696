//! Retrying, memoizing fetcher.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use super::{
    BackoffPolicy, FailureType, FetchCache, FetchError, FetchKey, RequestMethod, RetryBudget,
    Transport, classify_error,
};

/// Waits out a backoff delay.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Issues requests through a [`Transport`], retrying retryable failures with
/// exponential backoff and memoizing successes in a caller-owned
/// [`FetchCache`].
///
/// Requests are awaited one at a time; a backoff sleep blocks the caller.
#[derive(Clone)]
pub struct ResilientFetcher {
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    backoff: BackoffPolicy,
}

impl std::fmt::Debug for ResilientFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientFetcher")
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl ResilientFetcher {
    /// Creates a fetcher that sleeps on the tokio timer.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, backoff: BackoffPolicy) -> Self {
        Self::with_sleeper(transport, Arc::new(TokioSleeper), backoff)
    }

    /// Creates a fetcher with a custom [`Sleeper`].
    #[must_use]
    pub fn with_sleeper(
        transport: Arc<dyn Transport>,
        sleeper: Arc<dyn Sleeper>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            transport,
            sleeper,
            backoff,
        }
    }

    /// Fetches `url`, returning the cached body when this exact
    /// `(method, url, budget)` already succeeded in `cache`.
    ///
    /// # Errors
    ///
    /// Returns the first fatal [`FetchError`], or the last retryable one once
    /// `budget` is spent.
    #[instrument(level = "debug", skip(self, cache, method, budget), fields(method = %method, budget = %budget))]
    pub async fn fetch(
        &self,
        cache: &mut FetchCache,
        method: RequestMethod,
        url: &str,
        budget: RetryBudget,
    ) -> Result<Vec<u8>, FetchError> {
        let key = FetchKey {
            method,
            url: url.to_string(),
            budget,
        };
        if let Some(body) = cache.get(&key) {
            debug!("cache hit");
            return Ok(body.to_vec());
        }

        let body = self.fetch_uncached(method, url, budget).await?;
        Ok(cache.insert(key, body).to_vec())
    }

    /// `GET` shorthand for [`fetch`](Self::fetch).
    ///
    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    pub async fn get(
        &self,
        cache: &mut FetchCache,
        url: &str,
        budget: RetryBudget,
    ) -> Result<Vec<u8>, FetchError> {
        self.fetch(cache, RequestMethod::Get, url, budget).await
    }

    /// `HEAD` shorthand for [`fetch`](Self::fetch).
    ///
    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    pub async fn head(
        &self,
        cache: &mut FetchCache,
        url: &str,
        budget: RetryBudget,
    ) -> Result<(), FetchError> {
        self.fetch(cache, RequestMethod::Head, url, budget)
            .await
            .map(|_| ())
    }

    /// Streams the `GET` body of `url` into `path` with the same retry
    /// policy as [`fetch`](Self::fetch), without memoization. Each attempt
    /// rewrites `path` from the start.
    ///
    /// # Errors
    ///
    /// See [`fetch`](Self::fetch); a failed disk write is fatal.
    #[instrument(level = "debug", skip(self, budget), fields(path = %path.display(), budget = %budget))]
    pub async fn download_to(
        &self,
        url: &str,
        path: &Path,
        budget: RetryBudget,
    ) -> Result<u64, FetchError> {
        self.with_retry(RequestMethod::Get, url, budget, || {
            self.transport.download(url, path)
        })
        .await
    }

    async fn fetch_uncached(
        &self,
        method: RequestMethod,
        url: &str,
        budget: RetryBudget,
    ) -> Result<Vec<u8>, FetchError> {
        self.with_retry(method, url, budget, || self.transport.send(method, url))
            .await
    }

    async fn with_retry<T, F, Fut>(
        &self,
        method: RequestMethod,
        url: &str,
        mut budget: RetryBudget,
        mut attempt: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut retry = 0u32;
        loop {
            let error = match attempt().await {
                Ok(value) => {
                    debug!(%method, url, "request ok");
                    return Ok(value);
                }
                Err(error) => error,
            };

            if classify_error(&error) == FailureType::Fatal {
                debug!(%method, url, error = %error, "fatal failure");
                return Err(error);
            }
            if !budget.has_remaining() {
                warn!(%method, url, error = %error, "retry budget exhausted");
                return Err(error);
            }

            let delay = self.backoff.delay(retry);
            warn!(
                %method,
                url,
                error = %error,
                delay_secs = delay.as_secs(),
                "retrying request"
            );
            self.sleeper.sleep(delay).await;
            budget = budget.consume();
            retry = retry.saturating_add(1);
        }
    }
}
