//! Resilient HTTP fetching: transport, failure classification, retry with
//! backoff, and per-run memoization.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use etube_core::fetch::{
//!     BackoffPolicy, FetchCache, HttpTimeouts, ReqwestTransport, ResilientFetcher, RetryBudget,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(ReqwestTransport::new(HttpTimeouts::default())?);
//! let fetcher = ResilientFetcher::new(transport, BackoffPolicy::default());
//! let mut cache = FetchCache::new();
//! let body = fetcher
//!     .get(&mut cache, "https://api.shimano.com/etube/firmware/4.2.0", RetryBudget::Unlimited)
//!     .await?;
//! println!("{} bytes", body.len());
//! # Ok(())
//! # }
//! ```

mod cache;
mod client;
mod error;
mod fetcher;
mod retry;
#[cfg(test)]
pub(crate) mod testing;

pub use cache::{FetchCache, FetchKey};
pub use client::{
    CONNECT_TIMEOUT_SECS, HttpTimeouts, REQUEST_TIMEOUT_SECS, ReqwestTransport, RequestMethod,
    Transport, impersonation_headers,
};
pub use error::FetchError;
pub use fetcher::{ResilientFetcher, Sleeper, TokioSleeper};
pub use retry::{
    BackoffPolicy, CDN_BOT_MITIGATION_SERVER, DEFAULT_BACKOFF_INITIAL, DEFAULT_BACKOFF_MAX,
    FailureType, RetryBudget, classify_error,
};
