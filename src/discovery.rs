//! Bisection search over the app-version space for every distinct firmware
//! API snapshot.
//!
//! The API returns the firmware list for one app version. Probing every
//! version is thousands of requests, so the search assumes the response is a
//! step function of the version: constant over contiguous version ranges.
//! Under that assumption, two equal snapshots at `mid` and `high` mean the
//! whole `[mid, high]` window is uniform and only `[low, mid]` still needs
//! searching. Unequal snapshots split the search into both halves.
//!
//! A snapshot that changes and then changes back between two lookups is not
//! detected. Callers relying on this search should know that.
//!
//! Snapshots are fetched through a [`FetchCache`], so the `high` of one
//! window, which is the `mid` of its parent, is never requested twice.

use std::collections::BTreeSet;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, info, instrument, trace};

use crate::fetch::{FetchCache, FetchError, ResilientFetcher, RetryBudget};
use crate::firmware::{self, Firmware};
use crate::version::{Version, VersionError};

/// Base URL of the firmware API; the app version is appended as a path segment.
pub const FIRMWARE_API_BASE: &str = "https://api.shimano.com/etube/firmware";

/// Errors that stop a discovery run.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Version(#[from] VersionError),

    /// The API answered with bytes that are not UTF-8.
    #[error("firmware API response for {version} is not UTF-8: {source}")]
    Encoding {
        version: String,
        #[source]
        source: std::string::FromUtf8Error,
    },

    /// The API answered with something other than a firmware list.
    #[error("malformed firmware API response for {version}: {source}")]
    Payload {
        version: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Closed range of app versions to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchRange {
    low: Version,
    high: Version,
}

impl Default for SearchRange {
    fn default() -> Self {
        Self {
            low: Version::API_MIN,
            high: Version::API_MAX,
        }
    }
}

impl SearchRange {
    /// # Errors
    ///
    /// Returns [`VersionError::EmptyRange`] when `low > high`.
    pub fn new(low: Version, high: Version) -> Result<Self, VersionError> {
        if low > high {
            return Err(VersionError::EmptyRange { low, high });
        }
        Ok(Self { low, high })
    }

    #[must_use]
    pub fn low(&self) -> Version {
        self.low
    }

    #[must_use]
    pub fn high(&self) -> Version {
        self.high
    }
}

/// Queries the firmware API and runs the bisection search.
#[derive(Debug, Clone)]
pub struct FirmwareDiscoverer<'a> {
    fetcher: &'a ResilientFetcher,
    api_base: &'a str,
    budget: RetryBudget,
}

impl<'a> FirmwareDiscoverer<'a> {
    #[must_use]
    pub fn new(fetcher: &'a ResilientFetcher, api_base: &'a str, budget: RetryBudget) -> Self {
        Self {
            fetcher,
            api_base,
            budget,
        }
    }

    /// API URL for `version`, percent-encoded as a single path segment.
    #[must_use]
    pub fn snapshot_url(&self, version: &str) -> String {
        format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            urlencoding::encode(version)
        )
    }

    /// Raw API payload for one app version.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Fetch`] when the request fails and
    /// [`DiscoveryError::Encoding`] when the body is not UTF-8.
    pub async fn snapshot(
        &self,
        cache: &mut FetchCache,
        version: &str,
    ) -> Result<String, DiscoveryError> {
        let url = self.snapshot_url(version);
        let body = self.fetcher.get(cache, &url, self.budget).await?;
        String::from_utf8(body).map_err(|source| DiscoveryError::Encoding {
            version: version.to_string(),
            source,
        })
    }

    /// Firmware for exactly one app version, invalid records dropped,
    /// sorted by filename.
    ///
    /// # Errors
    ///
    /// Fails on fetch errors and malformed payloads.
    #[instrument(skip(self, cache))]
    pub async fn list_for_version(
        &self,
        cache: &mut FetchCache,
        version: &str,
    ) -> Result<Vec<Firmware>, DiscoveryError> {
        let payload = self.snapshot(cache, version).await?;
        let parsed = parse_snapshot(version, &payload)?;
        Ok(firmware::sanitize(parsed))
    }

    /// Every distinct snapshot found in `range`.
    ///
    /// # Errors
    ///
    /// Any fetch failure aborts the whole search.
    #[instrument(skip(self, cache), fields(low = %range.low, high = %range.high))]
    pub async fn discover_snapshots(
        &self,
        cache: &mut FetchCache,
        range: SearchRange,
    ) -> Result<BTreeSet<String>, DiscoveryError> {
        let mut found = BTreeSet::new();
        self.bisect(cache, range.low, range.high, &mut found).await?;
        info!(snapshots = found.len(), lookups = cache.len(), "bisection complete");
        Ok(found)
    }

    /// Union of the firmware in every distinct snapshot of `range`,
    /// invalid records dropped, sorted by filename.
    ///
    /// # Errors
    ///
    /// Fails on fetch errors and malformed payloads.
    pub async fn discover(
        &self,
        cache: &mut FetchCache,
        range: SearchRange,
    ) -> Result<Vec<Firmware>, DiscoveryError> {
        let snapshots = self.discover_snapshots(cache, range).await?;
        let label = format!("{}..={}", range.low, range.high);
        let mut all = BTreeSet::new();
        for payload in &snapshots {
            all.extend(parse_snapshot(&label, payload)?);
        }
        debug!(records = all.len(), "merged snapshots");
        Ok(firmware::sanitize(all))
    }

    fn bisect<'s>(
        &'s self,
        cache: &'s mut FetchCache,
        low: Version,
        high: Version,
        found: &'s mut BTreeSet<String>,
    ) -> BoxFuture<'s, Result<(), DiscoveryError>> {
        async move {
            let mid = Version::midpoint(low, high)?;
            let last = low == mid || high == mid;

            let at_mid = self.snapshot(cache, &mid.to_string()).await?;
            let at_high = self.snapshot(cache, &high.to_string()).await?;

            if at_mid == at_high {
                trace!(%low, %mid, %high, "upper half uniform");
                found.insert(at_high);
                if !last {
                    self.bisect(cache, low, mid, found).await?;
                }
            } else {
                debug!(%low, %mid, %high, "snapshot changes in window");
                found.insert(at_mid);
                found.insert(at_high);
                if !last {
                    self.bisect(cache, low, mid, found).await?;
                    self.bisect(cache, mid, high, found).await?;
                }
            }
            Ok(())
        }
        .boxed()
    }
}

fn parse_snapshot(version: &str, payload: &str) -> Result<Vec<Firmware>, DiscoveryError> {
    firmware::parse_payload(payload).map_err(|source| DiscoveryError::Payload {
        version: version.to_string(),
        source,
    })
}
