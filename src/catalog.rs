//! The firmware catalog: the operations the command line exposes.
//!
//! Every operation starts with an empty [`FetchCache`], so nothing fetched in
//! one call leaks into the next even when the catalog is long-lived.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument};

use crate::discovery::{DiscoveryError, FIRMWARE_API_BASE, FirmwareDiscoverer, SearchRange};
use crate::download::{DownloadOutcome, DownloadSummary, FirmwareDownloader};
use crate::fetch::{
    BackoffPolicy, FetchCache, FetchError, HttpTimeouts, ReqwestTransport, ResilientFetcher,
    RetryBudget,
};
use crate::firmware::{FilenameError, Firmware};
use crate::reconcile::{DOWNLOAD_BASE, SourceReconciler};
use crate::scrape::{FIRMWARE_PAGES, MarketingPageScraper, ScrapeError, ScrapedModels};
use crate::verify::LinkVerifier;
use crate::version::{Version, VersionError};

/// Errors surfaced by [`FirmwareCatalog`] operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Filename(#[from] FilenameError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    /// The firmware API returned a body that is not a firmware list.
    #[error("malformed firmware API response for {version}: {source}")]
    Payload {
        version: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("firmware API response for {version} is not UTF-8: {source}")]
    Encoding {
        version: String,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("cannot use download directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<DiscoveryError> for CatalogError {
    fn from(error: DiscoveryError) -> Self {
        match error {
            DiscoveryError::Fetch(e) => Self::Fetch(e),
            DiscoveryError::Version(e) => Self::Version(e),
            DiscoveryError::Encoding { version, source } => Self::Encoding { version, source },
            DiscoveryError::Payload { version, source } => Self::Payload { version, source },
        }
    }
}

/// Endpoints and fetch policy for a [`FirmwareCatalog`].
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSettings {
    /// Firmware API base; the app version is appended as a path segment.
    pub api_base_url: String,
    /// Base URL for synthesized download links.
    pub download_base_url: String,
    /// Marketing pages scraped for model/version tables.
    pub pages: Vec<String>,
    /// App versions covered by the bisection search.
    pub search_range: SearchRange,
    pub timeouts: HttpTimeouts,
    pub backoff: BackoffPolicy,
    /// Retry budget for API, page and download requests. Link checks always
    /// retry without limit.
    pub max_retries: RetryBudget,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            api_base_url: FIRMWARE_API_BASE.to_string(),
            download_base_url: DOWNLOAD_BASE.to_string(),
            pages: FIRMWARE_PAGES.iter().map(ToString::to_string).collect(),
            search_range: SearchRange::default(),
            timeouts: HttpTimeouts::default(),
            backoff: BackoffPolicy::default(),
            max_retries: RetryBudget::Unlimited,
        }
    }
}

/// Entry point for listing, discovering and downloading firmware.
#[derive(Debug, Clone)]
pub struct FirmwareCatalog {
    fetcher: ResilientFetcher,
    settings: CatalogSettings,
}

impl FirmwareCatalog {
    /// Builds a catalog talking HTTP through `reqwest`.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(settings: CatalogSettings) -> Result<Self, CatalogError> {
        let transport = Arc::new(ReqwestTransport::new(settings.timeouts)?);
        let fetcher = ResilientFetcher::new(transport, settings.backoff);
        Ok(Self::with_fetcher(fetcher, settings))
    }

    /// Builds a catalog around an existing fetcher.
    #[must_use]
    pub fn with_fetcher(fetcher: ResilientFetcher, settings: CatalogSettings) -> Self {
        Self { fetcher, settings }
    }

    #[must_use]
    pub fn settings(&self) -> &CatalogSettings {
        &self.settings
    }

    fn discoverer(&self) -> FirmwareDiscoverer<'_> {
        FirmwareDiscoverer::new(
            &self.fetcher,
            &self.settings.api_base_url,
            self.settings.max_retries,
        )
    }

    /// Firmware the API lists for exactly `app_version`.
    ///
    /// # Errors
    ///
    /// Fails when `app_version` is not a valid version, or on fetch and
    /// payload errors.
    #[instrument(skip(self))]
    pub async fn list_for_version(&self, app_version: &str) -> Result<Vec<Firmware>, CatalogError> {
        let version = Version::parse(app_version)?;
        let mut cache = FetchCache::new();
        Ok(self
            .discoverer()
            .list_for_version(&mut cache, &version.to_string())
            .await?)
    }

    /// Every firmware record found by bisecting the configured search range.
    ///
    /// # Errors
    ///
    /// Any fetch or payload error aborts the search.
    #[instrument(skip(self))]
    pub async fn list_all_bisected(&self) -> Result<Vec<Firmware>, CatalogError> {
        let mut cache = FetchCache::new();
        Ok(self
            .discoverer()
            .discover(&mut cache, self.settings.search_range)
            .await?)
    }

    /// Scrapes the configured marketing pages.
    ///
    /// # Errors
    ///
    /// Fails when a page cannot be fetched or has no firmware table.
    pub async fn scrape(&self) -> Result<ScrapedModels, CatalogError> {
        let mut cache = FetchCache::new();
        self.scrape_with(&mut cache).await
    }

    async fn scrape_with(&self, cache: &mut FetchCache) -> Result<ScrapedModels, CatalogError> {
        Ok(MarketingPageScraper::new(&self.fetcher, &self.settings.pages, self.settings.max_retries)
            .scrape(cache)
            .await?)
    }

    /// The full pipeline: discovery, scraping, reconciliation and link
    /// verification.
    ///
    /// # Errors
    ///
    /// Fetch failures during discovery or scraping, malformed payloads and
    /// malformed filenames abort the run. Dead links only drop records.
    #[instrument(skip(self))]
    pub async fn discover_all(&self) -> Result<Vec<Firmware>, CatalogError> {
        let mut cache = FetchCache::new();
        info!("retrieving firmware from API");
        let discovered = self
            .discoverer()
            .discover(&mut cache, self.settings.search_range)
            .await?;
        info!("scraping website");
        let scraped = self.scrape_with(&mut cache).await?;
        self.reconcile_and_verify(&mut cache, &discovered, &scraped)
            .await
    }

    /// [`discover_all`](Self::discover_all) with a scrape result supplied by
    /// the caller instead of fetched from the marketing pages.
    ///
    /// # Errors
    ///
    /// See [`discover_all`](Self::discover_all).
    #[instrument(skip_all, fields(models = scraped.len()))]
    pub async fn discover_all_with(
        &self,
        scraped: &ScrapedModels,
    ) -> Result<Vec<Firmware>, CatalogError> {
        let mut cache = FetchCache::new();
        let discovered = self
            .discoverer()
            .discover(&mut cache, self.settings.search_range)
            .await?;
        self.reconcile_and_verify(&mut cache, &discovered, scraped)
            .await
    }

    async fn reconcile_and_verify(
        &self,
        cache: &mut FetchCache,
        discovered: &[Firmware],
        scraped: &ScrapedModels,
    ) -> Result<Vec<Firmware>, CatalogError> {
        let reconciliation = SourceReconciler::new(self.settings.download_base_url.as_str())
            .reconcile(discovered, scraped)?;
        info!("verifying firmware URLs");
        Ok(LinkVerifier::new(&self.fetcher)
            .verify(cache, reconciliation.firmware)
            .await)
    }

    /// Downloads `firmware` into `dir`.
    ///
    /// # Errors
    ///
    /// Only fails when `dir` cannot be created; see
    /// [`download_with_progress`](Self::download_with_progress).
    pub async fn download(
        &self,
        firmware: &[Firmware],
        dir: &Path,
        overwrite: bool,
    ) -> Result<DownloadSummary, CatalogError> {
        self.download_with_progress(firmware, dir, overwrite, |_, _| {})
            .await
    }

    /// Downloads `firmware` into `dir`, reporting each file to `on_item`.
    ///
    /// Existing files are skipped unless `overwrite` is set. A failed file is
    /// counted in the summary and does not stop the batch.
    ///
    /// # Errors
    ///
    /// Fails when `dir` cannot be created.
    pub async fn download_with_progress(
        &self,
        firmware: &[Firmware],
        dir: &Path,
        overwrite: bool,
        on_item: impl FnMut(&Firmware, &DownloadOutcome),
    ) -> Result<DownloadSummary, CatalogError> {
        FirmwareDownloader::new(&self.fetcher, self.settings.max_retries, overwrite)
            .download_all(firmware, dir, on_item)
            .await
            .map_err(|source| CatalogError::Io {
                path: dir.to_path_buf(),
                source,
            })
    }
}
