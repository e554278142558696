//! Liveness checks for firmware download links.

use tracing::{info, instrument, warn};

use crate::fetch::{
    FailureType, FetchCache, FetchError, ResilientFetcher, RetryBudget, classify_error,
};
use crate::firmware::Firmware;

/// Drops firmware whose download URL answers with a fatal HTTP status.
///
/// Checks use an unlimited retry budget, so throttling never turns into a
/// dropped record. Errors other than an HTTP status (a refused connection,
/// for instance) keep the record.
#[derive(Debug, Clone)]
pub struct LinkVerifier<'a> {
    fetcher: &'a ResilientFetcher,
    budget: RetryBudget,
}

impl<'a> LinkVerifier<'a> {
    #[must_use]
    pub fn new(fetcher: &'a ResilientFetcher) -> Self {
        Self {
            fetcher,
            budget: RetryBudget::Unlimited,
        }
    }

    /// Overrides the retry budget used for each check.
    #[must_use]
    pub fn with_budget(mut self, budget: RetryBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Checks every record in filename order and returns the live ones.
    #[instrument(skip_all, fields(candidates = tracing::field::Empty))]
    pub async fn verify(
        &self,
        cache: &mut FetchCache,
        firmware: impl IntoIterator<Item = Firmware>,
    ) -> Vec<Firmware> {
        let mut candidates: Vec<Firmware> = firmware.into_iter().collect();
        candidates.sort_by(|a, b| a.filename.cmp(&b.filename));
        tracing::Span::current().record("candidates", candidates.len());

        let mut live = Vec::with_capacity(candidates.len());
        for fw in candidates {
            match self.fetcher.head(cache, &fw.download_url, self.budget).await {
                Ok(()) => live.push(fw),
                Err(error @ FetchError::HttpStatus { status, .. })
                    if classify_error(&error) == FailureType::Fatal =>
                {
                    warn!(filename = %fw.filename, status, "ignoring firmware with dead link");
                }
                Err(error) => {
                    warn!(filename = %fw.filename, error = %error, "could not verify link, keeping firmware");
                    live.push(fw);
                }
            }
        }
        info!(live = live.len(), "verified firmware links");
        live
    }
}
