//! E-Tube firmware catalog library
//!
//! This library finds the firmware files Shimano publishes for E-Tube
//! devices. The firmware API only answers "which firmware ships with app
//! version X", so the catalog bisects the app-version space to find every
//! distinct answer, reconciles the result with the model/version tables on
//! the marketing pages, and drops records whose download links are dead.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`version`] - Bounded version triplets and their integer encoding
//! - [`fetch`] - HTTP transport, retry with backoff, per-run memoization
//! - [`discovery`] - Bisection search over the firmware API
//! - [`scrape`] - Model/version tables from the marketing pages
//! - [`reconcile`] - Model matching and synthesis of missing records
//! - [`verify`] - Download link liveness checks
//! - [`download`] - Writing firmware files to disk
//! - [`catalog`] - The operations exposed to the command line

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod discovery;
pub mod download;
pub mod fetch;
pub mod firmware;
pub mod reconcile;
pub mod scrape;
pub mod verify;
pub mod version;

mod utils;

// Re-export commonly used types
pub use catalog::{CatalogError, CatalogSettings, FirmwareCatalog};
pub use discovery::{DiscoveryError, FirmwareDiscoverer, SearchRange};
pub use download::{DownloadOutcome, DownloadSummary};
pub use fetch::{
    BackoffPolicy, FailureType, FetchCache, FetchError, HttpTimeouts, ResilientFetcher,
    RetryBudget, classify_error,
};
pub use firmware::{FilenameError, FilenamePattern, Firmware};
pub use reconcile::{MatchKind, ModelMatch, Reconciliation, SourceReconciler};
pub use scrape::{ScrapeError, ScrapedModels, reduce_model_alias};
pub use verify::LinkVerifier;
pub use version::{Version, VersionError};
