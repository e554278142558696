//! Error types for the fetch layer.
//!
//! Every variant carries the request method and URL so a failure surfacing
//! after a long retry loop still says which request gave up.

use thiserror::Error;

use super::RequestMethod;

/// Errors that can occur while fetching a URL.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Request timed out before a response arrived.
    #[error("timeout on {method} {url}")]
    Timeout {
        /// The request method.
        method: RequestMethod,
        /// The URL that timed out.
        url: String,
    },

    /// Non-success HTTP status.
    #[error("HTTP {status} on {method} {url}")]
    HttpStatus {
        /// The request method.
        method: RequestMethod,
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The `Server` response header, used to spot CDN bot mitigation.
        server: Option<String>,
    },

    /// Any other transport failure (DNS, connection refused, TLS, body read).
    #[error("network error on {method} {url}: {source}")]
    Network {
        /// The request method.
        method: RequestMethod,
        /// The URL that failed.
        url: String,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// Writing a streamed body to disk failed.
    #[error("failed to write {url} to {}: {source}", path.display())]
    Io {
        /// The URL being downloaded.
        url: String,
        /// The file being written.
        path: std::path::PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    /// Creates a timeout error.
    pub fn timeout(method: RequestMethod, url: impl Into<String>) -> Self {
        Self::Timeout {
            method,
            url: url.into(),
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(
        method: RequestMethod,
        url: impl Into<String>,
        status: u16,
        server: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            method,
            url: url.into(),
            status,
            server,
        }
    }

    /// Creates a network error from a reqwest error.
    pub fn network(method: RequestMethod, url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            method,
            url: url.into(),
            source,
        }
    }

    /// Creates a disk write error for a streamed download.
    pub fn io(url: impl Into<String>, path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            url: url.into(),
            path: path.to_path_buf(),
            source,
        }
    }

    /// HTTP status code, when the failure is an HTTP status.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
