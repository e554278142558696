//! HTTP transport: one request in, body bytes or a classified error out.
//!
//! [`ReqwestTransport`] is the production implementation. It sends a fixed
//! browser header set on every request; the firmware CDN blocks obvious
//! non-browser clients.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, SERVER};
use reqwest::{Client, Response};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};

use super::FetchError;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default total request timeout (2 minutes).
pub const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Browser impersonation headers sent with every request.
const IMPERSONATE_HEADERS: &[(&str, &str)] = &[
    (
        "user-agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
         Chrome/135.0.0.0 Safari/537.36",
    ),
    (
        "accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,\
         image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
    ),
    (
        "accept-language",
        "nb-NO,nb;q=0.9,no;q=0.8,nn;q=0.7,en-US;q=0.6,en;q=0.5",
    ),
    ("cache-control", "max-age=0"),
    ("priority", "u=0, i"),
    ("sec-ch-ua", r#""Chromium";v="135", "Not-A.Brand";v="8""#),
    ("sec-ch-ua-mobile", "?1"),
    ("sec-ch-ua-platform", r#""Android""#),
    ("sec-fetch-dest", "document"),
    ("sec-fetch-mode", "navigate"),
    ("sec-fetch-site", "none"),
    ("sec-fetch-user", "?1"),
    ("upgrade-insecure-requests", "1"),
];

/// HTTP methods the crate issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestMethod {
    Get,
    Head,
}

impl RequestMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<RequestMethod> for reqwest::Method {
    fn from(method: RequestMethod) -> Self {
        match method {
            RequestMethod::Get => reqwest::Method::GET,
            RequestMethod::Head => reqwest::Method::HEAD,
        }
    }
}

/// Sends a single request without retrying.
///
/// Implementations return the response body on a 2xx status and a
/// [`FetchError`] otherwise; retry decisions are made by the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, method: RequestMethod, url: &str) -> Result<Vec<u8>, FetchError>;

    /// Writes the `GET` body of `url` to `path`, replacing any existing file,
    /// and returns the number of bytes written.
    ///
    /// The default buffers the body through [`send`](Self::send);
    /// implementations that can stream should override it.
    async fn download(&self, url: &str, path: &Path) -> Result<u64, FetchError> {
        let body = self.send(RequestMethod::Get, url).await?;
        tokio::fs::write(path, &body)
            .await
            .map_err(|source| FetchError::io(url, path, source))?;
        Ok(body.len() as u64)
    }
}

/// Per-request timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            request: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }
}

/// [`Transport`] backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Builds the client with impersonation headers and the given timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::ClientBuild`] if the TLS backend cannot be
    /// initialized.
    pub fn new(timeouts: HttpTimeouts) -> Result<Self, FetchError> {
        let client = Client::builder()
            .default_headers(impersonation_headers())
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.request)
            .gzip(true)
            .build()
            .map_err(|source| FetchError::ClientBuild { source })?;
        Ok(Self { client })
    }
}

impl ReqwestTransport {
    /// Sends the request and checks the status, leaving the body unread.
    async fn start(&self, method: RequestMethod, url: &str) -> Result<Response, FetchError> {
        let response = self
            .client
            .request(method.into(), url)
            .send()
            .await
            .map_err(|error| map_reqwest_error(method, url, error))?;

        let status = response.status();
        if !status.is_success() {
            let server = response
                .headers()
                .get(SERVER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            debug!(status = status.as_u16(), server = ?server, "request failed");
            return Err(FetchError::http_status(
                method,
                url,
                status.as_u16(),
                server,
            ));
        }
        Ok(response)
    }
}

fn map_reqwest_error(method: RequestMethod, url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::timeout(method, url)
    } else {
        FetchError::network(method, url, error)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(level = "debug", skip(self))]
    async fn send(&self, method: RequestMethod, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.start(method, url).await?;
        let body = response
            .bytes()
            .await
            .map_err(|error| map_reqwest_error(method, url, error))?;
        debug!(bytes = body.len(), "request succeeded");
        Ok(body.to_vec())
    }

    #[instrument(level = "debug", skip(self), fields(path = %path.display()))]
    async fn download(&self, url: &str, path: &Path) -> Result<u64, FetchError> {
        let method = RequestMethod::Get;
        let response = self.start(method, url).await?;

        let file = File::create(path)
            .await
            .map_err(|source| FetchError::io(url, path, source))?;
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|error| map_reqwest_error(method, url, error))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|source| FetchError::io(url, path, source))?;
            written += chunk.len() as u64;
        }
        writer
            .flush()
            .await
            .map_err(|source| FetchError::io(url, path, source))?;
        debug!(bytes = written, "download streamed to disk");
        Ok(written)
    }
}

/// The fixed browser header set as a `HeaderMap`.
#[must_use]
pub fn impersonation_headers() -> HeaderMap {
    IMPERSONATE_HEADERS
        .iter()
        .map(|&(name, value)| {
            (
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            )
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn test_impersonation_headers_complete() {
        let headers = impersonation_headers();
        assert_eq!(headers.len(), IMPERSONATE_HEADERS.len());
        assert!(
            headers["user-agent"]
                .to_str()
                .unwrap()
                .starts_with("Mozilla/5.0")
        );
        assert_eq!(headers["sec-fetch-mode"], "navigate");
    }

    #[tokio::test]
    async fn test_send_returns_body_and_sends_browser_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/etube/firmware/4.2.0"))
            .and(header("sec-fetch-dest", "document"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(HttpTimeouts::default()).unwrap();
        let url = format!("{}/etube/firmware/4.2.0", server.uri());
        let body = transport.send(RequestMethod::Get, &url).await.unwrap();
        assert_eq!(body, b"[]");
    }

    #[tokio::test]
    async fn test_download_streams_body_to_file() {
        let server = MockServer::start().await;
        let payload: Vec<u8> = (0..=255u8).cycle().take(256 * 1024).collect();
        Mock::given(method("GET"))
            .and(path("/files/FW-1.0.0.bin"))
            .and(header("sec-fetch-dest", "document"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("FW-1.0.0.bin");
        std::fs::write(&target, b"stale contents").unwrap();

        let transport = ReqwestTransport::new(HttpTimeouts::default()).unwrap();
        let url = format!("{}/files/FW-1.0.0.bin", server.uri());
        let written = transport.download(&url, &target).await.unwrap();

        assert_eq!(written, payload.len() as u64);
        assert_eq!(std::fs::read(&target).unwrap(), payload);
    }

    #[tokio::test]
    async fn test_download_status_error_leaves_no_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("missing.bin");
        let transport = ReqwestTransport::new(HttpTimeouts::default()).unwrap();
        let err = transport
            .download(&format!("{}/missing.bin", server.uri()), &target)
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(404));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_send_reports_status_and_server_header() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/blocked.bin"))
            .respond_with(ResponseTemplate::new(403).insert_header("Server", "AkamaiGHost"))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(HttpTimeouts::default()).unwrap();
        let url = format!("{}/blocked.bin", server.uri());
        let err = transport.send(RequestMethod::Head, &url).await.unwrap_err();
        match err {
            FetchError::HttpStatus { status, server, .. } => {
                assert_eq!(status, 403);
                assert_eq!(server.as_deref(), Some("AkamaiGHost"));
            }
            other => panic!("expected HttpStatus, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_maps_slow_response_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(HttpTimeouts {
            connect: Duration::from_secs(1),
            request: Duration::from_millis(200),
        })
        .unwrap();
        let err = transport
            .send(RequestMethod::Get, &server.uri())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }), "got {err:?}");
    }
}
