//! Byte-accurate HTTP retrieval for resource materialization.
//!
//! The [`Fetcher`] trait is what the materializer depends on; [`HttpFetcher`]
//! is the production implementation. Every request carries the configured
//! client identifier and referer, is bounded by a timeout, and fails
//! explicitly on a non-2xx status. Transient failures are retried with the
//! configured backoff so one flaky origin does not cost a resource.

use std::future::Future;

use coursepack_shared::{CoursepackError, FetchConfig};
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use tracing::{debug, instrument, warn};

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

/// Maximum response size we accept (512 MB).
const MAX_RESPONSE_SIZE: u64 = 512 * 1024 * 1024;

// ---------------------------------------------------------------------------
// FetchError
// ---------------------------------------------------------------------------

/// Why a single retrieval failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The server answered with a non-2xx status.
    #[error("{url}: HTTP {status}")]
    Status { url: String, status: u16 },

    /// The request did not complete within the configured timeout.
    #[error("{url}: request timed out")]
    Timeout { url: String },

    /// Connection, TLS, or body read failure.
    #[error("{url}: {message}")]
    Transport {
        url: String,
        message: String,
        connect: bool,
    },

    /// The declared body size exceeds [`MAX_RESPONSE_SIZE`].
    #[error("{url}: response too large ({len} bytes)")]
    TooLarge { url: String, len: u64 },
}

impl FetchError {
    /// Returns `true` if retrying might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            Self::Timeout { .. } => true,
            Self::Transport { connect, .. } => *connect,
            Self::TooLarge { .. } => false,
        }
    }

    fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { url: url.to_string() }
        } else {
            Self::Transport {
                url: url.to_string(),
                message: err.to_string(),
                connect: err.is_connect(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Retrieve the full body of a URL.
pub trait Fetcher {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

/// reqwest-backed [`Fetcher`].
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    config: FetchConfig,
}

impl HttpFetcher {
    /// Build a client with the configured identity and timeout.
    pub fn new(config: &FetchConfig) -> coursepack_shared::Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(referer) = &config.referer {
            let value = HeaderValue::from_str(referer).map_err(|e| {
                CoursepackError::config(format!("invalid referer '{referer}': {e}"))
            })?;
            headers.insert(REFERER, value);
        }

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(config.timeout())
            .build()
            .map_err(|e| CoursepackError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// One attempt, no retries.
    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(len) = response.content_length() {
            if len > MAX_RESPONSE_SIZE {
                return Err(FetchError::TooLarge {
                    url: url.to_string(),
                    len,
                });
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        Ok(body.to_vec())
    }
}

impl Fetcher for HttpFetcher {
    #[instrument(skip_all, fields(url = %url))]
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.fetch_once(url).await {
                Ok(body) => {
                    debug!(attempt, bytes = body.len(), "fetched");
                    return Ok(body);
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    let wait = self.config.backoff(attempt);
                    warn!(
                        attempt,
                        max_attempts = attempts,
                        wait_secs = wait.as_secs(),
                        error = %e,
                        "transient fetch failure, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> FetchConfig {
        FetchConfig {
            user_agent: "coursepack-test/1.0".into(),
            referer: Some("https://recursos.example.org/".into()),
            timeout_secs: 5,
            max_attempts: 3,
            retry_backoff_secs: vec![0],
        }
    }

    #[tokio::test]
    async fn fetch_sends_identity_headers() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/docs/a.pdf"))
            .and(header("user-agent", "coursepack-test/1.0"))
            .and(header("referer", "https://recursos.example.org/"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 body".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&test_config()).unwrap();
        let body = fetcher
            .fetch(&format!("{}/docs/a.pdf", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, b"%PDF-1.4 body");
    }

    #[tokio::test]
    async fn not_found_fails_without_retry() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&test_config()).unwrap();
        let err = fetcher
            .fetch(&format!("{}/missing", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn server_error_is_retried() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/flaky.zip"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/flaky.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK\x03\x04".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&test_config()).unwrap();
        let body = fetcher
            .fetch(&format!("{}/flaky.zip", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, b"PK\x03\x04");
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&test_config()).unwrap();
        let err = fetcher
            .fetch(&format!("{}/down", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn slow_origin_times_out() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let config = FetchConfig {
            timeout_secs: 1,
            max_attempts: 1,
            ..test_config()
        };
        let fetcher = HttpFetcher::new(&config).unwrap();
        let err = fetcher
            .fetch(&format!("{}/slow", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }));
    }

    #[test]
    fn invalid_referer_is_a_config_error() {
        let config = FetchConfig {
            referer: Some("bad\nvalue".into()),
            ..test_config()
        };
        let err = HttpFetcher::new(&config).unwrap_err();
        assert!(err.to_string().contains("invalid referer"));
    }
}
