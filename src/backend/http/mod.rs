
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::{BlobBackend, BlobContent, ResourceHandle};
use crate::config::BlobStoreConfig;
use crate::{GatewayError, Result};

const BACKEND_NAME: &str = "http";
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;
const MAX_RETRY_ATTEMPTS: u32 = 10;

/// Blob store reached over HTTP(S).
///
/// `http://` and `https://` URLs are fetched as stored. `gs://bucket/object`
/// URLs are rewritten onto the configured public endpoint
/// (`{endpoint}/bucket/object`).
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    agent: ureq::Agent,
    endpoint: Url,
    retry_attempts: u32,
    retry_backoff: Duration,
    max_download_bytes: u64,
}

impl HttpBlobStore {
    #[inline]
    pub fn new(config: &BlobStoreConfig) -> Result<Self> {
        let mut endpoint = config.endpoint_url()?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        Ok(Self {
            agent: build_agent(Duration::from_secs(config.timeout_seconds)),
            endpoint,
            retry_attempts: config.retry_attempts.clamp(1, MAX_RETRY_ATTEMPTS),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            max_download_bytes: config.max_download_bytes,
        })
    }

    fn resolve_location(&self, url: &str) -> Result<Url> {
        let failed = |reason: String| GatewayError::ResourceResolutionFailed {
            url: url.to_string(),
            reason,
        };

        let parsed = Url::parse(url).map_err(|e| failed(format!("malformed URL: {}", e)))?;

        match parsed.scheme() {
            "http" | "https" => Ok(parsed),
            "gs" => {
                let bucket = parsed
                    .host_str()
                    .filter(|b| !b.is_empty())
                    .ok_or_else(|| failed("gs:// URL has no bucket".to_string()))?;
                let object = parsed.path().trim_start_matches('/');
                if object.is_empty() {
                    return Err(failed("gs:// URL has no object path".to_string()));
                }

                self.endpoint
                    .join(&format!("{}/{}", bucket, object))
                    .map_err(|e| failed(format!("cannot map onto endpoint: {}", e)))
            }
            other => Err(failed(format!("unsupported URL scheme '{}'", other))),
        }
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

#[async_trait]
impl BlobBackend for HttpBlobStore {
    #[inline]
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    #[inline]
    async fn resolve(&self, url: &str) -> Result<ResourceHandle> {
        let location = self.resolve_location(url)?;
        debug!("Resolved {} to {}", url, location);

        Ok(ResourceHandle {
            source: url.to_string(),
            location,
        })
    }

    #[inline]
    async fn fetch(&self, handle: &ResourceHandle) -> Result<BlobContent> {
        let store = self.clone();
        let handle = handle.clone();

        // ureq is blocking; keep it off the async workers
        tokio::task::spawn_blocking(move || store.download_with_retry(&handle))
            .await
            .map_err(|e| GatewayError::Other(anyhow::anyhow!("Blob download task failed: {}", e)))?
    }
}

impl HttpBlobStore {
    fn download_with_retry(&self, handle: &ResourceHandle) -> Result<BlobContent> {
        let url = handle.location.as_str();
        let mut last_error = String::new();

        for attempt in 1..=self.retry_attempts {
            debug!(
                "Blob download attempt {}/{} for {}",
                attempt, self.retry_attempts, url
            );

            match self.download(handle) {
                Ok(content) => {
                    debug!("Downloaded {} bytes from {}", content.len(), url);
                    return Ok(content);
                }
                Err(ureq::Error::StatusCode(status)) if status >= 500 || status == 429 => {
                    warn!(
                        "Server error (status {}) fetching {}, attempt {}/{}",
                        status, url, attempt, self.retry_attempts
                    );
                    last_error = format!("HTTP {}", status);
                }
                Err(ureq::Error::StatusCode(status)) => {
                    warn!("Blob {} rejected with status {}, not retrying", url, status);
                    return Err(GatewayError::ResourceResolutionFailed {
                        url: handle.source.clone(),
                        reason: format!("HTTP {}", status),
                    });
                }
                Err(error) if is_transient(&error) => {
                    warn!(
                        "Transport error fetching {}: {}, attempt {}/{}",
                        url, error, attempt, self.retry_attempts
                    );
                    last_error = error.to_string();
                }
                Err(error) => {
                    warn!("Non-retryable error fetching {}: {}", url, error);
                    return Err(GatewayError::ResourceResolutionFailed {
                        url: handle.source.clone(),
                        reason: error.to_string(),
                    });
                }
            }

            if attempt < self.retry_attempts {
                let delay = backoff_delay(self.retry_backoff, attempt);
                debug!("Waiting {:?} before retry", delay);
                std::thread::sleep(delay);
            }
        }

        Err(GatewayError::BackendUnavailable {
            backend: BACKEND_NAME,
            message: format!(
                "{} failed after {} attempts: {}",
                url, self.retry_attempts, last_error
            ),
        })
    }

    /// One request including the body read, so a connection dropped
    /// mid-body is retried like any other transport failure
    fn download(&self, handle: &ResourceHandle) -> std::result::Result<BlobContent, ureq::Error> {
        let mut response = self.agent.get(handle.location.as_str()).call()?;

        let content_type = response
            .headers()
            .get(ureq::http::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let data = response
            .body_mut()
            .with_config()
            .limit(self.max_download_bytes)
            .read_to_vec()?;

        Ok(BlobContent {
            location: handle.location.clone(),
            content_type,
            data,
        })
    }
}

/// Errors worth another attempt: the server or the network may recover
fn is_transient(error: &ureq::Error) -> bool {
    matches!(
        error,
        ureq::Error::ConnectionFailed
            | ureq::Error::HostNotFound
            | ureq::Error::Timeout(_)
            | ureq::Error::Io(_)
    )
}

/// Delay before the retry following `attempt` (1-based), saturating
/// instead of overflowing
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(EXPONENTIAL_BACKOFF_BASE.saturating_pow(attempt.saturating_sub(1)))
}
