use super::{FetchRequest, ResponseMeta, Transport, TransportSink};
use crate::cache::ResponseCache;
use crate::error::{Result, TransportError, XsltError};
use async_trait::async_trait;
use reqwest::{Client, header};
use std::sync::Arc;

/// Maximum allowed local file size in bytes (10MB).
const MAX_FILE_SIZE: u64 = 10_000_000;

/// Local files above this size are loaded with a warning (1MB).
const LARGE_FILE_THRESHOLD: u64 = 1_000_000;

/// Default user agent sent with HTTP requests.
pub const DEFAULT_USER_AGENT: &str = concat!("xslt-assembler/", env!("CARGO_PKG_VERSION"));

/// Transport for `http://`, `https://` and `file://` URLs.
///
/// HTTP requests go through a shared `reqwest` client; local files are read
/// with `tokio::fs`. Successful responses for requests with the cache flag
/// set are stored in a [`ResponseCache`], so each distinct URL is fetched at
/// most once per transport.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use xslt_core::transport::{HttpTransport, Transport};
///
/// # fn example() -> xslt_core::error::Result<()> {
/// let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new("my-tool/1.0")?);
/// # Ok(())
/// # }
/// ```
pub struct HttpTransport {
    client: Client,
    cache: Arc<ResponseCache>,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> Result<Self> {
        Self::with_cache(user_agent, Arc::new(ResponseCache::new()))
    }

    /// Creates a transport that shares an existing response cache.
    pub fn with_cache(user_agent: &str, cache: Arc<ResponseCache>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| XsltError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, cache })
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    async fn fetch_http(&self, request: &FetchRequest, sink: &TransportSink) {
        let url = request.url.as_str();
        tracing::debug!(url, method = %request.method, "fetching");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let exchange = async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let content_type = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            sink.headers(ResponseMeta {
                status,
                content_type,
            });
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        match tokio::time::timeout(request.timeout, exchange).await {
            Err(_) => {
                tracing::debug!(url, timeout_ms = request.timeout.as_millis() as u64, "request timed out");
                sink.timeout();
            }
            Ok(Err(e)) => {
                tracing::warn!(url, error = %e, "request failed");
                sink.failed(TransportError::network(url, e));
            }
            Ok(Ok((status, body))) => {
                if request.cache && (200..300).contains(&status) {
                    self.cache.insert(url, &body);
                }
                sink.complete(status, body);
            }
        }
    }

    async fn fetch_file(&self, request: &FetchRequest, sink: &TransportSink) {
        let url = request.url.as_str();
        let Ok(path) = request.url.to_file_path() else {
            sink.failed(TransportError::network(url, "not a local file path"));
            return;
        };

        tracing::debug!(path = %path.display(), "reading from disk");

        let read = async {
            let metadata = tokio::fs::metadata(&path).await?;
            let size = metadata.len();
            if size > MAX_FILE_SIZE {
                tracing::error!(path = %path.display(), size, limit = MAX_FILE_SIZE, "file exceeds maximum size");
                return Err(std::io::Error::other(format!(
                    "file too large: {} bytes (max: {} bytes)",
                    size, MAX_FILE_SIZE
                )));
            }
            if size > LARGE_FILE_THRESHOLD {
                tracing::warn!(path = %path.display(), size, "large file");
            }
            tokio::fs::read_to_string(&path).await
        };

        match tokio::time::timeout(request.timeout, read).await {
            Err(_) => sink.timeout(),
            Ok(Err(e)) => {
                match e.kind() {
                    std::io::ErrorKind::NotFound => {
                        tracing::debug!(path = %path.display(), "file not found");
                    }
                    std::io::ErrorKind::PermissionDenied => {
                        tracing::warn!(path = %path.display(), "permission denied");
                    }
                    _ => {
                        tracing::error!(path = %path.display(), error = %e, "read failed");
                    }
                }
                sink.failed(TransportError::network(url, e));
            }
            Ok(Ok(body)) => {
                if request.cache {
                    self.cache.insert(url, &body);
                }
                sink.headers(ResponseMeta {
                    status: 200,
                    content_type: None,
                });
                sink.complete(200, body);
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, request: FetchRequest, sink: TransportSink) {
        let url = request.url.as_str();
        if request.cache
            && let Some(body) = self.cache.get(url)
        {
            tracing::debug!(url, "serving from response cache");
            sink.headers(ResponseMeta {
                status: 200,
                content_type: None,
            });
            sink.complete(200, body.to_string());
            return;
        }

        match request.url.scheme() {
            "http" | "https" => self.fetch_http(&request, &sink).await,
            "file" => self.fetch_file(&request, &sink).await,
            other => sink.failed(TransportError::UnsupportedScheme(other.to_string())),
        }
    }
}
