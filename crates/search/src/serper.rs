use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use pipeline::{
    CollaboratorError, ConfigurationError, ImageCandidate, ImageSource, RetryPolicy, SearchHit,
    WebSearch,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_SERPER_ENDPOINT: &str = "https://google.serper.dev";

/// Organic results kept per query.
const MAX_ORGANIC_RESULTS: usize = 5;

/// Image candidates returned per topic.
const MAX_IMAGE_CANDIDATES: usize = 5;

const MAX_ERROR_BODY: usize = 300;

/// Largest image accepted by [`SerperClient::fetch`].
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

/// Serper account and locale settings.
#[derive(Debug, Clone)]
pub struct SerperConfig {
    pub api_key: String,
    /// Country code sent as `gl`.
    pub country: String,
    /// Interface language sent as `hl`.
    pub language: String,
    /// API root; `/search` and `/images` are appended.
    pub endpoint: String,
    pub search_timeout: Duration,
    pub download_timeout: Duration,
    /// Downloads larger than this are abandoned.
    pub max_image_bytes: u64,
}

impl SerperConfig {
    /// Config for `api_key` with Spanish locale and the public endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            country: "es".to_string(),
            language: "es".to_string(),
            endpoint: DEFAULT_SERPER_ENDPOINT.to_string(),
            search_timeout: Duration::from_secs(15),
            download_timeout: Duration::from_secs(30),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }
}

pub struct SerperClient {
    client: reqwest::Client,
    config: SerperConfig,
}

impl SerperClient {
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if the API key is blank or the HTTP
    /// client cannot be built.
    pub fn new(config: SerperConfig) -> Result<Self, ConfigurationError> {
        if config.api_key.trim().is_empty() {
            return Err(ConfigurationError::new("Serper API key must not be empty"));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ConfigurationError::new(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &str,
    ) -> Result<T, CollaboratorError> {
        let url = format!("{}/{path}", self.config.endpoint.trim_end_matches('/'));
        let payload = SerperQuery {
            q: query,
            gl: &self.config.country,
            hl: &self.config.language,
        };
        let response = self
            .client
            .post(&url)
            .timeout(self.config.search_timeout)
            .header("X-API-KEY", &self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error("search", self.config.search_timeout, &url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }
        response.json::<T>().await.map_err(|e| CollaboratorError::Malformed {
            message: format!("Failed to parse Serper response from {url}: {e}"),
        })
    }
}

#[async_trait]
impl WebSearch for SerperClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, CollaboratorError> {
        debug!(query, "Running web search");
        let response: OrganicResponse = self.post("search", query).await?;
        let hits: Vec<SearchHit> = response
            .organic
            .into_iter()
            .filter(|r| !r.link.trim().is_empty())
            .take(MAX_ORGANIC_RESULTS)
            .map(|r| SearchHit {
                title: r.title,
                link: r.link,
                snippet: r.snippet,
            })
            .collect();
        debug!(query, hits = hits.len(), "Web search complete");
        Ok(hits)
    }
}

#[async_trait]
impl ImageSource for SerperClient {
    async fn find_candidates(&self, topic: &str) -> Result<Vec<ImageCandidate>, CollaboratorError> {
        let query = format!("{} high quality", topic.trim());
        let response: ImageResponse = self.post("images", &query).await?;
        let candidates: Vec<ImageCandidate> = response
            .images
            .into_iter()
            .filter_map(|img| {
                let url = img.image_url?.trim().to_string();
                (!url.is_empty()).then_some(ImageCandidate {
                    url,
                    title: img.title.filter(|t| !t.trim().is_empty()),
                })
            })
            .take(MAX_IMAGE_CANDIDATES)
            .collect();
        debug!(topic, candidates = candidates.len(), "Image search complete");
        Ok(candidates)
    }

    async fn fetch(
        &self,
        candidate: &ImageCandidate,
        dest_stem: &Path,
    ) -> Result<PathBuf, CollaboratorError> {
        let timeout = self.config.download_timeout;
        let mut response = self
            .client
            .get(&candidate.url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error("image_download", timeout, &candidate.url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase);
        if let Some(ct) = &content_type {
            if ct.starts_with("text/") || ct.contains("json") {
                return Err(CollaboratorError::Malformed {
                    message: format!("{} returned {ct}, not an image", candidate.url),
                });
            }
        }
        let limit = self.config.max_image_bytes;
        if let Some(length) = response.content_length() {
            if length > limit {
                return Err(oversized(&candidate.url, limit));
            }
        }
        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| transport_error("image_download", timeout, &candidate.url, e))?
        {
            if (bytes.len() + chunk.len()) as u64 > limit {
                return Err(oversized(&candidate.url, limit));
            }
            bytes.extend_from_slice(&chunk);
        }
        if bytes.is_empty() {
            return Err(CollaboratorError::EmptyResponse);
        }

        let extension = image_extension(content_type.as_deref(), &candidate.url);
        let path = dest_stem.with_extension(extension);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CollaboratorError::io("Failed to create image directory", &e))?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| CollaboratorError::io("Failed to write image", &e))?;

        info!(url = %candidate.url, path = %path.display(), bytes = bytes.len(), "Image downloaded");
        Ok(path)
    }
}

fn oversized(url: &str, limit: u64) -> CollaboratorError {
    CollaboratorError::Malformed {
        message: format!("{url} exceeds the {limit} byte image limit"),
    }
}

/// Picks a file extension: content type first, then the URL path, then `jpg`.
fn image_extension(content_type: Option<&str>, url: &str) -> &'static str {
    if let Some(ct) = content_type {
        if ct.contains("image/jpeg") {
            return "jpg";
        }
        if ct.contains("image/png") {
            return "png";
        }
        if ct.contains("image/gif") {
            return "gif";
        }
    }
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let last_segment = path.rsplit('/').next().unwrap_or_default();
    match last_segment
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "png",
        Some("gif") => "gif",
        Some("jpeg") => "jpeg",
        _ => "jpg",
    }
}

fn transport_error(
    operation: &str,
    timeout: Duration,
    url: &str,
    err: reqwest::Error,
) -> CollaboratorError {
    if err.is_timeout() {
        CollaboratorError::Timeout {
            operation: operation.to_string(),
            after: timeout,
        }
    } else {
        CollaboratorError::Transport {
            message: format!("Request to {url} failed: {err}"),
        }
    }
}

fn classify_status(status: u16, body: &str) -> CollaboratorError {
    let retry = match status {
        408 | 429 | 500..=599 => RetryPolicy::Retryable { after: None },
        _ => RetryPolicy::NonRetryable,
    };
    CollaboratorError::Provider {
        status,
        message: body.trim().chars().take(MAX_ERROR_BODY).collect(),
        retry,
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SerperQuery<'a> {
    q: &'a str,
    gl: &'a str,
    hl: &'a str,
}

#[derive(Debug, Deserialize)]
struct OrganicResponse {
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    images: Vec<ImageResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageResult {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
}
