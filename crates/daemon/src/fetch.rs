//! Remote sources for URL imports.
//!
//! A [`RemoteSource`] resolves a user-supplied URL into the media (and
//! optional thumbnail) to download; the [`Downloader`] probes sizes and
//! streams bodies to disk under the configured ceiling.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_LENGTH};
use reqwest::{Client, Url};
use std::io;
use std::path::Path;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Errors raised while resolving or downloading remote media
#[derive(Debug, Error)]
pub enum FetchError {
    /// URL is unparseable or uses an unsupported scheme
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// HTTP client error
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("Unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    /// Body grew past the ceiling while streaming
    #[error("Download of {url} exceeded {limit} bytes")]
    TooLarge { url: String, limit: u64 },

    /// IO error writing the download
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Media resolved from a remote URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteVideo {
    pub video_url: String,
    pub thumbnail_url: Option<String>,
    pub title: String,
    pub description: String,
}

/// Resolves an import URL into downloadable media
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<RemoteVideo, FetchError>;
}

fn parse_http_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(FetchError::InvalidUrl(url.to_string())),
    }
}

/// Treats the import URL as a direct link to a media file
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectLink;

#[async_trait]
impl RemoteSource for DirectLink {
    async fn resolve(&self, url: &str) -> Result<RemoteVideo, FetchError> {
        let parsed = parse_http_url(url)?;
        let title = parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(str::to_string)
            .or_else(|| parsed.host_str().map(str::to_string))
            .unwrap_or_default();

        Ok(RemoteVideo {
            video_url: parsed.to_string(),
            thumbnail_url: None,
            title,
            description: String::new(),
        })
    }
}

/// Read a declared `Content-Length`, if present and well-formed.
pub fn parse_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// HTTP downloader bounded by a byte ceiling
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    limit: u64,
}

impl Downloader {
    pub fn new(limit: u64) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(concat!("reel/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, limit })
    }

    /// Ask the server for the size of `url` without fetching the body.
    ///
    /// # Returns
    /// * `Ok(Some(n))` - Declared length
    /// * `Ok(None)` - Server did not declare a length
    pub async fn probe_length(&self, url: &str) -> Result<Option<u64>, FetchError> {
        let parsed = parse_http_url(url)?;
        let response = self.client.head(parsed).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        let length = parse_content_length(response.headers());
        debug!(url, ?length, "Probed remote length");
        Ok(length)
    }

    /// Stream `url` into the file at `dest`, truncating it first.
    ///
    /// Aborts with `TooLarge` as soon as the running total passes the
    /// ceiling or `expected` (the probed length), whichever is smaller.
    ///
    /// # Returns
    /// Number of bytes written
    pub async fn download_to(
        &self,
        url: &str,
        dest: &Path,
        expected: Option<u64>,
    ) -> Result<u64, FetchError> {
        let parsed = parse_http_url(url)?;
        let limit = expected.map_or(self.limit, |n| n.min(self.limit));

        let mut response = self.client.get(parsed).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(dest)
            .await?;

        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            written += chunk.len() as u64;
            if written > limit {
                return Err(FetchError::TooLarge {
                    url: url.to_string(),
                    limit,
                });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!(url, bytes = written, "Downloaded remote media");
        Ok(written)
    }
}
