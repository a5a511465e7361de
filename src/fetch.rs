// Playlist transport. A trait seam so tests can script sources without a
// network, with a reqwest-backed default for production use.

use crate::error::RecorderError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Fetches raw playlist text for the synchronizer.
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    async fn fetch_text(&self, url: &Url) -> Result<String, RecorderError>;
}

/// HTTP playlist fetcher with a hard per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpManifestFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpManifestFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl ManifestFetcher for HttpManifestFetcher {
    async fn fetch_text(&self, url: &Url) -> Result<String, RecorderError> {
        debug!(url = %url, "Fetching playlist");
        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify(e, url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RecorderError::HttpStatus {
                status,
                url: url.to_string(),
            });
        }

        let body = response.bytes().await.map_err(|e| classify(e, url))?;
        String::from_utf8(body.to_vec())
            .map_err(|_| RecorderError::playlist(format!("playlist at {url} is not valid UTF-8")))
    }
}

fn classify(err: reqwest::Error, url: &Url) -> RecorderError {
    if err.is_timeout() {
        RecorderError::Timeout {
            url: url.to_string(),
        }
    } else {
        err.into()
    }
}
