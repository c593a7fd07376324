//! HTTP access with spoofed headers and jittered pacing.

mod retry;
mod user_agent;

pub use retry::{Attempt, DownloadBatch, RetryPolicy, RetryingFetchProxy};
pub use user_agent::{alternate_user_agent, random_user_agent, resolve_user_agent};

use std::time::Duration;

use reqwest::Client;

use crate::error::FetchError;

/// Pseudo-random duration in `[min_ms, max_ms)`, used to pace consecutive
/// requests so they do not land on a metronome.
pub fn jitter_between(min_ms: u64, max_ms: u64) -> Duration {
    use std::time::SystemTime;
    let span = max_ms.saturating_sub(min_ms).max(1);
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    Duration::from_millis(min_ms + nanos % span)
}

/// HTTP client that makes requests look like they come from the board page
/// itself: browser user agent, referer, and an XHR marker for feed calls.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    referer: Option<String>,
    min_delay_ms: u64,
    max_delay_ms: u64,
}

impl HttpClient {
    pub fn new(timeout: Duration, user_agent: Option<&str>) -> Self {
        let client = Client::builder()
            .user_agent(resolve_user_agent(user_agent))
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .cookie_store(true)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            referer: None,
            min_delay_ms: 300,
            max_delay_ms: 800,
        }
    }

    /// Set the Referer header for requests.
    pub fn with_referer(mut self, referer: String) -> Self {
        self.referer = Some(referer);
        self
    }

    /// Override the jittered inter-request delay bounds.
    pub fn with_delay_bounds(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.min_delay_ms = min_ms;
        self.max_delay_ms = max_ms;
        self
    }

    /// GET a JSON endpoint, optionally marked as an in-page XHR.
    pub async fn get_json(&self, url: &str, xhr: bool) -> Result<serde_json::Value, FetchError> {
        let mut request = self.client.get(url).header("Accept", "application/json");
        if let Some(ref referer) = self.referer {
            request = request.header("Referer", referer.clone());
        }
        if xhr {
            request = request.header("X-Requested-With", "XMLHttpRequest");
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = response
            .json()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        self.pause().await;
        Ok(body)
    }

    /// Jittered delay after each request.
    async fn pause(&self) {
        tokio::time::sleep(jitter_between(self.min_delay_ms, self.max_delay_ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_within_bounds() {
        for _ in 0..50 {
            let d = jitter_between(300, 800);
            assert!(d >= Duration::from_millis(300));
            assert!(d < Duration::from_millis(800));
        }
    }

    #[test]
    fn test_jitter_degenerate_range() {
        let d = jitter_between(500, 500);
        assert!(d >= Duration::from_millis(500));
        assert!(d < Duration::from_millis(501));
    }
}
