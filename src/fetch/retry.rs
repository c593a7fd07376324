//! Retrying fetch proxy for document and image downloads.
//!
//! Callers behind cross-origin restrictions cannot reach the CDN directly, so
//! downloads are proxied through here. Blocked responses (403/429) get one
//! user-agent swap with a short jittered delay; everything else backs off
//! exponentially. A failed item is reported in the batch result and never
//! aborts the batch.

use std::future::Future;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, warn};

use super::{alternate_user_agent, jitter_between, random_user_agent};
use crate::error::FetchError;
use crate::models::{ImageSize, Pin};

/// One retry attempt, carrying the user agent the operation should present.
#[derive(Debug, Clone, Copy)]
pub struct Attempt {
    pub number: u32,
    pub user_agent: &'static str,
}

/// Retry schedule shared by document and image fetches.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(retry.saturating_sub(1))
    }

    /// Short jittered pause used before the user-agent-swap retry.
    fn blocked_delay(&self) -> Duration {
        jitter_between(200, 450)
    }

    /// Run `op` under this policy. The operation receives the attempt number
    /// and the user agent to present; 403/429 swaps the agent once.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut user_agent = random_user_agent();
        let mut swapped = false;

        for number in 0..=self.max_retries {
            let attempt = Attempt { number, user_agent };
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if number == self.max_retries => return Err(err),
                Err(err) => {
                    if err.is_blocked() && !swapped {
                        user_agent = alternate_user_agent(user_agent);
                        swapped = true;
                        debug!(
                            "attempt {} blocked ({err}); retrying with alternate user agent",
                            attempt.number
                        );
                        tokio::time::sleep(self.blocked_delay()).await;
                    } else {
                        let backoff = self.backoff_for(number + 1);
                        debug!("attempt {} failed ({err}); backing off {backoff:?}", attempt.number);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        unreachable!("retry loop always returns")
    }
}

/// Result of a concurrent image batch. Order-independent; failures are counts.
#[derive(Debug, Default)]
pub struct DownloadBatch {
    /// Pin id -> raw bytes for each successful download.
    pub images: Vec<(String, Vec<u8>)>,
    pub failed: usize,
}

/// Fetches documents and images with spoofed headers and retries.
pub struct RetryingFetchProxy {
    client: reqwest::Client,
    referer: Option<String>,
    policy: RetryPolicy,
}

impl RetryingFetchProxy {
    pub fn new(timeout: Duration) -> Self {
        // No default user agent on the client: every attempt sets its own.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .cookie_store(true)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            referer: None,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_referer(mut self, referer: String) -> Self {
        self.referer = Some(referer);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn get(&self, url: &str, user_agent: &str) -> Result<reqwest::Response, FetchError> {
        let mut request = self.client.get(url).header("User-Agent", user_agent);
        if let Some(ref referer) = self.referer {
            request = request.header("Referer", referer.clone());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(response)
    }

    /// Fetch a document as text.
    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        self.policy
            .run(|attempt| async move {
                let response = self.get(url, attempt.user_agent).await?;
                response
                    .text()
                    .await
                    .map_err(|e| FetchError::Transport(e.to_string()))
            })
            .await
    }

    /// Fetch raw bytes (image downloads).
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.policy
            .run(|attempt| async move {
                let response = self.get(url, attempt.user_agent).await?;
                response
                    .bytes()
                    .await
                    .map(|b| b.to_vec())
                    .map_err(|e| FetchError::Transport(e.to_string()))
            })
            .await
    }

    /// Download one size variant for every pin, concurrently. One task per
    /// item; results land in an order-independent accumulator.
    pub async fn download_images(&self, pins: &[Pin], size: ImageSize) -> DownloadBatch {
        run_batch(pins, size, |url| async move { self.fetch_bytes(&url).await }).await
    }
}

/// Batch driver behind a fetch seam. A pin without any usable URL counts as
/// failed up front; a fetch failure counts without aborting the batch.
async fn run_batch<F, Fut>(pins: &[Pin], size: ImageSize, fetch: F) -> DownloadBatch
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<Vec<u8>, FetchError>>,
{
    let mut tasks = FuturesUnordered::new();
    let mut batch = DownloadBatch::default();

    for pin in pins {
        let url = match pin.images.get(&size).or_else(|| pin.images.values().next()) {
            Some(url) => url.clone(),
            None => {
                batch.failed += 1;
                continue;
            }
        };
        let id = pin.id.clone();
        let fut = fetch(url);
        tasks.push(async move { (id, fut.await) });
    }

    while let Some((id, result)) = tasks.next().await {
        match result {
            Ok(bytes) => batch.images.push((id, bytes)),
            Err(err) => {
                warn!("download failed for {id}: {err}");
                batch.failed += 1;
            }
        }
    }

    batch
}
