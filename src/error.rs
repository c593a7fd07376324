//! Error taxonomy for the scrape pipeline.
//!
//! Extraction and parse failures are absorbed where they happen; callers of
//! [`crate::pipeline::Scraper`] only ever see total-pipeline exhaustion.

use thiserror::Error;

/// Failures surfaced by the scrape pipeline.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The embedded state blob was present but could not be parsed.
    /// Handled internally by degrading to the heuristic path; kept in the
    /// taxonomy so components can classify what they absorbed.
    #[error("embedded data blob present but unparseable: {0}")]
    MalformedSource(String),

    /// A fetch failed after retries were exhausted.
    #[error("network failure: {0}")]
    Network(String),

    /// Every strategy ran and produced zero items.
    #[error("no content found by any extraction strategy")]
    NoContentFound,

    /// Browser automation was requested but is missing or broken.
    /// Never fatal; logged and the pipeline continues without it.
    #[error("browser automation unavailable: {0}")]
    AutomationUnavailable(String),

    /// The input URL does not look like an owner/slug board page.
    #[error("not a board url: {0}")]
    InvalidBoardUrl(String),
}

/// Typed failure for a single HTTP fetch attempt.
///
/// Distinguishes status-coded rejections (which drive the user-agent swap on
/// 403/429) from transport-level failures (which drive plain backoff).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("http status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchError {
    /// True for responses that typically mean "you look like a bot".
    pub fn is_blocked(&self) -> bool {
        matches!(self, FetchError::Status(403) | FetchError::Status(429))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => FetchError::Status(status.as_u16()),
            None => FetchError::Transport(err.to_string()),
        }
    }
}
