//! Scrape configuration with serde defaults and optional TOML loading.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for one scrape invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    /// Feed page size per request.
    pub page_size: u32,

    /// Hard bound on feed pages walked per pagination pass.
    pub max_pages: u32,

    /// Hard cap on heuristic candidates, bounding adversarial documents.
    pub max_candidates: usize,

    /// Jittered inter-request delay bounds, milliseconds.
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// Wall-clock budget for the whole invocation, seconds. Exceeding it
    /// truncates to partial results.
    pub budget_secs: u64,

    /// Custom user agent; defaults to a rotating browser impersonation.
    pub user_agent: Option<String>,

    pub browser: BrowserConfig,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            page_size: 25,
            max_pages: 200,
            max_candidates: 1000,
            min_delay_ms: 300,
            max_delay_ms: 800,
            timeout_secs: 30,
            budget_secs: 180,
            user_agent: None,
            browser: BrowserConfig::default(),
        }
    }
}

impl ScrapeConfig {
    /// Load from a TOML file; missing keys fall back to defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.budget_secs)
    }
}

/// Browser harvester configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Master switch; with this off the harvester is a no-op.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Run in headless mode (default: true).
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Page load timeout in seconds.
    #[serde(default = "default_browser_timeout")]
    pub timeout: u64,

    /// Cap on scroll-to-bottom cycles.
    #[serde(default = "default_scroll_iterations")]
    pub max_scroll_iterations: u32,

    /// Cap on per-item detail fetches for ids seen only in markup.
    #[serde(default = "default_detail_cap")]
    pub detail_fetch_cap: usize,

    /// Additional Chrome arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_headless() -> bool {
    true
}

fn default_browser_timeout() -> u64 {
    30
}

fn default_scroll_iterations() -> u32 {
    120
}

fn default_detail_cap() -> usize {
    50
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            headless: default_headless(),
            timeout: default_browser_timeout(),
            max_scroll_iterations: default_scroll_iterations(),
            detail_fetch_cap: default_detail_cap(),
            chrome_args: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScrapeConfig::default();
        assert_eq!(config.page_size, 25);
        assert_eq!(config.max_pages, 200);
        assert!(config.browser.enabled);
        assert!(config.min_delay_ms < config.max_delay_ms);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: ScrapeConfig =
            toml::from_str("page_size = 50\n[browser]\nheadless = false\n").unwrap();
        assert_eq!(config.page_size, 50);
        assert!(!config.browser.headless);
        assert_eq!(config.max_pages, 200);
        assert_eq!(config.browser.max_scroll_iterations, 120);
    }
}
