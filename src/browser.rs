//! Browser-session harvester for scroll-fed boards.
//!
//! Drives a headless Chrome session through an explicit state machine:
//! `Navigating -> Scrolling -> Paginating -> DetailFilling -> Harvesting ->
//! Done`. Every state has a fallback edge straight to `Done`; a failure
//! anywhere keeps whatever evidence earlier states gathered.
//!
//! While the page scrolls, its own feed XHRs are intercepted and decoded.
//! That network-confirmed set is the most trustworthy evidence a scrape can
//! get: those requests carry the page's live session and passed whatever
//! anti-bot checks the site runs.

#[cfg(feature = "browser")]
use std::collections::HashSet;
use std::time::Instant;
#[cfg(feature = "browser")]
use std::time::Duration;

#[cfg(feature = "browser")]
use anyhow::{Context, Result};
#[cfg(feature = "browser")]
use tracing::{debug, info};
use tracing::warn;

#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventResponseReceived, GetResponseBodyParams,
};
#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
#[cfg(feature = "browser")]
use chromiumoxide::{Browser, BrowserConfig as ChromeConfig, Page};
#[cfg(feature = "browser")]
use futures::StreamExt;
#[cfg(feature = "browser")]
use regex::Regex;

use crate::config::BrowserConfig;
use crate::error::ScrapeError;
#[cfg(feature = "browser")]
use crate::feed::{decode_feed_items, next_bookmark, FeedRequest};
use crate::feed::BoardPath;
#[cfg(feature = "browser")]
use crate::fetch::jitter_between;
use crate::models::Pin;

/// States of the harvest session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestPhase {
    Navigating,
    Scrolling,
    Paginating,
    DetailFilling,
    Harvesting,
    Done,
}

/// Evidence gathered by one browser session. Partial by design: whatever
/// state the machine died in, everything collected before it is kept.
#[derive(Debug, Default)]
pub struct HarvestEvidence {
    /// Pins decoded from intercepted live feed responses.
    pub network_pins: Vec<Pin>,
    /// Image URLs present in the final rendered DOM.
    pub dom_urls: Vec<String>,
    /// Final rendered markup, for document-level fallback extraction.
    pub final_markup: Option<String>,
    /// Last state the machine entered before `Done`.
    pub phase_reached: Option<HarvestPhase>,
}

/// Drives one board page through the harvest state machine.
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
pub struct BrowserHarvester {
    config: BrowserConfig,
    board_url: String,
    board: BoardPath,
    page_size: u32,
    max_pages: u32,
}

impl BrowserHarvester {
    pub fn new(
        config: BrowserConfig,
        board_url: String,
        board: BoardPath,
        page_size: u32,
        max_pages: u32,
    ) -> Self {
        Self {
            config,
            board_url,
            board,
            page_size,
            max_pages,
        }
    }
}

/// Stealth evasion snippets applied after navigation.
#[cfg(feature = "browser")]
const STEALTH_SCRIPTS: &[&str] = &[
    r#"
    Object.defineProperty(navigator, 'webdriver', {
        get: () => undefined,
        configurable: true
    });
    "#,
    r#"
    window.chrome = window.chrome || { runtime: {}, loadTimes: function() {}, app: {} };
    "#,
    r#"
    Object.defineProperty(navigator, 'languages', {
        get: () => ['en-US', 'en'],
        configurable: true
    });
    "#,
];

/// Overlay/dialog close buttons dismissed opportunistically after load.
#[cfg(feature = "browser")]
const OVERLAY_SELECTORS: &[&str] = &[
    "[data-test-id='full-page-signup-close-button']",
    "[aria-label='close']",
    "[aria-label='Close']",
    "button[title='Close']",
];

#[cfg(feature = "browser")]
impl BrowserHarvester {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    fn find_chrome() -> Result<std::path::PathBuf> {
        for path in Self::CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                return Ok(p.to_path_buf());
            }
        }
        for cmd in &["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        return Ok(std::path::PathBuf::from(path));
                    }
                }
            }
        }
        Err(anyhow::anyhow!("Chrome/Chromium not found in known locations or PATH"))
    }

    async fn launch(&self) -> Result<(Browser, Page)> {
        let chrome_path = Self::find_chrome()?;

        let mut builder = ChromeConfig::builder().chrome_executable(chrome_path);
        if !self.config.headless {
            builder = builder.with_head();
        }
        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--no-sandbox")
            .arg("--disable-gpu");
        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }

        let chrome_config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {}", e))?;

        let (browser, mut handler) = Browser::launch(chrome_config)
            .await
            .context("Failed to launch browser")?;
        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await?;
        let user_agent = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
        page.execute(SetUserAgentOverrideParams::new(user_agent.to_string()))
            .await?;

        Ok((browser, page))
    }

    /// Run the state machine to completion. Never fails: errors collapse the
    /// machine into `Done` with partial evidence.
    pub async fn run(&self, deadline: Instant) -> HarvestEvidence {
        let mut evidence = HarvestEvidence::default();

        let (mut browser, page) = match self.launch().await {
            Ok(session) => session,
            Err(err) => {
                let absorbed = ScrapeError::AutomationUnavailable(err.to_string());
                warn!("{absorbed}; skipping harvest");
                return evidence;
            }
        };

        // Interception covers the whole session; the page issues feed XHRs
        // from navigation onwards.
        let mut intercept = match FeedInterceptor::attach(&page).await {
            Ok(interceptor) => Some(interceptor),
            Err(err) => {
                warn!("feed interception unavailable: {err}");
                None
            }
        };

        let mut network_pins: Vec<Pin> = Vec::new();
        let mut network_ids: HashSet<String> = HashSet::new();

        let mut phase = HarvestPhase::Navigating;
        while phase != HarvestPhase::Done {
            evidence.phase_reached = Some(phase);
            if Instant::now() >= deadline {
                warn!("harvest budget exhausted in {phase:?}; truncating");
                break;
            }

            let step = match phase {
                HarvestPhase::Navigating => self
                    .navigate(&page)
                    .await
                    .map(|_| HarvestPhase::Scrolling),
                HarvestPhase::Scrolling => self
                    .scroll_feed(&page, deadline)
                    .await
                    .map(|_| HarvestPhase::Paginating),
                HarvestPhase::Paginating => self
                    .paginate_in_session(&page, &mut network_pins, &mut network_ids, deadline)
                    .await
                    .map(|_| HarvestPhase::DetailFilling),
                HarvestPhase::DetailFilling => self
                    .fill_details(&page, &mut network_pins, &mut network_ids, deadline)
                    .await
                    .map(|_| HarvestPhase::Harvesting),
                HarvestPhase::Harvesting => self
                    .harvest_dom(&page, &mut evidence)
                    .await
                    .map(|_| HarvestPhase::Done),
                HarvestPhase::Done => unreachable!(),
            };

            // Drain intercepted traffic as it arrives so later phases know
            // which ids are already confirmed.
            if let Some(ref mut interceptor) = intercept {
                interceptor.drain_into(&mut network_pins, &mut network_ids);
            }

            phase = match step {
                Ok(next) => next,
                Err(err) => {
                    warn!("harvest phase {phase:?} failed: {err}");
                    HarvestPhase::Done
                }
            };
        }

        if let Some(mut interceptor) = intercept {
            interceptor.drain_into(&mut network_pins, &mut network_ids);
            interceptor.stop();
        }
        evidence.network_pins = network_pins;

        let _ = page.close().await;
        let _ = browser.close().await;

        info!(
            "harvest done: {} network pins, {} dom urls",
            evidence.network_pins.len(),
            evidence.dom_urls.len()
        );
        evidence
    }

    async fn navigate(&self, page: &Page) -> Result<()> {
        info!("navigating to {}", self.board_url);
        let params = NavigateParams::builder()
            .url(self.board_url.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("invalid url: {e}"))?;
        page.execute(params).await?;

        // Wait for readyState instead of a fixed timeout.
        let ready_script = r#"
            new Promise((resolve) => {
                if (document.readyState === 'complete' || document.readyState === 'interactive') {
                    resolve(document.readyState);
                } else {
                    document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
                    setTimeout(() => resolve('timeout'), 10000);
                }
            })
        "#;
        let timeout = Duration::from_secs(self.config.timeout);
        match tokio::time::timeout(timeout, page.evaluate(ready_script.to_string())).await {
            Ok(Ok(result)) => {
                let state: String = result.into_value().unwrap_or_else(|_| "unknown".to_string());
                debug!("page ready state: {state}");
            }
            Ok(Err(err)) => debug!("could not check ready state: {err}"),
            Err(_) => warn!("timeout waiting for page ready state"),
        }

        for script in STEALTH_SCRIPTS {
            if let Err(err) = page.evaluate(script.to_string()).await {
                debug!("stealth script skipped: {err}");
            }
        }

        self.dismiss_overlays(page).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(())
    }

    async fn dismiss_overlays(&self, page: &Page) {
        for selector in OVERLAY_SELECTORS {
            let script = format!(
                r#"(() => {{ const el = document.querySelector("{selector}"); if (el) {{ el.click(); return true; }} return false; }})()"#
            );
            match page.evaluate(script).await {
                Ok(result) => {
                    if result.into_value::<bool>().unwrap_or(false) {
                        debug!("dismissed overlay {selector}");
                    }
                }
                Err(err) => debug!("overlay probe failed: {err}"),
            }
        }
    }

    /// Scroll-to-bottom cycles until the page stops growing (two unchanged
    /// height checks in a row) or the iteration cap hits.
    async fn scroll_feed(&self, page: &Page, deadline: Instant) -> Result<()> {
        let mut last_height: i64 = -1;
        let mut unchanged = 0u32;

        for iteration in 0..self.config.max_scroll_iterations {
            if Instant::now() >= deadline {
                debug!("scroll loop hit deadline at iteration {iteration}");
                break;
            }

            let script =
                "window.scrollTo(0, document.body.scrollHeight); document.body.scrollHeight";
            let height: i64 = page
                .evaluate(script.to_string())
                .await?
                .into_value()
                .unwrap_or(0);

            if height == last_height {
                unchanged += 1;
                if unchanged >= 2 {
                    debug!("page height stable at {height} after {iteration} scrolls");
                    break;
                }
            } else {
                unchanged = 0;
                last_height = height;
            }

            tokio::time::sleep(Duration::from_millis(600)).await;
        }
        Ok(())
    }

    /// Same-session `fetch()` so the request carries live credentials and
    /// cookies. Returns the parsed JSON body, or an error for non-2xx.
    async fn fetch_in_page(&self, page: &Page, url: &str) -> Result<serde_json::Value> {
        let script = format!(
            r#"
            (async () => {{
                try {{
                    const response = await fetch('{url}', {{
                        method: 'GET',
                        credentials: 'include',
                        headers: {{
                            'Accept': 'application/json',
                            'X-Requested-With': 'XMLHttpRequest'
                        }}
                    }});
                    if (!response.ok) {{
                        return JSON.stringify({{ __status: response.status }});
                    }}
                    return await response.text();
                }} catch (e) {{
                    return JSON.stringify({{ __error: e.toString() }});
                }}
            }})()
            "#
        );

        let raw: String = page
            .evaluate(script)
            .await?
            .into_value()
            .context("in-page fetch returned no value")?;
        let body: serde_json::Value = serde_json::from_str(&raw)?;

        if let Some(status) = body.get("__status").and_then(|s| s.as_u64()) {
            anyhow::bail!("in-page fetch got status {status}");
        }
        if let Some(err) = body.get("__error").and_then(|e| e.as_str()) {
            anyhow::bail!("in-page fetch failed: {err}");
        }
        Ok(body)
    }

    fn resource_url(&self, resource: &str, source_url: &str, data: &serde_json::Value) -> String {
        let origin = crate::feed::origin_of(&self.board_url)
            .unwrap_or_else(|| "https://www.pinterest.com".to_string());
        format!(
            "{}/resource/{}/get/?source_url={}&data={}",
            origin,
            resource,
            urlencoding::encode(source_url),
            urlencoding::encode(&data.to_string()),
        )
    }

    /// Drive bookmark pagination from inside the session, for the main feed
    /// and for each section feed. Sequential on purpose: a bookmark is only
    /// valid after the prior response.
    async fn paginate_in_session(
        &self,
        page: &Page,
        pins: &mut Vec<Pin>,
        ids: &mut HashSet<String>,
        deadline: Instant,
    ) -> Result<()> {
        self.paginate_resource(page, "BoardFeedResource", None, pins, ids, deadline)
            .await?;

        for section_id in self.list_sections(page).await.unwrap_or_default() {
            if Instant::now() >= deadline {
                break;
            }
            if let Err(err) = self
                .paginate_resource(
                    page,
                    "BoardSectionPinsResource",
                    Some(&section_id),
                    pins,
                    ids,
                    deadline,
                )
                .await
            {
                debug!("section {section_id} pagination stopped: {err}");
            }
        }
        Ok(())
    }

    async fn paginate_resource(
        &self,
        page: &Page,
        resource: &str,
        section_id: Option<&str>,
        pins: &mut Vec<Pin>,
        ids: &mut HashSet<String>,
        deadline: Instant,
    ) -> Result<()> {
        let source_url = self.board.source_url();
        let mut bookmark: Option<String> = None;

        for page_no in 0..self.max_pages {
            if Instant::now() >= deadline {
                break;
            }

            let request = FeedRequest {
                source_url: source_url.clone(),
                page_size: self.page_size,
                bookmark: bookmark.clone(),
            };
            let mut data = request.data_envelope();
            if let Some(section) = section_id {
                data["options"]["section_id"] = serde_json::json!(section);
            }
            let url = self.resource_url(resource, &source_url, &data);

            let body = match self.fetch_in_page(page, &url).await {
                Ok(body) => body,
                Err(err) => {
                    debug!("{resource} page {page_no} failed: {err}");
                    break;
                }
            };

            let mut added = 0usize;
            for pin in decode_feed_items(&body) {
                if ids.insert(pin.id.clone()) {
                    pins.push(pin);
                    added += 1;
                }
            }
            debug!("{resource} page {page_no}: {added} new pins");

            if added == 0 {
                break;
            }
            bookmark = next_bookmark(&body);
            if bookmark.is_none() {
                break;
            }
            tokio::time::sleep(jitter_between(300, 800)).await;
        }
        Ok(())
    }

    async fn list_sections(&self, page: &Page) -> Result<Vec<String>> {
        let source_url = self.board.source_url();
        let data = serde_json::json!({
            "options": { "board_url": source_url },
            "context": {}
        });
        let url = self.resource_url("BoardSectionsResource", &source_url, &data);
        let body = self.fetch_in_page(page, &url).await?;

        let sections = body["resource_response"]["data"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|s| s.get("id"))
                    .filter_map(|id| match id {
                        serde_json::Value::String(s) => Some(s.clone()),
                        serde_json::Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(sections)
    }

    /// Fetch detail records for ids that appear in rendered markup but were
    /// never seen in feed traffic. Throttled and capped; these are the
    /// stragglers, not the main harvest.
    async fn fill_details(
        &self,
        page: &Page,
        pins: &mut Vec<Pin>,
        ids: &mut HashSet<String>,
        deadline: Instant,
    ) -> Result<()> {
        let markup = page.content().await?;
        let link_pattern = Regex::new(r"/pin/(\d{10,})").expect("static regex");

        let mut missing: Vec<String> = Vec::new();
        let mut seen_links: HashSet<String> = HashSet::new();
        for capture in link_pattern.captures_iter(&markup) {
            let id = capture[1].to_string();
            if !ids.contains(&id) && seen_links.insert(id.clone()) {
                missing.push(id);
            }
        }
        missing.truncate(self.config.detail_fetch_cap);
        if missing.is_empty() {
            return Ok(());
        }
        info!("detail-filling {} ids seen only in markup", missing.len());

        for id in missing {
            if Instant::now() >= deadline {
                break;
            }
            let data = serde_json::json!({
                "options": { "id": id, "field_set_key": "detailed" },
                "context": {}
            });
            let source_url = format!("/pin/{id}/");
            let url = self.resource_url("PinResource", &source_url, &data);

            match self.fetch_in_page(page, &url).await {
                Ok(body) => {
                    if let Some(pin) = Pin::from_api_record(&body["resource_response"]["data"]) {
                        if ids.insert(pin.id.clone()) {
                            pins.push(pin);
                        }
                    }
                }
                Err(err) => debug!("detail fetch for {id} failed: {err}"),
            }
            tokio::time::sleep(jitter_between(200, 500)).await;
        }
        Ok(())
    }

    /// Collect every image URL the final DOM renders, plus the markup itself
    /// as a document-level fallback.
    async fn harvest_dom(&self, page: &Page, evidence: &mut HarvestEvidence) -> Result<()> {
        let script = r#"
            (() => {
                const urls = [];
                for (const img of document.querySelectorAll('img')) {
                    if (img.src) urls.push(img.src);
                    if (img.srcset) {
                        for (const candidate of img.srcset.split(',')) {
                            const url = candidate.trim().split(' ')[0];
                            if (url) urls.push(url);
                        }
                    }
                }
                return JSON.stringify(urls);
            })()
        "#;

        let raw: String = page
            .evaluate(script.to_string())
            .await?
            .into_value()
            .context("dom harvest returned no value")?;
        evidence.dom_urls = serde_json::from_str(&raw)?;
        evidence.final_markup = Some(page.content().await?);
        Ok(())
    }
}

/// Passive listener on the page's own feed traffic.
#[cfg(feature = "browser")]
struct FeedInterceptor {
    receiver: tokio::sync::mpsc::UnboundedReceiver<String>,
    task: tokio::task::JoinHandle<()>,
}

#[cfg(feature = "browser")]
impl FeedInterceptor {
    async fn attach(page: &Page) -> Result<Self> {
        page.execute(EnableParams::default())
            .await
            .context("Failed to enable network domain")?;

        let mut events = page
            .event_listener::<EventResponseReceived>()
            .await
            .context("Failed to subscribe to response events")?;

        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        let body_page = page.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let url = &event.response.url;
                if !url.contains("/resource/") || !url.contains("/get/") {
                    continue;
                }
                // The body is only retrievable once loading finished.
                tokio::time::sleep(Duration::from_millis(150)).await;
                match body_page
                    .execute(GetResponseBodyParams::new(event.request_id.clone()))
                    .await
                {
                    Ok(body) => {
                        if !body.result.base64_encoded {
                            let _ = sender.send(body.result.body.clone());
                        }
                    }
                    Err(err) => debug!("response body unavailable for {url}: {err}"),
                }
            }
        });

        Ok(Self { receiver, task })
    }

    /// Decode everything intercepted so far into the accumulator.
    fn drain_into(&mut self, pins: &mut Vec<Pin>, ids: &mut HashSet<String>) {
        while let Ok(raw) = self.receiver.try_recv() {
            let Ok(body) = serde_json::from_str::<serde_json::Value>(&raw) else {
                continue;
            };
            for pin in decode_feed_items(&body) {
                if ids.insert(pin.id.clone()) {
                    pins.push(pin);
                }
            }
        }
    }

    fn stop(self) {
        self.task.abort();
    }
}

// Stub for when the browser feature is disabled: same surface, no work.
#[cfg(not(feature = "browser"))]
impl BrowserHarvester {
    pub async fn run(&self, _deadline: Instant) -> HarvestEvidence {
        let absorbed = ScrapeError::AutomationUnavailable(
            "not compiled in; rebuild with --features browser".into(),
        );
        warn!("{absorbed}; skipping harvest");
        HarvestEvidence::default()
    }
}
