//! Orchestration of one scrape invocation.
//!
//! Strategies run in trust-ascending cost order: cheap document parsing
//! first, direct feed pagination next, the browser session last. Every stage
//! is allowed to fail; the pipeline only errors when all of them together
//! produced nothing. A wall-clock budget is checked between stages so a slow
//! source truncates to partial results instead of hanging the caller.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::board_meta;
use crate::browser::BrowserHarvester;
use crate::config::ScrapeConfig;
use crate::error::ScrapeError;
use crate::extract::{
    embedded::EmbeddedDataParser, heuristic::HeuristicExtractor, run_chain, DocumentExtractor,
    ExtractionContext,
};
use crate::feed::{parse_board_path, HttpFeedTransport, PaginationClient};
use crate::fetch::{HttpClient, RetryingFetchProxy};
use crate::fuse::{fuse, EvidenceBundle};
use crate::models::{Pin, ScrapeOutcome};

/// Once document strategies produced this many candidates, later fallbacks
/// in the chain are skipped.
const ENOUGH_DOCUMENT_CANDIDATES: usize = 10;

/// Drives the full extraction pipeline for one board URL.
pub struct Scraper {
    config: ScrapeConfig,
}

impl Scraper {
    pub fn new(config: ScrapeConfig) -> Self {
        Self { config }
    }

    /// Run the scrape. Returns `NoContentFound` only when every strategy
    /// came up empty; anything less is a partial success.
    pub async fn run(&self, board_url: &str) -> Result<ScrapeOutcome, ScrapeError> {
        let board_path = parse_board_path(board_url)?;
        let started = Instant::now();
        let deadline = started + self.config.budget();

        // Stage 1: fetch the board document. Failure degrades; later
        // strategies do not need the markup.
        let proxy = RetryingFetchProxy::new(self.config.timeout())
            .with_referer(board_url.to_string());
        let markup = match proxy.fetch_text(board_url).await {
            Ok(markup) => Some(markup),
            Err(err) => {
                let absorbed = ScrapeError::Network(err.to_string());
                warn!("{absorbed}; continuing without the board document");
                None
            }
        };

        let board = board_meta::resolve(markup.as_deref(), board_url, &board_path);

        // Stage 2: document-level strategies over the fetched markup. The
        // heuristic extractor only runs when the blob yields too little.
        let extractors: Vec<Box<dyn DocumentExtractor>> = vec![
            Box::new(EmbeddedDataParser),
            Box::new(HeuristicExtractor::new(self.config.max_candidates)),
        ];
        let mut ctx = ExtractionContext::new();
        let mut document_pins: Vec<Pin> = Vec::new();
        if let Some(ref markup) = markup {
            document_pins = run_chain(&extractors, markup, &mut ctx, ENOUGH_DOCUMENT_CANDIDATES);
            debug!("document strategies yielded {} pins", document_pins.len());
        }

        // Stage 3: direct feed pagination, extending the candidate set.
        if Instant::now() < deadline {
            let client = HttpClient::new(self.config.timeout(), self.config.user_agent.as_deref())
                .with_referer(board_url.to_string())
                .with_delay_bounds(self.config.min_delay_ms, self.config.max_delay_ms);
            let origin = crate::feed::origin_of(board_url)
                .unwrap_or_else(|| board_url.trim_end_matches('/').to_string());
            let transport = HttpFeedTransport::new(client, origin);
            let paginator =
                PaginationClient::new(Box::new(transport), self.config.page_size, self.config.max_pages)
                    .with_delay_bounds(self.config.min_delay_ms, self.config.max_delay_ms);

            let api_pins = paginator.collect(&board_path, deadline).await;
            let mut added = 0usize;
            for pin in api_pins {
                if ctx.admit(&pin) {
                    document_pins.push(pin);
                    added += 1;
                }
            }
            if added > 0 && !ctx.contributed.contains(&"api") {
                ctx.contributed.push("api");
            }
        } else {
            warn!("budget exhausted before feed pagination; skipping");
        }

        // Stage 4: browser harvest. Produces the network-confirmed set plus
        // DOM evidence and refreshed markup for another document pass.
        let mut bundle = EvidenceBundle::default();
        if self.config.browser.enabled && Instant::now() < deadline {
            let harvester = BrowserHarvester::new(
                self.config.browser.clone(),
                board_url.to_string(),
                board_path.clone(),
                self.config.page_size,
                self.config.max_pages,
            );
            let evidence = harvester.run(deadline).await;

            if let Some(ref refreshed) = evidence.final_markup {
                let rescued = run_chain(&extractors, refreshed, &mut ctx, usize::MAX);
                if !rescued.is_empty() {
                    debug!("refreshed markup yielded {} more candidates", rescued.len());
                    document_pins.extend(rescued);
                }
            }
            bundle.network = evidence.network_pins;
            bundle.dom_urls = evidence.dom_urls;
        } else if self.config.browser.enabled {
            warn!("budget exhausted before browser harvest; skipping");
        }

        bundle.document = document_pins;
        bundle.strategies = ctx.contributed.clone();

        let outcome = fuse(bundle, board, 0);
        if outcome.pins.is_empty() {
            return Err(ScrapeError::NoContentFound);
        }
        info!("scrape finished in {:?}: {}", started.elapsed(), outcome.summary());
        Ok(outcome)
    }
}
