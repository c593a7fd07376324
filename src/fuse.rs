//! Fusion of evidence sources into one trustworthy result.
//!
//! Sources are independently unreliable: the blob goes stale, regexes pick
//! up chrome, the feed lies about counts. The only ground truth available is
//! traffic the page itself issued during browser automation, so everything
//! else is validated against that set. With no network evidence at all,
//! validation relaxes; there is nothing higher-trust to check against.

use std::collections::HashSet;

use chrono::Utc;
use tracing::{debug, info};

use crate::cdn;
use crate::models::{BoardInfo, Pin, ScrapeOutcome};

/// Everything the pipeline gathered, ordered by trust.
#[derive(Debug, Default)]
pub struct EvidenceBundle {
    /// Pins decoded from the page's own intercepted feed traffic.
    pub network: Vec<Pin>,
    /// Image URLs harvested from the rendered DOM.
    pub dom_urls: Vec<String>,
    /// Candidates from document-level strategies and direct API pagination.
    pub document: Vec<Pin>,
    /// Names of document-level strategies that contributed candidates.
    pub strategies: Vec<&'static str>,
}

/// Merge all candidate sets under the trust ordering.
pub fn fuse(bundle: EvidenceBundle, board: BoardInfo, failed_downloads: usize) -> ScrapeOutcome {
    let network_ids: HashSet<String> = bundle.network.iter().map(|p| p.id.clone()).collect();
    let network_hashes: HashSet<String> = bundle
        .network
        .iter()
        .flat_map(|p| p.images.values())
        .filter_map(|url| cdn::identity_hash(url))
        .collect();

    let mut pins: Vec<Pin> = Vec::new();
    let mut final_ids: HashSet<String> = HashSet::new();
    let mut final_hashes: HashSet<String> = HashSet::new();
    let mut sources: Vec<&'static str> = Vec::new();

    let push = |pin: Pin, pins: &mut Vec<Pin>, ids: &mut HashSet<String>, hashes: &mut HashSet<String>| -> bool {
        if ids.contains(&pin.id) {
            return false;
        }
        if let Some(hash) = pin.identity_hash() {
            if !hashes.insert(hash) {
                return false;
            }
        }
        ids.insert(pin.id.clone());
        pins.push(pin);
        true
    };

    // Rule 1: network-confirmed items are accepted unconditionally.
    let mut accepted_network = 0usize;
    for pin in bundle.network {
        if push(pin, &mut pins, &mut final_ids, &mut final_hashes) {
            accepted_network += 1;
        }
    }
    if accepted_network > 0 {
        sources.push("browser-net");
    }

    let relaxed = network_ids.is_empty();

    // Rule 2: DOM harvests only count when the network traffic saw the same
    // asset. In relaxed mode they are dropped entirely; a browser session
    // that produced no feed traffic is not evidence of anything.
    let mut accepted_dom = 0usize;
    if !relaxed {
        for url in &bundle.dom_urls {
            let Some(hash) = cdn::identity_hash(url) else {
                continue;
            };
            if !network_hashes.contains(&hash) {
                continue;
            }
            let pin = Pin::new(hash, cdn::variants_for(url));
            if !pin.images.is_empty()
                && push(pin, &mut pins, &mut final_ids, &mut final_hashes)
            {
                accepted_dom += 1;
            }
        }
    }
    if accepted_dom > 0 {
        sources.push("browser-dom");
    }

    // Rule 3: document-level candidates must match something the network
    // confirmed, by id or by identity hash. Relaxed mode accepts them as-is.
    let mut accepted_document = 0usize;
    for pin in bundle.document {
        let validated = relaxed
            || network_ids.contains(pin.id.as_str())
            || pin
                .identity_hash()
                .map(|h| network_hashes.contains(&h))
                .unwrap_or(false);
        if validated && push(pin, &mut pins, &mut final_ids, &mut final_hashes) {
            accepted_document += 1;
        }
    }
    if accepted_document > 0 {
        sources.extend(&bundle.strategies);
    }

    debug!(
        "fusion: {} network, {} dom, {} document accepted (relaxed={relaxed})",
        accepted_network, accepted_dom, accepted_document
    );

    let provenance = if sources.is_empty() {
        "none".to_string()
    } else {
        sources.join("+")
    };

    let outcome = ScrapeOutcome {
        pins,
        board,
        provenance,
        failed_downloads,
        fetched_at: Utc::now(),
    };
    info!("{}", outcome.summary());
    outcome
}
