//! Extraction from the embedded state blob.
//!
//! The first page ships its initial feed state as JSON inside a well-known
//! script tag. The blob's internal layout drifts between site releases, so
//! instead of fixed paths we walk the whole tree looking for pin-shaped
//! nodes, pruning subtrees that hold related/suggested/story filler.

use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, warn};

use super::{walk_json, DocumentExtractor, ExtractionContext, Walk};
use crate::error::ScrapeError;
use crate::models::Pin;

/// Script tag ids tried in order when locating the state blob.
const BLOB_SCRIPT_IDS: &[&str] = &["__PWS_INITIAL_PROPS__", "__PWS_DATA__", "initial-state"];

/// Subtree keys whose contents are recommendations, not board content.
const EXCLUDED_KEYS: &[&str] = &["related", "suggest", "story"];

/// Maximum recursion depth for the tree walk.
const MAX_WALK_DEPTH: usize = 10;

/// Locate and parse the embedded state blob.
///
/// Returns `None` when no blob script is present or the JSON is unparseable;
/// a parse failure is logged with a truncated sample and absorbed here.
pub fn locate_state_blob(markup: &str) -> Option<Value> {
    let document = Html::parse_document(markup);

    for id in BLOB_SCRIPT_IDS {
        let selector = match Selector::parse(&format!("script#{}", id)) {
            Ok(s) => s,
            Err(_) => continue,
        };
        let Some(element) = document.select(&selector).next() else {
            continue;
        };
        let raw: String = element.text().collect();
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        match serde_json::from_str(raw) {
            Ok(value) => {
                debug!("state blob found in script#{}", id);
                return Some(value);
            }
            Err(err) => {
                let sample: String = raw.chars().take(200).collect();
                let absorbed = ScrapeError::MalformedSource(format!("script#{id}: {err}"));
                warn!("{absorbed}; sample: {sample}");
                return None;
            }
        }
    }

    None
}

fn is_excluded_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    EXCLUDED_KEYS.iter().any(|e| lower.contains(e))
}

/// Collect every pin-shaped node from a parsed blob.
pub fn pins_from_blob(blob: &Value, ctx: &mut ExtractionContext) -> Vec<Pin> {
    let mut pins = Vec::new();
    walk_json(blob, MAX_WALK_DEPTH, &mut |key, node| {
        if let Some(k) = key {
            if is_excluded_key(k) {
                return Walk::Prune;
            }
        }
        if let Some(pin) = Pin::from_api_record(node) {
            if ctx.admit(&pin) {
                pins.push(pin);
            }
            // A matched node never nests further pins.
            return Walk::Prune;
        }
        Walk::Descend
    });
    pins
}

/// Strategy wrapper over the blob search.
#[derive(Debug, Default)]
pub struct EmbeddedDataParser;

impl DocumentExtractor for EmbeddedDataParser {
    fn name(&self) -> &'static str {
        "embedded"
    }

    fn extract(&self, markup: &str, ctx: &mut ExtractionContext) -> Vec<Pin> {
        match locate_state_blob(markup) {
            Some(blob) => {
                let pins = pins_from_blob(&blob, ctx);
                debug!("embedded blob yielded {} pins", pins.len());
                pins
            }
            None => Vec::new(),
        }
    }
}
