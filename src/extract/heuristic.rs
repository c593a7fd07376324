//! Regex fallback extraction over raw markup.
//!
//! Used when the state blob is missing or thin, and against refreshed markup
//! captured by the browser session. Two passes: the first counts how often
//! each identity hash occurs across all CDN URL matches, the second keeps
//! candidates that survive the noise filters. Content images recur a handful
//! of times per document; UI chrome recurs hundreds of times, which is what
//! the occurrence threshold catches.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use tracing::debug;

use super::{DocumentExtractor, ExtractionContext};
use crate::cdn;
use crate::models::Pin;

/// Path segments that mark non-content assets.
const EXCLUDED_PATH_SEGMENTS: &[&str] = &["avatars", "custom_covers", "static", "closeups", "user"];

/// Hashes recurring more often than this are chrome, not content.
const MAX_OCCURRENCES: usize = 100;

pub struct HeuristicExtractor {
    url_pattern: Regex,
    max_candidates: usize,
}

impl HeuristicExtractor {
    pub fn new(max_candidates: usize) -> Self {
        // Scoped to the image CDN host; first group is the resolution
        // segment, remainder must end in a known image extension.
        let url_pattern = Regex::new(
            r#"https://i\.pinimg\.com/([A-Za-z0-9_]+)/([A-Za-z0-9_/\.\-]+?\.(?:jpg|jpeg|png|gif|webp))"#,
        )
        .expect("static regex");

        Self {
            url_pattern,
            max_candidates,
        }
    }

    fn is_excluded_path(path: &str) -> bool {
        path.split('/')
            .any(|segment| EXCLUDED_PATH_SEGMENTS.contains(&segment))
    }
}

impl Default for HeuristicExtractor {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl DocumentExtractor for HeuristicExtractor {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn extract(&self, markup: &str, ctx: &mut ExtractionContext) -> Vec<Pin> {
        // Markup often embeds JSON with escaped slashes.
        let doc = markup.replace("\\/", "/");

        // Pass 1: occurrence counts per identity hash.
        let mut occurrences: HashMap<String, usize> = HashMap::new();
        for capture in self.url_pattern.captures_iter(&doc) {
            if let Some(hash) = cdn::identity_hash(&capture[0]) {
                *occurrences.entry(hash).or_insert(0) += 1;
            }
        }

        // Pass 2: re-scan with exclusions, first occurrence wins.
        let mut pins = Vec::new();
        let mut kept: HashSet<String> = HashSet::new();
        for capture in self.url_pattern.captures_iter(&doc) {
            if pins.len() >= self.max_candidates {
                debug!("heuristic candidate cap reached ({})", self.max_candidates);
                break;
            }

            let url = &capture[0];
            let size_segment = &capture[1];
            let path = &capture[2];

            if Self::is_excluded_path(path) {
                continue;
            }
            if cdn::is_fixed_thumb_segment(size_segment) {
                continue;
            }
            let Some(hash) = cdn::identity_hash(url) else {
                continue;
            };
            if occurrences.get(&hash).copied().unwrap_or(0) > MAX_OCCURRENCES {
                continue;
            }
            if !kept.insert(hash.clone()) {
                continue;
            }

            let pin = Pin::new(hash, cdn::variants_for(url));
            if !pin.images.is_empty() && ctx.admit(&pin) {
                pins.push(pin);
            }
        }

        debug!(
            "heuristic pass kept {} of {} distinct hashes",
            pins.len(),
            occurrences.len()
        );
        pins
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTENT_A: &str =
        "https://i.pinimg.com/236x/aa/bb/abcdefabcdef12345678901234567890.jpg";
    const CONTENT_B: &str =
        "https://i.pinimg.com/474x/cc/dd/bcdefabcdef12345678901234567891a.jpg";
    const AVATAR: &str =
        "https://i.pinimg.com/236x/avatars/dcdefabcdef12345678901234567893a.jpg";
    const MALFORMED: &str = "https://i.pinimg.com/236x/aa/bb/sprite-icons.png";

    fn repeat(url: &str, times: usize) -> String {
        let mut out = String::new();
        for _ in 0..times {
            out.push_str(&format!("<img src=\"{}\">", url));
        }
        out
    }

    #[test]
    fn test_exclusion_filters() {
        // One avatar, one content hash recurring like chrome (150x), one
        // real content hash (8x), one malformed filename.
        let markup = format!(
            "{}{}{}{}",
            repeat(AVATAR, 1),
            repeat(CONTENT_A, 150),
            repeat(CONTENT_B, 8),
            repeat(MALFORMED, 1),
        );

        let mut ctx = ExtractionContext::new();
        let pins = HeuristicExtractor::default().extract(&markup, &mut ctx);

        assert_eq!(pins.len(), 1);
        assert_eq!(pins[0].id, "bcdefabcdef12345678901234567891a");
    }

    #[test]
    fn test_tiny_thumb_tags_excluded() {
        let markup = repeat(
            "https://i.pinimg.com/75x75_RS/aa/bb/abcdefabcdef12345678901234567890.jpg",
            3,
        );
        let mut ctx = ExtractionContext::new();
        assert!(HeuristicExtractor::default()
            .extract(&markup, &mut ctx)
            .is_empty());
    }

    #[test]
    fn test_escaped_slashes_normalized() {
        let markup =
            r#"{"url":"https:\/\/i.pinimg.com\/236x\/aa\/bb\/abcdefabcdef12345678901234567890.jpg"}"#;
        let mut ctx = ExtractionContext::new();
        let pins = HeuristicExtractor::default().extract(markup, &mut ctx);
        assert_eq!(pins.len(), 1);
    }

    #[test]
    fn test_candidate_cap_bounds_output() {
        let mut markup = String::new();
        for i in 0..30u128 {
            markup.push_str(&format!(
                "<img src=\"https://i.pinimg.com/236x/aa/bb/{:032x}.jpg\">",
                0x1000_0000_0000_0000_0000u128 + i
            ));
        }
        let mut ctx = ExtractionContext::new();
        let pins = HeuristicExtractor::new(10).extract(&markup, &mut ctx);
        assert_eq!(pins.len(), 10);
    }

    #[test]
    fn test_duplicates_first_occurrence_wins() {
        let markup = format!("{}{}", repeat(CONTENT_A, 2), repeat(CONTENT_B, 1));
        let mut ctx = ExtractionContext::new();
        let pins = HeuristicExtractor::default().extract(&markup, &mut ctx);
        assert_eq!(pins.len(), 2);
        assert_eq!(pins[0].id, "abcdefabcdef12345678901234567890");
    }
}
