//! Document-level extraction strategies.
//!
//! Strategies share one contract ([`DocumentExtractor`]) and one dedup
//! context, so fusion never cares which of them ran. The chain runs in
//! declared order and short-circuits once enough candidates accumulated.

pub mod embedded;
pub mod heuristic;

use std::collections::HashSet;

use serde_json::Value;

use crate::models::Pin;

/// Dedup state threaded through one extraction pass. Scoped to a single
/// scrape; nothing here outlives the invocation.
#[derive(Debug, Default)]
pub struct ExtractionContext {
    seen_ids: HashSet<String>,
    seen_hashes: HashSet<String>,
    /// Names of strategies that contributed at least one candidate.
    pub contributed: Vec<&'static str>,
}

impl ExtractionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a candidate unless its id or identity hash was already seen.
    pub fn admit(&mut self, pin: &Pin) -> bool {
        if self.seen_ids.contains(&pin.id) {
            return false;
        }
        if let Some(hash) = pin.identity_hash() {
            if !self.seen_hashes.insert(hash) {
                return false;
            }
        }
        self.seen_ids.insert(pin.id.clone());
        true
    }

    pub fn candidate_count(&self) -> usize {
        self.seen_ids.len()
    }
}

/// One extraction strategy over raw markup.
pub trait DocumentExtractor {
    fn name(&self) -> &'static str;

    /// Extract candidates, deduplicating through `ctx`.
    fn extract(&self, markup: &str, ctx: &mut ExtractionContext) -> Vec<Pin>;
}

/// Run strategies in order, stopping once `enough` unique candidates exist.
/// Later strategies are fallbacks for when earlier ones yield too little.
pub fn run_chain(
    extractors: &[Box<dyn DocumentExtractor>],
    markup: &str,
    ctx: &mut ExtractionContext,
    enough: usize,
) -> Vec<Pin> {
    let mut pins = Vec::new();
    for extractor in extractors {
        if ctx.candidate_count() >= enough {
            break;
        }
        let found = extractor.extract(markup, ctx);
        if !found.is_empty() && !ctx.contributed.contains(&extractor.name()) {
            ctx.contributed.push(extractor.name());
        }
        pins.extend(found);
    }
    pins
}

/// Whether the walker should descend into a node's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    Descend,
    Prune,
}

/// Depth-bounded visitor over loosely structured JSON.
///
/// `visit` receives the key the node was reached under (None for roots and
/// array elements) and decides whether to descend. One generic walker
/// replaces per-shape recursive functions: callers inject the predicate and
/// extraction as a closure.
pub fn walk_json<F>(value: &Value, max_depth: usize, visit: &mut F)
where
    F: FnMut(Option<&str>, &Value) -> Walk,
{
    walk_inner(None, value, 0, max_depth, visit);
}

fn walk_inner<F>(key: Option<&str>, value: &Value, depth: usize, max_depth: usize, visit: &mut F)
where
    F: FnMut(Option<&str>, &Value) -> Walk,
{
    if depth > max_depth {
        return;
    }
    if visit(key, value) == Walk::Prune {
        return;
    }
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                walk_inner(Some(k), v, depth + 1, max_depth, visit);
            }
        }
        Value::Array(items) => {
            for v in items {
                walk_inner(None, v, depth + 1, max_depth, visit);
            }
        }
        _ => {}
    }
}

/// Resolve a dot-notation path through nested JSON, treating numeric keys as
/// array indices. Missing steps resolve to `Null`.
pub(crate) fn json_path<'a>(data: &'a Value, path: &str) -> &'a Value {
    let mut current = data;
    for key in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(key).unwrap_or(&Value::Null),
            Value::Array(arr) => key
                .parse::<usize>()
                .ok()
                .and_then(|idx| arr.get(idx))
                .unwrap_or(&Value::Null),
            _ => &Value::Null,
        };
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_walker_respects_depth_bound() {
        let mut nested = json!("leaf");
        for _ in 0..20 {
            nested = json!({ "inner": nested });
        }
        let mut leaves = 0;
        walk_json(&nested, 10, &mut |_, v| {
            if v.is_string() {
                leaves += 1;
            }
            Walk::Descend
        });
        assert_eq!(leaves, 0);
    }

    #[test]
    fn test_walker_prunes_subtrees() {
        let value = json!({
            "keep": {"x": 1},
            "related": {"x": 2}
        });
        let mut numbers = Vec::new();
        walk_json(&value, 10, &mut |key, v| {
            if key == Some("related") {
                return Walk::Prune;
            }
            if let Some(n) = v.as_i64() {
                numbers.push(n);
            }
            Walk::Descend
        });
        assert_eq!(numbers, vec![1]);
    }

    #[test]
    fn test_json_path_probes_arrays() {
        let value = json!({"resource": {"options": {"bookmarks": ["tok"]}}});
        assert_eq!(
            json_path(&value, "resource.options.bookmarks.0").as_str(),
            Some("tok")
        );
        assert!(json_path(&value, "missing.path").is_null());
    }

    #[test]
    fn test_context_dedup_by_hash() {
        use crate::models::{ImageSize, Pin};
        use std::collections::BTreeMap;

        let url = "https://i.pinimg.com/236x/ab/cd/abcdefabcdef12345678901234567890.jpg";
        let mut images = BTreeMap::new();
        images.insert(ImageSize::Small, url.to_string());

        let a = Pin::new("111111111100".into(), images.clone());
        // Same asset, different id (as a heuristic candidate would carry).
        let b = Pin::new("abcdefabcdef12345678901234567890".into(), images);

        let mut ctx = ExtractionContext::new();
        assert!(ctx.admit(&a));
        assert!(!ctx.admit(&b));
        assert_eq!(ctx.candidate_count(), 1);
    }
}
