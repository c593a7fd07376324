//! Core data types produced by a scrape.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cdn;

/// Resolution tags exposed by the CDN.
///
/// `Small` (`236x`) is the canonical thumbnail tag: every real item record
/// carries it, so it doubles as the shape-detection key during extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSize {
    /// Fixed-size UI thumbnail tag. Recognized for exclusion, never emitted.
    Tiny,
    Small,
    Medium,
    Large,
    Original,
}

impl ImageSize {
    /// The path segment used by the CDN for this size.
    pub fn segment(&self) -> &'static str {
        match self {
            ImageSize::Tiny => "75x75_RS",
            ImageSize::Small => "236x",
            ImageSize::Medium => "474x",
            ImageSize::Large => "736x",
            ImageSize::Original => "originals",
        }
    }

    /// Sizes that reference actual content.
    pub fn content_sizes() -> [ImageSize; 4] {
        [
            ImageSize::Small,
            ImageSize::Medium,
            ImageSize::Large,
            ImageSize::Original,
        ]
    }
}

/// One content item with its per-resolution image URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pin {
    /// Stable id within one scrape. Numeric id from the source when known,
    /// otherwise the identity hash of the image URL.
    pub id: String,
    /// Size tag -> image URL.
    pub images: BTreeMap<ImageSize, String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub board_id: Option<String>,
}

impl Pin {
    pub fn new(id: String, images: BTreeMap<ImageSize, String>) -> Self {
        Self {
            id,
            images,
            title: None,
            description: None,
            board_id: None,
        }
    }

    /// Identity hash derived from any of this pin's image URLs.
    pub fn identity_hash(&self) -> Option<String> {
        self.images.values().find_map(|url| cdn::identity_hash(url))
    }

    /// Decode a pin from one raw feed/blob record.
    ///
    /// Shape contract: an object with a long numeric id and an `images` map
    /// carrying the canonical `236x` key. Anything else is not a pin;
    /// malformed records yield `None` rather than an error.
    pub fn from_api_record(record: &serde_json::Value) -> Option<Pin> {
        let obj = record.as_object()?;

        let id = match obj.get("id") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => return None,
        };
        if id.len() < 10 || !id.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let thumb = obj
            .get("images")?
            .as_object()?
            .get(ImageSize::Small.segment())?
            .as_object()?
            .get("url")?
            .as_str()?;

        let mut pin = Pin::new(id, cdn::variants_for(thumb));
        if pin.images.is_empty() {
            return None;
        }

        pin.title = string_field(obj, &["title", "grid_title"]);
        pin.description = string_field(obj, &["description", "grid_description"]);
        pin.board_id = obj
            .get("board")
            .and_then(|b| b.get("id"))
            .or_else(|| obj.get("board_id"))
            .and_then(value_as_id);

        Some(pin)
    }
}

fn string_field(
    obj: &serde_json::Map<String, serde_json::Value>,
    keys: &[&str],
) -> Option<String> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(|v| v.as_str()))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn value_as_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Board-level metadata. `pin_count` comes from the source and is advisory
/// only; no loop anywhere terminates on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardInfo {
    pub id: String,
    pub name: String,
    pub url: String,
    pub pin_count: Option<u64>,
    pub owner: Option<String>,
}

impl BoardInfo {
    pub fn new(id: String, name: String, url: String) -> Self {
        Self {
            id,
            name,
            url,
            pin_count: None,
            owner: None,
        }
    }
}

/// Final frozen output of one scrape invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeOutcome {
    pub pins: Vec<Pin>,
    pub board: BoardInfo,
    /// Which strategy combination contributed, e.g. `browser-net+api+embedded`.
    pub provenance: String,
    /// Count of side-downloads that failed; partial failure is data, not an error.
    pub failed_downloads: usize,
    pub fetched_at: DateTime<Utc>,
}

impl ScrapeOutcome {
    /// Human-readable progress summary for the consuming UI layer.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} pins from \"{}\" via {}",
            self.pins.len(),
            self.board.name,
            self.provenance
        );
        if let Some(expected) = self.board.pin_count {
            if expected > 0 {
                let pct = (self.pins.len() as f64 / expected as f64 * 100.0).round();
                line.push_str(&format!(" ({} reported by source, ~{}%)", expected, pct));
            }
        }
        if self.failed_downloads > 0 {
            line.push_str(&format!("; {} downloads failed", self.failed_downloads));
        }
        line
    }
}
