//! CDN image URL handling: identity hashes and size-variant substitution.
//!
//! Image URLs look like `https://i.pinimg.com/236x/ab/cd/abcdef...1234.jpg`.
//! The first path segment is a resolution tag; the final segment (minus
//! extension) is a long hex content hash that stays stable across all
//! resolutions of the same asset. That hash is the correlation key used to
//! match candidates found by different strategies.

use std::collections::BTreeMap;

use url::Url;

use crate::models::ImageSize;

/// Minimum hex length for a filename to count as a content hash.
/// Shorter or non-hex names are UI asset files, not content.
pub const MIN_HASH_LEN: usize = 16;

/// Derive the identity hash from a CDN image URL.
///
/// Returns `None` when the final path segment is missing, too short, or not
/// lowercase hex.
pub fn identity_hash(url: &str) -> Option<String> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        // Tolerate bare paths and protocol-relative URLs from srcset lists.
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    };

    let last = path.rsplit('/').next()?;
    let stem = last.rsplit_once('.').map(|(s, _)| s).unwrap_or(last);

    if stem.len() >= MIN_HASH_LEN && stem.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
    {
        Some(stem.to_string())
    } else {
        None
    }
}

/// Replace the resolution segment of a CDN URL with the target size tag.
///
/// Pure string transform over `host/{segment}/rest`; applying it twice with
/// the same target is the same as applying it once.
pub fn substitute_size(url: &str, size: ImageSize) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;

    let mut segments: Vec<&str> = parsed.path_segments()?.collect();
    if segments.is_empty() || segments[0].is_empty() {
        return None;
    }
    segments[0] = size.segment();

    Some(format!(
        "{}://{}/{}",
        parsed.scheme(),
        host,
        segments.join("/")
    ))
}

/// Produce the full set of content-size variant URLs for one asset.
///
/// The tiny tag is deliberately absent: it is reserved for fixed-size UI
/// thumbnails and never referenced as content.
pub fn variants_for(url: &str) -> BTreeMap<ImageSize, String> {
    let mut variants = BTreeMap::new();
    for size in ImageSize::content_sizes() {
        if let Some(variant) = substitute_size(url, size) {
            variants.insert(size, variant);
        }
    }
    variants
}

/// True when a resolution segment is a fixed-size UI thumbnail tag
/// (`75x75_RS`, `30x30`, ...). Content tags carry only a width (`236x`) or
/// are `originals`.
pub fn is_fixed_thumb_segment(segment: &str) -> bool {
    let base = segment.strip_suffix("_RS").unwrap_or(segment);
    let mut parts = base.splitn(2, 'x');
    match (parts.next(), parts.next()) {
        (Some(w), Some(h)) => {
            !w.is_empty() && !h.is_empty() && w.bytes().all(|b| b.is_ascii_digit()) && h.bytes().all(|b| b.is_ascii_digit())
        }
        _ => false,
    }
}
