//! Best-effort board metadata resolution.
//!
//! Name and expected count feed the completion estimate and the summary
//! line; neither is ever a termination condition. The reported pin count in
//! particular drifts from what the feed will actually serve.

use serde_json::Value;
use tracing::debug;

use crate::extract::{embedded, walk_json, Walk};
use crate::feed::BoardPath;
use crate::models::BoardInfo;

/// Key variants observed for the board name across site releases.
const NAME_KEYS: &[&str] = &["name", "board_name", "seo_title"];

/// Key variants for the advisory item count.
const COUNT_KEYS: &[&str] = &["pin_count", "pinCount"];

/// Resolve board metadata from markup, falling back to the URL slug.
pub fn resolve(markup: Option<&str>, board_url: &str, path: &BoardPath) -> BoardInfo {
    let blob = markup.and_then(embedded::locate_state_blob);

    let mut info = BoardInfo::new(
        format!("{}/{}", path.owner, path.slug),
        deslug(&path.slug),
        board_url.to_string(),
    );
    info.owner = Some(path.owner.clone());

    if let Some(blob) = blob {
        apply_blob(&mut info, &blob);
    }

    debug!(
        "board metadata: \"{}\" ({} reported)",
        info.name,
        info.pin_count
            .map(|c| c.to_string())
            .unwrap_or_else(|| "no count".into())
    );
    info
}

/// Walk the blob for a board-shaped object: something carrying one of the
/// count keys. Its name and id are the most trustworthy variant; a bare name
/// string is the fallback.
fn apply_blob(info: &mut BoardInfo, blob: &Value) {
    let mut board_node_found = false;
    let mut fallback_name: Option<String> = None;

    walk_json(blob, 10, &mut |_, node| {
        let Some(obj) = node.as_object() else {
            return Walk::Descend;
        };

        let count = COUNT_KEYS.iter().find_map(|k| obj.get(*k).and_then(Value::as_u64));
        if let Some(count) = count {
            if !board_node_found {
                board_node_found = true;
                info.pin_count = Some(count);
                if let Some(name) = NAME_KEYS
                    .iter()
                    .find_map(|k| obj.get(*k).and_then(Value::as_str))
                    .filter(|n| !n.is_empty())
                {
                    info.name = name.to_string();
                }
                if let Some(id) = obj.get("id").and_then(Value::as_str) {
                    if id.bytes().all(|b| b.is_ascii_digit()) {
                        info.id = id.to_string();
                    }
                }
            }
            return Walk::Prune;
        }

        if fallback_name.is_none() {
            fallback_name = obj
                .get("board_name")
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
                .map(str::to_string);
        }
        Walk::Descend
    });

    if !board_node_found {
        if let Some(name) = fallback_name {
            info.name = name;
        }
    }
}

/// Turn a URL slug back into a readable name.
fn deslug(slug: &str) -> String {
    slug.replace(['-', '_'], " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path() -> BoardPath {
        BoardPath {
            owner: "alice".into(),
            slug: "autumn-recipes".into(),
        }
    }

    fn markup_with(blob: &Value) -> String {
        format!("<script id=\"__PWS_DATA__\">{}</script>", blob)
    }

    #[test]
    fn test_resolve_from_blob() {
        let blob = json!({
            "props": {
                "board": {
                    "id": "987654321",
                    "name": "Autumn Recipes",
                    "pin_count": 142
                }
            }
        });
        let markup = markup_with(&blob);

        let info = resolve(Some(&markup), "https://example.com/alice/autumn-recipes/", &path());
        assert_eq!(info.name, "Autumn Recipes");
        assert_eq!(info.pin_count, Some(142));
        assert_eq!(info.id, "987654321");
        assert_eq!(info.owner.as_deref(), Some("alice"));
    }

    #[test]
    fn test_resolve_camel_case_count_key() {
        let blob = json!({"board": {"name": "B", "pinCount": 7}});
        let markup = markup_with(&blob);
        let info = resolve(Some(&markup), "u", &path());
        assert_eq!(info.pin_count, Some(7));
    }

    #[test]
    fn test_slug_fallback_when_no_markup() {
        let info = resolve(None, "https://example.com/alice/autumn-recipes/", &path());
        assert_eq!(info.name, "autumn recipes");
        assert_eq!(info.pin_count, None);
        assert_eq!(info.id, "alice/autumn-recipes");
    }

    #[test]
    fn test_slug_fallback_when_blob_lacks_board() {
        let markup = markup_with(&json!({"unrelated": true}));
        let info = resolve(Some(&markup), "u", &path());
        assert_eq!(info.name, "autumn recipes");
    }
}
