//! Continuation-token pagination against the internal feed endpoint.
//!
//! The endpoint is not meant for external consumers: requests must look like
//! the board page's own XHR traffic, the next-token moves between nesting
//! paths across site releases, and a non-success response means "you are
//! done", not "you crashed".

use std::collections::HashSet;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{FetchError, ScrapeError};
use crate::extract::json_path;
use crate::fetch::{jitter_between, HttpClient};
use crate::models::Pin;

/// Path prefixes that are site features, never board owners.
const RESERVED_SEGMENTS: &[&str] = &[
    "pin", "search", "resource", "ideas", "settings", "business", "today",
];

/// Bookmark value the feed returns when pagination is exhausted.
const BOOKMARK_END: &str = "-end-";

/// Known nesting paths for the next bookmark, probed in order.
const BOOKMARK_PATHS: &[&str] = &[
    "resource_response.bookmark",
    "resource.options.bookmarks.0",
    "bookmarks.0",
];

/// Owner handle and board slug from the fixed two-segment board path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardPath {
    pub owner: String,
    pub slug: String,
}

impl BoardPath {
    /// The `source_url` form the feed endpoint expects.
    pub fn source_url(&self) -> String {
        format!("/{}/{}/", self.owner, self.slug)
    }
}

/// Parse `https://site/<owner>/<slug>/` into its parts.
pub fn parse_board_path(board_url: &str) -> Result<BoardPath, ScrapeError> {
    let parsed = url::Url::parse(board_url)
        .map_err(|_| ScrapeError::InvalidBoardUrl(board_url.to_string()))?;

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    match segments.as_slice() {
        [owner, slug] if !RESERVED_SEGMENTS.contains(owner) => Ok(BoardPath {
            owner: (*owner).to_string(),
            slug: (*slug).to_string(),
        }),
        _ => Err(ScrapeError::InvalidBoardUrl(board_url.to_string())),
    }
}

/// Scheme + host of a URL, for building resource endpoint addresses.
pub fn origin_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|host| format!("{}://{}", u.scheme(), host)))
}

/// One feed page request.
#[derive(Debug, Clone)]
pub struct FeedRequest {
    pub source_url: String,
    pub page_size: u32,
    pub bookmark: Option<String>,
}

impl FeedRequest {
    /// JSON options envelope for the `data` query parameter.
    pub fn data_envelope(&self) -> Value {
        let mut options = json!({
            "board_url": self.source_url,
            "page_size": self.page_size,
            "field_set_key": "react_grid_pin",
            "sort": "default",
            "layout": "default",
        });
        if let Some(ref bookmark) = self.bookmark {
            options["bookmarks"] = json!([bookmark]);
        }
        json!({ "options": options, "context": {} })
    }
}

/// Transport seam so pagination logic is testable against mock pages.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn fetch_page(&self, request: &FeedRequest) -> Result<Value, FetchError>;
}

/// Live transport hitting the site's resource endpoint.
pub struct HttpFeedTransport {
    client: HttpClient,
    origin: String,
}

impl HttpFeedTransport {
    /// `client` should carry the board page as referer so requests appear to
    /// originate from it.
    pub fn new(client: HttpClient, origin: String) -> Self {
        Self { client, origin }
    }
}

#[async_trait]
impl FeedTransport for HttpFeedTransport {
    async fn fetch_page(&self, request: &FeedRequest) -> Result<Value, FetchError> {
        let url = format!(
            "{}/resource/BoardFeedResource/get/?source_url={}&data={}",
            self.origin,
            urlencoding::encode(&request.source_url),
            urlencoding::encode(&request.data_envelope().to_string()),
        );
        self.client.get_json(&url, true).await
    }
}

/// Decode the batch of raw records from one feed response body.
pub fn decode_feed_items(body: &Value) -> Vec<Pin> {
    let records = [
        json_path(body, "resource_response.data"),
        json_path(body, "resource_response.data.results"),
        json_path(body, "data"),
    ]
    .into_iter()
    .find_map(Value::as_array);

    records
        .map(|items| items.iter().filter_map(Pin::from_api_record).collect())
        .unwrap_or_default()
}

/// Probe the known nesting paths for the next bookmark.
/// `-end-` (and absence) means exhaustion.
pub fn next_bookmark(body: &Value) -> Option<String> {
    BOOKMARK_PATHS
        .iter()
        .find_map(|path| json_path(body, path).as_str())
        .filter(|token| !token.is_empty() && *token != BOOKMARK_END)
        .map(str::to_string)
}

/// Walks the feed endpoint until it stops yielding new items.
pub struct PaginationClient {
    transport: Box<dyn FeedTransport>,
    page_size: u32,
    max_pages: u32,
    delay_bounds: (u64, u64),
}

impl PaginationClient {
    pub fn new(transport: Box<dyn FeedTransport>, page_size: u32, max_pages: u32) -> Self {
        Self {
            transport,
            page_size,
            max_pages,
            delay_bounds: (300, 800),
        }
    }

    pub fn with_delay_bounds(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.delay_bounds = (min_ms, max_ms);
        self
    }

    /// Collect pins page by page, strictly sequentially: each bookmark is
    /// only valid once the prior response has been consumed.
    ///
    /// Stops when a page adds zero new unique items, when no bookmark comes
    /// back, at the page bound, or when the wall-clock deadline passes.
    /// Non-success responses return whatever accumulated so far.
    pub async fn collect(&self, board: &BoardPath, deadline: Instant) -> Vec<Pin> {
        let mut pins: Vec<Pin> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut bookmark: Option<String> = None;

        for page in 0..self.max_pages {
            if Instant::now() >= deadline {
                warn!("budget exhausted at feed page {page}; stopping with {} pins", pins.len());
                break;
            }

            let request = FeedRequest {
                source_url: board.source_url(),
                page_size: self.page_size,
                bookmark: bookmark.clone(),
            };

            let body = match self.transport.fetch_page(&request).await {
                Ok(body) => body,
                Err(err) => {
                    // The feed refusing us mid-walk is exhaustion, not failure.
                    warn!("feed page {page} failed ({err}); stopping with {} pins", pins.len());
                    break;
                }
            };

            let batch = decode_feed_items(&body);
            let mut added = 0usize;
            for pin in batch {
                if seen.insert(pin.id.clone()) {
                    pins.push(pin);
                    added += 1;
                }
            }
            debug!("feed page {page}: {added} new pins");

            if added == 0 {
                break;
            }
            bookmark = next_bookmark(&body);
            if bookmark.is_none() {
                break;
            }

            tokio::time::sleep(jitter_between(self.delay_bounds.0, self.delay_bounds.1)).await;
        }

        info!("feed pagination collected {} pins", pins.len());
        pins
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    fn record(id: u64) -> Value {
        json!({
            "id": id.to_string(),
            "images": {
                "236x": {"url": format!("https://i.pinimg.com/236x/aa/bb/{:032x}.jpg", id)}
            }
        })
    }

    struct MockTransport {
        pages: Mutex<Vec<Value>>,
    }

    impl MockTransport {
        fn new(pages: Vec<Value>) -> Self {
            Self {
                pages: Mutex::new(pages),
            }
        }
    }

    #[async_trait]
    impl FeedTransport for MockTransport {
        async fn fetch_page(&self, _request: &FeedRequest) -> Result<Value, FetchError> {
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                Err(FetchError::Status(404))
            } else {
                Ok(pages.remove(0))
            }
        }
    }

    fn page(ids: &[u64], bookmark: Option<&str>) -> Value {
        let mut body = json!({
            "resource_response": {
                "data": ids.iter().map(|id| record(*id)).collect::<Vec<_>>()
            }
        });
        if let Some(b) = bookmark {
            body["resource_response"]["bookmark"] = json!(b);
        }
        body
    }

    #[test]
    fn test_parse_board_path() {
        let path = parse_board_path("https://www.pinterest.com/alice/sunsets/").unwrap();
        assert_eq!(path.owner, "alice");
        assert_eq!(path.slug, "sunsets");
        assert_eq!(path.source_url(), "/alice/sunsets/");
    }

    #[test]
    fn test_parse_board_path_rejects_reserved() {
        assert!(parse_board_path("https://www.pinterest.com/pin/12345/").is_err());
        assert!(parse_board_path("https://www.pinterest.com/alice/").is_err());
        assert!(parse_board_path("not a url").is_err());
    }

    #[test]
    fn test_origin_of_extracts_scheme_and_host() {
        assert_eq!(
            origin_of("https://www.pinterest.com/alice/sunsets/").as_deref(),
            Some("https://www.pinterest.com")
        );
        assert_eq!(origin_of("not a url"), None);
    }

    #[test]
    fn test_bookmark_probing_all_paths() {
        let a = json!({"resource_response": {"bookmark": "tok1"}});
        let b = json!({"resource": {"options": {"bookmarks": ["tok2"]}}});
        let c = json!({"bookmarks": ["tok3"]});
        assert_eq!(next_bookmark(&a).as_deref(), Some("tok1"));
        assert_eq!(next_bookmark(&b).as_deref(), Some("tok2"));
        assert_eq!(next_bookmark(&c).as_deref(), Some("tok3"));
    }

    #[test]
    fn test_bookmark_end_sentinel() {
        let body = json!({"resource_response": {"bookmark": "-end-"}});
        assert_eq!(next_bookmark(&body), None);
        assert_eq!(next_bookmark(&json!({})), None);
    }

    #[tokio::test]
    async fn test_pagination_stops_on_no_new_items() {
        let transport = MockTransport::new(vec![
            page(&[10000000001, 10000000002], Some("b1")),
            // Same ids again: zero new uniques, must stop here.
            page(&[10000000001, 10000000002], Some("b2")),
            page(&[10000000003], Some("b3")),
        ]);
        let board = BoardPath {
            owner: "alice".into(),
            slug: "sunsets".into(),
        };

        let client = PaginationClient::new(Box::new(transport), 25, 200).with_delay_bounds(1, 2);
        let pins = client.collect(&board, far_deadline()).await;

        assert_eq!(pins.len(), 2);
    }

    #[tokio::test]
    async fn test_pagination_respects_page_bound() {
        // Every page yields a fresh item and another bookmark.
        let pages: Vec<Value> = (0..50)
            .map(|i| page(&[10000000000 + i], Some("more")))
            .collect();
        let transport = MockTransport::new(pages);
        let board = BoardPath {
            owner: "alice".into(),
            slug: "sunsets".into(),
        };

        let client = PaginationClient::new(Box::new(transport), 25, 5).with_delay_bounds(1, 2);
        let pins = client.collect(&board, far_deadline()).await;

        assert_eq!(pins.len(), 5);
    }

    #[tokio::test]
    async fn test_pagination_stops_without_bookmark() {
        let transport = MockTransport::new(vec![
            page(&[10000000001], Some("b1")),
            page(&[10000000002], None),
            page(&[10000000003], Some("b3")),
        ]);
        let board = BoardPath {
            owner: "alice".into(),
            slug: "s".into(),
        };

        let client = PaginationClient::new(Box::new(transport), 25, 200).with_delay_bounds(1, 2);
        let pins = client.collect(&board, far_deadline()).await;
        assert_eq!(pins.len(), 2);
    }

    #[tokio::test]
    async fn test_http_error_returns_accumulated() {
        // Second fetch errors (pages drained) -> partial results, no panic.
        let transport = MockTransport::new(vec![page(&[10000000001], Some("b1"))]);
        let board = BoardPath {
            owner: "alice".into(),
            slug: "s".into(),
        };

        let client = PaginationClient::new(Box::new(transport), 25, 200).with_delay_bounds(1, 2);
        let pins = client.collect(&board, far_deadline()).await;
        assert_eq!(pins.len(), 1);
    }

    #[tokio::test]
    async fn test_blown_deadline_returns_accumulated() {
        // Endless pages, but the deadline passes during the first
        // inter-request delay; the loop truncates with what it has.
        let pages: Vec<Value> = (0..10)
            .map(|i| page(&[10000000000 + i], Some("more")))
            .collect();
        let transport = MockTransport::new(pages);
        let board = BoardPath {
            owner: "alice".into(),
            slug: "s".into(),
        };

        let client = PaginationClient::new(Box::new(transport), 25, 200).with_delay_bounds(60, 61);
        let deadline = Instant::now() + Duration::from_millis(20);
        let pins = client.collect(&board, deadline).await;

        assert!(!pins.is_empty());
        assert!(pins.len() < 10);
    }

    #[test]
    fn test_request_carries_bookmark_in_envelope() {
        let request = FeedRequest {
            source_url: "/alice/s/".into(),
            page_size: 25,
            bookmark: Some("tok".into()),
        };
        let envelope = request.data_envelope();
        assert_eq!(envelope["options"]["bookmarks"][0], "tok");
        assert_eq!(envelope["options"]["page_size"], 25);
    }

    #[test]
    fn test_decode_feed_items_nested_results() {
        let body = json!({
            "resource_response": {"data": {"results": [record(10000000007)]}}
        });
        assert_eq!(decode_feed_items(&body).len(), 1);
    }
}
