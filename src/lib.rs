//! Board media extraction engine.
//!
//! Pulls a bounded, deduplicated pin list (with per-resolution image URLs)
//! out of a Pinterest-style board that offers no public API: an embedded
//! state blob, raw markup, an internal bookmark-paginated feed, and
//! optionally a live browser session are all mined and reconciled into one
//! trustworthy result.
//!
//! Entry point: [`pipeline::Scraper::run`].

pub mod board_meta;
pub mod browser;
pub mod cdn;
pub mod config;
pub mod error;
pub mod extract;
pub mod feed;
pub mod fetch;
pub mod fuse;
pub mod models;
pub mod pipeline;

pub use config::{BrowserConfig, ScrapeConfig};
pub use error::{FetchError, ScrapeError};
pub use models::{BoardInfo, ImageSize, Pin, ScrapeOutcome};
pub use pipeline::Scraper;
