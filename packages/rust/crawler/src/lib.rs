//! Bounded, concurrent documentation-site crawler.
//!
//! This crate provides:
//! - [`canonicalize`]: the URL form used as the visitation and cache key
//! - [`CrawlScope`]: same-site / allowed-domain link filter
//! - [`PageFetcher`]: browser-rendering ([`BrowserFetcher`]) and plain HTTP ([`HttpFetcher`]) fetchers
//! - [`Crawler`]: breadth-first engine with an atomic visited set and page cache

pub mod engine;
pub mod fetcher;
pub mod links;
pub mod scope;
pub mod testing;

pub use engine::{CrawlOutcome, Crawler, StopReason};
pub use fetcher::{BrowserFetcher, FetchedPage, HttpFetcher, PageFetcher, build_fetcher};
pub use links::canonicalize;
pub use scope::{CrawlScope, LinkScope};
