//! In-memory site for exercising the crawler without a network or browser.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use docmodules_shared::{DocModulesError, Result};

use crate::fetcher::{FetchedPage, PageFetcher};
use crate::links::canonicalize;

/// A fixed set of pages keyed by canonical URL, counting every fetch.
///
/// Unknown URLs fail like an HTTP 404.
#[derive(Default)]
pub struct StaticSite {
    pages: HashMap<String, String>,
    fetches: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
}

impl StaticSite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `html` at `url`.
    ///
    /// # Panics
    /// If `url` does not parse.
    pub fn page(mut self, url: &str, html: impl Into<String>) -> Self {
        let parsed = Url::parse(url).unwrap_or_else(|e| panic!("bad test url {url}: {e}"));
        self.pages.insert(canonicalize(&parsed), html.into());
        self
    }

    /// Sleep this long before answering each fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `url` (by canonical form) was requested.
    pub fn fetch_count(&self, url: &str) -> usize {
        let key = Url::parse(url).map(|u| canonicalize(&u)).unwrap_or_else(|_| url.to_string());
        self.counts().get(&key).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.counts().values().sum()
    }

    fn counts(&self) -> std::sync::MutexGuard<'_, HashMap<String, usize>> {
        self.fetches.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl PageFetcher for StaticSite {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage> {
        let key = canonicalize(url);
        *self.counts().entry(key.clone()).or_default() += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let html = self
            .pages
            .get(&key)
            .cloned()
            .ok_or_else(|| DocModulesError::Fetch(format!("{url}: HTTP 404 Not Found")))?;
        Ok(FetchedPage {
            url: url.clone(),
            html,
        })
    }

    fn name(&self) -> &str {
        "static"
    }
}
