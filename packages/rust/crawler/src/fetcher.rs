//! Page fetchers: headless-browser rendering and plain HTTP.
//!
//! The crawler only sees the [`PageFetcher`] trait, so tests can substitute an
//! in-memory site and the CLI can choose the renderer at runtime.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use reqwest::Client;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use docmodules_shared::{CrawlConfig, DocModulesError, Renderer, Result};

/// User-Agent string for HTTP fetches.
const USER_AGENT: &str = concat!("docmodules/", env!("CARGO_PKG_VERSION"));

/// Content types we refuse to treat as pages.
const NON_HTML_PREFIXES: &[&str] = &[
    "image/",
    "audio/",
    "video/",
    "font/",
    "application/pdf",
    "application/zip",
    "application/octet-stream",
];

/// Markup of a fetched page and the URL it was finally served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// Address after redirects. Relative links resolve against this.
    pub url: Url,
    pub html: String,
}

/// Fetches the markup of a single page.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Return the page, or a [`DocModulesError::Fetch`] for network and
    /// non-2xx HTTP failures.
    async fn fetch(&self, url: &Url) -> Result<FetchedPage>;

    /// Short name for tracing.
    fn name(&self) -> &str;
}

/// Build the fetcher selected by `config.renderer`.
pub async fn build_fetcher(config: &CrawlConfig) -> Result<Arc<dyn PageFetcher>> {
    Ok(match config.renderer {
        Renderer::Browser => Arc::new(BrowserFetcher::launch(config.fetch_timeout).await?),
        Renderer::Http => Arc::new(HttpFetcher::new(config.fetch_timeout)?),
    })
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Plain HTTP GET fetcher. Does not execute scripts.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()
            .map_err(|e| DocModulesError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage> {
        debug!(%url, "http fetch");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| DocModulesError::Fetch(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DocModulesError::Fetch(format!("{url}: HTTP {status}")));
        }

        let final_url = response.url().clone();
        if final_url != *url {
            debug!(%url, %final_url, "redirected");
        }

        if let Some(content_type) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            let content_type = content_type.to_ascii_lowercase();
            if NON_HTML_PREFIXES.iter().any(|p| content_type.starts_with(p)) {
                return Err(DocModulesError::Fetch(format!(
                    "{url}: unsupported content type {content_type}"
                )));
            }
        }

        let html = response
            .text()
            .await
            .map_err(|e| DocModulesError::Fetch(format!("{url}: body read failed: {e}")))?;

        Ok(FetchedPage {
            url: final_url,
            html,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

// ---------------------------------------------------------------------------
// Headless browser
// ---------------------------------------------------------------------------

/// Renders pages in headless Chromium and returns the post-script DOM.
///
/// One browser process is shared by all workers; each fetch opens and closes
/// its own tab.
pub struct BrowserFetcher {
    browser: Browser,
    handler: Mutex<Option<JoinHandle<()>>>,
    timeout: Duration,
}

impl BrowserFetcher {
    /// Launch the browser. Failure here is fatal for the run.
    pub async fn launch(timeout: Duration) -> Result<Self> {
        let config = BrowserConfig::builder()
            .no_sandbox()
            .request_timeout(timeout)
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .build()
            .map_err(|e| DocModulesError::config(format!("invalid browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
            DocModulesError::config(format!(
                "failed to launch headless Chromium: {e}. Install Chromium or use `--renderer http`"
            ))
        })?;

        // The CDP event loop must be polled for the browser to make progress.
        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        info!(timeout_secs = timeout.as_secs(), "headless browser launched");

        Ok(Self {
            browser,
            handler: Mutex::new(Some(handle)),
            timeout,
        })
    }

    async fn render(&self, url: &Url) -> Result<FetchedPage> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| DocModulesError::Fetch(format!("{url}: new tab failed: {e}")))?;

        let rendered = async {
            page.goto(url.as_str())
                .await
                .map_err(|e| DocModulesError::Fetch(format!("{url}: navigation failed: {e}")))?;
            let navigation = page
                .wait_for_navigation_response()
                .await
                .map_err(|e| DocModulesError::Fetch(format!("{url}: load failed: {e}")))?;
            let status = navigation
                .as_ref()
                .and_then(|request| request.response.as_ref())
                .map(|response| response.status);
            check_navigation_status(url, status)?;

            let final_url = match page.url().await {
                Ok(Some(current)) => Url::parse(&current).unwrap_or_else(|_| url.clone()),
                _ => url.clone(),
            };
            let html = page
                .content()
                .await
                .map_err(|e| DocModulesError::Fetch(format!("{url}: DOM read failed: {e}")))?;

            Ok::<_, DocModulesError>(FetchedPage {
                url: final_url,
                html,
            })
        }
        .await;

        if let Err(e) = page.close().await {
            debug!(%url, error = %e, "failed to close tab");
        }

        rendered
    }
}

/// Reject a rendered page whose main document came back non-2xx.
///
/// No status (a page served without a network response) passes.
fn check_navigation_status(url: &Url, status: Option<i64>) -> Result<()> {
    match status {
        Some(code) if !(200..300).contains(&code) => {
            Err(DocModulesError::Fetch(format!("{url}: HTTP {code}")))
        }
        _ => Ok(()),
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage> {
        debug!(%url, "browser fetch");
        tokio::time::timeout(self.timeout, self.render(url))
            .await
            .map_err(|_| {
                DocModulesError::Fetch(format!(
                    "{url}: render timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
    }

    fn name(&self) -> &str {
        "browser"
    }
}

impl Drop for BrowserFetcher {
    fn drop(&mut self) {
        match self.handler.lock() {
            Ok(mut guard) => {
                if let Some(handle) = guard.take() {
                    handle.abort();
                }
            }
            Err(_) => warn!("browser handler lock poisoned"),
        }
    }
}
