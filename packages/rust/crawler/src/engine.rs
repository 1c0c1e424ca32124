//! Concurrent, scope-aware crawler engine.
//!
//! Traversal is breadth-first by depth level. Every target of a level is
//! fetched by a bounded pool of workers; the coordinator then processes the
//! level's results in frontier order and is the only place new targets are
//! claimed, so the visitation order (and the output order downstream) does not
//! depend on which fetch finished first.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use scraper::Html;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use docmodules_shared::{CrawlConfig, CrawlTarget, PageRecord, Result};
use docmodules_storage::{CacheEntry, PageCache};

use crate::fetcher::PageFetcher;
use crate::links::{canonicalize, extract_links, extract_title};
use crate::scope::{CrawlScope, LinkScope};

// ---------------------------------------------------------------------------
// CrawlOutcome
// ---------------------------------------------------------------------------

/// Why a crawl stopped before exhausting its frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The caller's cancellation token fired.
    Cancelled,
    /// The configured time budget elapsed.
    TimeBudget,
    /// Too many fetches failed in a row.
    ConsecutiveFailures,
}

/// Summary and pages of a completed crawl.
#[derive(Debug, Clone, Default)]
pub struct CrawlOutcome {
    /// Fetched pages keyed by canonical URL, in visitation order.
    pub pages: IndexMap<String, PageRecord>,
    /// Canonical cross-site links seen but never fetched.
    pub external_links: BTreeSet<String>,
    /// Failed fetches (canonical URL, error message).
    pub errors: Vec<(String, String)>,
    /// Links ignored by the scope filter plus targets dropped on cancellation.
    pub pages_skipped: usize,
    /// Pages served from the page cache.
    pub cache_hits: usize,
    pub stopped_early: Option<StopReason>,
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// Traversal context
// ---------------------------------------------------------------------------

/// State shared by the workers of one crawl run.
struct TraversalContext {
    fetcher: Arc<dyn PageFetcher>,
    cache: Option<PageCache>,
    visited: Mutex<HashSet<String>>,
    semaphore: Semaphore,
    fetch_timeout: Duration,
    rate_limit: Duration,
    cancel: CancellationToken,
}

impl TraversalContext {
    /// Atomically mark a canonical URL as visited.
    ///
    /// Returns `false` if it was already claimed.
    async fn claim(&self, canonical: &str) -> bool {
        self.visited.lock().await.insert(canonical.to_string())
    }
}

enum Visit {
    Fetched {
        page: PageRecord,
        links: Vec<Url>,
        /// Canonical form of the redirect target, when it differs from the page's.
        redirected_to: Option<String>,
    },
    Failed { url: String, error: String },
    Cancelled,
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

/// Bounded breadth-first crawler.
pub struct Crawler {
    config: CrawlConfig,
    fetcher: Arc<dyn PageFetcher>,
    cache: Option<PageCache>,
}

impl Crawler {
    pub fn new(config: CrawlConfig, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            config,
            fetcher,
            cache: None,
        }
    }

    /// Consult and populate `cache` around every network fetch.
    pub fn with_cache(mut self, cache: PageCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Crawl from `seeds` down to `config.max_depth` link hops.
    ///
    /// Individual fetch failures never fail the crawl. Cancelling `cancel`
    /// stops new fetches from starting; fetches already in flight finish or
    /// time out on their own.
    #[instrument(skip_all, fields(seeds = seeds.len(), max_depth = self.config.max_depth, fetcher = self.fetcher.name()))]
    pub async fn crawl(&self, seeds: &[Url], cancel: CancellationToken) -> Result<CrawlOutcome> {
        let started = Instant::now();
        let stop = cancel.child_token();
        let budget_timer = self.config.time_budget.map(|budget| {
            let stop = stop.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(budget) => {
                        info!(budget_secs = budget.as_secs_f64(), "crawl time budget exhausted");
                        stop.cancel();
                    }
                    _ = stop.cancelled() => {}
                }
            })
        });

        let scope = CrawlScope::new(seeds, &self.config);
        let ctx = Arc::new(TraversalContext {
            fetcher: Arc::clone(&self.fetcher),
            cache: self.cache.clone(),
            visited: Mutex::new(HashSet::new()),
            semaphore: Semaphore::new(self.config.concurrency.max(1) as usize),
            fetch_timeout: self.config.fetch_timeout,
            rate_limit: Duration::from_millis(self.config.rate_limit_ms),
            cancel: stop.clone(),
        });

        let mut outcome = CrawlOutcome::default();
        let mut frontier: Vec<(CrawlTarget, String)> = Vec::new();
        for seed in seeds {
            if !scope.seed_allowed(seed) {
                warn!(url = %seed, "seed blocked by scope, skipping");
                outcome.pages_skipped += 1;
                continue;
            }
            let canonical = canonicalize(seed);
            if ctx.claim(&canonical).await {
                frontier.push((CrawlTarget::seed(seed.clone()), canonical));
            }
        }

        info!(
            concurrency = self.config.concurrency,
            rate_limit_ms = self.config.rate_limit_ms,
            cached = self.cache.is_some(),
            "starting crawl"
        );

        let failure_cap = self.config.max_consecutive_failures;
        let mut consecutive_failures: u32 = 0;
        let mut failure_stop = false;
        let mut depth = 0u32;

        while !frontier.is_empty() && !stop.is_cancelled() {
            debug!(depth, targets = frontier.len(), "crawling level");

            let level_len = frontier.len();
            let mut tasks = JoinSet::new();
            for (index, (target, canonical)) in frontier.drain(..).enumerate() {
                let ctx = Arc::clone(&ctx);
                tasks.spawn(async move { (index, visit(&ctx, target, canonical).await) });
            }

            let mut results: Vec<(usize, Visit)> = Vec::with_capacity(level_len);
            while let Some(joined) = tasks.join_next().await {
                let (index, visit) = match joined {
                    Ok(done) => done,
                    Err(e) => {
                        warn!(error = %e, "crawl worker failed");
                        outcome.errors.push(("<worker>".into(), e.to_string()));
                        continue;
                    }
                };

                match &visit {
                    Visit::Fetched { .. } => consecutive_failures = 0,
                    Visit::Failed { url, error } => {
                        warn!(%url, %error, "fetch failed");
                        consecutive_failures += 1;
                        if failure_cap > 0 && consecutive_failures >= failure_cap && !stop.is_cancelled() {
                            warn!(consecutive_failures, "too many consecutive fetch failures, stopping crawl");
                            failure_stop = true;
                            stop.cancel();
                        }
                    }
                    Visit::Cancelled => {}
                }
                results.push((index, visit));
            }

            results.sort_by_key(|(index, _)| *index);

            let mut next = Vec::new();
            for (_, visit) in results {
                match visit {
                    Visit::Fetched { page, links, redirected_to } => {
                        if let Some(target) = redirected_to {
                            ctx.claim(&target).await;
                        }
                        for link in links {
                            match scope.classify(&link) {
                                LinkScope::Internal => {
                                    if page.depth >= self.config.max_depth || stop.is_cancelled() {
                                        continue;
                                    }
                                    let canonical = canonicalize(&link);
                                    if ctx.claim(&canonical).await {
                                        next.push((CrawlTarget::discovered(link, page.depth), canonical));
                                    }
                                }
                                LinkScope::External => {
                                    outcome.external_links.insert(canonicalize(&link));
                                }
                                LinkScope::Ignored => outcome.pages_skipped += 1,
                            }
                        }
                        if page.from_cache {
                            outcome.cache_hits += 1;
                        }
                        outcome.pages.insert(page.url.clone(), page);
                    }
                    Visit::Failed { url, error } => outcome.errors.push((url, error)),
                    Visit::Cancelled => outcome.pages_skipped += 1,
                }
            }

            frontier = next;
            depth += 1;
        }

        if let Some(timer) = budget_timer {
            timer.abort();
        }

        if stop.is_cancelled() {
            outcome.stopped_early = Some(if cancel.is_cancelled() {
                StopReason::Cancelled
            } else if failure_stop {
                StopReason::ConsecutiveFailures
            } else {
                StopReason::TimeBudget
            });
        }
        outcome.pages_skipped += frontier.len();
        outcome.duration = started.elapsed();

        info!(
            pages_fetched = outcome.pages.len(),
            cache_hits = outcome.cache_hits,
            external_links = outcome.external_links.len(),
            pages_skipped = outcome.pages_skipped,
            errors = outcome.errors.len(),
            stopped_early = ?outcome.stopped_early,
            duration_ms = outcome.duration.as_millis(),
            "crawl completed"
        );

        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Fetch one claimed target (cache first) and extract its links.
async fn visit(ctx: &TraversalContext, target: CrawlTarget, canonical: String) -> Visit {
    let Ok(_permit) = ctx.semaphore.acquire().await else {
        return Visit::Cancelled;
    };
    if ctx.cancel.is_cancelled() {
        return Visit::Cancelled;
    }

    let cached = match &ctx.cache {
        Some(cache) => cache.get(&canonical).await,
        None => None,
    };

    let (entry, from_cache) = match cached {
        Some(entry) => {
            debug!(url = %canonical, "cache hit");
            (entry, true)
        }
        None => {
            if !ctx.rate_limit.is_zero() {
                tokio::time::sleep(ctx.rate_limit).await;
            }

            let fetched = tokio::time::timeout(ctx.fetch_timeout, ctx.fetcher.fetch(target.url())).await;
            let fetched = match fetched {
                Ok(Ok(fetched)) => fetched,
                Ok(Err(e)) => {
                    return Visit::Failed {
                        url: canonical,
                        error: e.to_string(),
                    };
                }
                Err(_) => {
                    return Visit::Failed {
                        error: format!("timed out after {}s", ctx.fetch_timeout.as_secs()),
                        url: canonical,
                    };
                }
            };

            let mut entry = CacheEntry::now(canonical.clone(), fetched.html);
            if fetched.url != *target.url() {
                entry = entry.served_from(fetched.url.as_str());
            }
            if let Some(cache) = &ctx.cache {
                if let Err(e) = cache.put(&entry).await {
                    warn!(url = %canonical, error = %e, "failed to cache page");
                }
            }
            (entry, false)
        }
    };

    let base = entry
        .served_from
        .as_deref()
        .and_then(|served| Url::parse(served).ok())
        .unwrap_or_else(|| target.url().clone());
    let redirected_to = Some(canonicalize(&base)).filter(|c| *c != canonical);

    let (title, links) = inspect(&entry.raw_content, &base);
    debug!(url = %canonical, %base, depth = target.depth(), links = links.len(), from_cache, "page fetched");

    Visit::Fetched {
        page: PageRecord {
            url: canonical,
            depth: target.depth(),
            raw_content: entry.raw_content,
            fetched_at: entry.fetched_at,
            title,
            from_cache,
        },
        links,
        redirected_to,
    }
}

/// Title and outgoing links of a page. Kept synchronous: `Html` is not `Send`.
fn inspect(raw: &str, base: &Url) -> (Option<String>, Vec<Url>) {
    let doc = Html::parse_document(raw);
    (extract_title(&doc), extract_links(&doc, base))
}
