//! End-to-end run: seeds → crawl → normalize → extract → JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};
use url::Url;

use docmodules_crawler::{Crawler, PageFetcher, StopReason};
use docmodules_extractor::{Extractor, LanguageModel, UnitFailure};
use docmodules_markdown::{NormalizeOutcome, normalize_page};
use docmodules_shared::{
    CrawlConfig, DocModulesError, ExtractConfig, ExtractionResult, NormalizeConfig,
    NormalizedDocument, PageRecord, Result, RunId,
};
use docmodules_storage::PageCache;

/// Configuration for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Seed URLs, crawled together with one shared visited set.
    pub seeds: Vec<Url>,
    /// Where to write the result. `None` leaves writing to the caller.
    pub output: Option<PathBuf>,
    pub crawl: CrawlConfig,
    pub normalize: NormalizeConfig,
    pub extract: ExtractConfig,
}

/// Collaborators injected into a run.
pub struct PipelineDeps {
    pub fetcher: Arc<dyn PageFetcher>,
    pub model: Arc<dyn LanguageModel>,
    /// Cancelling stops the crawl from starting new fetches.
    pub cancel: CancellationToken,
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub result: ExtractionResult,
    pub pages_fetched: usize,
    pub cache_hits: usize,
    pub fetch_errors: usize,
    pub external_links: usize,
    pub stopped_early: Option<StopReason>,
    /// Documents handed to the extractor.
    pub documents: usize,
    /// Pages dropped for having too little text.
    pub excluded: Vec<String>,
    pub failed_units: Vec<UnitFailure>,
    pub repaired: usize,
    pub flattened: usize,
    pub output_path: Option<PathBuf>,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once the crawl has finished.
    fn crawled(&self, pages: usize, errors: usize);
    /// Called once normalization has finished.
    fn normalized(&self, kept: usize, excluded: usize);
    /// Called when the run completes successfully.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn crawled(&self, _pages: usize, _errors: usize) {}
    fn normalized(&self, _kept: usize, _excluded: usize) {}
    fn done(&self, _report: &RunReport) {}
}

/// Run the full pipeline.
///
/// 1. Crawl every seed down to the configured depth
/// 2. Normalize fetched pages, dropping near-empty ones
/// 3. Extract and merge modules with the model
/// 4. Write the JSON result, if an output path is configured
///
/// Fails with [`DocModulesError::Config`] when no seed could be fetched and
/// with the extractor's error when nothing could be extracted. No output is
/// written on failure.
pub async fn run(
    config: &RunConfig,
    deps: PipelineDeps,
    progress: &dyn ProgressReporter,
) -> Result<RunReport> {
    let run_id = RunId::new();
    let span = info_span!("run", %run_id, seeds = config.seeds.len());
    run_inner(run_id, config, deps, progress).instrument(span).await
}

async fn run_inner(
    run_id: RunId,
    config: &RunConfig,
    deps: PipelineDeps,
    progress: &dyn ProgressReporter,
) -> Result<RunReport> {
    let start = Instant::now();
    info!(seeds = ?config.seeds.iter().map(Url::as_str).collect::<Vec<_>>(), "starting run");

    if config.seeds.is_empty() {
        return Err(DocModulesError::config("at least one seed URL is required"));
    }

    // --- Phase 1: Crawl ---
    progress.phase("Crawling documentation");
    let mut crawler = Crawler::new(config.crawl.clone(), deps.fetcher);
    if let Some(cache) = open_cache(config.crawl.cache_dir.as_deref()).await {
        crawler = crawler.with_cache(cache);
    }

    let crawl = crawler.crawl(&config.seeds, deps.cancel).await?;
    progress.crawled(crawl.pages.len(), crawl.errors.len());

    if crawl.pages.is_empty() {
        let detail = crawl
            .errors
            .first()
            .map(|(url, err)| format!("; first error: {url}: {err}"))
            .unwrap_or_default();
        return Err(DocModulesError::config(format!(
            "no reachable seed URLs ({} fetch errors{detail})",
            crawl.errors.len()
        )));
    }

    // --- Phase 2: Normalize ---
    progress.phase("Normalizing pages");
    let records: Vec<PageRecord> = crawl.pages.values().cloned().collect();
    let normalized = normalize_concurrently(records).await;
    let outcome = NormalizeOutcome::partition(normalized, &config.normalize);
    progress.normalized(outcome.documents.len(), outcome.excluded.len());

    if outcome.documents.is_empty() {
        return Err(DocModulesError::NoResults(format!(
            "all {} fetched pages had too little text",
            outcome.excluded.len()
        )));
    }

    // --- Phase 3: Extract ---
    progress.phase("Extracting modules");
    let extractor = Extractor::new(deps.model, config.extract.clone());
    let extraction = extractor.extract(&outcome.documents).await?;

    // --- Phase 4: Output ---
    if let Some(path) = &config.output {
        progress.phase("Writing output");
        write_output(path, &extraction.result).await?;
    }

    let report = RunReport {
        run_id,
        result: extraction.result,
        pages_fetched: crawl.pages.len(),
        cache_hits: crawl.cache_hits,
        fetch_errors: crawl.errors.len(),
        external_links: crawl.external_links.len(),
        stopped_early: crawl.stopped_early,
        documents: outcome.documents.len(),
        excluded: outcome.excluded,
        failed_units: extraction.failures,
        repaired: extraction.repaired,
        flattened: extraction.flattened,
        output_path: config.output.clone(),
        elapsed: start.elapsed(),
    };

    progress.done(&report);

    info!(
        modules = report.result.len(),
        submodules = report.result.submodule_count(),
        pages = report.pages_fetched,
        documents = report.documents,
        failed_units = report.failed_units.len(),
        elapsed_ms = report.elapsed.as_millis(),
        "run complete"
    );

    Ok(report)
}

/// Open the page cache, or run uncached if it cannot be opened.
async fn open_cache(dir: Option<&Path>) -> Option<PageCache> {
    let dir = dir?;
    match PageCache::open(dir).await {
        Ok(cache) => Some(cache),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "page cache unavailable, continuing without it");
            None
        }
    }
}

/// Normalize every record on the blocking pool, returning documents in the
/// records' order.
async fn normalize_concurrently(records: Vec<PageRecord>) -> Vec<NormalizedDocument> {
    let mut tasks = JoinSet::new();
    for (index, record) in records.into_iter().enumerate() {
        tasks.spawn_blocking(move || (index, normalize_page(&record)));
    }

    let mut docs = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(done) => docs.push(done),
            Err(e) => warn!(error = %e, "normalization task failed, dropping page"),
        }
    }
    docs.sort_by_key(|(index, _)| *index);
    docs.into_iter().map(|(_, doc)| doc).collect()
}

/// Write `result` as pretty-printed JSON, atomically.
///
/// The file is written next to its destination and renamed into place, so
/// readers never see a partial document.
pub async fn write_output(path: &Path, result: &ExtractionResult) -> Result<()> {
    let mut json = serde_json::to_string_pretty(result)
        .map_err(|e| DocModulesError::validation(format!("failed to serialize result: {e}")))?;
    json.push('\n');

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DocModulesError::io(parent, e))?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| DocModulesError::config(format!("output path {} has no file name", path.display())))?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    tokio::fs::write(&tmp, json.as_bytes())
        .await
        .map_err(|e| DocModulesError::io(&tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(DocModulesError::io(path, e));
    }

    info!(path = %path.display(), modules = result.len(), "result written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmodules_shared::ModuleEntry;

    fn temp_path(label: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("dm-out-{label}-{}", uuid::Uuid::now_v7()))
            .join("extracted_modules.json")
    }

    #[tokio::test]
    async fn write_output_is_pretty_and_ordered() {
        let path = temp_path("pretty");
        let result: ExtractionResult = [
            ("Zeta".to_string(), ModuleEntry::default()),
            (
                "Alpha".to_string(),
                ModuleEntry {
                    description: "First".into(),
                    submodules: [("Sub".to_string(), "Desc".to_string())].into_iter().collect(),
                },
            ),
        ]
        .into_iter()
        .collect();

        write_output(&path, &result).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "{\n  \"Zeta\": {\n    \"Description\": \"\",\n    \"Submodules\": {}\n  },\n  \"Alpha\": {\n    \"Description\": \"First\",\n    \"Submodules\": {\n      \"Sub\": \"Desc\"\n    }\n  }\n}\n"
        );
        let tmp = path.with_file_name(".extracted_modules.json.tmp");
        assert!(!tmp.exists());
    }

    #[tokio::test]
    async fn empty_result_writes_empty_object() {
        let path = temp_path("empty");
        write_output(&path, &ExtractionResult::new()).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}\n");
    }
}
