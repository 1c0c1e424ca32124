//! Content normalizer: raw page markup to model-consumable text.
//!
//! [`normalize_page`] selects the page's content region, strips navigation
//! and boilerplate, converts the rest to Markdown with `htmd`, then runs a
//! cleanup pipeline down to plain text with `#` headings, `- ` list items and
//! pipe tables. It is a pure function of the page's raw content: no clock, no
//! randomness, no I/O, and it never fails.

mod cleanup;
mod content;

use tracing::{debug, instrument, warn};

use docmodules_shared::{NormalizeConfig, NormalizedDocument, PageRecord};

/// Tags `htmd` must never render, even if they slip past chrome stripping.
const SKIP_TAGS: &[&str] = &["script", "style", "nav", "iframe", "noscript", "svg", "img"];

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Normalized documents split into extractor input and excluded pages.
#[derive(Debug, Clone, Default)]
pub struct NormalizeOutcome {
    /// Documents long enough to be worth extracting, in input order.
    pub documents: Vec<NormalizedDocument>,
    /// URLs whose text fell below the minimum useful length.
    pub excluded: Vec<String>,
}

impl NormalizeOutcome {
    /// Split already-normalized documents by the minimum-length rule.
    ///
    /// Short pages are logged as a warning and excluded, never treated as
    /// failures.
    pub fn partition(
        documents: impl IntoIterator<Item = NormalizedDocument>,
        config: &NormalizeConfig,
    ) -> Self {
        let mut outcome = Self::default();
        for doc in documents {
            let chars = text_len(&doc.clean_text);
            if chars < config.min_text_chars {
                warn!(url = %doc.url, chars, min = config.min_text_chars, "page has too little text, excluding");
                outcome.excluded.push(doc.url);
            } else {
                outcome.documents.push(doc);
            }
        }
        outcome
    }
}

/// Convert one fetched page to clean text.
///
/// Unconvertible markup yields a document with empty `clean_text`.
#[instrument(skip_all, fields(url = %record.url))]
pub fn normalize_page(record: &PageRecord) -> NormalizedDocument {
    NormalizedDocument {
        url: record.url.clone(),
        title: record.title.clone(),
        clean_text: clean_text(&record.raw_content),
        source_fetched_at: record.fetched_at,
    }
}

/// Normalize every record in order and drop the ones below the length floor.
pub fn normalize_all<'a>(
    records: impl IntoIterator<Item = &'a PageRecord>,
    config: &NormalizeConfig,
) -> NormalizeOutcome {
    NormalizeOutcome::partition(records.into_iter().map(normalize_page), config)
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

fn clean_text(raw: &str) -> String {
    let region = content::select_content(raw);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIP_TAGS.to_vec())
        .build();

    let markdown = match converter.convert(&region.html) {
        Ok(md) => md,
        Err(e) => {
            warn!(error = %e, "markup conversion failed, treating page as empty");
            return String::new();
        }
    };

    let cleaned = cleanup::run_pipeline(&markdown, &region.tables);
    debug!(raw_len = raw.len(), clean_len = cleaned.len(), tables = region.tables.len(), "page normalized");
    cleaned
}

/// Visible characters, ignoring whitespace.
fn text_len(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
