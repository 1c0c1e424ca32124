//! Core domain types shared by the crawl, normalize, and extract stages.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one pipeline run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Crawl types
// ---------------------------------------------------------------------------

/// A URL scheduled for fetching, with the depth at which it was discovered.
///
/// Seeds have depth 0; a link found on a page at depth `d` gets `d + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTarget {
    url: Url,
    depth: u32,
}

impl CrawlTarget {
    pub fn seed(url: Url) -> Self {
        Self { url, depth: 0 }
    }

    pub fn discovered(url: Url, parent_depth: u32) -> Self {
        Self {
            url,
            depth: parent_depth + 1,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }
}

/// A fetched page. Written once by the crawler, read by the normalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    /// Canonical URL (the visitation key).
    pub url: String,
    /// Link-hops from the nearest seed.
    pub depth: u32,
    /// Rendered page markup.
    pub raw_content: String,
    /// When the markup was fetched (the cache timestamp on a cache hit).
    pub fetched_at: DateTime<Utc>,
    /// Document title, if one was found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Whether the markup came from the page cache.
    #[serde(default)]
    pub from_cache: bool,
}

/// Cleaned, model-consumable text derived from a [`PageRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedDocument {
    /// Canonical URL of the source page.
    pub url: String,
    /// Page title carried over from the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Markup-free text with `#` headings, `- ` list items, and pipe tables.
    pub clean_text: String,
    /// Fetch timestamp of the record this was derived from.
    pub source_fetched_at: DateTime<Utc>,
}

impl NormalizedDocument {
    /// Whether normalization produced no text at all.
    pub fn is_empty(&self) -> bool {
        self.clean_text.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Extraction result
// ---------------------------------------------------------------------------

/// One module: a description and its named submodules.
///
/// Serializes as `{"Description": "...", "Submodules": {"name": "description"}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEntry {
    #[serde(rename = "Description", default)]
    pub description: String,
    #[serde(rename = "Submodules", default)]
    pub submodules: IndexMap<String, String>,
}

/// Two-level module → submodule hierarchy.
///
/// Insertion order is preserved so that merged output lists modules in the
/// order their first source page was crawled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractionResult {
    modules: IndexMap<String, ModuleEntry>,
}

impl ExtractionResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ModuleEntry> {
        self.modules.get(name)
    }

    pub fn modules(&self) -> impl Iterator<Item = (&str, &ModuleEntry)> {
        self.modules.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Total number of submodules across all modules.
    pub fn submodule_count(&self) -> usize {
        self.modules.values().map(|m| m.submodules.len()).sum()
    }

    /// Add one module, merging into an existing entry of the same name.
    ///
    /// Blank names are ignored. The first non-empty description wins, for
    /// modules and submodules alike; later sources only fill gaps.
    pub fn insert_module(&mut self, name: &str, entry: ModuleEntry) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }

        let slot = self.modules.entry(name.to_string()).or_default();
        if slot.description.trim().is_empty() {
            slot.description = entry.description;
        }

        for (sub_name, sub_desc) in entry.submodules {
            let sub_name = sub_name.trim();
            if sub_name.is_empty() {
                continue;
            }
            let existing = slot.submodules.entry(sub_name.to_string()).or_default();
            if existing.trim().is_empty() {
                *existing = sub_desc;
            }
        }
    }

    /// Merge a later document's result into this one.
    pub fn merge(&mut self, other: ExtractionResult) {
        for (name, entry) in other.modules {
            self.insert_module(&name, entry);
        }
    }
}

impl FromIterator<(String, ModuleEntry)> for ExtractionResult {
    fn from_iter<I: IntoIterator<Item = (String, ModuleEntry)>>(iter: I) -> Self {
        let mut result = Self::new();
        for (name, entry) in iter {
            result.insert_module(&name, entry);
        }
        result
    }
}
