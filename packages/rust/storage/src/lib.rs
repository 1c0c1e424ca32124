//! Directory-based page cache.
//!
//! The [`PageCache`] stores one JSON file per canonical URL holding the raw
//! page markup and its fetch timestamp. Entries are never expired; a cached
//! page short-circuits the network fetch on every later run.
//!
//! **Access rules:**
//! - The crawler is the only writer; writes go through a temp file + rename so
//!   concurrent workers never observe a half-written entry.
//! - A corrupt or unreadable entry is treated as a cache miss.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use docmodules_shared::{DocModulesError, Result};

/// Longest readable URL prefix kept in a cache file name.
const MAX_SLUG_LEN: usize = 80;

/// Hex chars of the URL hash appended to each file name.
const HASH_LEN: usize = 16;

/// A persisted page: `{url, raw_content, fetched_at}`, plus the address it
/// was served from when that differs from `url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Canonical URL the entry is keyed by.
    pub url: String,
    /// Raw page markup.
    pub raw_content: String,
    /// When the markup was fetched from the network.
    pub fetched_at: DateTime<Utc>,
    /// Exact URL after redirects, used as the base for relative links.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub served_from: Option<String>,
}

impl CacheEntry {
    /// Build an entry stamped with the current time.
    pub fn now(url: impl Into<String>, raw_content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            raw_content: raw_content.into(),
            fetched_at: Utc::now(),
            served_from: None,
        }
    }

    /// Record the address the markup was actually served from.
    pub fn served_from(mut self, url: impl Into<String>) -> Self {
        self.served_from = Some(url.into());
        self
    }
}

/// Handle to a cache directory.
#[derive(Debug, Clone)]
pub struct PageCache {
    dir: PathBuf,
}

impl PageCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    pub async fn open(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| DocModulesError::io(dir, e))?;
        debug!(dir = %dir.display(), "page cache opened");
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// The cache root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Look up the entry for a canonical URL.
    pub async fn get(&self, url: &str) -> Option<CacheEntry> {
        let path = self.path_for(url);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(url, path = %path.display(), error = %e, "cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_slice::<CacheEntry>(&bytes) {
            // Guard against the (astronomically unlikely) hash collision.
            Ok(entry) if entry.url == url => Some(entry),
            Ok(entry) => {
                warn!(url, cached_url = %entry.url, "cache key collision, treating as miss");
                None
            }
            Err(e) => {
                warn!(url, path = %path.display(), error = %e, "corrupt cache entry, treating as miss");
                None
            }
        }
    }

    /// Persist an entry, replacing any previous one for the same URL.
    pub async fn put(&self, entry: &CacheEntry) -> Result<()> {
        let path = self.path_for(&entry.url);
        let json = serde_json::to_vec(entry)
            .map_err(|e| DocModulesError::Storage(format!("serialize {}: {e}", entry.url)))?;

        let tmp = path.with_extension(format!("json.{}.tmp", std::process::id()));
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| DocModulesError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| DocModulesError::io(&path, e))?;

        debug!(url = %entry.url, path = %path.display(), "cached page");
        Ok(())
    }

    /// Full path of the file backing `url`.
    pub fn path_for(&self, url: &str) -> PathBuf {
        self.dir.join(key_for(url))
    }
}

/// Filesystem-safe cache key for a canonical URL.
///
/// A readable slug of the URL followed by a hash prefix, e.g.
/// `https___example.com_docs-1f0c2a9e4b7d3c55.json`.
pub fn key_for(url: &str) -> String {
    let slug: String = url
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_SLUG_LEN)
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    format!("{slug}-{}.json", &hash[..HASH_LEN])
}
