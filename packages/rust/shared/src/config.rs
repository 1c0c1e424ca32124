//! Application configuration for docmodules.
//!
//! User config lives at `~/.docmodules/docmodules.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DocModulesError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docmodules.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docmodules";

// ---------------------------------------------------------------------------
// Config structs (matching docmodules.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Crawl policies.
    #[serde(default)]
    pub crawl: CrawlSection,

    /// Normalizer settings.
    #[serde(default)]
    pub normalize: NormalizeSection,

    /// Local model settings.
    #[serde(default)]
    pub model: ModelSection,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Where the extracted JSON is written.
    #[serde(default = "default_output_path")]
    pub output_path: String,

    /// Default maximum crawl depth.
    #[serde(default = "default_crawl_depth")]
    pub crawl_depth: u32,

    /// Default number of concurrent fetches.
    #[serde(default = "default_crawl_concurrency")]
    pub crawl_concurrency: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_path: default_output_path(),
            crawl_depth: default_crawl_depth(),
            crawl_concurrency: default_crawl_concurrency(),
        }
    }
}

fn default_output_path() -> String {
    "extracted_modules.json".into()
}
fn default_crawl_depth() -> u32 {
    1
}
fn default_crawl_concurrency() -> u32 {
    4
}

/// How pages are fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Renderer {
    /// Headless Chromium; captures client-rendered DOM.
    #[default]
    Browser,
    /// Plain HTTP GET; static markup only.
    Http,
}

impl std::str::FromStr for Renderer {
    type Err = DocModulesError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "browser" => Ok(Self::Browser),
            "http" => Ok(Self::Http),
            other => Err(DocModulesError::config(format!(
                "unknown renderer '{other}': expected 'browser' or 'http'"
            ))),
        }
    }
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSection {
    /// Page renderer.
    #[serde(default)]
    pub renderer: Renderer,

    /// Ceiling for a single page fetch, in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Stop enqueueing after this many consecutive fetch failures (0 disables).
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Wall-clock budget for the whole crawl in seconds (0 = unlimited).
    #[serde(default)]
    pub time_budget_secs: u64,

    /// Minimum ms a worker waits before each fetch.
    #[serde(default)]
    pub rate_limit_ms: u64,

    /// Extra hosts that may be traversed besides the seed hosts.
    #[serde(default)]
    pub allowed_domains: Vec<String>,

    /// URL path include globs.
    #[serde(default)]
    pub include_patterns: Vec<String>,

    /// URL path exclude globs.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Allow localhost / private network targets.
    #[serde(default)]
    pub allow_private_hosts: bool,

    /// Whether to read and write the page cache.
    #[serde(default = "default_true")]
    pub use_cache: bool,

    /// Page cache directory (`~` is expanded).
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
}

impl Default for CrawlSection {
    fn default() -> Self {
        Self {
            renderer: Renderer::default(),
            fetch_timeout_secs: default_fetch_timeout(),
            max_consecutive_failures: default_max_consecutive_failures(),
            time_budget_secs: 0,
            rate_limit_ms: 0,
            allowed_domains: Vec::new(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            allow_private_hosts: false,
            use_cache: true,
            cache_dir: default_cache_dir(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_fetch_timeout() -> u64 {
    30
}
fn default_max_consecutive_failures() -> u32 {
    3
}
fn default_cache_dir() -> String {
    "~/.docmodules/cache".into()
}

/// `[normalize]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeSection {
    /// Pages whose cleaned text is shorter than this are dropped.
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
}

impl Default for NormalizeSection {
    fn default() -> Self {
        Self {
            min_text_chars: default_min_text_chars(),
        }
    }
}

fn default_min_text_chars() -> usize {
    80
}

/// `[model]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSection {
    /// Base URL of the local inference server.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model used when `--model` is not given.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Ceiling for a single model call, in seconds.
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,

    /// Submissions per batch before it is recorded as failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Approximate character budget for one prompt's document payload.
    #[serde(default = "default_batch_char_budget")]
    pub batch_char_budget: usize,

    /// Sampling temperature.
    #[serde(default)]
    pub temperature: f32,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            default_model: default_model(),
            timeout_secs: default_model_timeout(),
            max_attempts: default_max_attempts(),
            batch_char_budget: default_batch_char_budget(),
            temperature: 0.0,
        }
    }
}

fn default_endpoint() -> String {
    "http://localhost:11434".into()
}
fn default_model() -> String {
    "llama3.1".into()
}
fn default_model_timeout() -> u64 {
    180
}
fn default_max_attempts() -> u32 {
    2
}
fn default_batch_char_budget() -> usize {
    12_000
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime crawl configuration.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Maximum link-hops from a seed.
    pub max_depth: u32,
    /// Maximum concurrent fetches.
    pub concurrency: u32,
    /// Page renderer.
    pub renderer: Renderer,
    /// Per-fetch ceiling.
    pub fetch_timeout: Duration,
    /// Consecutive-failure cap (0 disables).
    pub max_consecutive_failures: u32,
    /// Whole-crawl budget.
    pub time_budget: Option<Duration>,
    /// Delay before each fetch, in ms.
    pub rate_limit_ms: u64,
    /// Extra traversable hosts.
    pub allowed_domains: Vec<String>,
    /// URL path include globs.
    pub include_patterns: Vec<String>,
    /// URL path exclude globs.
    pub exclude_patterns: Vec<String>,
    /// Allow localhost / private targets.
    pub allow_private_hosts: bool,
    /// Cache directory, if caching is enabled.
    pub cache_dir: Option<PathBuf>,
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        let crawl = &config.crawl;
        Self {
            max_depth: config.defaults.crawl_depth,
            concurrency: config.defaults.crawl_concurrency.max(1),
            renderer: crawl.renderer,
            fetch_timeout: Duration::from_secs(crawl.fetch_timeout_secs),
            max_consecutive_failures: crawl.max_consecutive_failures,
            time_budget: (crawl.time_budget_secs > 0)
                .then(|| Duration::from_secs(crawl.time_budget_secs)),
            rate_limit_ms: crawl.rate_limit_ms,
            allowed_domains: crawl.allowed_domains.clone(),
            include_patterns: crawl.include_patterns.clone(),
            exclude_patterns: crawl.exclude_patterns.clone(),
            allow_private_hosts: crawl.allow_private_hosts,
            cache_dir: crawl.use_cache.then(|| expand_home(&crawl.cache_dir)),
        }
    }
}

/// Runtime normalizer configuration.
#[derive(Debug, Clone)]
pub struct NormalizeConfig {
    /// Minimum useful text length.
    pub min_text_chars: usize,
}

impl From<&AppConfig> for NormalizeConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            min_text_chars: config.normalize.min_text_chars,
        }
    }
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Runtime extraction configuration.
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    /// Ceiling for one model call.
    pub model_timeout: Duration,
    /// Submissions per batch.
    pub max_attempts: u32,
    /// Character budget per prompt payload.
    pub batch_char_budget: usize,
}

impl From<&AppConfig> for ExtractConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            model_timeout: Duration::from_secs(config.model.timeout_secs),
            max_attempts: config.model.max_attempts.max(1),
            batch_char_budget: config.model.batch_char_budget,
        }
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.docmodules/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DocModulesError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.docmodules/docmodules.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DocModulesError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        DocModulesError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DocModulesError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DocModulesError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DocModulesError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}
