//! Shared types, error model, and configuration for docmodules.
//!
//! This crate is the foundation depended on by all other docmodules crates.
//! It provides:
//! - [`DocModulesError`]: the unified error type
//! - Domain types ([`CrawlTarget`], [`PageRecord`], [`NormalizedDocument`], [`ExtractionResult`])
//! - Configuration ([`AppConfig`], [`CrawlConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlConfig, CrawlSection, DefaultsConfig, ExtractConfig, ModelSection,
    NormalizeConfig, NormalizeSection, Renderer, config_dir, config_file_path, expand_home,
    init_config, load_config, load_config_from,
};
pub use error::{DocModulesError, Result};
pub use types::{
    CrawlTarget, ExtractionResult, ModuleEntry, NormalizedDocument, PageRecord, RunId,
};
