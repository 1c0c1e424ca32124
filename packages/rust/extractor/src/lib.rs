//! Structured extraction of modules and submodules from normalized documents.
//!
//! This crate provides:
//! - [`LanguageModel`]: the inference capability, implemented by [`OllamaClient`]
//! - [`prompt`]: document batching and prompt text
//! - [`repair`]: ordered JSON repair transforms for malformed model output
//! - [`schema`]: coercion of parsed output into the two-level hierarchy
//! - [`Extractor`]: serialized, retrying, merging driver over all of the above

pub mod extractor;
pub mod model;
pub mod ollama;
pub mod prompt;
pub mod repair;
pub mod schema;
pub mod testing;

pub use extractor::{ExtractionReport, Extractor, UnitFailure};
pub use model::LanguageModel;
pub use ollama::OllamaClient;
pub use repair::{RepairStep, Repaired, parse_with_repair};
