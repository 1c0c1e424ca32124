//! Pipeline orchestration for docmodules.
//!
//! This crate ties crawling, normalization, and extraction together into a
//! single run ([`pipeline::run`]) and writes the merged module hierarchy.

pub mod pipeline;

pub use pipeline::{
    PipelineDeps, ProgressReporter, RunConfig, RunReport, SilentProgress, run, write_output,
};
