//! Workflow template handling shared by the executor and the CLI.
//!
//! Everything needed before a job can be submitted lives here: reading
//! a template from disk, discovering its parameter and output metadata,
//! substituting caller parameters, and re-rolling sampler seeds.

pub mod error;
pub mod metadata;
pub mod params;
pub mod seed;
pub mod template;
