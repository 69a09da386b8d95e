//! ComfyUI REST client and resilient job executor.
//!
//! Submits workflows over HTTP, infers whether a submitted job is still
//! alive across backend restarts, polls history for results, and groups
//! output artifacts by the variable names declared in the workflow.

pub mod api;
pub mod backend;
pub mod config;
pub mod executor;
pub mod history;
pub mod liveness;
pub mod ops;
pub mod outputs;
pub mod poller;
pub mod result;
pub mod transfer;

#[cfg(test)]
mod testing;
