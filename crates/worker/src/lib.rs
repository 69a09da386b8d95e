//! Command-line front end for the resilient ComfyUI executor.

pub mod cli;
pub mod commands;
