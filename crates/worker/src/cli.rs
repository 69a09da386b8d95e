//! Argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

#[derive(Parser, Debug)]
#[command(name = "genrelay-worker")]
#[command(about = "Run ComfyUI workflows through backend crashes and restarts", long_about = None)]
pub struct Cli {
    /// ComfyUI base URL.
    #[arg(long = "base-url", env = "COMFYUI_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long = "json-logs", global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a workflow template and print the result as JSON
    Run {
        /// Path to the workflow template (ComfyUI API format)
        workflow: PathBuf,

        /// Workflow parameter as `name=value`; repeatable. Values are
        /// parsed as JSON when possible, otherwise taken as strings.
        #[arg(short = 'p', long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
        params: Vec<(String, Value)>,

        /// Download result files into this directory
        #[arg(short = 'o', long = "output-dir", value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },
    /// Interrupt the running generation and clear the queue
    Stop,
    /// Show running and pending job counts
    Queue,
}

/// Parse one `name=value` parameter.
pub fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("parameter name is empty in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

/// Collect parsed parameters; a later duplicate wins.
pub fn params_to_map(params: Vec<(String, Value)>) -> Map<String, Value> {
    params.into_iter().collect()
}
