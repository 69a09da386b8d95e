//! `genrelay-worker` -- run ComfyUI workflows resiliently from the shell.
//!
//! Configuration is read from the environment (and `.env`); see
//! `ExecutorConfig::from_env` for the full table. `--base-url`
//! overrides `COMFYUI_BASE_URL`.
//!
//! Exit status is `0` when a run completes, `1` otherwise.

use std::process::ExitCode;

use clap::Parser;
use genrelay_comfyui::config::ExecutorConfig;
use genrelay_worker::cli::{params_to_map, Cli, Command};
use genrelay_worker::commands;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "genrelay_worker=info,genrelay_comfyui=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let mut config = ExecutorConfig::from_env();
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url.trim_end_matches('/').to_string();
    }

    match cli.command {
        Command::Run {
            workflow,
            params,
            output_dir,
        } => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, cancelling");
                    on_signal.cancel();
                }
            });

            let params = params_to_map(params);
            let result = commands::run(config, &workflow, &params, output_dir, &cancel).await;
            print_json(&serde_json::to_value(&result)?)?;
            Ok(if result.is_completed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Stop => {
            print_json(&commands::stop(&config).await?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Queue => {
            print_json(&commands::queue(&config).await?)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
