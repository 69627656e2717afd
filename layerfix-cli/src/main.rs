//! layerfix: patch vulnerable packages in single- and multi-platform container images.
//!
//! Thin entry point: parse flags, initialise logging, wire Ctrl-C to the
//! shared cancellation token and dispatch to a command handler.

mod cli;
mod commands;
mod error;
mod logging;
mod output;

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use layerfix_core::config::LayerfixConfig;

use crate::cli::{Cli, Commands};
use crate::error::CliError;
use crate::output::OutputWriter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // An unreadable config is reported by the command itself; logging
    // still comes up with defaults.
    let general = LayerfixConfig::load_or_default(&cli.config)
        .await
        .map(|c| c.general)
        .unwrap_or_default();
    let initialized = logging::LogSettings::resolve(&general, &cli)
        .and_then(|settings| logging::init_tracing(&settings));
    if let Err(e) = initialized {
        eprintln!("error: {e:#}");
        return ExitCode::from(1);
    }

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match run(cli, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<(), CliError> {
    let writer = OutputWriter::new(cli.output);
    tracing::debug!(config = %cli.config.display(), "layerfix starting");

    match cli.command {
        Commands::Patch(args) => commands::patch::execute(args, &cli.config, &writer, cancel).await,
        Commands::Platforms(args) => commands::platforms::execute(args, &cli.config, &writer).await,
        Commands::Report(args) => commands::report::execute(args, &cli.config, &writer).await,
        Commands::Config(args) => commands::config::execute(args, &cli.config, &writer).await,
    }
}

/// Cancels `cancel` on the first Ctrl-C; in-flight platforms are aborted
/// and their scratch state cleaned up by the pipeline.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("interrupt received, cancelling");
                cancel.cancel();
            }
            Err(e) => tracing::error!(error = %e, "failed to install Ctrl-C handler"),
        }
    });
}
