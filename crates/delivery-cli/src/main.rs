//! delivery CLI - fetch content items and inspect their rich text
//!
//! This is the main entry point for the `delivery` command-line interface.

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;

mod cli;
mod commands;
mod logging;
mod output;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::initialize_logging(&cli)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling request");
            on_interrupt.cancel();
        }
    });

    commands::execute(cli, &cancel).await
}
