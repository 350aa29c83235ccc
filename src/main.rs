//! CLI entry point for the linkgrab tool.

use std::io::{self, IsTerminal};

use anyhow::{Context, Result};
use clap::Parser;
use linkgrab_core::Pipeline;
use tracing::{debug, info, warn};

mod cli;
mod progress;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let config = args.to_config()?;
    let pipeline = Pipeline::new(config).context("invalid configuration")?;
    info!(
        url = %pipeline.config().page_url,
        threads = pipeline.config().threads,
        filter = %pipeline.config().filter,
        "Linkgrab starting"
    );

    let requests = pipeline
        .fetch()
        .await
        .with_context(|| format!("cannot read links from {}", pipeline.config().page_url))?;

    if args.dry_run {
        for request in &requests {
            println!("{}\t{}", request.url, request.path().display());
        }
        info!(files = requests.len(), "Dry run, nothing downloaded");
        return Ok(());
    }

    if requests.is_empty() {
        info!("No matching files found");
        return Ok(());
    }

    let show_bar = !args.quiet && io::stderr().is_terminal();
    let bar = progress::files_bar(requests.len(), show_bar);
    let batch = pipeline
        .download(requests, Some(progress::observer(bar.clone())))
        .await?;

    let controls = batch.controls();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling downloads");
            controls.cancel_all();
        }
    });

    let report = batch.wait().await?;
    interrupt.abort();
    bar.finish_and_clear();

    info!(
        completed = report.completed,
        cancelled = report.cancelled,
        failed = report.failed,
        total = report.requested,
        output_dir = %pipeline.config().output_dir.display(),
        "Download complete"
    );

    Ok(())
}
