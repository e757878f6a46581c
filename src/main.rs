use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use s3_archiver::cli::Args;
use s3_archiver::cloud::{create_s3_client, ObjectStore, S3ObjectStore};
use s3_archiver::config::TransferConfig;
use s3_archiver::errors::{Stage, TransferError};
use s3_archiver::transfer::{list_sources_until, transfer_objects};

fn main() -> Result<()> {
    // Parse arguments
    let args = Args::parse();

    // Initialize logging
    initialize_logging(args.verbose)?;

    let config = TransferConfig::from_args(&args)?;

    let runtime = Runtime::new().context("Failed to create Tokio runtime")?;
    runtime.block_on(run(config))
}

/// Initialize logging with the specified verbosity level
fn initialize_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logger")?;
    Ok(())
}

async fn run(config: TransferConfig) -> Result<()> {
    let client = create_s3_client(
        config.region.as_deref(),
        config.endpoint.as_deref(),
        config.profile.as_deref(),
    )?;
    let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(client, config.part_size));

    let cancel = CancellationToken::new();
    watch_for_interrupt(cancel.clone());

    info!(
        "Archiving {} into {}",
        config.request.source_url(),
        config.request.dest_url()
    );

    let objects = list_sources_until(store.as_ref(), &config.request, &config.options, &cancel)
        .await
        .map_err(|e| during(Stage::Listing, e))?;
    println!("Found {} objects to archive", objects.len());

    let summary = transfer_objects(store, &config.request, objects, &config.options, cancel)
        .await
        .map_err(|e| {
            let stage = e.stage();
            during(stage, e)
        })?;

    info!(
        "{} objects ({} bytes) archived into {} bytes in {:.2}s",
        summary.objects,
        summary.source_bytes,
        summary.archive_bytes,
        summary.elapsed.as_secs_f64()
    );
    println!("Transfer completed successfully");
    Ok(())
}

/// Cancel the transfer on Ctrl-C
fn watch_for_interrupt(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, cancelling transfer");
                cancel.cancel();
            }
            Err(e) => warn!("Unable to listen for Ctrl-C: {}", e),
        }
    });
}

fn during(stage: Stage, err: TransferError) -> anyhow::Error {
    anyhow::Error::new(err).context(format!("Transfer failed during {}", stage))
}
