//! Run command - replay captured provider traffic through the pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tracing::{info, warn};
use trackfusion::fusion::MemoryTrackStore;
use trackfusion::pipeline::{PipelineError, PipelineStatus, TrackingPipeline};
use trackfusion::provider::{ObservationFeed, ReplayFeed};

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the run command.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// JSON-lines capture of raw observations to replay
    #[arg(long, value_name = "FILE")]
    pub replay: PathBuf,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long, value_name = "SECS")]
    pub duration: Option<u64>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Keep recorded receivedAt values instead of stamping replay time
    #[arg(long)]
    pub preserve_timestamps: bool,

    /// Restart each feed from the beginning once exhausted
    #[arg(long = "loop")]
    pub looping: bool,

    /// Records returned per feed poll
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Print the final status as JSON
    #[arg(long)]
    pub json: bool,
}

/// Run the run command.
pub fn run(args: RunArgs) -> Result<(), CliError> {
    let runner = CliRunner::with_debug(args.debug)?;
    runner.log_startup("run");

    let runtime = runner.runtime()?;
    runtime.block_on(run_pipeline(&runner, args))
}

async fn run_pipeline(runner: &CliRunner, args: RunArgs) -> Result<(), CliError> {
    let feeds = ReplayFeed::load_all(&args.replay).map_err(|error| CliError::Replay {
        path: args.replay.clone(),
        error,
    })?;

    let store = Arc::new(MemoryTrackStore::new());
    let pipeline = TrackingPipeline::builder(runner.pipeline_config())
        .with_sink(store.clone())
        .start();

    let mut started = 0;
    for feed in feeds {
        let mut feed = feed
            .with_preserved_timestamps(args.preserve_timestamps)
            .with_looping(args.looping);
        if let Some(n) = args.batch_size {
            feed = feed.with_batch_size(n);
        }

        let provider = feed.provider().to_string();
        let records = feed.len();
        match pipeline.add_feed(feed) {
            Ok(()) => {
                println!("Replaying {} records from {}", records, provider);
                started += 1;
            }
            Err(e @ (PipelineError::ProviderDisabled(_) | PipelineError::DuplicateProvider(_))) => {
                warn!(provider = %provider, error = %e, "Skipping replay feed");
                println!("Skipping {}: {}", provider, e);
            }
            Err(e) => {
                pipeline.shutdown().await;
                return Err(e.into());
            }
        }
    }

    if started == 0 {
        pipeline.shutdown().await;
        return Err(CliError::NoFeeds(args.replay));
    }

    match args.duration {
        Some(secs) => println!("Running for {}s (Ctrl+C to stop early)...", secs),
        None => println!("Running (Ctrl+C to stop)..."),
    }
    println!();

    wait_for_stop(args.duration.map(Duration::from_secs)).await;

    info!("Stopping pipeline");
    pipeline.shutdown().await;

    let status = pipeline.status();
    if args.json {
        let json = serde_json::to_string_pretty(&status)
            .map_err(|e| CliError::Config(format!("Failed to encode status: {}", e)))?;
        println!("{}", json);
    } else {
        print_status(&status, store.len());
    }

    Ok(())
}

/// Wait for Ctrl+C, or for `duration` when given.
async fn wait_for_stop(duration: Option<Duration>) {
    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for Ctrl+C");
            }
            println!("\nShutting down...");
        }
        _ = deadline => {}
    }
}

/// Human-readable status summary.
fn print_status(status: &PipelineStatus, tracks_stored: usize) {
    println!("TrackFusion Status");
    println!("==================");
    println!("  Uptime: {}s", status.uptime_secs());
    println!();

    println!("Providers:");
    for p in &status.providers {
        let ingest = status.ingestion.get(&p.provider);
        println!(
            "  {:<16} {:<12} rank {:<3} requests {:<5} success {:>5.1}%  avg {:.0}ms{}",
            p.provider,
            p.status.as_str(),
            p.priority_rank,
            p.total_requests,
            p.success_rate * 100.0,
            p.average_response_time_ms,
            ingest
                .map(|i| format!("  published {}", i.published))
                .unwrap_or_default()
        );
    }
    println!();

    let fusion = &status.fusion;
    println!("Fusion:");
    println!("  Observations received: {}", fusion.observations_received);
    println!("  Tracks emitted:        {}", fusion.tracks_emitted);
    println!("  Tracks stored:         {}", tracks_stored);
    println!("  Safety-only tracks:    {}", fusion.safety_only_tracks);
    println!("  Disputed positions:    {}", fusion.disputed_positions);
    println!("  Low confidence:        {}", fusion.low_confidence_tracks);
    println!(
        "  Late merges/dropped:   {}/{}",
        fusion.late_merges, fusion.late_dropped
    );
    println!();

    println!("Bus:");
    println!("  Published: {}", status.bus.published);
    println!("  Invalid:   {}", status.bus.invalid_total);
    println!();

    let lifecycle = &status.lifecycle;
    println!("Raw history:");
    println!(
        "  Stored {} / filtered {}",
        lifecycle.filter.stored, lifecycle.filter.filtered
    );
    println!(
        "  Filter cache: {} identities, {} evicted",
        lifecycle.filter.cached_identities, lifecycle.filter.evicted
    );
    println!(
        "  Compressed {} payloads, {} bytes saved",
        lifecycle.compression.payloads_compressed, lifecycle.compression.bytes_saved
    );
    println!(
        "  Retention: {} records, {} deleted over {} runs",
        lifecycle.retention.stored_records,
        lifecycle.retention.total_deleted,
        lifecycle.retention.runs
    );
    println!();

    println!("Errors:");
    println!(
        "  Health: {}  total {}  dead-lettered {}  duplicates {}",
        status.errors.health.status.as_str(),
        status.errors.total_errors,
        status.resilience.dead_lettered,
        status.resilience.duplicates_ignored
    );
    if let Some((topic, count)) = &status.errors.most_problematic_topic {
        println!("  Most problematic topic: {} ({})", topic, count);
    }

    let open = status.open_circuits();
    if !open.is_empty() {
        println!();
        println!("Open circuits: {}", open.join(", "));
    }
}
