//! sleet: partition standard input into N buckets and upload them.
//!
//! Exit status is 0 on success, 1 when the run fails, and 2 on a usage or
//! configuration error.

use clap::{CommandFactory, Parser};
use snafu::Report;
use std::process::ExitCode;
use tracing::info;

use sleet::config::CliArgs;
use sleet::error::PipelineError;
use sleet::logging::init_tracing;
use sleet::pipeline::run_split;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    init_tracing(&args.log_level);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", Report::from_error(&err));
            if err.is_usage_error() {
                eprintln!("\n{}", CliArgs::command().render_usage());
                eprintln!("For more information, try '--help'.");
            }
            ExitCode::from(err.exit_code())
        }
    }
}

async fn run(args: CliArgs) -> Result<(), PipelineError> {
    let config = args.validate()?;

    if args.dry_run {
        info!("Dry run mode - configuration is valid");
        eprintln!("Routing plan:");
        for line in config.describe().lines() {
            eprintln!("  {line}");
        }
        return Ok(());
    }

    let stats = run_split(&config, tokio::io::stdin()).await?;

    info!("Split completed successfully");
    info!("  Run id: {}", stats.run_id);
    info!("  Records routed: {}", stats.records);
    info!("  Bytes staged: {}", stats.bytes_staged);
    info!("  Objects uploaded: {}", stats.objects_uploaded());
    info!("  Input pauses: {}", stats.input_pauses);
    for object in &stats.objects {
        info!(
            "  Bucket {}: {} records -> {}",
            object.bucket,
            stats.bucket_records.get(object.bucket).copied().unwrap_or(0),
            object.key
        );
    }

    Ok(())
}
