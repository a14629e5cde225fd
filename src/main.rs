use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use match_list_upload::bridge;
use match_list_upload::config::{BridgeArgs, BridgeConfig, Cli, Command, UploadArgs, UploadConfig};
use match_list_upload::error::{AppError, ErrorKind};
use match_list_upload::upload::{self, UploadSummary};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing();

    let (json, result) = match cli.command {
        Command::Upload(args) => (args.json, run_upload(args).await),
        Command::Bridge(args) => (false, run_bridge(args).await),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if json => {
            print_json(&err);
            ExitCode::FAILURE
        }
        Err(err) => {
            print_error(&err);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout carries only the upload result.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run_upload(args: UploadArgs) -> Result<(), AppError> {
    let json = args.json;
    let config = UploadConfig::try_from(args)?;
    let summary = upload::execute(config).await?;
    if json {
        print_json(&summary);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

async fn run_bridge(args: BridgeArgs) -> Result<(), AppError> {
    let config = BridgeConfig::try_from(args)?;
    bridge::serve(config).await
}

fn print_summary(summary: &UploadSummary) {
    println!("SUCCESS: Job {}", summary.job_resource_name);
    println!(
        "  {} operations queued in {} batches (mode: {})",
        summary.operations_queued, summary.batches_submitted, summary.mode
    );

    if !summary.rejected.is_empty() {
        println!("  {} operations rejected:", summary.rejected.len());
        for rejected in &summary.rejected {
            let index = rejected
                .index
                .map(|i| format!("#{}", i))
                .unwrap_or_else(|| "#?".to_string());
            match &rejected.field_path {
                Some(field) => println!("    {}: {} (Field: {})", index, rejected.message, field),
                None => println!("    {}: {}", index, rejected.message),
            }
        }
    }

    println!("Changes may take 12-48 hours to reflect in Google Ads");
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{}", line),
        Err(e) => eprintln!("ERROR: Failed to encode output: {}", e),
    }
}

fn print_error(err: &AppError) {
    let presentation = err.to_presentation();
    eprintln!("ERROR: {}", presentation.title);
    eprintln!("{}", presentation.message);

    if matches!(
        err.kind(),
        ErrorKind::JobCreation | ErrorKind::BatchSubmission | ErrorKind::RunTrigger
    ) {
        for line in err.report().lines() {
            eprintln!("  {}", line);
        }
    }

    if let Some(job) = err.job_resource_name() {
        eprintln!("Job {} was left unrun with the batches accepted so far", job);
    }

    if let Some(action) = presentation.action {
        eprintln!("{}", action);
    }
}
