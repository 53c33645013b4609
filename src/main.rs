// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point for the counter acquisition daemon
use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use rust_counter_logger::config::{self, Config};
use rust_counter_logger::daemon::Daemon;
use std::path::PathBuf;
use tokio::signal;

/// Industrial counter logger: Modbus TCP polling into a time-series database
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file (YAML format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to a configuration to validate and exit
    #[arg(long)]
    validate_config: Option<PathBuf>,

    /// Output the configuration schema as JSON and exit
    #[arg(long)]
    show_config_schema: bool,

    /// Poll every device once, flush and exit
    #[arg(long)]
    once: bool,

    /// Keep readings in memory instead of writing them to the database
    #[arg(long)]
    dry_run: bool,

    /// InfluxDB base URL, e.g. http://localhost:8086
    #[arg(long)]
    storage_url: Option<String>,

    /// Poll interval applied to every device, in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Disable all logging output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logger with appropriate level based on verbose and quiet flags
    let log_level = if args.quiet {
        log::LevelFilter::Off
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if args.show_config_schema {
        return config::output_config_schema();
    }

    if let Some(validate_path) = args.validate_config {
        if !validate_path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file does not exist: {}",
                validate_path.display()
            ));
        }
        let config = Config::from_file(&validate_path)
            .map_err(|err| anyhow::anyhow!("Configuration validation failed: {}", err))?;
        println!(
            "Configuration file is valid: {} ({} devices)",
            validate_path.display(),
            config.devices.len()
        );
        return Ok(());
    }

    // Load configuration
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("config.yaml"));
    let mut config = Config::from_file(&config_path)?;

    // Apply command line overrides
    config.apply_args(args.storage_url.clone(), args.poll_interval_ms, args.dry_run);
    config.validate()?;

    if args.once {
        info!("Running a single acquisition cycle");
        let summary = Daemon::run_once(&config).await?;
        for cycle in &summary.cycles {
            println!(
                "{}: {} readings, {} failures ({} recorded bad), {} skipped ({:?})",
                cycle.device_id,
                cycle.readings,
                cycle.read_failures,
                cycle.bad_records,
                cycle.skipped_channels,
                cycle.duration
            );
        }
        println!(
            "Total: {} readings, {} failures, {} written, {} dropped",
            summary.readings(),
            summary.failures(),
            summary.writer.total_written,
            summary.writer.total_dropped
        );
        if summary.readings() == 0 && !summary.cycles.is_empty() {
            return Err(anyhow::anyhow!("No device could be read"));
        }
        return Ok(());
    }

    info!("Starting in daemon mode");
    let mut daemon = Daemon::new();
    daemon.launch(&config).await?;

    // Wait for termination signal
    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal, terminating daemon"),
        Err(err) => warn!("Error waiting for shutdown signal: {}", err),
    }
    daemon.shutdown();
    daemon.join().await?;

    Ok(())
}
