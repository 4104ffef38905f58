//! convert - demultiplex Quartz recordings into per-channel files
//!
//! Usage:
//!   convert -o <dir> run_000.dat run_001.dat     # Convert two consecutive files
//!   convert -o <dir> --force run.dat             # Tolerate implausible gap timing
//!   convert -f config.toml --json run.dat        # Settings from file, JSON report

use std::path::Path;

use clap::Parser;
use quartz_demux::common::ConvertArgs;
use quartz_demux::config::Config;
use quartz_demux::convert_in_background;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ConvertArgs::parse();

    let config_path = &args.common.config_file;
    let config = if Path::new(config_path).exists() {
        Config::load(config_path)?
    } else {
        Config::default()
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(config.logging.directive().parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut settings = config.convert;
    if let Some(dir) = args.output_dir {
        settings.output_dir = dir;
    }
    if args.force {
        settings.tolerate_anomalies = true;
    }

    info!(
        config_file = %config_path,
        output_dir = %settings.output_dir.display(),
        inputs = args.inputs.len(),
        tolerate_anomalies = settings.tolerate_anomalies,
        "Starting conversion"
    );

    let report = match convert_in_background(settings, args.inputs).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Conversion failed");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for line in &report.diagnostics {
        println!("{}", line);
    }
    println!(
        "{} packets from {} file(s), {} missing, {} skipped",
        report.packets, report.input_files, report.missing_packets, report.skipped_messages
    );
    for ch in &report.channels {
        println!(
            "  CH{:02}  {:>12} samples  {}",
            ch.channel,
            ch.samples,
            ch.path.display()
        );
    }

    Ok(())
}
