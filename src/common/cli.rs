//! CLI argument parsing for the converter tools
//!
//! # Design Principles (KISS)
//! - Use clap's derive macro for declarative argument definition
//! - Common arguments shared via composition, not inheritance
//! - Binaries that read the config file embed CommonArgs

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Common arguments shared across all binaries
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    /// Path to configuration file (ignored if it does not exist)
    #[arg(short = 'f', long = "config", default_value = "config.toml")]
    pub config_file: String,
}

/// Arguments for `convert`
#[derive(Parser, Debug, Clone)]
#[command(name = "convert", about = "Demultiplex Quartz recordings into per-channel files")]
pub struct ConvertArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Output directory for CH{NN}.j files
    #[arg(short = 'o', long = "output")]
    pub output_dir: Option<PathBuf>,

    /// Tolerate implausible gap timing (record a diagnostic instead of failing)
    #[arg(long)]
    pub force: bool,

    /// Print the conversion report as JSON
    #[arg(long)]
    pub json: bool,

    /// Input recordings, in stream order
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
}

/// Arguments for `inspect`
#[derive(Parser, Debug, Clone)]
#[command(name = "inspect", about = "Inspect and validate channel output files")]
pub struct InspectArgs {
    #[command(subcommand)]
    pub command: InspectCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum InspectCommand {
    /// Validate header and payload size of channel files
    Validate {
        /// Paths to CH{NN}.j files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show header and leading samples of one channel file
    Info {
        /// Path to a CH{NN}.j file
        file: PathBuf,

        /// Number of samples to print
        #[arg(short = 'n', long, default_value = "8")]
        samples: usize,
    },

    /// List all channel files in a directory with status
    List {
        /// Directory to scan
        directory: PathBuf,
    },
}

/// Arguments for `emulator`
#[derive(Parser, Debug, Clone)]
#[command(name = "emulator", about = "Write a synthetic Quartz recording")]
pub struct EmulatorArgs {
    /// Output file (with --parts > 1, used as the stem for numbered parts)
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,

    /// Channel mask, decimal or 0x-prefixed hex
    #[arg(short = 'm', long, default_value = "0xffffffff", value_parser = parse_mask)]
    pub mask: u32,

    /// Number of sample packets
    #[arg(short = 'p', long, default_value = "100")]
    pub packets: usize,

    /// Time points per packet
    #[arg(short = 's', long, default_value = "14")]
    pub samples: usize,

    /// Per-channel sampling rate in Hz
    #[arg(short = 'r', long, default_value = "10000")]
    pub rate: f64,

    /// First sequence number
    #[arg(long, default_value = "0")]
    pub seqno: u64,

    /// Sequence numbers to drop (can specify multiple times)
    #[arg(short = 'd', long = "drop", action = clap::ArgAction::Append)]
    pub drop: Vec<u64>,

    /// Use NB framing (extended prefix)
    #[arg(long)]
    pub nb: bool,

    /// Insert an ignored message after every N packets
    #[arg(long)]
    pub ignored_every: Option<usize>,

    /// Gaussian noise instead of a ramp, seeded
    #[arg(long)]
    pub noise_seed: Option<u64>,

    /// Noise standard deviation in counts
    #[arg(long, default_value = "1000")]
    pub sigma: f64,

    /// Split the recording over this many files
    #[arg(long, default_value = "1")]
    pub parts: usize,
}

/// Parse a channel mask given as decimal or 0x-prefixed hex
pub fn parse_mask(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid channel mask '{}': {}", s, e))
}
