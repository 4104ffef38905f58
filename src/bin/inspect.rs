//! inspect - check channel output files
//!
//! Usage:
//!   inspect validate <files...> [--json]   - Check header and payload size
//!   inspect info <file> [-n N]             - Show header and first N samples
//!   inspect list <directory>               - List all CH??.j files with status

use std::path::{Path, PathBuf};

use clap::Parser;
use quartz_demux::common::{InspectArgs, InspectCommand};
use quartz_demux::output::{
    parse_channel_file_name, validate_channel_file, ChannelFile, ChannelValidation, HEADER_SIZE,
};

fn main() {
    let args = InspectArgs::parse();

    let result = match args.command {
        InspectCommand::Validate { files, json } => validate_files(&files, json),
        InspectCommand::Info { file, samples } => show_info(&file, samples),
        InspectCommand::List { directory } => list_files(&directory),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Returns whether every file is valid
fn validate_files(files: &[PathBuf], json: bool) -> anyhow::Result<bool> {
    let mut results = Vec::with_capacity(files.len());
    for path in files {
        results.push(validate_channel_file(path)?);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in &results {
            print_validation(result);
        }
    }
    Ok(results.iter().all(ChannelValidation::is_valid))
}

fn print_validation(result: &ChannelValidation) {
    println!("Validating: {}", result.path.display());
    println!("  Finalized:      {}", result.finalized);
    println!("  Declared bytes: {}", result.declared_bytes);
    println!("  Actual bytes:   {}", result.actual_bytes);
    println!("  Samples:        {}", result.samples);
    for error in &result.errors {
        println!("  \x1b[31m✗ {}\x1b[0m", error);
    }
    if result.is_valid() {
        println!("\x1b[32m✓ File is valid\x1b[0m");
    }
    println!();
}

fn show_info(path: &Path, count: usize) -> anyhow::Result<bool> {
    let file = ChannelFile::open(path)?;
    let header = &file.header;

    println!("File: {}", path.display());
    if let Some(channel) = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(parse_channel_file_name)
    {
        println!("Channel: {}", channel);
    }
    println!("Size: {} bytes", HEADER_SIZE + file.samples.len() * 4);
    println!();

    println!("=== Header ===");
    println!("  Version:        0x{:08x}", header.version);
    println!("  Reserved:       {:?}", header.reserved);
    println!("  Payload bytes:  {}", header.payload_bytes);
    if header.is_placeholder() {
        println!("  \x1b[33m⚠ Placeholder header: conversion did not finish\x1b[0m");
    }

    println!();
    println!("=== Samples ({} total) ===", file.samples.len());
    for (i, value) in file.samples.iter().take(count).enumerate() {
        println!("  [{:>6}] {:>9}", i, value);
    }
    if file.samples.len() > count {
        println!("  ...");
    }

    Ok(header.is_finalized())
}

fn list_files(directory: &Path) -> anyhow::Result<bool> {
    println!("Scanning: {}", directory.display());
    println!();

    let mut files: Vec<(usize, PathBuf)> = std::fs::read_dir(directory)?
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name();
            let channel = parse_channel_file_name(name.to_str()?)?;
            Some((channel, entry.path()))
        })
        .collect();
    files.sort();

    if files.is_empty() {
        println!("No channel files found");
        return Ok(true);
    }

    println!("{:<10} {:>12} {:>12}  Status", "File", "Samples", "Bytes");
    println!("{}", "-".repeat(52));

    let mut all_valid = true;
    let mut total_samples = 0u64;
    for (_, path) in &files {
        let filename = path.file_name().unwrap_or_default().to_string_lossy();
        match validate_channel_file(path) {
            Ok(result) => {
                let status = if result.is_valid() {
                    "\x1b[32m✓ Valid\x1b[0m"
                } else if !result.finalized {
                    "\x1b[33m⚠ Unfinalized\x1b[0m"
                } else {
                    "\x1b[31m✗ Corrupted\x1b[0m"
                };
                all_valid &= result.is_valid();
                total_samples += result.samples;
                println!(
                    "{:<10} {:>12} {:>12}  {}",
                    filename, result.samples, result.actual_bytes, status
                );
            }
            Err(e) => {
                all_valid = false;
                println!("{:<10} {:>12} {:>12}  \x1b[31m✗ {}\x1b[0m", filename, "-", "-", e);
            }
        }
    }

    println!("{}", "-".repeat(52));
    println!("{} files, {} samples", files.len(), total_samples);
    Ok(all_valid)
}
