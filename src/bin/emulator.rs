//! emulator - write a synthetic Quartz recording
//!
//! Usage:
//!   emulator -o run.dat                          # 32 channels, 100 packets
//!   emulator -o run.dat --mask 0x3 -d 17 -d 18   # Two channels, two lost packets
//!   emulator -o run.dat --parts 4                # run_000.dat .. run_003.dat

use std::path::{Path, PathBuf};

use clap::Parser;
use quartz_demux::common::EmulatorArgs;
use quartz_demux::emulator::{RecordingBuilder, Waveform};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("quartz_demux=info".parse()?))
        .init();

    let args = EmulatorArgs::parse();

    let waveform = match args.noise_seed {
        Some(seed) => Waveform::Noise {
            seed,
            sigma: args.sigma,
        },
        None => Waveform::Ramp,
    };

    let mut builder = RecordingBuilder::new()
        .channel_mask(args.mask)
        .samples_per_channel(args.samples)
        .sample_rate_hz(args.rate)
        .first_seqno(args.seqno)
        .packets(args.packets as u64)
        .extended(args.nb)
        .waveform(waveform);
    if let Some(n) = args.ignored_every {
        builder = builder.ignored_every(n as u64);
    }
    for &seqno in &args.drop {
        builder = builder.drop_seqno(seqno);
    }

    let recording = builder.build()?;

    let paths: Vec<PathBuf> = if args.parts > 1 {
        let stem = args
            .output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "run".to_string());
        recording.write_parts(parent_dir(&args.output), &stem, args.parts)?
    } else {
        recording.write_to(&args.output)?;
        vec![args.output.clone()]
    };

    info!(
        packets = recording.packets,
        dropped = args.drop.len(),
        channels = recording.active.len(),
        files = paths.len(),
        "Recording written"
    );
    for path in &paths {
        println!("{}", path.display());
    }

    Ok(())
}

/// Directory receiving the numbered parts
fn parent_dir(output: &Path) -> PathBuf {
    match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
