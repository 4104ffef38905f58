//! Conversion orchestrator
//!
//! Drives one run: every input file in order through the packet decoder,
//! gap recovery and the demultiplexer into one output file per active
//! channel. A run either finalizes every channel file or aborts with the
//! first fatal error, leaving placeholder headers behind.

mod demux;
mod gap;
mod state;

pub use demux::demux_packet;
pub use gap::{Gap, GapRecoverer, RateEnvelope};
pub use state::ConversionState;

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use crate::channel::BufferedChannel;
use crate::common::{ConvertError, ConvertResult};
use crate::config::ConvertConfig;
use crate::decoder::{DecodeError, DecoderStats, PacketDecoder};
use crate::output::{ChannelSummary, OutputChannelSet};

/// Outcome of a successful run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionReport {
    /// Gap and anomaly messages in the order they occurred
    pub diagnostics: Vec<String>,
    pub channels: Vec<ChannelSummary>,
    /// Sample packets decoded
    pub packets: u64,
    /// Messages of unknown type skipped
    pub skipped_messages: u64,
    /// Packets synthesized by zero-order hold
    pub missing_packets: u64,
    pub input_files: usize,
}

/// Converts Quartz recordings into per-channel sample files
#[derive(Debug, Clone)]
pub struct Converter {
    config: ConvertConfig,
    recoverer: GapRecoverer,
}

impl Converter {
    pub fn new(config: ConvertConfig) -> ConvertResult<Self> {
        config.validate()?;
        let recoverer = GapRecoverer::new(config.rate_envelope());
        Ok(Self { config, recoverer })
    }

    /// Convert `inputs`, in order, as one continuous stream
    pub fn run<P: AsRef<Path>>(&self, inputs: &[P]) -> ConvertResult<ConversionReport> {
        let started = Instant::now();
        let output_dir = &self.config.output_dir;
        std::fs::create_dir_all(output_dir)?;

        let mut outputs = OutputChannelSet::new(output_dir, self.config.output_buffer_size);
        let mut state = ConversionState::new(self.config.tolerate_anomalies);
        let mut stats = DecoderStats::default();

        for input in inputs {
            let file_stats = self.convert_file(input.as_ref(), &mut state, &mut outputs)?;
            stats.merge(&file_stats);
        }

        let channels = outputs.finalize()?;
        let missing_packets = state.missing_packets();

        info!(
            files = inputs.len(),
            packets = stats.packets,
            skipped = stats.skipped,
            missing = missing_packets,
            channels = channels.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Conversion complete"
        );

        Ok(ConversionReport {
            diagnostics: state.into_diagnostics(),
            channels,
            packets: stats.packets,
            skipped_messages: stats.skipped,
            missing_packets,
            input_files: inputs.len(),
        })
    }

    fn convert_file(
        &self,
        path: &Path,
        state: &mut ConversionState,
        outputs: &mut OutputChannelSet,
    ) -> ConvertResult<DecoderStats> {
        let mut channel = BufferedChannel::open_read(path, self.config.input_buffer_size)?;
        debug!(path = %path.display(), "Reading input");

        let mut decoder = PacketDecoder::new(&mut channel);
        let decode_err = |e: DecodeError| ConvertError::decode(path, e);

        while let Some(packet) = decoder.next_packet().map_err(decode_err)? {
            let prefix = *packet.prefix();
            if state.is_first_packet() {
                state.begin(&prefix)?;
                outputs.open_all(state.active_channels())?;
                info!(
                    mask = format!("0x{:08x}", prefix.channel_mask),
                    channels = state.active_channels().len(),
                    seqno = prefix.seqno,
                    "First packet"
                );
            } else {
                self.recoverer.recover(state, &prefix, outputs)?;
            }
            state.advance(&prefix);
            demux_packet(state, prefix.seqno, decoder.body(), outputs)?;
        }

        let stats = decoder.stats();
        channel.close()?;

        info!(
            path = %path.display(),
            packets = stats.packets,
            skipped = stats.skipped,
            bytes = stats.bytes,
            "Input converted"
        );
        Ok(stats)
    }
}

/// Convert `inputs` into `output_dir` and return the diagnostics
pub fn convert<P: AsRef<Path>>(
    inputs: &[P],
    output_dir: impl AsRef<Path>,
    tolerate_anomalies: bool,
) -> ConvertResult<Vec<String>> {
    let config = ConvertConfig::new(output_dir).with_tolerate_anomalies(tolerate_anomalies);
    let report = Converter::new(config)?.run(inputs)?;
    Ok(report.diagnostics)
}

/// Run a whole conversion on the blocking thread pool
pub async fn convert_in_background(
    config: ConvertConfig,
    inputs: Vec<PathBuf>,
) -> ConvertResult<ConversionReport> {
    let converter = Converter::new(config)?;
    tokio::task::spawn_blocking(move || converter.run(&inputs))
        .await
        .map_err(|e| ConvertError::worker(e.to_string()))?
}

/// Records every sample in memory
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemorySink {
    channels: Vec<Vec<i32>>,
    order: Vec<usize>,
}

#[cfg(test)]
impl MemorySink {
    pub fn channel(&self, channel: usize) -> &[i32] {
        self.channels.get(channel).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
impl crate::output::SampleSink for MemorySink {
    fn write_sample(
        &mut self,
        channel: usize,
        value: i32,
    ) -> Result<(), crate::output::OutputError> {
        if self.channels.len() <= channel {
            self.channels.resize(channel + 1, Vec::new());
        }
        self.channels[channel].push(value);
        self.order.push(channel);
        Ok(())
    }
}
