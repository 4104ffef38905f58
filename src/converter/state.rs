//! Run-scoped conversion state
//!
//! One instance per run, carried across every input file of the run. The
//! first sample packet fixes the channel set; every later packet is checked
//! against what was recorded here.

use crate::common::{ConvertError, ConvertResult};
use crate::decoder::{active_channels, SamplePrefix, MAX_CHANNELS};

/// Cross-packet state of one conversion run
#[derive(Debug, Clone)]
pub struct ConversionState {
    pub(crate) last_seqno: u64,
    pub(crate) last_timestamp_ns: u64,
    pub(crate) last_channel_mask: u32,
    /// Time points carried by the previous packet
    pub(crate) last_samples_per_channel: usize,
    pub(crate) last_sample_value: [i32; MAX_CHANNELS],
    pub(crate) is_first_packet: bool,
    pub(crate) tolerate_anomalies: bool,
    /// Active channel indices, ascending; fixed by the first packet
    pub(crate) active: Vec<usize>,
    pub(crate) diagnostics: Vec<String>,
    pub(crate) missing_packets: u64,
}

impl ConversionState {
    pub fn new(tolerate_anomalies: bool) -> Self {
        Self {
            last_seqno: 0,
            last_timestamp_ns: 0,
            last_channel_mask: 0,
            last_samples_per_channel: 0,
            last_sample_value: [0; MAX_CHANNELS],
            is_first_packet: true,
            tolerate_anomalies,
            active: Vec::new(),
            diagnostics: Vec::new(),
            missing_packets: 0,
        }
    }

    pub fn is_first_packet(&self) -> bool {
        self.is_first_packet
    }

    pub fn channel_mask(&self) -> u32 {
        self.last_channel_mask
    }

    pub fn active_channels(&self) -> &[usize] {
        &self.active
    }

    pub fn last_seqno(&self) -> u64 {
        self.last_seqno
    }

    pub fn last_sample(&self, channel: usize) -> Option<i32> {
        self.last_sample_value.get(channel).copied()
    }

    pub fn samples_per_channel(&self) -> usize {
        self.last_samples_per_channel
    }

    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    pub fn missing_packets(&self) -> u64 {
        self.missing_packets
    }

    pub fn into_diagnostics(self) -> Vec<String> {
        self.diagnostics
    }

    /// Fix the channel set from the first sample packet
    pub fn begin(&mut self, prefix: &SamplePrefix) -> ConvertResult<()> {
        if prefix.channel_mask == 0 {
            return Err(ConvertError::EmptyChannelMask {
                seqno: prefix.seqno,
            });
        }
        self.last_channel_mask = prefix.channel_mask;
        self.active = active_channels(prefix.channel_mask).collect();
        self.is_first_packet = false;
        Ok(())
    }

    /// Remember sequence number and timestamp of the packet just accepted
    pub fn advance(&mut self, prefix: &SamplePrefix) {
        self.last_seqno = prefix.seqno;
        self.last_timestamp_ns = prefix.timestamp_ns();
    }

    pub(crate) fn record(&mut self, message: String) {
        self.diagnostics.push(message);
    }
}
