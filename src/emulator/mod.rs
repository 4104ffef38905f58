//! Packet-stream emulator
//!
//! Synthesizes Quartz recordings with a known expected outcome: every
//! recording carries the per-channel samples a correct conversion must
//! produce, zero-order-hold fill for dropped packets included.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, NormalError};
use thiserror::Error;

use crate::decoder::{
    active_channels, encode_sample, ExtendedPrefix, PacketHeader, SamplePrefix, MAX_CHANNELS,
    MSG_TYPE_NA, MSG_TYPE_NB,
};

/// Message type of the filler messages ("ST")
pub const IGNORED_MSG_TYPE: u16 = 0x5354;

/// Payload size of a filler message
const IGNORED_PAYLOAD: usize = 32;

const SAMPLE_MIN: i32 = -(1 << 23);
const SAMPLE_MAX: i32 = (1 << 23) - 1;

/// Emulator errors
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid noise distribution: {0}")]
    Noise(NormalError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sample values carried by the packets
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    /// Time point index scaled by channel number, wrapped to 24 bits
    Ramp,
    /// Seeded Gaussian noise around zero
    Noise { seed: u64, sigma: f64 },
}

/// Builder for a synthetic recording
#[derive(Debug, Clone)]
pub struct RecordingBuilder {
    channel_mask: u32,
    samples_per_channel: usize,
    sample_rate_hz: f64,
    first_seqno: u64,
    packets: u64,
    start_ns: u64,
    extended: bool,
    ignored_every: Option<u64>,
    dropped: BTreeSet<u64>,
    waveform: Waveform,
}

impl Default for RecordingBuilder {
    fn default() -> Self {
        Self {
            channel_mask: 0b11,
            samples_per_channel: 14,
            sample_rate_hz: 10_000.0,
            first_seqno: 0,
            packets: 10,
            start_ns: 1_700_000_000_000_000_000,
            extended: false,
            ignored_every: None,
            dropped: BTreeSet::new(),
            waveform: Waveform::Ramp,
        }
    }
}

impl RecordingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel_mask(mut self, mask: u32) -> Self {
        self.channel_mask = mask;
        self
    }

    /// Time points per packet
    pub fn samples_per_channel(mut self, n: usize) -> Self {
        self.samples_per_channel = n;
        self
    }

    /// Per-channel sampling rate; drives the packet timestamps
    pub fn sample_rate_hz(mut self, rate: f64) -> Self {
        self.sample_rate_hz = rate;
        self
    }

    pub fn first_seqno(mut self, seqno: u64) -> Self {
        self.first_seqno = seqno;
        self
    }

    /// Number of sequence numbers covered, dropped packets included
    pub fn packets(mut self, n: u64) -> Self {
        self.packets = n;
        self
    }

    pub fn start_ns(mut self, ns: u64) -> Self {
        self.start_ns = ns;
        self
    }

    /// Frame packets as "NB" with an extended prefix
    pub fn extended(mut self, extended: bool) -> Self {
        self.extended = extended;
        self
    }

    /// Insert a message of unknown type after every `n` packets
    pub fn ignored_every(mut self, n: u64) -> Self {
        self.ignored_every = Some(n);
        self
    }

    /// Leave out the packet carrying `seqno`
    pub fn drop_seqno(mut self, seqno: u64) -> Self {
        self.dropped.insert(seqno);
        self
    }

    pub fn waveform(mut self, waveform: Waveform) -> Self {
        self.waveform = waveform;
        self
    }

    pub fn build(&self) -> Result<Recording, EmulatorError> {
        if !(self.sample_rate_hz.is_finite() && self.sample_rate_hz > 0.0) {
            return Err(EmulatorError::InvalidParameter(format!(
                "sample rate {} Hz",
                self.sample_rate_hz
            )));
        }
        let active: Vec<usize> = active_channels(self.channel_mask).collect();
        let body_len = self.samples_per_channel * active.len() * 3;
        let prefix_len = SamplePrefix::SIZE + if self.extended { ExtendedPrefix::SIZE } else { 0 };
        let msg_len = u32::try_from(prefix_len + body_len).map_err(|_| {
            EmulatorError::InvalidParameter(format!(
                "{} samples per channel do not fit one message",
                self.samples_per_channel
            ))
        })?;
        if self.first_seqno.checked_add(self.packets).is_none() {
            return Err(EmulatorError::InvalidParameter(
                "sequence numbers overflow".to_string(),
            ));
        }

        let mut source = SampleSource::new(self.waveform)?;
        let packet_ns = self.samples_per_channel as f64 * 1e9 / self.sample_rate_hz;

        let mut messages = Vec::new();
        let mut expected = vec![Vec::new(); MAX_CHANNELS];
        let mut last_value = [0i32; MAX_CHANNELS];
        let mut pending_drops = 0u64;
        let mut seen_first = false;
        let mut emitted = 0u64;

        for k in 0..self.packets {
            let seqno = self.first_seqno + k;
            let mut values = Vec::with_capacity(self.samples_per_channel * active.len());
            for i in 0..self.samples_per_channel {
                let t = k * self.samples_per_channel as u64 + i as u64;
                for &ch in &active {
                    values.push(source.sample(t, ch));
                }
            }

            if self.dropped.contains(&seqno) {
                if seen_first {
                    pending_drops += 1;
                }
                continue;
            }

            // Hold fill happens only between two delivered packets
            for _ in 0..pending_drops * self.samples_per_channel as u64 {
                for &ch in &active {
                    expected[ch].push(last_value[ch]);
                }
            }
            pending_drops = 0;

            for point in values.chunks(active.len().max(1)) {
                for (&ch, &v) in active.iter().zip(point) {
                    expected[ch].push(v);
                    last_value[ch] = v;
                }
            }

            let mut prefix = SamplePrefix {
                status: 0,
                channel_mask: self.channel_mask,
                seqno,
                ..SamplePrefix::default()
            };
            prefix.set_timestamp_ns(self.start_ns + (k as f64 * packet_ns).round() as u64);
            messages.push(self.encode_packet(&prefix, msg_len, &values, k));
            seen_first = true;
            emitted += 1;

            if let Some(n) = self.ignored_every {
                if n > 0 && emitted % n == 0 {
                    messages.push(ignored_message(emitted));
                }
            }
        }

        Ok(Recording {
            messages,
            expected,
            active,
            packets: emitted,
        })
    }

    fn encode_packet(&self, prefix: &SamplePrefix, msg_len: u32, values: &[i32], k: u64) -> Vec<u8> {
        let msg_type = if self.extended { MSG_TYPE_NB } else { MSG_TYPE_NA };
        let mut out = Vec::with_capacity(PacketHeader::SIZE + msg_len as usize);
        out.extend_from_slice(&PacketHeader::new(msg_type, msg_len).to_bytes());
        out.extend_from_slice(&prefix.to_bytes());
        if self.extended {
            let extended = ExtendedPrefix {
                hihi: 0,
                hi: (k >> 32) as u32,
                lo: k as u32,
                lolo: 0,
            };
            out.extend_from_slice(&extended.to_bytes());
        }
        for &v in values {
            out.extend_from_slice(&encode_sample(v));
        }
        out
    }
}

fn ignored_message(n: u64) -> Vec<u8> {
    let mut out = PacketHeader::new(IGNORED_MSG_TYPE, IGNORED_PAYLOAD as u32)
        .to_bytes()
        .to_vec();
    out.extend((0..IGNORED_PAYLOAD).map(|i| (n as usize + i) as u8));
    out
}

enum SampleSource {
    Ramp,
    Noise { rng: StdRng, normal: Normal<f64> },
}

impl SampleSource {
    fn new(waveform: Waveform) -> Result<Self, EmulatorError> {
        Ok(match waveform {
            Waveform::Ramp => Self::Ramp,
            Waveform::Noise { seed, sigma } => Self::Noise {
                rng: StdRng::seed_from_u64(seed),
                normal: Normal::new(0.0, sigma).map_err(EmulatorError::Noise)?,
            },
        })
    }

    fn sample(&mut self, t: u64, channel: usize) -> i32 {
        match self {
            Self::Ramp => {
                let v = t.wrapping_mul(channel as u64 + 1).wrapping_sub(channel as u64 * 1000) as i32;
                (v << 8) >> 8
            }
            Self::Noise { rng, normal } => {
                normal.sample(rng).round().clamp(SAMPLE_MIN as f64, SAMPLE_MAX as f64) as i32
            }
        }
    }
}

/// A synthetic recording and the samples its conversion must produce
#[derive(Debug, Clone)]
pub struct Recording {
    /// Framed messages in stream order, filler messages included
    pub messages: Vec<Vec<u8>>,
    /// Expected samples, indexed by channel
    pub expected: Vec<Vec<i32>>,
    /// Active channels, ascending
    pub active: Vec<usize>,
    /// Sample packets delivered
    pub packets: u64,
}

impl Recording {
    /// The whole stream as one byte vector
    pub fn bytes(&self) -> Vec<u8> {
        self.messages.concat()
    }

    pub fn expected(&self, channel: usize) -> &[i32] {
        self.expected.get(channel).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<(), EmulatorError> {
        self.write_messages(path.as_ref(), &self.messages)
    }

    /// Split the stream over `parts` files at message boundaries.
    ///
    /// Files are named `{stem}_000.dat`, `{stem}_001.dat`, ... inside `dir`.
    pub fn write_parts<P: AsRef<Path>>(
        &self,
        dir: P,
        stem: &str,
        parts: usize,
    ) -> Result<Vec<PathBuf>, EmulatorError> {
        if parts == 0 {
            return Err(EmulatorError::InvalidParameter("zero parts".to_string()));
        }
        let per_part = self.messages.len().div_ceil(parts).max(1);
        let mut paths = Vec::with_capacity(parts);
        for i in 0..parts {
            let start = (i * per_part).min(self.messages.len());
            let end = ((i + 1) * per_part).min(self.messages.len());
            let path = dir.as_ref().join(format!("{}_{:03}.dat", stem, i));
            self.write_messages(&path, &self.messages[start..end])?;
            paths.push(path);
        }
        Ok(paths)
    }

    fn write_messages(&self, path: &Path, messages: &[Vec<u8>]) -> Result<(), EmulatorError> {
        let mut writer = BufWriter::new(File::create(path)?);
        for message in messages {
            writer.write_all(message)?;
        }
        writer.flush()?;
        Ok(())
    }
}
