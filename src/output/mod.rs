//! Per-channel output streams
//!
//! One write-once file per active channel inside the output directory:
//!   - `open` creates `CH{NN}.j` and writes a placeholder header
//!   - samples are appended as host-order i32
//!   - `finalize` rewrites every header with the payload size and closes
//!
//! `finalize` consumes the set, so a channel can be finalized only once and
//! nothing can be appended afterwards. Dropping an unfinalized set flushes
//! the samples but leaves the placeholder headers in place.

pub mod format;

pub use format::{
    channel_file_name, parse_channel_file_name, validate_channel_file, ChannelFile,
    ChannelFileError, ChannelFileHeader, ChannelValidation, FORMAT_VERSION, HEADER_SIZE,
    SAMPLE_BYTES,
};

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::channel::{BufferedChannel, ChannelError};
use crate::decoder::MAX_CHANNELS;

/// Output errors
#[derive(Error, Debug)]
pub enum OutputError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("Channel {0} is not open")]
    NotOpen(usize),

    #[error("Channel {0} is already open")]
    AlreadyOpen(usize),

    #[error("Channel index {0} out of range")]
    OutOfRange(usize),
}

/// Destination for demultiplexed samples
pub trait SampleSink {
    fn write_sample(&mut self, channel: usize, value: i32) -> Result<(), OutputError>;
}

/// Summary of one finalized channel file
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChannelSummary {
    pub channel: usize,
    pub path: PathBuf,
    pub payload_bytes: u64,
    pub samples: u64,
}

struct OutputChannel {
    path: PathBuf,
    stream: BufferedChannel<File>,
    samples: u64,
}

/// The set of output files of one run
pub struct OutputChannelSet {
    dir: PathBuf,
    buffer_size: usize,
    channels: Vec<Option<OutputChannel>>,
}

impl OutputChannelSet {
    pub fn new<P: AsRef<Path>>(dir: P, buffer_size: usize) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            buffer_size,
            channels: (0..MAX_CHANNELS).map(|_| None).collect(),
        }
    }

    /// Create the file for `channel` and write the placeholder header
    pub fn open(&mut self, channel: usize) -> Result<&Path, OutputError> {
        let slot = self
            .channels
            .get_mut(channel)
            .ok_or(OutputError::OutOfRange(channel))?;
        if slot.is_some() {
            return Err(OutputError::AlreadyOpen(channel));
        }

        let path = self.dir.join(channel_file_name(channel));
        let mut stream = BufferedChannel::create(&path, self.buffer_size)?;
        stream.write(&ChannelFileHeader::placeholder().to_bytes())?;
        debug!(channel, path = %path.display(), "Opened channel output");

        let out = slot.insert(OutputChannel {
            path,
            stream,
            samples: 0,
        });
        Ok(&out.path)
    }

    pub fn open_all(&mut self, channels: &[usize]) -> Result<(), OutputError> {
        for &ch in channels {
            self.open(ch)?;
        }
        Ok(())
    }

    /// Indices of opened channels, ascending
    pub fn opened(&self) -> Vec<usize> {
        self.channels
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|_| i))
            .collect()
    }

    /// Samples appended to `channel` so far
    pub fn sample_count(&self, channel: usize) -> Option<u64> {
        self.channels.get(channel)?.as_ref().map(|c| c.samples)
    }

    /// Rewrite every header with its payload size and close all files
    pub fn finalize(mut self) -> Result<Vec<ChannelSummary>, OutputError> {
        let mut summaries = Vec::new();

        for (channel, slot) in self.channels.iter_mut().enumerate() {
            let Some(mut out) = slot.take() else {
                continue;
            };

            out.stream.flush()?;
            let end = out.stream.tell()?;
            let payload_bytes = end - HEADER_SIZE as u64;
            debug_assert_eq!(payload_bytes, out.samples * SAMPLE_BYTES as u64);

            out.stream.seek(0)?;
            out.stream
                .write(&ChannelFileHeader::finalized(payload_bytes).to_bytes())?;
            out.stream.close()?;

            debug!(channel, payload_bytes, "Finalized channel output");
            summaries.push(ChannelSummary {
                channel,
                path: out.path,
                payload_bytes,
                samples: out.samples,
            });
        }

        Ok(summaries)
    }
}

impl SampleSink for OutputChannelSet {
    #[inline]
    fn write_sample(&mut self, channel: usize, value: i32) -> Result<(), OutputError> {
        let out = self
            .channels
            .get_mut(channel)
            .and_then(Option::as_mut)
            .ok_or(OutputError::NotOpen(channel))?;
        out.stream.write_i32(value)?;
        out.samples += 1;
        Ok(())
    }
}
