//! Run-level error type
//!
//! # Design Principles (KISS)
//! - Component errors (`ChannelError`, `DecodeError`, `OutputError`,
//!   `ConfigError`) are wrapped, not flattened
//! - Stream protocol violations get their own variants so callers can match
//! - Every variant aborts the run; recoverable conditions are diagnostics

use std::path::PathBuf;

use thiserror::Error;

use crate::channel::ChannelError;
use crate::config::ConfigError;
use crate::decoder::DecodeError;
use crate::output::OutputError;

/// Fatal conversion errors
#[derive(Error, Debug)]
pub enum ConvertError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Opening or reading an input file failed
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Corrupt or truncated input
    #[error("Failed to decode '{path}': {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    /// Writing channel output failed
    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    /// I/O error outside the buffered channels
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// First sample packet has no active channel
    #[error("Packet {seqno} has an empty channel mask")]
    EmptyChannelMask { seqno: u64 },

    /// Channel set changed mid-run
    #[error("Channel mask changed mid-stream (0x{expected:08x} -> 0x{actual:08x} at seqno {seqno}), not supported")]
    ChannelMaskChanged {
        expected: u32,
        actual: u32,
        seqno: u64,
    },

    /// Repeated or decreasing sequence number
    #[error("Sequence number not increasing: {current} after {previous}")]
    SequenceNotIncreasing { previous: u64, current: u64 },

    /// Gap timing does not match the plausible sampling rates
    #[error("Inconsistency between timestamp {delta_t} s and seqno gap {missing}, Fsamp {rate_hz} Hz")]
    ImplausibleRate {
        delta_t: f64,
        missing: u64,
        rate_hz: f64,
    },

    /// Body length is not a whole number of samples
    #[error("Body of packet {seqno} is {body_len} bytes, not a whole number of samples")]
    BodyNotAligned { seqno: u64, body_len: usize },

    /// Body does not end on a complete time point
    #[error("Truncated body in packet {seqno}: {samples} samples for {channels} channels")]
    TruncatedBody {
        seqno: u64,
        samples: usize,
        channels: usize,
    },

    /// Background worker failed to complete
    #[error("Conversion worker failed: {0}")]
    Worker(String),
}

impl ConvertError {
    /// Attach the input path to a decoder error
    pub fn decode(path: impl Into<PathBuf>, source: DecodeError) -> Self {
        Self::Decode {
            path: path.into(),
            source,
        }
    }

    /// Create a worker error
    pub fn worker(msg: impl Into<String>) -> Self {
        Self::Worker(msg.into())
    }

    /// Protocol violations in otherwise readable input
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::EmptyChannelMask { .. }
                | Self::ChannelMaskChanged { .. }
                | Self::SequenceNotIncreasing { .. }
                | Self::BodyNotAligned { .. }
                | Self::TruncatedBody { .. }
        )
    }
}

/// Result type alias using ConvertError
pub type ConvertResult<T> = Result<T, ConvertError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_carries_path() {
        let err = ConvertError::decode(
            "/data/run1.dat",
            DecodeError::Truncated {
                offset: 128,
                needed: 40,
            },
        );
        let msg = err.to_string();
        assert!(msg.contains("/data/run1.dat"));
        assert!(msg.contains("128"));
    }

    #[test]
    fn test_mask_change_message() {
        let err = ConvertError::ChannelMaskChanged {
            expected: 0x3,
            actual: 0x7,
            seqno: 12,
        };
        let msg = err.to_string();
        assert!(msg.contains("0x00000003"));
        assert!(msg.contains("0x00000007"));
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn test_implausible_rate_message() {
        let err = ConvertError::ImplausibleRate {
            delta_t: 0.5,
            missing: 3,
            rate_hz: 24.0,
        };
        assert!(err.to_string().contains("Fsamp 24 Hz"));
        assert!(!err.is_protocol_violation());
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ConvertError = io_err.into();
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_worker_error() {
        let err = ConvertError::worker("task panicked");
        assert!(err.to_string().contains("task panicked"));
    }
}
