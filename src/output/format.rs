//! Per-channel output file format
//!
//! File structure (host byte order throughout):
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Header (5 x u32, 20 bytes)             │
//! │  - version (1)                          │
//! │  - reserved (0), reserved (0)           │
//! │  - payload size, u64 over words 3-4     │
//! ├─────────────────────────────────────────┤
//! │  Samples (i32, one per time point)      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! While a run is in progress the header holds the placeholder
//! `{0xFFFFFFFF, 0xFFFFFFFF, 0xFFFFFFFF, 0, 0}`; it is only replaced once the
//! run finishes, so files left behind by an aborted run stay recognisable.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Header size in bytes
pub const HEADER_SIZE: usize = 20;

/// Version word of a finalized file
pub const FORMAT_VERSION: u32 = 1;

/// Filler for the first three header words until finalization
pub const PLACEHOLDER_WORD: u32 = 0xFFFF_FFFF;

/// Bytes per output sample
pub const SAMPLE_BYTES: usize = 4;

/// File name for a channel, e.g. `CH01.j`
pub fn channel_file_name(channel: usize) -> String {
    format!("CH{:02}.j", channel)
}

/// Inverse of [`channel_file_name`]
pub fn parse_channel_file_name(name: &str) -> Option<usize> {
    let digits = name.strip_prefix("CH")?.strip_suffix(".j")?;
    if digits.len() < 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// The five header words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelFileHeader {
    pub version: u32,
    pub reserved: [u32; 2],
    /// Bytes following the header
    pub payload_bytes: u64,
}

impl ChannelFileHeader {
    /// Header written when a channel is opened
    pub fn placeholder() -> Self {
        Self {
            version: PLACEHOLDER_WORD,
            reserved: [PLACEHOLDER_WORD; 2],
            payload_bytes: 0,
        }
    }

    /// Header written at the end of a run
    pub fn finalized(payload_bytes: u64) -> Self {
        Self {
            version: FORMAT_VERSION,
            reserved: [0; 2],
            payload_bytes,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.version == FORMAT_VERSION && self.reserved == [0; 2]
    }

    pub fn is_placeholder(&self) -> bool {
        *self == Self::placeholder()
    }

    /// Samples declared by the payload size
    pub fn sample_count(&self) -> u64 {
        self.payload_bytes / SAMPLE_BYTES as u64
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.version.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.reserved[0].to_ne_bytes());
        buf[8..12].copy_from_slice(&self.reserved[1].to_ne_bytes());
        // stored unaligned across words 3 and 4
        buf[12..20].copy_from_slice(&self.payload_bytes.to_ne_bytes());
        buf
    }

    pub fn from_bytes(data: &[u8; HEADER_SIZE]) -> Self {
        let word = |i: usize| u32::from_ne_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
        Self {
            version: word(0),
            reserved: [word(4), word(8)],
            payload_bytes: u64::from_ne_bytes([
                data[12], data[13], data[14], data[15], data[16], data[17], data[18], data[19],
            ]),
        }
    }
}

/// Channel file errors
#[derive(Debug, thiserror::Error)]
pub enum ChannelFileError {
    #[error("File too short to contain a header ({0} bytes)")]
    TooShort(u64),

    #[error("Payload of {0} bytes is not a whole number of samples")]
    PayloadMisaligned(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A channel file loaded into memory
#[derive(Debug, Clone)]
pub struct ChannelFile {
    pub header: ChannelFileHeader,
    pub samples: Vec<i32>,
}

impl ChannelFile {
    /// Read header and all samples
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ChannelFileError> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ChannelFileError> {
        if data.len() < HEADER_SIZE {
            return Err(ChannelFileError::TooShort(data.len() as u64));
        }
        let mut head = [0u8; HEADER_SIZE];
        head.copy_from_slice(&data[..HEADER_SIZE]);

        let payload = &data[HEADER_SIZE..];
        if payload.len() % SAMPLE_BYTES != 0 {
            return Err(ChannelFileError::PayloadMisaligned(payload.len() as u64));
        }

        let samples = payload
            .chunks_exact(SAMPLE_BYTES)
            .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(Self {
            header: ChannelFileHeader::from_bytes(&head),
            samples,
        })
    }
}

/// Result of checking one channel file
#[derive(Debug, Clone, Serialize)]
pub struct ChannelValidation {
    pub path: PathBuf,
    /// Header rewritten at the end of a successful run
    pub finalized: bool,
    /// Payload size recorded in the header
    pub declared_bytes: u64,
    /// Bytes actually following the header
    pub actual_bytes: u64,
    pub samples: u64,
    pub errors: Vec<String>,
}

impl ChannelValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check header state and payload size without loading the samples
pub fn validate_channel_file<P: AsRef<Path>>(
    path: P,
) -> Result<ChannelValidation, ChannelFileError> {
    let path = path.as_ref();
    let mut file = File::open(path)?;
    let file_size = file.metadata()?.len();
    if file_size < HEADER_SIZE as u64 {
        return Err(ChannelFileError::TooShort(file_size));
    }

    let mut head = [0u8; HEADER_SIZE];
    file.read_exact(&mut head)?;
    let header = ChannelFileHeader::from_bytes(&head);
    let actual_bytes = file_size - HEADER_SIZE as u64;

    let mut errors = Vec::new();
    if header.is_placeholder() {
        errors.push("Placeholder header (run did not complete)".to_string());
    } else if !header.is_finalized() {
        errors.push(format!(
            "Unknown header version {} / reserved {:?}",
            header.version, header.reserved
        ));
    } else if header.payload_bytes != actual_bytes {
        errors.push(format!(
            "Payload size mismatch: header {}, file {}",
            header.payload_bytes, actual_bytes
        ));
    }
    if actual_bytes % SAMPLE_BYTES as u64 != 0 {
        errors.push(format!(
            "Payload of {} bytes is not a whole number of samples",
            actual_bytes
        ));
    }

    Ok(ChannelValidation {
        path: path.to_path_buf(),
        finalized: header.is_finalized(),
        declared_bytes: header.payload_bytes,
        actual_bytes,
        samples: actual_bytes / SAMPLE_BYTES as u64,
        errors,
    })
}
