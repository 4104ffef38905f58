//! Wire layout of Quartz packets
//!
//! Everything on the wire is big-endian:
//!
//! ```text
//! PacketHeader (16 bytes)
//!   u16 protocol    "PS"
//!   u16 msg_type    "NA" / "NB" / other
//!   u32 msg_len     bytes following the header
//!   u32 rx_sec, u32 rx_ns
//! SamplePrefix (24 bytes, NA and NB)
//!   u32 status, u32 channel_mask, u64 seqno, u32 sec, u32 ns
//! ExtendedPrefix (16 bytes, NB only)
//!   u32 hihi, u32 hi, u32 lo, u32 lolo
//! Body
//!   3-byte two's-complement samples, one per active channel per time point
//! ```

/// "PS"
pub const PROTOCOL_MARKER: u16 = 0x5053;
/// "NA"
pub const MSG_TYPE_NA: u16 = 0x4E41;
/// "NB"
pub const MSG_TYPE_NB: u16 = 0x4E42;

/// Bytes per encoded sample
pub const SAMPLE_SIZE: usize = 3;

/// Width of the channel mask
pub const MAX_CHANNELS: usize = 32;

const NANOS_PER_SEC: u64 = 1_000_000_000;

#[inline]
fn be_u16(b: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([b[off], b[off + 1]])
}

#[inline]
fn be_u32(b: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

#[inline]
fn be_u64(b: &[u8], off: usize) -> u64 {
    u64::from_be_bytes([
        b[off],
        b[off + 1],
        b[off + 2],
        b[off + 3],
        b[off + 4],
        b[off + 5],
        b[off + 6],
        b[off + 7],
    ])
}

/// Message kind selected by the header type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Ordinary sample packet
    Samples,
    /// Sample packet carrying an extended prefix
    ExtendedSamples,
    /// Anything else; skipped
    Other(u16),
}

impl MessageType {
    pub fn from_tag(tag: u16) -> Self {
        match tag {
            MSG_TYPE_NA => Self::Samples,
            MSG_TYPE_NB => Self::ExtendedSamples,
            other => Self::Other(other),
        }
    }

    /// Prefix bytes that must precede the body
    pub fn prefix_size(&self) -> usize {
        match self {
            Self::Samples => SamplePrefix::SIZE,
            Self::ExtendedSamples => SamplePrefix::SIZE + ExtendedPrefix::SIZE,
            Self::Other(_) => 0,
        }
    }
}

/// Frame header preceding every message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub protocol: u16,
    pub msg_type: u16,
    /// Bytes following the header
    pub msg_len: u32,
    pub rx_sec: u32,
    pub rx_ns: u32,
}

impl PacketHeader {
    pub const SIZE: usize = 16;

    pub fn new(msg_type: u16, msg_len: u32) -> Self {
        Self {
            protocol: PROTOCOL_MARKER,
            msg_type,
            msg_len,
            rx_sec: 0,
            rx_ns: 0,
        }
    }

    pub fn from_bytes(b: &[u8; Self::SIZE]) -> Self {
        Self {
            protocol: be_u16(b, 0),
            msg_type: be_u16(b, 2),
            msg_len: be_u32(b, 4),
            rx_sec: be_u32(b, 8),
            rx_ns: be_u32(b, 12),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&self.protocol.to_be_bytes());
        buf[2..4].copy_from_slice(&self.msg_type.to_be_bytes());
        buf[4..8].copy_from_slice(&self.msg_len.to_be_bytes());
        buf[8..12].copy_from_slice(&self.rx_sec.to_be_bytes());
        buf[12..16].copy_from_slice(&self.rx_ns.to_be_bytes());
        buf
    }

    pub fn has_valid_marker(&self) -> bool {
        self.protocol == PROTOCOL_MARKER
    }

    pub fn message_type(&self) -> MessageType {
        MessageType::from_tag(self.msg_type)
    }
}

/// Payload prefix shared by NA and NB packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SamplePrefix {
    pub status: u32,
    /// Bit i set: channel i contributes one sample per time point
    pub channel_mask: u32,
    pub seqno: u64,
    pub sec: u32,
    pub ns: u32,
}

impl SamplePrefix {
    pub const SIZE: usize = 24;

    pub fn from_bytes(b: &[u8; Self::SIZE]) -> Self {
        Self {
            status: be_u32(b, 0),
            channel_mask: be_u32(b, 4),
            seqno: be_u64(b, 8),
            sec: be_u32(b, 16),
            ns: be_u32(b, 20),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.status.to_be_bytes());
        buf[4..8].copy_from_slice(&self.channel_mask.to_be_bytes());
        buf[8..16].copy_from_slice(&self.seqno.to_be_bytes());
        buf[16..20].copy_from_slice(&self.sec.to_be_bytes());
        buf[20..24].copy_from_slice(&self.ns.to_be_bytes());
        buf
    }

    /// Packet timestamp in nanoseconds
    pub fn timestamp_ns(&self) -> u64 {
        self.sec as u64 * NANOS_PER_SEC + self.ns as u64
    }

    /// Split a nanosecond timestamp into the on-wire (sec, ns) pair
    pub fn set_timestamp_ns(&mut self, timestamp_ns: u64) {
        self.sec = (timestamp_ns / NANOS_PER_SEC) as u32;
        self.ns = (timestamp_ns % NANOS_PER_SEC) as u32;
    }

    pub fn channel_count(&self) -> usize {
        self.channel_mask.count_ones() as usize
    }
}

/// Extra prefix of NB packets (alarm limit words, not interpreted)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtendedPrefix {
    pub hihi: u32,
    pub hi: u32,
    pub lo: u32,
    pub lolo: u32,
}

impl ExtendedPrefix {
    pub const SIZE: usize = 16;

    pub fn from_bytes(b: &[u8; Self::SIZE]) -> Self {
        Self {
            hihi: be_u32(b, 0),
            hi: be_u32(b, 4),
            lo: be_u32(b, 8),
            lolo: be_u32(b, 12),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.hihi.to_be_bytes());
        buf[4..8].copy_from_slice(&self.hi.to_be_bytes());
        buf[8..12].copy_from_slice(&self.lo.to_be_bytes());
        buf[12..16].copy_from_slice(&self.lolo.to_be_bytes());
        buf
    }
}

/// Active channel indices of a mask, ascending
pub fn active_channels(mask: u32) -> impl Iterator<Item = usize> {
    (0..MAX_CHANNELS).filter(move |i| mask & (1u32 << i) != 0)
}

/// Decode one 24-bit big-endian two's-complement sample
#[inline]
pub fn decode_sample(raw: [u8; SAMPLE_SIZE]) -> i32 {
    let v = (raw[0] as u32) << 16 | (raw[1] as u32) << 8 | raw[2] as u32;
    // sign extend from bit 23
    ((v << 8) as i32) >> 8
}

/// Encode the low 24 bits of a sample
#[inline]
pub fn encode_sample(value: i32) -> [u8; SAMPLE_SIZE] {
    let b = value.to_be_bytes();
    [b[1], b[2], b[3]]
}
