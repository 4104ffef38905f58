//! Packet decoder
//!
//! Pulls one message at a time from a read-mode [`BufferedChannel`]:
//! validates the frame header, decodes the NA/NB prefix and leaves the
//! sample body in the channel buffer so it can be demultiplexed in place.
//! Messages of any other type are skipped.

use std::fs::File;

use thiserror::Error;
use tracing::debug;

use super::wire::{ExtendedPrefix, MessageType, PacketHeader, SamplePrefix};
use crate::channel::{Backing, BufferedChannel, ChannelError};

/// Decoder errors
///
/// Headers were validated once while recording, so anything caught here
/// means the stored data is damaged.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Corrupt header near offset {offset}: marker 0x{marker:04x}, length {msg_len}")]
    CorruptHeader {
        offset: u64,
        marker: u16,
        msg_len: u32,
    },

    #[error("Corrupt NB header near offset {offset}: length {msg_len} too short for extended prefix")]
    CorruptExtendedHeader { offset: u64, msg_len: u32 },

    #[error("Truncated message near offset {offset}: {needed} bytes expected")]
    Truncated { offset: u64, needed: usize },

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// A decoded sample packet. The body stays buffered in the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet {
    /// "NA" packet
    Samples { prefix: SamplePrefix, body_len: usize },
    /// "NB" packet
    ExtendedSamples {
        prefix: SamplePrefix,
        extended: ExtendedPrefix,
        body_len: usize,
    },
}

impl Packet {
    pub fn prefix(&self) -> &SamplePrefix {
        match self {
            Self::Samples { prefix, .. } | Self::ExtendedSamples { prefix, .. } => prefix,
        }
    }

    pub fn extended(&self) -> Option<&ExtendedPrefix> {
        match self {
            Self::Samples { .. } => None,
            Self::ExtendedSamples { extended, .. } => Some(extended),
        }
    }

    /// Bytes following the prefix(es)
    pub fn body_len(&self) -> usize {
        match self {
            Self::Samples { body_len, .. } | Self::ExtendedSamples { body_len, .. } => *body_len,
        }
    }
}

/// Decoder counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Sample packets handed out
    pub packets: u64,
    /// Messages of unknown type skipped
    pub skipped: u64,
    /// Bytes consumed from the stream
    pub bytes: u64,
}

impl DecoderStats {
    pub fn merge(&mut self, other: &DecoderStats) {
        self.packets += other.packets;
        self.skipped += other.skipped;
        self.bytes += other.bytes;
    }
}

/// Message-at-a-time decoder over a read-mode channel
pub struct PacketDecoder<'a, F: Backing = File> {
    channel: &'a mut BufferedChannel<F>,
    /// Stream offset of the next unconsumed byte
    offset: u64,
    /// Body bytes of the current packet still in the buffer
    pending: usize,
    stats: DecoderStats,
}

impl<'a, F: Backing> PacketDecoder<'a, F> {
    pub fn new(channel: &'a mut BufferedChannel<F>) -> Self {
        Self {
            channel,
            offset: 0,
            pending: 0,
            stats: DecoderStats::default(),
        }
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Stream offset of the next unconsumed byte
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Decode the next sample packet.
    ///
    /// Returns `Ok(None)` when the stream ends exactly on a message boundary.
    /// Any body left over from the previous packet is consumed first.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, DecodeError> {
        self.finish_packet()?;

        loop {
            let start = self.offset;
            let raw = match self.channel.read_array::<{ PacketHeader::SIZE }>() {
                Ok(Some(raw)) => raw,
                Ok(None) => return Ok(None),
                Err(ChannelError::UnexpectedEof { .. }) => {
                    return Err(DecodeError::Truncated {
                        offset: start,
                        needed: PacketHeader::SIZE,
                    })
                }
                Err(e) => return Err(e.into()),
            };
            self.advance(PacketHeader::SIZE);

            let head = PacketHeader::from_bytes(&raw);
            let msg_len = head.msg_len as usize;
            if !head.has_valid_marker() || msg_len < SamplePrefix::SIZE {
                return Err(DecodeError::CorruptHeader {
                    offset: start,
                    marker: head.protocol,
                    msg_len: head.msg_len,
                });
            }

            let kind = head.message_type();
            if let MessageType::Other(tag) = kind {
                debug!(offset = start, msg_type = tag, msg_len, "Skipping message");
                self.skip(start, msg_len)?;
                self.stats.skipped += 1;
                continue;
            }

            if msg_len < kind.prefix_size() {
                return Err(DecodeError::CorruptExtendedHeader {
                    offset: start,
                    msg_len: head.msg_len,
                });
            }
            self.ensure_message(start, msg_len)?;

            let prefix = self.read_block::<{ SamplePrefix::SIZE }>(start)?;
            let prefix = SamplePrefix::from_bytes(&prefix);
            let body_len = msg_len - kind.prefix_size();

            let packet = match kind {
                MessageType::ExtendedSamples => {
                    let extended = self.read_block::<{ ExtendedPrefix::SIZE }>(start)?;
                    Packet::ExtendedSamples {
                        prefix,
                        extended: ExtendedPrefix::from_bytes(&extended),
                        body_len,
                    }
                }
                _ => Packet::Samples { prefix, body_len },
            };

            self.pending = body_len;
            self.stats.packets += 1;
            return Ok(Some(packet));
        }
    }

    /// Buffered body of the current packet
    pub fn body(&self) -> &[u8] {
        let buffered = self.channel.buffered();
        &buffered[..self.pending.min(buffered.len())]
    }

    /// Consume whatever is left of the current packet's body
    pub fn finish_packet(&mut self) -> Result<(), DecodeError> {
        if self.pending > 0 {
            let n = self.pending;
            self.channel.drain(n)?;
            self.pending = 0;
            self.advance(n);
        }
        Ok(())
    }

    fn advance(&mut self, n: usize) {
        self.offset += n as u64;
        self.stats.bytes += n as u64;
    }

    fn ensure_message(&mut self, start: u64, len: usize) -> Result<(), DecodeError> {
        match self.channel.ensure(len) {
            Ok(true) => Ok(()),
            Ok(false) | Err(ChannelError::UnexpectedEof { .. }) => Err(DecodeError::Truncated {
                offset: start,
                needed: len,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn skip(&mut self, start: u64, len: usize) -> Result<(), DecodeError> {
        match self.channel.drain(len) {
            Ok(()) => {
                self.advance(len);
                Ok(())
            }
            Err(ChannelError::UnexpectedEof { .. }) => Err(DecodeError::Truncated {
                offset: start,
                needed: len,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn read_block<const N: usize>(&mut self, start: u64) -> Result<[u8; N], DecodeError> {
        let block = self
            .channel
            .read_array::<N>()?
            .ok_or(DecodeError::Truncated {
                offset: start,
                needed: N,
            })?;
        self.advance(N);
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Mode;
    use crate::decoder::wire::{encode_sample, MSG_TYPE_NA, MSG_TYPE_NB};
    use std::io::Cursor;

    fn sample_message(msg_type: u16, seqno: u64, mask: u32, samples: &[i32]) -> Vec<u8> {
        let prefix = SamplePrefix {
            status: 0,
            channel_mask: mask,
            seqno,
            sec: 1,
            ns: 500,
        };
        let mut payload = prefix.to_bytes().to_vec();
        if msg_type == MSG_TYPE_NB {
            payload.extend_from_slice(
                &ExtendedPrefix {
                    hihi: 0x1111_1111,
                    hi: 0x2222_2222,
                    lo: 0x4444_4444,
                    lolo: 0x8888_8888,
                }
                .to_bytes(),
            );
        }
        for s in samples {
            payload.extend_from_slice(&encode_sample(*s));
        }
        let mut msg = PacketHeader::new(msg_type, payload.len() as u32)
            .to_bytes()
            .to_vec();
        msg.extend_from_slice(&payload);
        msg
    }

    fn channel(data: Vec<u8>, capacity: usize) -> BufferedChannel<Cursor<Vec<u8>>> {
        BufferedChannel::new(Cursor::new(data), Mode::Read, capacity)
    }

    #[test]
    fn test_decode_na_and_nb() {
        let mut data = sample_message(MSG_TYPE_NA, 7, 0b11, &[1, -1]);
        data.extend(sample_message(MSG_TYPE_NB, 8, 0b11, &[2, -2, 3, -3]));
        let mut ch = channel(data, 256);
        let mut dec = PacketDecoder::new(&mut ch);

        let first = dec.next_packet().unwrap().unwrap();
        assert!(matches!(first, Packet::Samples { body_len: 6, .. }));
        assert_eq!(first.prefix().seqno, 7);
        assert_eq!(dec.body(), &[0, 0, 1, 0xff, 0xff, 0xff]);

        let second = dec.next_packet().unwrap().unwrap();
        assert_eq!(second.prefix().seqno, 8);
        assert_eq!(second.body_len(), 12);
        assert_eq!(second.extended().map(|e| e.lolo), Some(0x8888_8888));
        assert_eq!(dec.body().len(), 12);

        assert!(dec.next_packet().unwrap().is_none());
        assert_eq!(dec.stats().packets, 2);
        assert_eq!(dec.offset(), dec.stats().bytes);
    }

    #[test]
    fn test_skips_unknown_message() {
        let mut data = PacketHeader::new(0x5354, 30).to_bytes().to_vec();
        data.extend_from_slice(&[0xAA; 30]);
        data.extend(sample_message(MSG_TYPE_NA, 1, 0b1, &[5]));
        let mut ch = channel(data, 64);
        let mut dec = PacketDecoder::new(&mut ch);

        let packet = dec.next_packet().unwrap().unwrap();
        assert_eq!(packet.prefix().seqno, 1);
        assert_eq!(dec.stats().skipped, 1);
        assert!(dec.next_packet().unwrap().is_none());
    }

    #[test]
    fn test_bad_marker_is_fatal() {
        let mut data = sample_message(MSG_TYPE_NA, 1, 0b1, &[5]);
        data[0] = b'X';
        let mut ch = channel(data, 64);
        let mut dec = PacketDecoder::new(&mut ch);
        assert!(matches!(
            dec.next_packet(),
            Err(DecodeError::CorruptHeader { offset: 0, .. })
        ));
    }

    #[test]
    fn test_short_length_is_fatal() {
        let data = PacketHeader::new(MSG_TYPE_NA, 10).to_bytes().to_vec();
        let mut ch = channel(data, 64);
        let mut dec = PacketDecoder::new(&mut ch);
        assert!(matches!(
            dec.next_packet(),
            Err(DecodeError::CorruptHeader { msg_len: 10, .. })
        ));
    }

    #[test]
    fn test_short_nb_length_is_fatal() {
        let mut data = PacketHeader::new(MSG_TYPE_NB, 30).to_bytes().to_vec();
        data.extend_from_slice(&[0; 30]);
        let mut ch = channel(data, 64);
        let mut dec = PacketDecoder::new(&mut ch);
        assert!(matches!(
            dec.next_packet(),
            Err(DecodeError::CorruptExtendedHeader { msg_len: 30, .. })
        ));
    }

    #[test]
    fn test_truncated_message() {
        let mut data = sample_message(MSG_TYPE_NA, 1, 0b1, &[5, 6, 7]);
        data.truncate(data.len() - 2);
        let mut ch = channel(data, 64);
        let mut dec = PacketDecoder::new(&mut ch);
        assert!(matches!(
            dec.next_packet(),
            Err(DecodeError::Truncated { offset: 0, .. })
        ));
    }

    #[test]
    fn test_truncated_header() {
        let mut data = sample_message(MSG_TYPE_NA, 1, 0b1, &[5]);
        data.extend_from_slice(b"PSNA");
        let mut ch = channel(data, 64);
        let mut dec = PacketDecoder::new(&mut ch);
        assert!(dec.next_packet().unwrap().is_some());
        assert!(matches!(
            dec.next_packet(),
            Err(DecodeError::Truncated { needed: 16, .. })
        ));
    }

    #[test]
    fn test_unconsumed_body_is_drained() {
        let mut data = sample_message(MSG_TYPE_NA, 1, 0b1, &[1, 2, 3, 4]);
        data.extend(sample_message(MSG_TYPE_NA, 2, 0b1, &[9]));
        // small buffer forces compaction between packets
        let mut ch = channel(data, 48);
        let mut dec = PacketDecoder::new(&mut ch);

        assert_eq!(dec.next_packet().unwrap().unwrap().prefix().seqno, 1);
        let second = dec.next_packet().unwrap().unwrap();
        assert_eq!(second.prefix().seqno, 2);
        assert_eq!(dec.body(), &encode_sample(9));
    }
}
