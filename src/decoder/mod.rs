//! Decoder module for Quartz digitizer packet recordings
//!
//! Turns a buffered input stream into a sequence of sample packets.

pub mod packet;
pub mod wire;

pub use packet::{DecodeError, DecoderStats, Packet, PacketDecoder};
pub use wire::{
    active_channels, decode_sample, encode_sample, ExtendedPrefix, MessageType, PacketHeader,
    SamplePrefix, MAX_CHANNELS, MSG_TYPE_NA, MSG_TYPE_NB, PROTOCOL_MARKER, SAMPLE_SIZE,
};
