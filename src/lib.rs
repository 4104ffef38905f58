//! quartz-demux: converter for Quartz digitizer packet recordings
//!
//! Decodes recorded "PS" packet streams, repairs sequence gaps by
//! zero-order hold and splits the interleaved samples into one file per
//! active channel.

pub mod channel;
pub mod common;
pub mod config;
pub mod converter;
pub mod decoder;
pub mod emulator;
pub mod output;

pub use converter::{convert, convert_in_background, ConversionReport, Converter};
