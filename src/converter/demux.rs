//! Channel demultiplexer
//!
//! A body is a run of time points; each time point holds one 3-byte sample
//! per active channel, lowest channel first.

use super::state::ConversionState;
use crate::common::{ConvertError, ConvertResult};
use crate::decoder::{decode_sample, SAMPLE_SIZE};
use crate::output::SampleSink;

/// Split one packet body into the per-channel streams.
///
/// Returns the number of time points written. The last value of every
/// channel and the time-point count are kept in `state` for gap recovery.
pub fn demux_packet<S: SampleSink>(
    state: &mut ConversionState,
    seqno: u64,
    body: &[u8],
    sink: &mut S,
) -> ConvertResult<usize> {
    if body.len() % SAMPLE_SIZE != 0 {
        return Err(ConvertError::BodyNotAligned {
            seqno,
            body_len: body.len(),
        });
    }

    let nchan = state.active.len();
    let samples = body.len() / SAMPLE_SIZE;
    if nchan == 0 || samples % nchan != 0 {
        return Err(ConvertError::TruncatedBody {
            seqno,
            samples,
            channels: nchan,
        });
    }

    for point in body.chunks_exact(SAMPLE_SIZE * nchan) {
        for (&ch, raw) in state.active.iter().zip(point.chunks_exact(SAMPLE_SIZE)) {
            let value = decode_sample([raw[0], raw[1], raw[2]]);
            sink.write_sample(ch, value)?;
            state.last_sample_value[ch] = value;
        }
    }

    state.last_samples_per_channel = samples / nchan;
    Ok(state.last_samples_per_channel)
}
