//! Sequence gap detection and zero-order-hold recovery
//!
//! Lost packets show up as a jump in the sequence number. Before filling the
//! hole, the size of the jump is checked against the timestamps: the implied
//! per-channel sampling rate must fall inside the digitizer's range, otherwise
//! the sequence numbers and the clock disagree and the data cannot be trusted.

use tracing::warn;

use super::state::ConversionState;
use crate::common::{ConvertError, ConvertResult};
use crate::decoder::SamplePrefix;
use crate::output::SampleSink;

const NANOS_PER_SEC: f64 = 1e9;

/// Plausible per-channel sampling rates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateEnvelope {
    pub min_hz: f64,
    pub max_hz: f64,
}

impl Default for RateEnvelope {
    fn default() -> Self {
        Self {
            min_hz: 0.9e3,
            max_hz: 290e3,
        }
    }
}

impl RateEnvelope {
    /// NaN and infinities are never contained
    pub fn contains(&self, rate_hz: f64) -> bool {
        rate_hz >= self.min_hz && rate_hz <= self.max_hz
    }
}

/// A detected run of lost packets
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gap {
    /// Number of lost packets
    pub missing: u64,
    /// First lost sequence number
    pub first_missing: u64,
    /// Sequence number that ended the gap
    pub next_seqno: u64,
    /// Seconds between the packets around the gap
    pub delta_t: f64,
    /// Per-channel rate implied by the gap
    pub rate_hz: f64,
}

impl Gap {
    /// Diagnostic line, e.g. `Missing 1 [1203, 1204) 0.0014 s`
    pub fn describe(&self) -> String {
        format!(
            "Missing {} [{}, {}) {} s",
            self.missing,
            self.first_missing,
            self.next_seqno,
            significant(self.delta_t)
        )
    }
}

/// Six significant digits with trailing zeros dropped, as printf's `%g`
fn significant(x: f64) -> String {
    const DIGITS: i32 = 6;
    if x == 0.0 || !x.is_finite() {
        return x.to_string();
    }
    let sci = format!("{:.*e}", (DIGITS - 1) as usize, x);
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return sci;
    };
    let Ok(exp) = exp.parse::<i32>() else {
        return sci;
    };
    if exp < -4 || exp >= DIGITS {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_zeros(mantissa), sign, exp.abs())
    } else {
        let decimals = (DIGITS - 1 - exp) as usize;
        trim_zeros(&format!("{:.*}", decimals, x)).to_string()
    }
}

fn trim_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Validates continuity between consecutive packets and fills gaps
#[derive(Debug, Clone, Copy, Default)]
pub struct GapRecoverer {
    envelope: RateEnvelope,
}

impl GapRecoverer {
    pub fn new(envelope: RateEnvelope) -> Self {
        Self { envelope }
    }

    /// Check `prefix` against the previous packet and fill any gap.
    ///
    /// Must not be called for the first packet of a run. Held samples are
    /// written in the same time-point order as real samples.
    pub fn recover<S: SampleSink>(
        &self,
        state: &mut ConversionState,
        prefix: &SamplePrefix,
        sink: &mut S,
    ) -> ConvertResult<Option<Gap>> {
        if prefix.channel_mask != state.last_channel_mask {
            return Err(ConvertError::ChannelMaskChanged {
                expected: state.last_channel_mask,
                actual: prefix.channel_mask,
                seqno: prefix.seqno,
            });
        }

        let expected = match state.last_seqno.checked_add(1) {
            Some(next) if prefix.seqno >= next => next,
            _ => {
                return Err(ConvertError::SequenceNotIncreasing {
                    previous: state.last_seqno,
                    current: prefix.seqno,
                })
            }
        };
        if prefix.seqno == expected {
            return Ok(None);
        }

        // eg. expect 15, have 17: 15 and 16 missing
        let missing = prefix.seqno - expected;
        let delta_ns = prefix.timestamp_ns() as i128 - state.last_timestamp_ns as i128;
        let delta_t = delta_ns as f64 / NANOS_PER_SEC;
        let rate_hz = (missing as f64 * state.last_samples_per_channel as f64) / delta_t;

        let gap = Gap {
            missing,
            first_missing: expected,
            next_seqno: prefix.seqno,
            delta_t,
            rate_hz,
        };
        warn!(
            missing,
            first = expected,
            next = prefix.seqno,
            delta_t,
            rate_hz,
            "Sequence gap"
        );
        state.record(gap.describe());

        if !self.envelope.contains(rate_hz) {
            if !state.tolerate_anomalies {
                return Err(ConvertError::ImplausibleRate {
                    delta_t,
                    missing,
                    rate_hz,
                });
            }
            state.record(format!(
                "Inconsistency between timestamp {} s and seqno gap {}, Fsamp {} Hz (tolerated)",
                significant(delta_t),
                missing,
                significant(rate_hz)
            ));
        }

        for _ in 0..missing {
            for _ in 0..state.last_samples_per_channel {
                for &ch in &state.active {
                    sink.write_sample(ch, state.last_sample_value[ch])?;
                }
            }
        }
        state.missing_packets += missing;

        Ok(Some(gap))
    }
}
