/*! ESS readout envelope parser.

Every readout datagram starts with a 30-byte little-endian preamble common
to all detectors. The parser enforces header integrity, tracks sequence
numbers per output queue, and initialises the pulse time reference used for
TOF computation downstream.
*/
use log::debug;

use crate::esstime::{valid_frac, EssTime};
use crate::stats::Counter;

/// Size of the envelope preamble in bytes.
pub const HEADER_SIZE: usize = 30;

/// Cookie carried by every envelope.
pub const COOKIE: &[u8; 3] = b"ESS";

/// Number of logical output queues; each tracks its own sequence numbers.
pub const MAX_OUTPUT_QUEUES: usize = 24;

/// Type/subtype byte for Freia-style VMM3 instruments.
pub const TYPE_VMM3: u8 = 0x48;

/// Envelope rejection reasons. Each maps to exactly one counter in
/// [`ReadoutStats`].
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    /// Buffer too short to hold any header.
    #[error("buffer too short for an envelope")]
    Buffer,
    /// Declared total length disagrees with the received byte count.
    #[error("declared length does not match packet size")]
    Size,
    /// Bad cookie.
    #[error("bad cookie")]
    Cookie,
    /// Nonzero padding byte.
    #[error("bad padding")]
    Pad,
    /// Unsupported version.
    #[error("unsupported version")]
    Version,
    /// Output queue id out of range.
    #[error("output queue out of range")]
    OutputQueue,
    /// Type/subtype does not match this detector.
    #[error("wrong readout type")]
    TypeSubType,
    /// Pulse and previous pulse further apart than allowed.
    #[error("pulse time reference jump too large")]
    TimeHigh,
    /// Fractional pulse time beyond one clock period.
    #[error("invalid fractional pulse time")]
    TimeFrac,
}

/// Envelope parser counters.
#[derive(Clone, Default)]
pub struct ReadoutStats {
    /// Buffers too short to inspect.
    pub error_buffer: Counter,
    /// Length mismatches.
    pub error_size: Counter,
    /// Cookie mismatches.
    pub error_cookie: Counter,
    /// Padding violations.
    pub error_pad: Counter,
    /// Version violations.
    pub error_version: Counter,
    /// Output queue violations.
    pub error_output_queue: Counter,
    /// Type/subtype mismatches.
    pub error_type_subtype: Counter,
    /// Sequence number gaps (not fatal, packets are still processed).
    pub error_seqnum: Counter,
    /// Pulse reference jumps beyond the configured maximum.
    pub error_time_high: Counter,
    /// Invalid fractional pulse times.
    pub error_time_frac: Counter,
    /// Packets without payload.
    pub heartbeats: Counter,
}

/// Normalised envelope header, host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Header version (0 or 1).
    pub version: u8,
    /// Type/subtype byte.
    pub type_id: u8,
    /// Declared total packet length, header included.
    pub total_length: u16,
    /// Output queue this packet belongs to.
    pub output_queue: u8,
    /// Time source id.
    pub time_source: u8,
    /// Pulse time, seconds part.
    pub pulse_high: u32,
    /// Pulse time, fractional ticks.
    pub pulse_low: u32,
    /// Previous pulse time, seconds part.
    pub prev_pulse_high: u32,
    /// Previous pulse time, fractional ticks.
    pub prev_pulse_low: u32,
    /// Per-queue sequence number.
    pub seq_num: u32,
}

/// A validated packet: normalised header plus the payload span.
pub struct Packet<'a> {
    /// Parsed header.
    pub header: PacketHeader,
    /// Payload after the envelope preamble.
    pub data: &'a [u8],
}

fn u16_le(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn u32_le(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

/// Envelope parser with per-queue sequence tracking and the packet time
/// reference.
pub struct Parser {
    /// Counter block, registered with the stats fabric at startup.
    pub stats: ReadoutStats,
    /// Pulse/previous-pulse reference of the last validated packet.
    pub time: EssTime,
    next_seq_num: [Option<u32>; MAX_OUTPUT_QUEUES],
    max_pulse_time_diff_ns: u64,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    /// New parser accepting any pulse-time jump.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stats: ReadoutStats::default(),
            time: EssTime::new(),
            next_seq_num: [None; MAX_OUTPUT_QUEUES],
            max_pulse_time_diff_ns: u64::MAX,
        }
    }

    /// Limit the allowed distance between pulse and previous pulse.
    pub fn set_max_pulse_time_diff(&mut self, ns: u64) {
        self.max_pulse_time_diff_ns = ns;
    }

    /// Validate an envelope against `expected_type`.
    ///
    /// On success the pulse references in [`Parser::time`] are updated and
    /// the payload span is returned. Sequence gaps are counted per output
    /// queue and resynchronised, but do not reject the packet.
    pub fn validate<'a>(
        &mut self,
        buf: &'a [u8],
        expected_type: u8,
    ) -> Result<Packet<'a>, HeaderError> {
        // The pad/version/cookie fields are checked before the length so
        // that truncated garbage is classified by what is wrong first.
        if buf.len() < 5 {
            self.stats.error_buffer.inc();
            return Err(HeaderError::Buffer);
        }
        if buf[0] != 0 {
            self.stats.error_pad.inc();
            return Err(HeaderError::Pad);
        }
        let version = buf[1];
        if version > 1 {
            self.stats.error_version.inc();
            return Err(HeaderError::Version);
        }
        if &buf[2..5] != COOKIE {
            self.stats.error_cookie.inc();
            return Err(HeaderError::Cookie);
        }
        if buf.len() < HEADER_SIZE {
            self.stats.error_buffer.inc();
            return Err(HeaderError::Buffer);
        }

        let header = PacketHeader {
            version,
            type_id: buf[5],
            total_length: u16_le(&buf[6..8]),
            output_queue: buf[8],
            time_source: buf[9],
            pulse_high: u32_le(&buf[10..14]),
            pulse_low: u32_le(&buf[14..18]),
            prev_pulse_high: u32_le(&buf[18..22]),
            prev_pulse_low: u32_le(&buf[22..26]),
            seq_num: u32_le(&buf[26..30]),
        };

        if header.type_id != expected_type {
            self.stats.error_type_subtype.inc();
            return Err(HeaderError::TypeSubType);
        }
        if usize::from(header.total_length) != buf.len() {
            self.stats.error_size.inc();
            return Err(HeaderError::Size);
        }
        if usize::from(header.output_queue) >= MAX_OUTPUT_QUEUES {
            self.stats.error_output_queue.inc();
            return Err(HeaderError::OutputQueue);
        }
        if !valid_frac(header.pulse_low) || !valid_frac(header.prev_pulse_low) {
            self.stats.error_time_frac.inc();
            return Err(HeaderError::TimeFrac);
        }

        let pulse_ns = self.time.set_reference(header.pulse_high, header.pulse_low);
        let prev_ns = self
            .time
            .set_prev_reference(header.prev_pulse_high, header.prev_pulse_low);
        if pulse_ns.abs_diff(prev_ns) > self.max_pulse_time_diff_ns {
            self.stats.error_time_high.inc();
            return Err(HeaderError::TimeHigh);
        }

        let queue = usize::from(header.output_queue);
        match self.next_seq_num[queue] {
            Some(expected) if expected != header.seq_num => {
                debug!(
                    "Queue {queue}: expected sequence number {expected}, got {}",
                    header.seq_num
                );
                self.stats.error_seqnum.inc();
            }
            _ => {}
        }
        self.next_seq_num[queue] = Some(header.seq_num.wrapping_add(1));

        let data = &buf[HEADER_SIZE..];
        if data.is_empty() {
            self.stats.heartbeats.inc();
        }
        Ok(Packet { header, data })
    }
}
